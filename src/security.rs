#![forbid(unsafe_code)]

//! Process-level safety checks for the ytsync binary.

use anyhow::{Result, bail};
use nix::unistd::Uid;

/// Fails fast when started as root. A sync tool that shells out to an
/// external downloader has no business writing media as uid 0.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!("{process} must not be run as root; use a regular user account");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn allows_unprivileged_uid() {
        assert!(ensure_not_root_for(Uid::from_raw(1000), "ytsync").is_ok());
    }

    #[test]
    fn rejects_root_uid() {
        let err = ensure_not_root_for(Uid::from_raw(0), "ytsync").unwrap_err();
        assert!(err.to_string().contains("must not be run as root"));
    }
}
