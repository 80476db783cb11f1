#![forbid(unsafe_code)]

//! Library half of ytsync.
//!
//! The modules here carry everything the `ytsync` binary needs that benefits
//! from unit testing: catalog API pagination, item filtering, sidecar
//! metadata writes, and the download orchestrator that drives yt-dlp.

pub mod api;
pub mod config;
pub mod filter;
pub mod metadata;
pub mod security;
pub mod sync;
