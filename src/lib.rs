//! Monitoring for a fleet of time-lapse camera sites.
//!
//! Cameras upload photos into a shared archive laid out as
//! `<root>/<site>/<YYYY-MM-DD>/<photo>`. This crate keeps two derived
//! artifacts current, a thumbnail per site and a statistics snapshot, and
//! serves them alongside the archive through a read-only HTTP API filtered
//! by per-user site grants.

pub mod access;
pub mod archive;
pub mod config;
pub mod jobs;
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod server;
