//! Offline-first photo journal.
//!
//! Two independent pieces keep the application usable without connectivity:
//! - [`db`]: a timeout-guarded SQLite store for posts and users
//! - [`cache`]: a versioned asset shell and a router that answers every
//!   request from the network, the shell bucket or a local fallback

pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod http;
