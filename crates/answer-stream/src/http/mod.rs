//! HTTP transport built on reqwest.
//!
//! The adapter exposes the response body the way a polling client sees it:
//! repeated snapshots of everything received so far, then one terminal
//! notification with the status and complete body.
mod adapter;
mod config;
mod utf8;

pub use adapter::HttpTransport;
pub use config::HttpTransportConfig;
