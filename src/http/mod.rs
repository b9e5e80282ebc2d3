//! HTTP layer for the git hosting gateway.
//!
//! This module provides the axum-based server that terminates git smart-HTTP
//! requests, runs the access decision chain, frames ref advertisements in
//! pkt-line and reverse-proxies dumb-protocol file requests to per-request
//! CGI backends.

pub mod handler;
pub mod pktline;
pub mod proxy;
