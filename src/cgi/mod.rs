//! Per-request CGI backends wrapping `git http-backend`.
//!
//! The dumb-protocol file routes are not serviced in-process; each request
//! gets a throwaway HTTP server on an ephemeral loopback port whose only
//! handler translates the request into an RFC-3875 invocation of
//! `git http-backend`. The gateway reverse-proxies to that port and tears
//! the backend down when the response finishes.

pub mod bridge;
pub mod supervisor;

pub use bridge::CgiBridge;
pub use supervisor::{CgiBackend, CgiSupervisor};
