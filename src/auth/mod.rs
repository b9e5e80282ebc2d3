//! Authentication and authorisation subsystem.
//!
//! Parses HTTP Basic credentials, verifies them against the directory's
//! double-SHA-256 digests, answers read/write authority questions, and runs
//! the staged access decision chain that gates every repository route.

pub mod basic;
pub mod chain;
pub mod invitations;
pub mod policy;
