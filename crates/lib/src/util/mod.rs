//! Shared utilities.
//!
//! Content hashing used by the cache store for signature checks.

pub mod hash;
