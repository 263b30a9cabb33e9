//! Shared memory subsystem constants and wire types.
//!
//! - `consts`: segment size limits and cache line constants.
//! - `link`: model identifiers and the mailbox message header.

pub mod consts;
pub mod link;
