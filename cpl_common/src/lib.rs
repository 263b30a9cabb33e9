//! Coupler Common Library
//!
//! Shared constants, model identifiers and configuration loading utilities
//! for every crate of the coupler workspace.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Physical and protocol constants
//! - [`field_code`] - Fixed-capacity field code strings
//! - [`shm`] - Shared memory constants and the mailbox message header
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cpl_common::config::{ConfigLoader, SharedConfig};
//! use cpl_common::shm::link::ModelId;
//! ```

pub mod config;
pub mod consts;
pub mod field_code;
pub mod prelude;
pub mod shm;
