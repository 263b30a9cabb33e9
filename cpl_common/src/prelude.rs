//! Prelude module for common re-exports.
//!
//! ```rust
//! use cpl_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Field identity ─────────────────────────────────────────────────
pub use crate::field_code::{FieldCode, FieldCodeError};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_HALO_WIDTH, DEFAULT_RECV_TIMEOUT_MS, FIELD_CODE_LEN};

// ─── Shared memory mailbox ──────────────────────────────────────────
pub use crate::shm::link::{MessageHeader, ModelId};
