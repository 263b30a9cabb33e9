//! # Ocean/Sea-Ice Field Coupler
//!
//! Exchanges physical fields between two independently decomposed
//! parallel models sharing one structured grid.
//!
//! ## Architecture Overview
//!
//! ```text
//!  ocean rank ───────────────────────────────────────────── ice rank
//!  NativeModel                                          NativeModel
//!     │ export                                           ▲ import
//!     ▼                                                  │
//!  FieldAdapter ──► AttrVect ──► TransferEngine ──► AttrVect ──► FieldAdapter
//!                               (Router, Communicator)
//! ```
//!
//! Every rank owns one tile. At `initialize` the tile's [`gsmap::GlobalSegMap`]
//! is exchanged with the peer model's ranks to build a [`router::Router`];
//! each `exchange` then moves one [`attrvect::AttrVect`] per direction and
//! converts between buffer columns and native staggered arrays.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use cpl_coupler::config::CouplerConfig;
//! use cpl_coupler::coupler::Coupler;
//! use cpl_coupler::native::ModelState;
//! use cpl_coupler::transport::shm::ShmCommunicator;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CouplerConfig::from_file(Path::new("ocean.toml"))?;
//! cpl_coupler::init_tracing(&config.shared);
//!
//! let comm = ShmCommunicator::new(
//!     &config.shared.run_id,
//!     0,
//!     4,
//!     config.coupling.mailbox_bytes,
//!     config.coupling.recv_timeout(),
//! )?;
//! let comm = Arc::new(comm);
//! let mut coupler = Coupler::new(comm.clone());
//! coupler.initialize(&config)?;
//!
//! let mut state = ModelState::new();
//! let report = coupler.exchange(&mut state)?;
//! println!("round {} skipped {:?}", report.round, report.skipped);
//!
//! coupler.finalize()?;
//! comm.drain(Duration::from_secs(5));
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod attrvect;
pub mod boundary;
pub mod config;
pub mod coupler;
pub mod error;
pub mod grid;
pub mod gsmap;
pub mod lifecycle;
pub mod native;
pub mod registry;
pub mod router;
pub mod thermo;
pub mod transfer;
pub mod transport;
pub mod vertical;
pub mod world;

pub use coupler::{Coupler, CouplingContext, FieldSummary, RoundReport};
pub use error::{CouplingError, DecompositionError, TransportError};

use cpl_common::config::SharedConfig;

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the configured level. Calling it twice is harmless.
pub fn init_tracing(shared: &SharedConfig) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(shared.log_level.as_directive()));
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
