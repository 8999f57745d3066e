//! regionpulse - probes regional PostgreSQL endpoints and keeps a history of
//! what it found.
//!
//! [`orchestrator::ProbeOrchestrator`] is the entry point: it resolves a region
//! from the [`registry`], checks [`flags`], runs one of the [`monitoring`]
//! probers under a deadline and stores the result through [`database`].

pub mod config;
pub mod database;
pub mod error;
pub mod flags;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod registry;

pub use error::{EngineError, ErrorKind, ProbeError};
pub use orchestrator::{CallContext, ProbeOrchestrator};
