//! mosaic-core — the orchestration kernel for the Mosaic Cast IPTV
//! compositor server.
//!
//! This crate implements the hard part described by the system it backs:
//! composing up to five live IPTV streams into a single MPEG-TS broadcast.
//!
//! # Architecture
//!
//! The crate is organized into one module per component, in the dependency
//! order leaves-first:
//!
//! - [`catalog`]: M3U playlist loading and channel lookup (C1)
//! - [`encoder`]: startup codec-profile probe (C2)
//! - [`filter_graph`]: pure compiler from layout + inputs to an encoder
//!   argument vector (C3)
//! - [`supervisor`]: subprocess lifecycle, optimistic restart, recycling (C4)
//! - [`broadcast`]: reader task and per-viewer backpressure-isolated
//!   fan-out (C5)
//! - [`watchdog`]: idle-timeout and size-triggered background task (C6)
//! - [`api`]: HTTP surface and the `/stream` viewer endpoint (C7)
//! - [`state`]: shared data model (channels, layouts, runtime mode)
//! - [`error`]: centralized error taxonomy
//! - [`bootstrap`]: composition root wiring C1–C6 together
//!
//! # Abstraction Traits
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//!   without hard-coding a runtime handle.

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod broadcast;
pub mod catalog;
pub mod config;
pub mod encoder;
pub mod error;
pub mod filter_graph;
pub mod protocol_constants;
pub mod runtime;
pub mod state;
pub mod supervisor;
pub mod utils;
pub mod watchdog;

pub use bootstrap::{bootstrap_services, BootstrappedServices};
pub use error::{AppError, AppResult, ErrorCode};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{Channel, CustomSlot, LayoutConfig, LayoutKind, Mode};
pub use utils::now_millis;

pub use api::{start_server, AppState, ServerError};
