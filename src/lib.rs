//! # airpatch
//!
//! Broadcast-safe audio routing daemon with critical-connection protection.
//!
//! `airpatch` manages the connection graph of a JACK-style audio server on a
//! broadcast host: it discovers clients and edges, applies named routing
//! profiles, switches the input feeding the playout system without ever
//! touching live on-air audio, and reacts to clients appearing and
//! disappearing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use airpatch::{DaemonConfig, ProfileStore, RoutingController};
//! use airpatch::launcher::ProcessLauncher;
//! use airpatch::server::JackServer;
//!
//! let server = Arc::new(JackServer::new());
//! let launcher = Arc::new(ProcessLauncher::default());
//! let store = ProfileStore::open(ProfileStore::default_path());
//!
//! let mut controller =
//!     RoutingController::new(server, launcher, store, DaemonConfig::default());
//! controller.load_profile("live-broadcast").await?;
//! ```
//!
//! ## Architecture
//!
//! Six components collaborate, leaves first:
//!
//! - **`server`**: the only code touching the audio server's native API
//! - **`graph`**: polled, atomically replaced snapshots of the graph
//! - **`critical`**: the registry of untouchable clients and edges
//! - **`profile`**: the XML-backed profile store
//! - **`controller`**: the policy brain every mutation passes through
//! - **`monitor`**: the snapshot differ reacting to client churn
//!
//! The daemon binds them to one cooperative event loop (`daemon`) and
//! publishes a request/event surface (`ipc`). No audio samples are ever
//! processed here; the engine routes, it does not mix.

#![warn(missing_docs)]
// unwrap/expect are confined to tests.
#![allow(clippy::unwrap_used)]

pub mod config;
pub mod controller;
pub mod critical;
pub mod daemon;
pub mod devices;
mod error;
pub mod event;
pub mod graph;
pub mod ipc;
pub mod launcher;
pub mod monitor;
pub mod profile;
pub mod server;

pub use config::DaemonConfig;
pub use controller::RoutingController;
pub use critical::CriticalSet;
pub use daemon::{DaemonHandle, RoutingDaemon};
pub use error::{RouteError, SwitchOutcome};
pub use event::{event_callback, EventCallback, EventLog, RouteEvent, SequencedEvent};
pub use graph::{ClientKind, Edge, GraphModel, GraphSnapshot};
pub use ipc::IpcServer;
pub use monitor::ClientMonitor;
pub use profile::{Profile, ProfileStore};
