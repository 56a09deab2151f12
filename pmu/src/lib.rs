//! GPU PMU performance and power-gating control core
//!
//! This crate implements the control/state-machine core of a GPU's
//! power-management-unit driver: performance-point (pstate) modeling,
//! voltage-frequency-equation dependency tracking, the change-sequence
//! controller that drives one operating-point transition to completion over
//! an RPC channel, and the reference-counted engine-level power-gating
//! (ELPG) state machine with its background bring-up worker.
//!
//! # Architecture
//!
//! - **Board objects** (`boardobj`): fixed-capacity indexed stores with
//!   bitmask iteration, underlying every firmware-described collection
//! - **VFE graph** (`vfe`): variables, equations, transitive dependency
//!   masks and PMU-delegated margin evaluation
//! - **Pstates** (`pstate`): performance levels parsed from a firmware table
//! - **Change sequence** (`changeseq`): builds and submits change scripts,
//!   tracks completion with timestamps
//! - **Power gating** (`pg`): per-engine refcounted enable/disable plus the
//!   one-time bring-up state machine
//! - **Perf facade** (`perf`): wires everything together and owns the
//!   background threads
//!
//! The firmware transport, register programming, BIOS parsing and voltage
//! rail internals are external collaborators injected as trait objects; see
//! the `rpc`, `surface` and `hal` modules for their contracts.

/// Unified error type and result alias
pub mod error;

/// RPC channel contract and wire ids
pub mod rpc;

/// Super-surface shared-memory accessors
pub mod surface;

/// Fixed-capacity indexed object stores
pub mod boardobj;

/// VFE variable/equation graph
pub mod vfe;

/// Pstate table
pub mod pstate;

/// Chip HAL and collaborator traits
pub mod hal;

/// Change-sequence controller
pub mod changeseq;

/// Engine-level power-gating controller
pub mod pg;

/// Top-level facade
pub mod perf;

pub use changeseq::{ChangeSeq, ChangeSeqFlags, ChangeState};
pub use error::{PmuError, Result};
pub use perf::{PerfController, PerfDeps, PmuConfig, VfeEvent};
pub use pg::{ElpgState, GoldenImageState, PgConfig, PgController, PgEngineId};
pub use pstate::{ClkDomain, Pstates};
