//! Unified error handling for the PMU control core
//!
//! Every fallible operation in the crate reports one of these errors.
//! Configuration and table-parse failures are fatal to subsystem setup;
//! transport and timeout errors are surfaced to the caller without retry,
//! leaving the subsystem in its last-known state.

use core::fmt;

use crate::rpc::RpcError;

/// Unified PMU error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PmuError {
    /// Firmware table version does not match the supported format
    UnsupportedTableVersion(u8),
    /// Firmware table header is truncated or carries impossible sizes
    MalformedTableHeader,
    /// Parsed clock range violates `min <= nominal <= max`
    MalformedClockRange,
    /// Table entry at the given index cannot be decoded
    InvalidTableEntry(u32),

    /// Board object group slot already occupied
    DuplicateIndex(u8),
    /// Index beyond the group capacity
    IndexOutOfRange(u8),
    /// Mask operation on masks of different capacity
    MaskSizeMismatch,

    /// Equation graph references itself along a sibling or operand chain
    CyclicEquationGraph(u8),
    /// Equation index does not resolve to a constructed equation
    VfeEquNotFound(u8),
    /// Variable index does not resolve to a constructed variable
    VfeVarNotFound(u8),

    /// RPC submission to the PMU failed before any wait began
    RpcSubmitFailed(RpcError),
    /// Margin evaluation RPC failed
    MarginEvalFailed(RpcError),
    /// Frequency-to-voltage translation failed for the requested point
    FreqToVoltFailed,

    /// Change-sequence completion event not received within the bound
    ChangeTimedOut,
    /// ELPG allow acknowledgment not received within the bound
    EnableAckTimedOut,
    /// ELPG disallow acknowledgment not received within the bound
    DisableAckTimedOut,
    /// Background worker failed to stop within the bounded join loop
    WorkerJoinTimedOut,
    /// Background worker thread could not be created
    WorkerSpawnFailed,

    /// A change is already submitted and not yet acknowledged
    ChangeAlreadyInFlight,
    /// No pstate with the requested id exists in the table
    PstateNotFound(u32),
    /// Margin-adjusted voltage exceeds the rail maximum
    VoltageExceedsMax {
        requested_uv: u32,
        vmax_uv: u32,
    },
    /// Engine id is not valid for this chip's power-gating configuration
    InvalidEngine(u8),
}

impl fmt::Display for PmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PmuError::UnsupportedTableVersion(v) => {
                write!(f, "unsupported firmware table version 0x{:02x}", v)
            }
            PmuError::MalformedTableHeader => write!(f, "malformed firmware table header"),
            PmuError::MalformedClockRange => {
                write!(f, "clock range violates min <= nominal <= max")
            }
            PmuError::InvalidTableEntry(i) => write!(f, "undecodable table entry {}", i),
            PmuError::DuplicateIndex(i) => write!(f, "object already inserted at index {}", i),
            PmuError::IndexOutOfRange(i) => write!(f, "index {} beyond group capacity", i),
            PmuError::MaskSizeMismatch => write!(f, "mask capacity mismatch"),
            PmuError::CyclicEquationGraph(i) => {
                write!(f, "equation graph cycle through index {}", i)
            }
            PmuError::VfeEquNotFound(i) => write!(f, "no equation at index {}", i),
            PmuError::VfeVarNotFound(i) => write!(f, "no variable at index {}", i),
            PmuError::RpcSubmitFailed(e) => write!(f, "RPC submit failed: {}", e),
            PmuError::MarginEvalFailed(e) => write!(f, "margin evaluation failed: {}", e),
            PmuError::FreqToVoltFailed => write!(f, "frequency-to-voltage translation failed"),
            PmuError::ChangeTimedOut => write!(f, "change-sequence completion timed out"),
            PmuError::EnableAckTimedOut => write!(f, "ELPG allow ack timed out"),
            PmuError::DisableAckTimedOut => write!(f, "ELPG disallow ack timed out"),
            PmuError::WorkerJoinTimedOut => write!(f, "background worker join timed out"),
            PmuError::WorkerSpawnFailed => write!(f, "background worker spawn failed"),
            PmuError::ChangeAlreadyInFlight => write!(f, "change already in flight"),
            PmuError::PstateNotFound(id) => write!(f, "pstate P{} not present", id),
            PmuError::VoltageExceedsMax {
                requested_uv,
                vmax_uv,
            } => write!(
                f,
                "voltage {}uV exceeds rail maximum {}uV",
                requested_uv, vmax_uv
            ),
            PmuError::InvalidEngine(id) => write!(f, "invalid PG engine id {}", id),
        }
    }
}

/// Crate-wide result alias
pub type Result<T> = core::result::Result<T, PmuError>;
