//! RPC channel contract between the control core and PMU firmware
//!
//! The transport itself (command queue encoding, DMA, mailbox registers) is an
//! external collaborator. The core only depends on this trait: a call that
//! enqueues to firmware and blocks until a reply or a transport failure.
//! Completion *events* (change-sequence completion, ELPG acks) do NOT arrive
//! through replies; the firmware-message dispatch context delivers them by
//! calling the controllers' `handle_*` entry points directly.
//!
//! Wire values live here so enum-to-firmware conversions stay isolated at the
//! boundary.

use core::fmt;

use crate::changeseq::script::{ChangeInput, ScriptSlot};
use crate::pg::PgEngineId;
use crate::vfe::VfeOutputType;

/// PMU unit id carried in every command header (wire value)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcUnit {
    Perf,
    Pg,
}

impl RpcUnit {
    pub fn wire_value(self) -> u8 {
        match self {
            RpcUnit::Perf => 0x13,
            RpcUnit::Pg => 0x03,
        }
    }
}

/// PERF unit function ids
pub const RPC_ID_PERF_VFE_EQU_EVAL: u8 = 0x02;
pub const RPC_ID_PERF_CHANGE_SEQ_INFO_GET: u8 = 0x03;
pub const RPC_ID_PERF_CHANGE_SEQ_INFO_SET: u8 = 0x04;
pub const RPC_ID_PERF_CHANGE_SEQ_QUEUE_CHANGE: u8 = 0x05;
pub const RPC_ID_PERF_SEQ_COMPLETION: u8 = 0x06;

/// PG unit function ids
pub const RPC_ID_PG_INIT: u8 = 0x10;
pub const RPC_ID_PG_ALLOW: u8 = 0x11;
pub const RPC_ID_PG_DISALLOW: u8 = 0x12;
pub const RPC_ID_PG_THRESHOLD_UPDATE: u8 = 0x13;
pub const RPC_ID_PG_ENG_BUF_LOAD: u8 = 0x14;
pub const RPC_ID_PG_ZBC_SAVE: u8 = 0x15;
pub const RPC_ID_PG_STAT_ALLOC: u8 = 0x16;

/// One typed request to the PMU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcCall {
    /// Evaluate a VFE equation on the co-processor
    VfeEquEval {
        equ_idx: u8,
        output_type: VfeOutputType,
        var_count: u8,
    },
    /// Read back a change-sequence info block for a script slot
    ChangeSeqInfoGet { slot: ScriptSlot },
    /// Push the client lock mask / step-id ownership to firmware
    ChangeSeqInfoSet {
        client_lock_mask: u32,
        cpu_step_id_mask: u32,
    },
    /// Queue a pstate/clock/voltage change for execution
    ChangeSeqQueueChange { input: ChangeInput },
    /// One-time PG engine initialization
    PgInit { engine: PgEngineId },
    /// Allow power-gating on an engine
    PgAllow { engine: PgEngineId },
    /// Disallow power-gating on an engine
    PgDisallow { engine: PgEngineId },
    /// Update adaptive-PG thresholds
    PgThresholdUpdate {
        engine: PgEngineId,
        params: [u32; 5],
    },
    /// Load an engine buffer (PG buffer or ZBC buffer)
    PgEngBufLoad { engine: PgEngineId, buf_idx: u8 },
    /// Save ZBC table entries across a gating cycle
    PgZbcSave { entries: u32 },
    /// Allocate per-engine stat space in PMU DMEM
    PgStatAlloc { engine: PgEngineId },
}

impl RpcCall {
    pub fn unit(&self) -> RpcUnit {
        match self {
            RpcCall::VfeEquEval { .. }
            | RpcCall::ChangeSeqInfoGet { .. }
            | RpcCall::ChangeSeqInfoSet { .. }
            | RpcCall::ChangeSeqQueueChange { .. } => RpcUnit::Perf,
            _ => RpcUnit::Pg,
        }
    }

    pub fn function(&self) -> u8 {
        match self {
            RpcCall::VfeEquEval { .. } => RPC_ID_PERF_VFE_EQU_EVAL,
            RpcCall::ChangeSeqInfoGet { .. } => RPC_ID_PERF_CHANGE_SEQ_INFO_GET,
            RpcCall::ChangeSeqInfoSet { .. } => RPC_ID_PERF_CHANGE_SEQ_INFO_SET,
            RpcCall::ChangeSeqQueueChange { .. } => RPC_ID_PERF_CHANGE_SEQ_QUEUE_CHANGE,
            RpcCall::PgInit { .. } => RPC_ID_PG_INIT,
            RpcCall::PgAllow { .. } => RPC_ID_PG_ALLOW,
            RpcCall::PgDisallow { .. } => RPC_ID_PG_DISALLOW,
            RpcCall::PgThresholdUpdate { .. } => RPC_ID_PG_THRESHOLD_UPDATE,
            RpcCall::PgEngBufLoad { .. } => RPC_ID_PG_ENG_BUF_LOAD,
            RpcCall::PgZbcSave { .. } => RPC_ID_PG_ZBC_SAVE,
            RpcCall::PgStatAlloc { .. } => RPC_ID_PG_STAT_ALLOC,
        }
    }
}

/// Typed result union of a VFE equation evaluation, interpreted per the
/// requested output type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquResult {
    Unitless(u32),
    FreqMhz(u32),
    VoltUv(u32),
    VoltDeltaUv(u32),
}

/// One typed reply from the PMU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcReply {
    /// Command accepted, nothing to report
    Ack,
    /// Evaluation result for `VfeEquEval`
    VfeEquResult(EquResult),
    /// Info block for `ChangeSeqInfoGet`
    ChangeSeqInfo {
        cpu_step_id_mask: u32,
        b_lock: bool,
    },
}

/// Transport-level failure of an RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// Command queue has no space
    QueueFull,
    /// The transport lost contact with the PMU
    TransportFailure,
    /// The firmware rejected the command with the given status
    FirmwareError(u32),
    /// The reply did not match the request
    UnexpectedReply,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::QueueFull => write!(f, "command queue full"),
            RpcError::TransportFailure => write!(f, "transport failure"),
            RpcError::FirmwareError(s) => write!(f, "firmware status 0x{:08x}", s),
            RpcError::UnexpectedReply => write!(f, "unexpected reply"),
        }
    }
}

/// Synchronous-looking command channel into the PMU
///
/// `execute` enqueues the call and blocks until the firmware replies or the
/// transport fails. The excluded transport layer serializes command issuance;
/// callers never see interleaved replies.
pub trait RpcChannel: Send + Sync {
    fn execute(&self, call: RpcCall) -> core::result::Result<RpcReply, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_routing() {
        let call = RpcCall::VfeEquEval {
            equ_idx: 3,
            output_type: VfeOutputType::VoltDeltaUv,
            var_count: 0,
        };
        assert_eq!(call.unit(), RpcUnit::Perf);
        assert_eq!(call.function(), RPC_ID_PERF_VFE_EQU_EVAL);

        let call = RpcCall::PgAllow {
            engine: PgEngineId::Graphics,
        };
        assert_eq!(call.unit(), RpcUnit::Pg);
        assert_eq!(call.function(), RPC_ID_PG_ALLOW);
    }

    #[test]
    fn test_wire_values_distinct() {
        assert_ne!(RpcUnit::Perf.wire_value(), RpcUnit::Pg.wire_value());
    }
}
