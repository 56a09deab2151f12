//! VFE variable/equation graph
//!
//! The VFE subsystem models small expression graphs whose leaves are physical
//! sensor/fuse/frequency/voltage values and whose internal nodes are simple
//! numeric operators. Evaluation happens on the PMU; the driver's job is to
//! parse the firmware table, compute which equations depend (transitively) on
//! which variables, and pick the right equation index when asking the PMU for
//! a margin.

pub mod equ;
pub mod var;

pub use equ::{build_dependency_masks, parse_vfe_table, VfeCompareFunc, VfeEqu, VfeEquKind};
pub use var::{VfeVar, VfeVarKind};

use crate::error::{PmuError, Result};
use crate::rpc::{EquResult, RpcCall, RpcChannel, RpcError, RpcReply};

/// Output unit of a VFE equation (wire values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfeOutputType {
    Unitless,
    FreqMhz,
    VoltUv,
    VfGain,
    VoltDeltaUv,
    WorkType,
    UtilRatio,
    WorkFbNorm,
    PowerMw,
    PowerOverUtilSlope,
    VinCode,
    Threshold,
}

impl VfeOutputType {
    pub fn wire_value(self) -> u8 {
        match self {
            VfeOutputType::Unitless => 0,
            VfeOutputType::FreqMhz => 1,
            VfeOutputType::VoltUv => 2,
            VfeOutputType::VfGain => 3,
            VfeOutputType::VoltDeltaUv => 4,
            VfeOutputType::WorkType => 5,
            VfeOutputType::UtilRatio => 6,
            VfeOutputType::WorkFbNorm => 7,
            VfeOutputType::PowerMw => 8,
            VfeOutputType::PowerOverUtilSlope => 9,
            VfeOutputType::VinCode => 10,
            VfeOutputType::Threshold => 11,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => VfeOutputType::Unitless,
            1 => VfeOutputType::FreqMhz,
            2 => VfeOutputType::VoltUv,
            3 => VfeOutputType::VfGain,
            4 => VfeOutputType::VoltDeltaUv,
            5 => VfeOutputType::WorkType,
            6 => VfeOutputType::UtilRatio,
            7 => VfeOutputType::WorkFbNorm,
            8 => VfeOutputType::PowerMw,
            9 => VfeOutputType::PowerOverUtilSlope,
            10 => VfeOutputType::VinCode,
            11 => VfeOutputType::Threshold,
            _ => return None,
        })
    }
}

/// Voltage margin in µV for the configured margin equation
///
/// Margin equation index 0 means "no margin equation configured": the margin
/// is zero and no RPC is issued.
pub fn volt_margin_uv(rpc: &dyn RpcChannel, vmargin_equ_idx: u8) -> Result<u32> {
    if vmargin_equ_idx == 0 {
        return Ok(0);
    }
    let reply = rpc
        .execute(RpcCall::VfeEquEval {
            equ_idx: vmargin_equ_idx,
            output_type: VfeOutputType::VoltDeltaUv,
            var_count: 0,
        })
        .map_err(PmuError::MarginEvalFailed)?;
    match reply {
        RpcReply::VfeEquResult(EquResult::VoltDeltaUv(uv))
        | RpcReply::VfeEquResult(EquResult::VoltUv(uv)) => Ok(uv),
        _ => Err(PmuError::MarginEvalFailed(RpcError::UnexpectedReply)),
    }
}

/// Frequency margin in MHz for the configured margin equation
///
/// Same index-0 short-circuit as [`volt_margin_uv`].
pub fn freq_margin_mhz(rpc: &dyn RpcChannel, fmargin_equ_idx: u8) -> Result<u32> {
    if fmargin_equ_idx == 0 {
        return Ok(0);
    }
    let reply = rpc
        .execute(RpcCall::VfeEquEval {
            equ_idx: fmargin_equ_idx,
            output_type: VfeOutputType::FreqMhz,
            var_count: 0,
        })
        .map_err(PmuError::MarginEvalFailed)?;
    match reply {
        RpcReply::VfeEquResult(EquResult::FreqMhz(mhz)) => Ok(mhz),
        _ => Err(PmuError::MarginEvalFailed(RpcError::UnexpectedReply)),
    }
}
