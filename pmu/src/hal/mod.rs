//! Chip-generation HAL and external collaborator contracts
//!
//! Per-chip behavioral variation is selected at construction time by
//! injecting a [`PgHal`] implementation, replacing raw function-pointer
//! tables with a strategy trait. The other traits here are the contracts of
//! excluded collaborators: clock programming, voltage rails, BIOS tables and
//! diagnostics sinks.

pub mod gm20b;
pub mod gv11b;

pub use gm20b::Gm20b;
pub use gv11b::Gv11b;

use crate::error::Result;
use crate::pg::{PgEngineId, PgStats};
use crate::pstate::ClkDomain;
use crate::rpc::{RpcChannel, RpcError};

/// Feature bit: the engine supports full power-gating
pub const PG_FEATURE_POWER_GATING: u32 = 1 << 0;
/// Feature bit: the engine supports rail-gating only
pub const PG_FEATURE_RAIL_GATING: u32 = 1 << 1;

/// Engine buffer index: FECS context buffer
pub const PG_BUFFER_IDX_FECS: u8 = 0;
/// Engine buffer index: ZBC buffer
pub const PG_BUFFER_IDX_ZBC: u8 = 1;

/// Chip generation selector used at subsystem construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipGen {
    Gm20b,
    Gv11b,
}

/// Per-chip-generation power-gating behavior
pub trait PgHal: Send + Sync {
    /// Post the ALLOW command for an engine
    fn allow(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> core::result::Result<(), RpcError>;

    /// Post the DISALLOW command for an engine
    fn disallow(
        &self,
        rpc: &dyn RpcChannel,
        engine: PgEngineId,
    ) -> core::result::Result<(), RpcError>;

    /// Post the one-time INIT command and allocate stat space for an engine
    fn init_send(
        &self,
        rpc: &dyn RpcChannel,
        engine: PgEngineId,
    ) -> core::result::Result<(), RpcError>;

    /// Load the FECS engine buffer
    fn load_buff(&self, rpc: &dyn RpcChannel) -> core::result::Result<(), RpcError>;

    /// Load the ZBC engine buffer
    fn hw_load_zbc(&self, rpc: &dyn RpcChannel) -> core::result::Result<(), RpcError>;

    /// Save ZBC entries across a gating cycle; best effort
    fn save_zbc(&self, rpc: &dyn RpcChannel, entries: u32);

    /// Program production register settings before enabling ELPG
    fn setup_elpg(&self) {}

    /// Engines this chip can power-gate
    fn supported_engines(&self) -> &'static [PgEngineId];

    /// Feature mask of one engine
    fn engines_feature_list(&self, engine: PgEngineId) -> u32;

    /// Whether a low-power feature id is available on this chip
    fn is_lpwr_feature_supported(&self, feature_id: u32) -> bool;

    /// Gating residency counters for an engine
    fn elpg_statistics(&self, engine: PgEngineId) -> PgStats;

    /// Whether disallow completion is confirmed by a second async PG event
    fn has_pg_event_path(&self) -> bool {
        false
    }
}

/// Clock-domain programming owned by the clock subsystem
pub trait ClockDomainOps: Send + Sync {
    /// Voltage in µV required to run `domain` at `freq_mhz`
    fn freq_to_volt(&self, domain: ClkDomain, freq_mhz: u32) -> Result<u32>;

    /// VFE equation index of the frequency margin, 0 when unconfigured
    fn freq_margin_equ_idx(&self) -> u8;
}

/// Voltage-rail limits owned by the volt subsystem
pub trait VoltRailOps: Send + Sync {
    /// `(vmin_uv, vmax_uv)` bounds of the rail
    fn vmin_vmax(&self) -> (u32, u32);

    /// VFE equation index of the voltage margin, 0 when unconfigured
    fn volt_margin_equ_idx(&self) -> u8;
}

/// Firmware table ids exposed by the BIOS parser
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerfTableId {
    PstateTable,
    VfeTable,
}

/// Access to raw firmware table bytes
pub trait BiosTable: Send + Sync {
    fn get_perf_table(&self, id: PerfTableId) -> Option<Vec<u8>>;
}

/// Best-effort logging sinks, never fail
pub trait Diagnostics: Send + Sync {
    fn dump_falcon_stats(&self);
    fn dump_elpg_stats(&self);
}

/// Diagnostics sink that only logs
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn dump_falcon_stats(&self) {
        log::error!("falcon stat dump requested");
    }

    fn dump_elpg_stats(&self) {
        log::error!("ELPG stat dump requested");
    }
}
