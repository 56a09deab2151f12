//! gm20b-generation power-gating HAL
//!
//! Graphics-only ELPG, single acknowledgment path.

use log::{debug, warn};

use crate::hal::{PgHal, PG_BUFFER_IDX_FECS, PG_BUFFER_IDX_ZBC, PG_FEATURE_POWER_GATING};
use crate::pg::{PgEngineId, PgStats};
use crate::rpc::{RpcCall, RpcChannel, RpcError};

pub struct Gm20b;

const SUPPORTED: &[PgEngineId] = &[PgEngineId::Graphics];

impl PgHal for Gm20b {
    fn allow(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gm20b: cmd post PG_ALLOW eng {:?}", engine);
        rpc.execute(RpcCall::PgAllow { engine }).map(|_| ())
    }

    fn disallow(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gm20b: cmd post PG_DISALLOW eng {:?}", engine);
        rpc.execute(RpcCall::PgDisallow { engine }).map(|_| ())
    }

    fn init_send(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gm20b: cmd post PG_INIT eng {:?}", engine);
        rpc.execute(RpcCall::PgInit { engine })?;
        rpc.execute(RpcCall::PgStatAlloc { engine }).map(|_| ())
    }

    fn load_buff(&self, rpc: &dyn RpcChannel) -> Result<(), RpcError> {
        rpc.execute(RpcCall::PgEngBufLoad {
            engine: PgEngineId::Graphics,
            buf_idx: PG_BUFFER_IDX_FECS,
        })
        .map(|_| ())
    }

    fn hw_load_zbc(&self, rpc: &dyn RpcChannel) -> Result<(), RpcError> {
        rpc.execute(RpcCall::PgEngBufLoad {
            engine: PgEngineId::Graphics,
            buf_idx: PG_BUFFER_IDX_ZBC,
        })
        .map(|_| ())
    }

    fn save_zbc(&self, rpc: &dyn RpcChannel, entries: u32) {
        if let Err(err) = rpc.execute(RpcCall::PgZbcSave { entries }) {
            warn!("gm20b: ZBC save failed: {}", err);
        }
    }

    fn supported_engines(&self) -> &'static [PgEngineId] {
        SUPPORTED
    }

    fn engines_feature_list(&self, engine: PgEngineId) -> u32 {
        match engine {
            PgEngineId::Graphics => PG_FEATURE_POWER_GATING,
            _ => 0,
        }
    }

    fn is_lpwr_feature_supported(&self, feature_id: u32) -> bool {
        feature_id == PG_FEATURE_POWER_GATING
    }

    fn elpg_statistics(&self, _engine: PgEngineId) -> PgStats {
        // Residency counters live in PMU DMEM; register access is outside
        // this core.
        PgStats::default()
    }
}
