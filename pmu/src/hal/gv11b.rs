//! gv11b-generation power-gating HAL
//!
//! Adds MS/LTC gating and the async PG-event confirmation path: disallow
//! completion is acknowledged twice, once through the ELPG message and once
//! through an RPC event posted after the engine has fully exited.

use log::{debug, warn};

use crate::hal::{
    PgHal, PG_BUFFER_IDX_FECS, PG_BUFFER_IDX_ZBC, PG_FEATURE_POWER_GATING, PG_FEATURE_RAIL_GATING,
};
use crate::pg::{PgEngineId, PgStats};
use crate::rpc::{RpcCall, RpcChannel, RpcError};

pub struct Gv11b;

const SUPPORTED: &[PgEngineId] = &[PgEngineId::Graphics, PgEngineId::MsLtc];

impl PgHal for Gv11b {
    fn allow(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gv11b: cmd post PG_ALLOW eng {:?}", engine);
        rpc.execute(RpcCall::PgAllow { engine }).map(|_| ())
    }

    fn disallow(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gv11b: cmd post PG_DISALLOW eng {:?}", engine);
        rpc.execute(RpcCall::PgDisallow { engine }).map(|_| ())
    }

    fn init_send(&self, rpc: &dyn RpcChannel, engine: PgEngineId) -> Result<(), RpcError> {
        debug!("gv11b: cmd post PG_INIT eng {:?}", engine);
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
            warn!("gv11b: ZBC save failed: {}", err);
        }
    }

    fn supported_engines(&self) -> &'static [PgEngineId] {
        SUPPORTED
    }

    fn engines_feature_list(&self, engine: PgEngineId) -> u32 {
        match engine {
            PgEngineId::Graphics => PG_FEATURE_POWER_GATING,
            PgEngineId::Ms | PgEngineId::MsLtc => {
                PG_FEATURE_POWER_GATING | PG_FEATURE_RAIL_GATING
            }
        }
    }

    fn is_lpwr_feature_supported(&self, feature_id: u32) -> bool {
        feature_id == PG_FEATURE_POWER_GATING || feature_id == PG_FEATURE_RAIL_GATING
    }

    fn elpg_statistics(&self, _engine: PgEngineId) -> PgStats {
        PgStats::default()
    }

    fn has_pg_event_path(&self) -> bool {
        true
    }
}
