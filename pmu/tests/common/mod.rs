//! Shared test doubles for the integration tests
//!
//! `MockRpc` plays the PMU firmware: replies to synchronous calls and, when
//! acking is enabled, delivers the asynchronous acknowledgment messages from
//! a separate thread the way the real firmware-message dispatch context does.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use gpmu::error::Result;
use gpmu::hal::{BiosTable, ClockDomainOps, Diagnostics, PerfTableId, VoltRailOps};
use gpmu::pg::{AsyncPgEvent, ElpgMsg, PgController, PgEngineId};
use gpmu::pstate::ClkDomain;
use gpmu::rpc::{EquResult, RpcCall, RpcChannel, RpcError, RpcReply};
use gpmu::ChangeSeq;

/// Frequency margin the mock firmware reports, MHz
pub const MOCK_FREQ_MARGIN_MHZ: u32 = 2;
/// Voltage margin the mock firmware reports, µV
pub const MOCK_VOLT_MARGIN_UV: u32 = 12_500;

/// Scriptable firmware double
pub struct MockRpc {
    pg: Mutex<Option<Arc<PgController>>>,
    change_seq: Mutex<Option<Arc<ChangeSeq>>>,
    /// Deliver acks for PG allow/disallow and bring-up messages
    pub ack_pg: AtomicBool,
    /// Deliver the change-sequence completion event
    pub ack_changes: AtomicBool,
    /// Delay before each delivered ack
    pub ack_delay: Duration,
    pub allow_count: AtomicUsize,
    pub disallow_count: AtomicUsize,
    pub queue_change_count: AtomicUsize,
    pub init_count: AtomicUsize,
    pub threshold_count: AtomicUsize,
    pub zbc_save_count: AtomicUsize,
}

impl MockRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pg: Mutex::new(None),
            change_seq: Mutex::new(None),
            ack_pg: AtomicBool::new(true),
            ack_changes: AtomicBool::new(true),
            ack_delay: Duration::from_millis(1),
            allow_count: AtomicUsize::new(0),
            disallow_count: AtomicUsize::new(0),
            queue_change_count: AtomicUsize::new(0),
            init_count: AtomicUsize::new(0),
            threshold_count: AtomicUsize::new(0),
            zbc_save_count: AtomicUsize::new(0),
        })
    }

    pub fn silent() -> Arc<Self> {
        let mock = Self::new();
        mock.ack_pg.store(false, Ordering::SeqCst);
        mock.ack_changes.store(false, Ordering::SeqCst);
        mock
    }

    pub fn attach_pg(&self, pg: &Arc<PgController>) {
        *self.pg.lock().unwrap() = Some(pg.clone());
    }

    pub fn attach_change_seq(&self, seq: &Arc<ChangeSeq>) {
        *self.change_seq.lock().unwrap() = Some(seq.clone());
    }

    fn spawn_ack(&self, deliver: impl FnOnce() + Send + 'static) {
        let delay = self.ack_delay;
        thread::spawn(move || {
            thread::sleep(delay);
            deliver();
        });
    }
}

impl RpcChannel for MockRpc {
    fn execute(&self, call: RpcCall) -> core::result::Result<RpcReply, RpcError> {
        match call {
            RpcCall::VfeEquEval { output_type, .. } => {
                let result = match output_type {
                    gpmu::vfe::VfeOutputType::FreqMhz => EquResult::FreqMhz(MOCK_FREQ_MARGIN_MHZ),
                    _ => EquResult::VoltDeltaUv(MOCK_VOLT_MARGIN_UV),
                };
                Ok(RpcReply::VfeEquResult(result))
            }
            RpcCall::ChangeSeqInfoGet { .. } => Ok(RpcReply::ChangeSeqInfo {
                cpu_step_id_mask: 0,
                b_lock: false,
            }),
            RpcCall::ChangeSeqInfoSet { .. } => Ok(RpcReply::Ack),
            RpcCall::ChangeSeqQueueChange { .. } => {
                self.queue_change_count.fetch_add(1, Ordering::SeqCst);
                if self.ack_changes.load(Ordering::SeqCst) {
                    let seq = self.change_seq.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(seq) = seq {
                            seq.on_completion_event();
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgAllow { engine } => {
                self.allow_count.fetch_add(1, Ordering::SeqCst);
                if self.ack_pg.load(Ordering::SeqCst) {
                    let pg = self.pg.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(pg) = pg {
                            pg.handle_elpg_msg(engine, ElpgMsg::AllowAck);
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgDisallow { engine } => {
                self.disallow_count.fetch_add(1, Ordering::SeqCst);
                if self.ack_pg.load(Ordering::SeqCst) {
                    let pg = self.pg.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(pg) = pg {
                            pg.handle_elpg_msg(engine, ElpgMsg::DisallowAck);
                            if engine == PgEngineId::Graphics {
                                pg.handle_pg_event(engine, AsyncPgEvent::DisallowAck);
                            }
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgInit { engine } => {
                self.init_count.fetch_add(1, Ordering::SeqCst);
                if self.ack_pg.load(Ordering::SeqCst) {
                    let pg = self.pg.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(pg) = pg {
                            pg.handle_elpg_msg(engine, ElpgMsg::InitAck);
                            // Booting leaves the engine disallowed; the ack
                            // advances the bring-up state machine.
                            pg.handle_elpg_msg(engine, ElpgMsg::DisallowAck);
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgStatAlloc { engine } => {
                if self.ack_pg.load(Ordering::SeqCst) {
                    let pg = self.pg.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(pg) = pg {
                            pg.handle_stat_msg(engine, 0x2400 + engine.wire_value() as u32);
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgEngBufLoad { .. } => {
                if self.ack_pg.load(Ordering::SeqCst) {
                    let pg = self.pg.lock().unwrap().clone();
                    self.spawn_ack(move || {
                        if let Some(pg) = pg {
                            pg.handle_eng_buf_msg(true);
                        }
                    });
                }
                Ok(RpcReply::Ack)
            }
            RpcCall::PgThresholdUpdate { .. } => {
                self.threshold_count.fetch_add(1, Ordering::SeqCst);
                Ok(RpcReply::Ack)
            }
            RpcCall::PgZbcSave { .. } => {
                self.zbc_save_count.fetch_add(1, Ordering::SeqCst);
                Ok(RpcReply::Ack)
            }
        }
    }
}

/// BIOS double carrying a pstate table with levels {0, 2, 5} and a small VFE
/// table
pub struct MockBios;

impl BiosTable for MockBios {
    fn get_perf_table(&self, id: PerfTableId) -> Option<Vec<u8>> {
        match id {
            PerfTableId::PstateTable => Some(pstate_table_bytes(&[0, 2, 5])),
            PerfTableId::VfeTable => Some(vfe_table_bytes()),
        }
    }
}

pub fn pstate_table_bytes(levels: &[u8]) -> Vec<u8> {
    use gpmu::pstate::{
        PSTATE_BASE_ENTRY_SIZE, PSTATE_CLOCK_ENTRY_SIZE, PSTATE_TABLE_HEADER_SIZE,
        PSTATE_TABLE_VERSION,
    };
    let mut table = vec![
        PSTATE_TABLE_VERSION,
        PSTATE_TABLE_HEADER_SIZE,
        PSTATE_BASE_ENTRY_SIZE,
        PSTATE_CLOCK_ENTRY_SIZE,
        1,
        levels.len() as u8,
        0,
        0,
    ];
    for level in levels {
        table.extend_from_slice(&[*level, 0, 1, 2, 3, 0, 0, 0]);
        table.push(ClkDomain::GpcClk.wire_value());
        table.extend_from_slice(&400_000u32.to_le_bytes());
        table.extend_from_slice(&800_000u32.to_le_bytes());
        table.extend_from_slice(&1_400_000u32.to_le_bytes());
    }
    table
}

pub fn vfe_table_bytes() -> Vec<u8> {
    use gpmu::vfe::equ::{
        VFE_EQU_ENTRY_SIZE, VFE_TABLE_HEADER_SIZE, VFE_TABLE_VERSION, VFE_VAR_ENTRY_SIZE,
    };
    let mut table = vec![
        VFE_TABLE_HEADER_SIZE,
        VFE_TABLE_VERSION,
        2,
        VFE_VAR_ENTRY_SIZE,
        2,
        VFE_EQU_ENTRY_SIZE,
        0,
        0,
    ];
    // var 0: sensed temperature, var 1: frequency
    table.extend_from_slice(&[1, 0, 0, 0]);
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&[3, 0, 0, 0]);
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&0u32.to_le_bytes());
    // equ 0: quadratic over var 0
    table.extend_from_slice(&[1, 0, 0xFF, 0]);
    table.extend_from_slice(&1u32.to_le_bytes());
    table.extend_from_slice(&2u32.to_le_bytes());
    table.extend_from_slice(&3u32.to_le_bytes());
    table.extend_from_slice(&[0, 0]);
    // equ 1: scalar of equ 0 over var 1
    table.extend_from_slice(&[4, 1, 0xFF, 0]);
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&0u32.to_le_bytes());
    table.extend_from_slice(&[0, 0]);
    table
}

/// Clock/volt double with configured margins and rail limits
pub struct MockPointOps {
    pub vmin_uv: u32,
    pub vmax_uv: u32,
}

impl Default for MockPointOps {
    fn default() -> Self {
        Self {
            vmin_uv: 650_000,
            vmax_uv: 1_100_000,
        }
    }
}

impl ClockDomainOps for MockPointOps {
    fn freq_to_volt(&self, _domain: ClkDomain, freq_mhz: u32) -> Result<u32> {
        Ok(600_000 + freq_mhz * 100)
    }

    fn freq_margin_equ_idx(&self) -> u8 {
        3
    }
}

impl VoltRailOps for MockPointOps {
    fn vmin_vmax(&self) -> (u32, u32) {
        (self.vmin_uv, self.vmax_uv)
    }

    fn volt_margin_equ_idx(&self) -> u8 {
        7
    }
}

/// Diagnostics double counting dump requests
pub struct CountingDiag {
    pub dumps: AtomicUsize,
}

impl CountingDiag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dumps: AtomicUsize::new(0),
        })
    }
}

impl Diagnostics for CountingDiag {
    fn dump_falcon_stats(&self) {
        self.dumps.fetch_add(1, Ordering::SeqCst);
    }

    fn dump_elpg_stats(&self) {
        self.dumps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll until `cond` holds or the deadline passes
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
