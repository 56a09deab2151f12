//! Change-sequence controller
//!
//! Drives one voltage/frequency/pstate transition to completion: resolves the
//! target point, folds in the PMU-evaluated margins, clamps voltage into the
//! rail limits, builds the change descriptor, submits it and waits, bounded
//! by a configurable timeout, for the completion event delivered by the
//! firmware-message dispatch context.
//!
//! At most one change is in flight at a time. There is exactly one state
//! slot, not a queue; a second submission while one is outstanding fails with
//! `ChangeAlreadyInFlight` instead of racing.

pub mod script;

pub use script::{
    ChangeInput, ChangeSeqFlags, ChangeSeqScript, ClkListItem, ScriptSlot, Step, VoltListItem,
};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use bitflags::bitflags;
use log::{debug, error, info, warn};

use crate::error::{PmuError, Result};
use crate::hal::{ClockDomainOps, VoltRailOps};
use crate::pstate::{ClkDomain, Pstates};
use crate::rpc::{RpcCall, RpcChannel, RpcError, RpcReply};
use crate::surface::SuperSurface;
use crate::vfe;

bitflags! {
    /// Step classes the CPU owns instead of the PMU (wire values)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CpuStepIdMask: u32 {
        const CLKS = 1 << 0;
        const VOLT = 1 << 1;
        const PSTATE = 1 << 2;
        const BIF = 1 << 3;
        const LPWR = 1 << 4;
    }
}

/// Controller state of the single in-flight change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeState {
    Idle,
    Submitted,
    Acknowledged,
}

/// Runtime-settable controller fields mirrored to firmware via INFO_GET/SET
#[derive(Debug, Clone, Default)]
pub struct ChangeSeqPmuState {
    pub client_lock_mask: u32,
    pub clk_domains_exclusion_mask: u32,
    pub clk_domains_inclusion_mask: u32,
    pub cpu_step_id_mask: CpuStepIdMask,
    pub b_lock: bool,
    pub b_vf_point_check_ignore: bool,
}

/// One change request from a client
#[derive(Debug, Clone, Copy)]
pub struct ChangeRequest {
    pub pstate_id: u32,
    pub domain: ClkDomain,
    pub freq_mhz: u32,
    pub flags: ChangeSeqFlags,
}

struct WaitState {
    state: ChangeState,
    start_time: Option<Instant>,
    stop_time: Option<Instant>,
}

/// The change-sequence controller, one per GPU instance
pub struct ChangeSeq {
    rpc: Arc<dyn RpcChannel>,
    surface: Arc<dyn SuperSurface>,
    /// Completion handshake between the submitting thread and the
    /// firmware-message context
    wait: Mutex<WaitState>,
    ack: Condvar,
    /// Serializes submissions; `try_lock` turns a concurrent second change
    /// into an error instead of a race
    submit_lock: Mutex<()>,
    pmu_state: spin::Mutex<ChangeSeqPmuState>,
    /// Bumped when VFE tables invalidate so the next change rebuilds caches
    vf_points_cache_counter: AtomicU32,
    timeout: Duration,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChangeSeq {
    pub fn new(
        rpc: Arc<dyn RpcChannel>,
        surface: Arc<dyn SuperSurface>,
        timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            surface,
            wait: Mutex::new(WaitState {
                state: ChangeState::Idle,
                start_time: None,
                stop_time: None,
            }),
            ack: Condvar::new(),
            submit_lock: Mutex::new(()),
            pmu_state: spin::Mutex::new(ChangeSeqPmuState::default()),
            vf_points_cache_counter: AtomicU32::new(0),
            timeout,
        }
    }

    /// Read the LAST script slot to discover the operating point firmware
    /// left behind
    pub fn read_boot_script(&self) -> Result<ChangeSeqScript> {
        let mut buf = [0u8; script::SCRIPT_SIZE];
        self.surface.read(ScriptSlot::Last.surface_offset(), &mut buf);
        let last = ChangeSeqScript::decode(&buf)?;
        info!(
            "boot operating point: pstate index {}, {} steps applied",
            last.change.pstate_index, last.header.num_steps
        );
        Ok(last)
    }

    /// Pull the firmware's step ownership and lock state
    pub fn info_get(&self) -> Result<()> {
        let reply = self
            .rpc
            .execute(RpcCall::ChangeSeqInfoGet {
                slot: ScriptSlot::Last,
            })
            .map_err(PmuError::RpcSubmitFailed)?;
        match reply {
            RpcReply::ChangeSeqInfo {
                cpu_step_id_mask,
                b_lock,
            } => {
                let mut state = self.pmu_state.lock();
                state.cpu_step_id_mask = CpuStepIdMask::from_bits_truncate(cpu_step_id_mask);
                state.b_lock = b_lock;
                Ok(())
            }
            _ => Err(PmuError::RpcSubmitFailed(RpcError::UnexpectedReply)),
        }
    }

    /// Push the client lock mask and step ownership to firmware
    pub fn info_set(&self) -> Result<()> {
        let (client_lock_mask, cpu_step_id_mask) = {
            let state = self.pmu_state.lock();
            (state.client_lock_mask, state.cpu_step_id_mask.bits())
        };
        self.rpc
            .execute(RpcCall::ChangeSeqInfoSet {
                client_lock_mask,
                cpu_step_id_mask,
            })
            .map_err(PmuError::RpcSubmitFailed)
            .map(|_| ())
    }

    /// Access the runtime-settable controller fields
    pub fn pmu_state(&self) -> &spin::Mutex<ChangeSeqPmuState> {
        &self.pmu_state
    }

    /// Note a VFE invalidation; the next change forces a cache rebuild
    pub fn note_vf_points_invalidated(&self) {
        self.vf_points_cache_counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of VFE invalidations observed since construction
    pub fn vf_points_cache_counter(&self) -> u32 {
        self.vf_points_cache_counter.load(Ordering::SeqCst)
    }

    /// Execute one change: compute the target, submit, wait for completion
    ///
    /// Returns the elapsed submit-to-ack time. With `ASYNC` set the call
    /// returns `Duration::ZERO` right after submission and the caller reads
    /// [`ChangeSeq::execute_time`] once acknowledged.
    pub fn request_change(
        &self,
        req: ChangeRequest,
        pstates: &Pstates,
        clk_ops: &dyn ClockDomainOps,
        volt_ops: &dyn VoltRailOps,
    ) -> Result<Duration> {
        let _submit_guard = match self.submit_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(PmuError::ChangeAlreadyInFlight),
        };

        let pstate_index = pstates
            .index_of(req.pstate_id)
            .ok_or(PmuError::PstateNotFound(req.pstate_id))?;

        let fmargin = vfe::freq_margin_mhz(self.rpc.as_ref(), clk_ops.freq_margin_equ_idx())?;
        let target_mhz = req.freq_mhz.saturating_add(fmargin);

        let mut voltage_uv = clk_ops.freq_to_volt(req.domain, target_mhz)?;
        let vmargin = vfe::volt_margin_uv(self.rpc.as_ref(), volt_ops.volt_margin_equ_idx())?;
        voltage_uv = voltage_uv.saturating_add(vmargin);

        let (vmin_uv, vmax_uv) = volt_ops.vmin_vmax();
        if voltage_uv < vmin_uv {
            debug!("raising target voltage {}uV to rail floor {}uV", voltage_uv, vmin_uv);
            voltage_uv = vmin_uv;
        }
        // The floor silently raises; the ceiling is a hard error, never a
        // silent clamp.
        if voltage_uv > vmax_uv {
            return Err(PmuError::VoltageExceedsMax {
                requested_uv: voltage_uv,
                vmax_uv,
            });
        }

        let mut input = ChangeInput::new(pstate_index, req.flags | ChangeSeqFlags::FORCE);
        input.vf_points_cache_counter = u32::MAX;
        let _ = input.clk_list.push(ClkListItem {
            domain: req.domain,
            freq_mhz: target_mhz,
        });
        let _ = input.volt_list.push(VoltListItem {
            rail_idx: 0,
            voltage_uv,
            voltage_min_noise_unaware_uv: vmin_uv,
        });

        {
            let mut wait = lock_unpoisoned(&self.wait);
            wait.state = ChangeState::Submitted;
            wait.start_time = Some(Instant::now());
            wait.stop_time = None;
        }

        debug!(
            "cmd post CHANGE_SEQ_QUEUE_CHANGE: P{} {:?} {}MHz {}uV",
            req.pstate_id, req.domain, target_mhz, voltage_uv
        );
        if let Err(err) = self
            .rpc
            .execute(RpcCall::ChangeSeqQueueChange {
                input: input.clone(),
            })
        {
            let mut wait = lock_unpoisoned(&self.wait);
            wait.state = ChangeState::Idle;
            wait.start_time = None;
            return Err(PmuError::RpcSubmitFailed(err));
        }

        if input.flags.contains(ChangeSeqFlags::ASYNC) {
            return Ok(Duration::ZERO);
        }

        let guard = lock_unpoisoned(&self.wait);
        let (wait, _timeout_result) = self
            .ack
            .wait_timeout_while(guard, self.timeout, |w| {
                w.state != ChangeState::Acknowledged
            })
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if wait.state != ChangeState::Acknowledged {
            error!("change-sequence completion timed out after {:?}", self.timeout);
            return Err(PmuError::ChangeTimedOut);
        }

        let elapsed = match (wait.start_time, wait.stop_time) {
            (Some(start), Some(stop)) => stop.duration_since(start),
            _ => Duration::ZERO,
        };
        drop(wait);

        // The applied change becomes the LAST script slot.
        let script = ChangeSeqScript::build(input);
        self.surface
            .write(ScriptSlot::Last.surface_offset(), &script.encode());

        debug!("change complete in {:?}", elapsed);
        Ok(elapsed)
    }

    /// Completion event entry point, called from the firmware-message
    /// dispatch context
    pub fn on_completion_event(&self) {
        let mut wait = lock_unpoisoned(&self.wait);
        match wait.state {
            ChangeState::Submitted => {
                wait.state = ChangeState::Acknowledged;
                wait.stop_time = Some(Instant::now());
                self.ack.notify_all();
            }
            _ => warn!("spurious change-sequence completion event"),
        }
    }

    pub fn state(&self) -> ChangeState {
        lock_unpoisoned(&self.wait).state
    }

    /// Submit-to-ack time of the last change, valid only once acknowledged
    pub fn execute_time(&self) -> Option<Duration> {
        let wait = lock_unpoisoned(&self.wait);
        if wait.state != ChangeState::Acknowledged {
            return None;
        }
        match (wait.start_time, wait.stop_time) {
            (Some(start), Some(stop)) => Some(stop.duration_since(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pstate::{parse_pstate_table, PSTATE_BASE_ENTRY_SIZE, PSTATE_CLOCK_ENTRY_SIZE,
        PSTATE_TABLE_HEADER_SIZE, PSTATE_TABLE_VERSION};
    use crate::surface::SharedSurface;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn pstate_table() -> Pstates {
        let mut table = vec![
            PSTATE_TABLE_VERSION,
            PSTATE_TABLE_HEADER_SIZE,
            PSTATE_BASE_ENTRY_SIZE,
            PSTATE_CLOCK_ENTRY_SIZE,
            1,
            1,
            0,
            0,
        ];
        table.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        table.push(ClkDomain::GpcClk.wire_value());
        table.extend_from_slice(&500_000u32.to_le_bytes());
        table.extend_from_slice(&900_000u32.to_le_bytes());
        table.extend_from_slice(&1_200_000u32.to_le_bytes());
        parse_pstate_table(&table).unwrap()
    }

    struct FixedOps;

    impl ClockDomainOps for FixedOps {
        fn freq_to_volt(&self, _domain: ClkDomain, freq_mhz: u32) -> Result<u32> {
            Ok(600_000 + freq_mhz * 100)
        }

        fn freq_margin_equ_idx(&self) -> u8 {
            0
        }
    }

    impl VoltRailOps for FixedOps {
        fn vmin_vmax(&self) -> (u32, u32) {
            (650_000, 900_000)
        }

        fn volt_margin_equ_idx(&self) -> u8 {
            0
        }
    }

    struct AckingChannel {
        seq: Mutex<Option<Arc<ChangeSeq>>>,
        submits: AtomicUsize,
        ack: bool,
    }

    impl AckingChannel {
        fn new(ack: bool) -> Arc<Self> {
            Arc::new(Self {
                seq: Mutex::new(None),
                submits: AtomicUsize::new(0),
                ack,
            })
        }
    }

    impl RpcChannel for AckingChannel {
        fn execute(&self, call: RpcCall) -> core::result::Result<RpcReply, RpcError> {
            if let RpcCall::ChangeSeqQueueChange { .. } = call {
                self.submits.fetch_add(1, Ordering::SeqCst);
                if self.ack {
                    let seq = lock_unpoisoned(&self.seq).clone();
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(2));
                        if let Some(seq) = seq {
                            seq.on_completion_event();
                        }
                    });
                }
            }
            Ok(RpcReply::Ack)
        }
    }

    fn request() -> ChangeRequest {
        ChangeRequest {
            pstate_id: 0,
            domain: ClkDomain::GpcClk,
            freq_mhz: 1000,
            flags: ChangeSeqFlags::empty(),
        }
    }

    #[test]
    fn test_change_round_trip_acked() {
        let chan = AckingChannel::new(true);
        let surface = Arc::new(SharedSurface::new(0x4000));
        let seq = Arc::new(ChangeSeq::new(
            chan.clone(),
            surface.clone(),
            Duration::from_millis(500),
        ));
        *lock_unpoisoned(&chan.seq) = Some(seq.clone());

        let pstates = pstate_table();
        let elapsed = seq
            .request_change(request(), &pstates, &FixedOps, &FixedOps)
            .unwrap();
        assert!(elapsed >= Duration::ZERO);
        assert_eq!(seq.state(), ChangeState::Acknowledged);
        assert!(seq.execute_time().is_some());

        // The applied change landed in the LAST slot.
        let last = seq.read_boot_script().unwrap();
        assert_eq!(last.change.pstate_index, 0);
    }

    #[test]
    fn test_change_times_out_without_ack() {
        let chan = AckingChannel::new(false);
        let surface = Arc::new(SharedSurface::new(0x4000));
        let seq = Arc::new(ChangeSeq::new(
            chan.clone(),
            surface,
            Duration::from_millis(50),
        ));
        *lock_unpoisoned(&chan.seq) = Some(seq.clone());

        let pstates = pstate_table();
        let err = seq
            .request_change(request(), &pstates, &FixedOps, &FixedOps)
            .unwrap_err();
        assert_eq!(err, PmuError::ChangeTimedOut);
        // Degraded, not reset: the submission is still outstanding.
        assert_eq!(seq.state(), ChangeState::Submitted);
    }

    #[test]
    fn test_unknown_pstate_rejected() {
        let chan = AckingChannel::new(true);
        let surface = Arc::new(SharedSurface::new(0x4000));
        let seq = Arc::new(ChangeSeq::new(chan.clone(), surface, Duration::from_millis(50)));
        *lock_unpoisoned(&chan.seq) = Some(seq.clone());

        let pstates = pstate_table();
        let mut req = request();
        req.pstate_id = 9;
        assert_eq!(
            seq.request_change(req, &pstates, &FixedOps, &FixedOps),
            Err(PmuError::PstateNotFound(9))
        );
        assert_eq!(chan.submits.load(Ordering::SeqCst), 0);
    }

    struct ClampOps {
        volt_uv: u32,
        vmin_uv: u32,
        vmax_uv: u32,
    }

    impl ClockDomainOps for ClampOps {
        fn freq_to_volt(&self, _domain: ClkDomain, _freq_mhz: u32) -> Result<u32> {
            Ok(self.volt_uv)
        }

        fn freq_margin_equ_idx(&self) -> u8 {
            0
        }
    }

    impl VoltRailOps for ClampOps {
        fn vmin_vmax(&self) -> (u32, u32) {
            (self.vmin_uv, self.vmax_uv)
        }

        fn volt_margin_equ_idx(&self) -> u8 {
            0
        }
    }

    fn run_clamp_case(volt_uv: u32, vmin_uv: u32, vmax_uv: u32) -> Result<Duration> {
        let chan = AckingChannel::new(true);
        let surface = Arc::new(SharedSurface::new(0x4000));
        let seq = Arc::new(ChangeSeq::new(
            chan.clone(),
            surface,
            Duration::from_millis(500),
        ));
        *lock_unpoisoned(&chan.seq) = Some(seq.clone());
        let ops = ClampOps {
            volt_uv,
            vmin_uv,
            vmax_uv,
        };
        seq.request_change(request(), &pstate_table(), &ops, &ops)
    }

    #[test]
    fn test_voltage_exactly_at_vmax_succeeds() {
        assert!(run_clamp_case(900_000, 650_000, 900_000).is_ok());
    }

    #[test]
    fn test_voltage_above_vmax_is_hard_error() {
        assert_eq!(
            run_clamp_case(900_001, 650_000, 900_000),
            Err(PmuError::VoltageExceedsMax {
                requested_uv: 900_001,
                vmax_uv: 900_000
            })
        );
    }

    #[test]
    fn test_voltage_below_vmin_raised_silently() {
        assert!(run_clamp_case(100_000, 650_000, 900_000).is_ok());
    }

    #[test]
    fn test_submit_failure_does_not_wait() {
        struct RejectingChannel;
        impl RpcChannel for RejectingChannel {
            fn execute(&self, call: RpcCall) -> core::result::Result<RpcReply, RpcError> {
                match call {
                    RpcCall::ChangeSeqQueueChange { .. } => Err(RpcError::QueueFull),
                    _ => Ok(RpcReply::Ack),
                }
            }
        }
        let surface = Arc::new(SharedSurface::new(0x4000));
        let seq = ChangeSeq::new(
            Arc::new(RejectingChannel),
            surface,
            Duration::from_secs(30),
        );
        let started = Instant::now();
        let err = seq
            .request_change(request(), &pstate_table(), &FixedOps, &FixedOps)
            .unwrap_err();
        assert_eq!(err, PmuError::RpcSubmitFailed(RpcError::QueueFull));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(seq.state(), ChangeState::Idle);
    }
}
