//! Engine-level power-gating (ELPG) controller
//!
//! Reference-counted enable/disable per engine so nested calls compose, with
//! firmware acknowledgments arriving asynchronously from the message dispatch
//! context. The graphics engine and the MS/LTC engine are independent
//! refcount domains with independent mutexes; calls within one domain are
//! totally ordered by its mutex.
//!
//! Enable never waits: it posts ALLOW and returns with the state pending. A
//! subsequent disable is what waits for the ON acknowledgment first when
//! needed. Every timeout is surfaced to the caller and triggers a best-effort
//! diagnostic dump; the state is left as-is; there is no automatic recovery.

pub mod init;

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::{PmuError, Result};
use crate::hal::{Diagnostics, PgHal, PG_FEATURE_POWER_GATING};
use crate::rpc::{RpcCall, RpcChannel};

/// Adaptive-PG default sampling period
pub const APCTRL_SAMPLING_PERIOD_PG_DEFAULT_US: u32 = 1_000_000;
/// Adaptive-PG default minimum idle filter
pub const APCTRL_MINIMUM_IDLE_FILTER_DEFAULT_US: u32 = 100;
/// Adaptive-PG default minimum target saving
pub const APCTRL_MINIMUM_TARGET_SAVING_DEFAULT_US: u32 = 10_000;
/// Adaptive-PG default power break-even time
pub const APCTRL_POWER_BREAKEVEN_DEFAULT_US: u32 = 2_000;
/// Adaptive-PG default max gating cycles per sample
pub const APCTRL_CYCLES_PER_SAMPLE_MAX_DEFAULT: u32 = 200;

/// Power-gatable engine ids (wire values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgEngineId {
    Graphics,
    Ms,
    MsLtc,
}

impl PgEngineId {
    pub fn wire_value(self) -> u8 {
        match self {
            PgEngineId::Graphics => 0,
            PgEngineId::Ms => 4,
            PgEngineId::MsLtc => 5,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            0 => PgEngineId::Graphics,
            4 => PgEngineId::Ms,
            5 => PgEngineId::MsLtc,
            _ => return None,
        })
    }

    fn index(self) -> usize {
        match self {
            PgEngineId::Graphics => 0,
            PgEngineId::Ms => 1,
            PgEngineId::MsLtc => 2,
        }
    }
}

const PG_ENGINE_COUNT: usize = 3;

/// Per-engine gating state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElpgState {
    Off,
    OnPending,
    On,
    OffPending,
    OffOnPending,
}

/// ELPG messages delivered by the firmware-message dispatch context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElpgMsg {
    InitAck,
    AllowAck,
    DisallowAck,
}

/// Async PG events on the secondary acknowledgment path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncPgEvent {
    DisallowAck,
}

/// Golden-context-image readiness gate
///
/// ELPG save/restore needs the golden context image; enabling before it is
/// ready is a silent no-op. `Suspend` parks a ready image across a railgate
/// cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoldenImageState {
    NotReady,
    Ready,
    Suspend,
}

impl GoldenImageState {
    fn to_u8(self) -> u8 {
        match self {
            GoldenImageState::NotReady => 0,
            GoldenImageState::Ready => 1,
            GoldenImageState::Suspend => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => GoldenImageState::Ready,
            2 => GoldenImageState::Suspend,
            _ => GoldenImageState::NotReady,
        }
    }
}

/// Gating residency counters for one engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PgStats {
    pub ingating_time_us: u64,
    pub ungating_time_us: u64,
    pub gating_cnt: u32,
}

/// Power-gating configuration, fixed at construction
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Bound for every acknowledgment wait
    pub poll_timeout: Duration,
    /// Enable ELPG at the end of bring-up
    pub elpg_enabled: bool,
    /// Send adaptive-PG thresholds at the end of bring-up
    pub aelpg_enabled: bool,
    /// Save the ZBC table once the PMU is started
    pub zbc_save_enabled: bool,
    /// Memory-subsystem clock gating available
    pub mscg_enabled: bool,
    /// Adaptive-PG parameters: sampling period, idle filter, target saving,
    /// break-even, cycles per sample
    pub aelpg_param: [u32; 5],
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(2),
            elpg_enabled: true,
            aelpg_enabled: false,
            zbc_save_enabled: true,
            mscg_enabled: false,
            aelpg_param: [
                APCTRL_SAMPLING_PERIOD_PG_DEFAULT_US,
                APCTRL_MINIMUM_IDLE_FILTER_DEFAULT_US,
                APCTRL_MINIMUM_TARGET_SAVING_DEFAULT_US,
                APCTRL_POWER_BREAKEVEN_DEFAULT_US,
                APCTRL_CYCLES_PER_SAMPLE_MAX_DEFAULT,
            ],
        }
    }
}

struct DomainState {
    refcnt: i32,
    stat: ElpgState,
    /// Secondary ack state for chips with the async PG-event path
    disallow_state: ElpgState,
    /// MS engine transition state; the graphics domain carries it
    ms_transition: ElpgState,
}

impl DomainState {
    fn new() -> Self {
        Self {
            refcnt: 0,
            stat: ElpgState::Off,
            disallow_state: ElpgState::Off,
            ms_transition: ElpgState::Off,
        }
    }
}

struct Domain {
    state: Mutex<DomainState>,
    ack: Condvar,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Domain {
    fn new() -> Self {
        Self {
            state: Mutex::new(DomainState::new()),
            ack: Condvar::new(),
        }
    }

    /// Wait until `done` holds or the timeout expires, releasing the domain
    /// mutex while parked
    fn wait<'a>(
        &self,
        guard: MutexGuard<'a, DomainState>,
        timeout: Duration,
        mut done: impl FnMut(&DomainState) -> bool,
    ) -> MutexGuard<'a, DomainState> {
        self.ack
            .wait_timeout_while(guard, timeout, |state| !done(state))
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .0
    }
}

/// The ELPG controller, one per GPU instance
pub struct PgController {
    rpc: Arc<dyn RpcChannel>,
    hal: Arc<dyn PgHal>,
    diag: Arc<dyn Diagnostics>,
    gr: Domain,
    ms_ltc: Domain,
    golden_image: AtomicU8,
    /// MSCG pinned disabled when the graphics feature list rules it out
    mscg_enabled: AtomicBool,
    initialized: AtomicBool,
    zbc_ready: AtomicBool,
    buf_loaded: AtomicBool,
    stat_dmem_offset: spin::Mutex<[u32; PG_ENGINE_COUNT]>,
    init: Arc<init::PgInitShared>,
    config: PgConfig,
    /// Software residency accumulators, updated at destroy
    pg_ingating_time_us: AtomicU64,
    pg_ungating_time_us: AtomicU64,
    pg_gating_cnt: AtomicU32,
}

impl PgController {
    pub fn new(
        rpc: Arc<dyn RpcChannel>,
        hal: Arc<dyn PgHal>,
        diag: Arc<dyn Diagnostics>,
        config: PgConfig,
    ) -> Self {
        let mscg = config.mscg_enabled;
        Self {
            rpc,
            hal,
            diag,
            gr: Domain::new(),
            ms_ltc: Domain::new(),
            golden_image: AtomicU8::new(GoldenImageState::NotReady.to_u8()),
            mscg_enabled: AtomicBool::new(mscg),
            initialized: AtomicBool::new(false),
            zbc_ready: AtomicBool::new(false),
            buf_loaded: AtomicBool::new(false),
            stat_dmem_offset: spin::Mutex::new([0; PG_ENGINE_COUNT]),
            init: Arc::new(init::PgInitShared::new()),
            config,
            pg_ingating_time_us: AtomicU64::new(0),
            pg_ungating_time_us: AtomicU64::new(0),
            pg_gating_cnt: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    pub(crate) fn init_shared(&self) -> Arc<init::PgInitShared> {
        self.init.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Whether the FECS engine buffer load has been acknowledged
    pub fn is_buf_loaded(&self) -> bool {
        self.buf_loaded.load(Ordering::SeqCst)
    }

    /// Whether the ZBC table has been saved since bring-up
    pub fn is_zbc_ready(&self) -> bool {
        self.zbc_ready.load(Ordering::SeqCst)
    }

    pub fn golden_image_state(&self) -> GoldenImageState {
        GoldenImageState::from_u8(self.golden_image.load(Ordering::SeqCst))
    }

    pub fn set_golden_image_state(&self, state: GoldenImageState) {
        self.golden_image.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Current graphics-domain gating state
    pub fn elpg_state(&self) -> ElpgState {
        lock_unpoisoned(&self.gr.state).stat
    }

    /// Current MS/LTC-domain gating state
    pub fn elpg_ms_state(&self) -> ElpgState {
        lock_unpoisoned(&self.ms_ltc.state).stat
    }

    pub fn elpg_refcnt(&self) -> i32 {
        lock_unpoisoned(&self.gr.state).refcnt
    }

    /// Signal that the PMU posted its INIT message; kicks the bring-up worker
    pub fn post_init_received(&self) {
        self.init.fw_state_change(init::PmuFwState::InitReceived, true);
    }

    // ------------------------------------------------------------------
    // Enable / disable
    // ------------------------------------------------------------------

    /// Enable power-gating
    ///
    /// Only the first enabler talks to firmware; nested calls bump the
    /// refcount and return. Does not wait for the ON acknowledgment.
    pub fn enable(&self) -> Result<()> {
        let mut st = lock_unpoisoned(&self.gr.state);

        st.refcnt += 1;
        if st.refcnt != 1 {
            if st.refcnt > 1 {
                warn!("possible elpg refcnt mismatch, refcnt={}", st.refcnt);
            }
            return Ok(());
        }

        // ELPG save/restore needs the golden context image; defer silently
        // until it exists.
        if self.golden_image_state() != GoldenImageState::Ready {
            return Ok(());
        }

        if st.stat != ElpgState::Off {
            return Ok(());
        }

        let mut result = Ok(());
        for engine in self.hal.supported_engines().iter().copied() {
            match engine {
                PgEngineId::Graphics => {
                    // No wait for the ALLOW ack; pending syncs a follow-up
                    // disable.
                    st.stat = ElpgState::OnPending;
                    debug!("cmd post PG_ALLOW");
                    if let Err(err) = self.hal.allow(self.rpc.as_ref(), PgEngineId::Graphics) {
                        error!("PG allow failed: {}", err);
                        result = Err(PmuError::RpcSubmitFailed(err));
                    }
                }
                PgEngineId::Ms => {
                    if !self.mscg_enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    st.ms_transition = ElpgState::OnPending;
                    if let Err(err) = self.hal.allow(self.rpc.as_ref(), PgEngineId::Ms) {
                        error!("PG allow for MS failed: {}", err);
                        result = Err(PmuError::RpcSubmitFailed(err));
                    }
                }
                PgEngineId::MsLtc => {
                    result = self.enable_ms();
                }
            }
        }
        result
    }

    /// Enable MS/LTC power-gating; independent refcount domain
    pub fn enable_ms(&self) -> Result<()> {
        let mut st = lock_unpoisoned(&self.ms_ltc.state);

        st.refcnt += 1;
        if st.refcnt != 1 {
            if st.refcnt > 1 {
                warn!("possible elpg_ms refcnt mismatch, refcnt={}", st.refcnt);
            }
            return Ok(());
        }

        if self.golden_image_state() != GoldenImageState::Ready {
            return Ok(());
        }

        if st.stat != ElpgState::Off {
            error!("ELPG_MS already enabled");
        }

        st.stat = ElpgState::OnPending;
        debug!("cmd post PG_ALLOW for MS_LTC");
        self.hal
            .allow(self.rpc.as_ref(), PgEngineId::MsLtc)
            .map_err(PmuError::RpcSubmitFailed)
    }

    /// Disable power-gating
    ///
    /// Only the last disabler talks to firmware. Blocks, bounded by the
    /// configured timeout, for the pending-enable ack if one is outstanding
    /// and then for the disallow ack(s).
    pub fn disable(&self) -> Result<()> {
        let mut st = lock_unpoisoned(&self.gr.state);

        st.refcnt -= 1;
        if st.refcnt > 0 {
            warn!("possible elpg refcnt mismatch, refcnt={}", st.refcnt);
            return Ok(());
        }

        match st.stat {
            ElpgState::OffOnPending => {
                // Cancelled before the allow was ever sent.
                st.stat = ElpgState::Off;
                return Ok(());
            }
            ElpgState::OnPending => {
                st = self.gr.wait(st, self.config.poll_timeout, |s| {
                    s.stat == ElpgState::On
                });
                if st.stat != ElpgState::On {
                    error!("ELPG_ALLOW_ACK failed, elpg_stat={:?}", st.stat);
                    self.dump_stats();
                    return Err(PmuError::EnableAckTimedOut);
                }
            }
            ElpgState::On => {}
            _ => return Ok(()),
        }

        for engine in self.hal.supported_engines().iter().copied() {
            match engine {
                PgEngineId::Graphics => {
                    st.stat = ElpgState::OffPending;
                    if self.hal.has_pg_event_path() {
                        st.disallow_state = ElpgState::OffPending;
                    }

                    debug!("cmd post PG_DISALLOW");
                    if let Err(err) = self.hal.disallow(self.rpc.as_ref(), PgEngineId::Graphics)
                    {
                        error!("PG_DISALLOW cmd post failed: {}", err);
                        return Err(PmuError::RpcSubmitFailed(err));
                    }

                    st = self.gr.wait(st, self.config.poll_timeout, |s| {
                        s.stat == ElpgState::Off
                    });
                    if st.stat != ElpgState::Off {
                        error!("ELPG_DISALLOW_ACK failed");
                        self.dump_stats();
                        return Err(PmuError::DisableAckTimedOut);
                    }

                    // Chips with the async event path confirm the exit a
                    // second time once the engine has fully ungated.
                    if self.hal.has_pg_event_path() {
                        st = self.gr.wait(st, self.config.poll_timeout, |s| {
                            s.disallow_state == ElpgState::Off
                        });
                        if st.disallow_state != ElpgState::Off {
                            error!("DISALLOW_ACK event failed");
                            self.dump_stats();
                            return Err(PmuError::DisableAckTimedOut);
                        }
                    }
                }
                PgEngineId::Ms => {
                    if !self.mscg_enabled.load(Ordering::SeqCst) {
                        continue;
                    }
                    st.ms_transition = ElpgState::OffPending;
                    debug!("cmd post PG_DISALLOW for MS");
                    if let Err(err) = self.hal.disallow(self.rpc.as_ref(), PgEngineId::Ms) {
                        error!("PG_DISALLOW cmd post for MS failed: {}", err);
                        return Err(PmuError::RpcSubmitFailed(err));
                    }
                    st = self.gr.wait(st, self.config.poll_timeout, |s| {
                        s.ms_transition == ElpgState::Off
                    });
                    if st.ms_transition != ElpgState::Off {
                        error!("MSCG_DISALLOW_ACK failed");
                        self.dump_stats();
                        return Err(PmuError::DisableAckTimedOut);
                    }
                }
                PgEngineId::MsLtc => {
                    self.disable_ms()?;
                }
            }
        }
        Ok(())
    }

    /// Disable MS/LTC power-gating; independent refcount domain
    pub fn disable_ms(&self) -> Result<()> {
        let mut st = lock_unpoisoned(&self.ms_ltc.state);

        st.refcnt -= 1;
        if st.refcnt > 0 {
            warn!("possible elpg_ms refcnt mismatch, refcnt={}", st.refcnt);
            return Ok(());
        }

        match st.stat {
            ElpgState::OffOnPending => {
                st.stat = ElpgState::Off;
                return Ok(());
            }
            ElpgState::OnPending => {
                st = self.ms_ltc.wait(st, self.config.poll_timeout, |s| {
                    s.stat == ElpgState::On
                });
                if st.stat != ElpgState::On {
                    error!("ELPG_MS_ALLOW_ACK failed, elpg_ms_stat={:?}", st.stat);
                    self.dump_stats();
                    return Err(PmuError::EnableAckTimedOut);
                }
            }
            ElpgState::On => {}
            _ => {
                error!("ELPG_MS already disabled");
                return Ok(());
            }
        }

        st.stat = ElpgState::OffPending;
        debug!("cmd post PG_DISALLOW for MS_LTC");
        if let Err(err) = self.hal.disallow(self.rpc.as_ref(), PgEngineId::MsLtc) {
            error!("PG_DISALLOW cmd post for MS_LTC failed: {}", err);
            return Err(PmuError::RpcSubmitFailed(err));
        }

        st = self.ms_ltc.wait(st, self.config.poll_timeout, |s| {
            s.stat == ElpgState::Off
        });
        if st.stat != ElpgState::Off {
            error!("ELPG_MS_DISALLOW_ACK failed");
            self.dump_stats();
            return Err(PmuError::DisableAckTimedOut);
        }
        Ok(())
    }

    /// Re-enable by disabling then enabling, when currently referenced
    pub fn reenable(&self) -> Result<()> {
        if self.elpg_refcnt() == 0 {
            return Ok(());
        }
        if let Err(err) = self.disable() {
            error!("failed disabling elpg: {}", err);
            return Err(err);
        }
        if let Err(err) = self.enable() {
            error!("failed enabling elpg: {}", err);
            return Err(err);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Firmware-message entry points
    // ------------------------------------------------------------------

    /// ELPG message handler, runs on the firmware-message dispatch context
    pub fn handle_elpg_msg(&self, engine: PgEngineId, msg: ElpgMsg) {
        match msg {
            ElpgMsg::InitAck => {
                debug!("INIT_PG ack from PMU, eng {:?}", engine);
            }
            ElpgMsg::AllowAck => {
                debug!("ALLOW ack from PMU, eng {:?}", engine);
                match engine {
                    PgEngineId::Graphics => {
                        let mut st = lock_unpoisoned(&self.gr.state);
                        st.stat = ElpgState::On;
                        self.gr.ack.notify_all();
                    }
                    PgEngineId::Ms => {
                        let mut st = lock_unpoisoned(&self.gr.state);
                        st.ms_transition = ElpgState::On;
                        self.gr.ack.notify_all();
                    }
                    PgEngineId::MsLtc => {
                        let mut st = lock_unpoisoned(&self.ms_ltc.state);
                        st.stat = ElpgState::On;
                        self.ms_ltc.ack.notify_all();
                    }
                }
            }
            ElpgMsg::DisallowAck => {
                debug!("DISALLOW ack from PMU, eng {:?}", engine);
                match engine {
                    PgEngineId::Graphics => {
                        let mut st = lock_unpoisoned(&self.gr.state);
                        st.stat = ElpgState::Off;
                        self.gr.ack.notify_all();
                    }
                    PgEngineId::Ms => {
                        let mut st = lock_unpoisoned(&self.gr.state);
                        st.ms_transition = ElpgState::Off;
                        self.gr.ack.notify_all();
                    }
                    PgEngineId::MsLtc => {
                        let mut st = lock_unpoisoned(&self.ms_ltc.state);
                        st.stat = ElpgState::Off;
                        self.ms_ltc.ack.notify_all();
                    }
                }

                // During bring-up the first disallow ack advances the init
                // state machine; the transition is atomic so concurrent acks
                // cannot advance it twice.
                let gr_features = self.hal.engines_feature_list(PgEngineId::Graphics);
                if gr_features != PG_FEATURE_POWER_GATING {
                    if self.init.advance_from(
                        init::PmuFwState::ElpgBooting,
                        init::PmuFwState::Started,
                        true,
                    ) {
                        self.initialized.store(true, Ordering::SeqCst);
                        self.mscg_enabled.store(false, Ordering::SeqCst);
                    }
                } else {
                    self.init.advance_from(
                        init::PmuFwState::ElpgBooting,
                        init::PmuFwState::ElpgBooted,
                        true,
                    );
                }
            }
        }
    }

    /// Secondary async PG-event handler for chips with the event path
    pub fn handle_pg_event(&self, engine: PgEngineId, event: AsyncPgEvent) {
        match event {
            AsyncPgEvent::DisallowAck => {
                debug!("async DISALLOW ack, eng {:?}", engine);
                let mut st = lock_unpoisoned(&self.gr.state);
                st.disallow_state = ElpgState::Off;
                self.gr.ack.notify_all();
            }
        }
    }

    /// Stat-allocation reply carrying the per-engine DMEM offset
    pub fn handle_stat_msg(&self, engine: PgEngineId, dmem_offset: u32) {
        debug!("ALLOC_DMEM_OFFSET acknowledged, eng {:?}", engine);
        self.stat_dmem_offset.lock()[engine.index()] = dmem_offset;
    }

    /// Engine-buffer load status message
    pub fn handle_eng_buf_msg(&self, loaded: bool) {
        self.buf_loaded.store(loaded, Ordering::SeqCst);
        let fw_state = self.init.fw_state();
        if !loaded && fw_state == init::PmuFwState::LoadingPgBuf {
            error!("failed to load PGENG buffer");
        } else {
            self.init.fw_state_change(fw_state, true);
        }
    }

    // ------------------------------------------------------------------
    // Statistics and lifecycle
    // ------------------------------------------------------------------

    fn dump_stats(&self) {
        self.diag.dump_elpg_stats();
        self.diag.dump_falcon_stats();
    }

    pub fn stat_dmem_offset(&self, engine: PgEngineId) -> u32 {
        self.stat_dmem_offset.lock()[engine.index()]
    }

    /// Gating residency counters; zeros before initialization completes
    pub fn get_pg_stats(&self, engine: PgEngineId) -> PgStats {
        if !self.initialized.load(Ordering::SeqCst) {
            return PgStats::default();
        }
        if !self.hal.supported_engines().contains(&engine) {
            return PgStats::default();
        }
        self.hal.elpg_statistics(engine)
    }

    /// Accumulated software residency counters
    pub fn residency_counters(&self) -> PgStats {
        PgStats {
            ingating_time_us: self.pg_ingating_time_us.load(Ordering::SeqCst),
            ungating_time_us: self.pg_ungating_time_us.load(Ordering::SeqCst),
            gating_cnt: self.pg_gating_cnt.load(Ordering::SeqCst),
        }
    }

    /// Un-railgate path: restore a suspended golden image and re-enable
    pub fn restore_golden_image_state(&self) -> Result<()> {
        if self.golden_image_state() == GoldenImageState::Suspend {
            self.set_golden_image_state(GoldenImageState::Ready);
            if let Err(err) = self.reenable() {
                error!("fail to re-enable elpg: {}", err);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Railgate path: force a final disable and fold the residency counters
    pub fn destroy(&self) {
        let stats = self.get_pg_stats(PgEngineId::Graphics);

        if let Err(err) = self.disable() {
            error!("failed to set disable elpg: {}", err);
        }

        self.initialized.store(false, Ordering::SeqCst);

        self.pg_ingating_time_us
            .fetch_add(stats.ingating_time_us, Ordering::SeqCst);
        self.pg_ungating_time_us
            .fetch_add(stats.ungating_time_us, Ordering::SeqCst);
        self.pg_gating_cnt
            .fetch_add(stats.gating_cnt, Ordering::SeqCst);

        if self.golden_image_state() == GoldenImageState::Ready {
            self.set_golden_image_state(GoldenImageState::Suspend);
        }
        self.zbc_ready.store(false, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Bring-up steps driven by the background worker
    // ------------------------------------------------------------------

    pub(crate) fn init_powergating(&self) -> Result<()> {
        for engine in self.hal.supported_engines() {
            if self.init.fw_state() == init::PmuFwState::InitReceived {
                self.init
                    .fw_state_change(init::PmuFwState::ElpgBooting, false);
            }
            self.hal
                .init_send(self.rpc.as_ref(), *engine)
                .map_err(|err| {
                    error!("PG_INIT cmd post failed for {:?}: {}", engine, err);
                    PmuError::RpcSubmitFailed(err)
                })?;
        }
        Ok(())
    }

    pub(crate) fn init_bind_fecs(&self) -> Result<()> {
        debug!("cmd post ENG_BUF_LOAD fecs");
        self.init
            .fw_state_change(init::PmuFwState::LoadingPgBuf, false);
        self.hal.load_buff(self.rpc.as_ref()).map_err(|err| {
            error!("cmd LOAD fecs buffer failed: {}", err);
            PmuError::RpcSubmitFailed(err)
        })
    }

    pub(crate) fn setup_hw_load_zbc(&self) -> Result<()> {
        debug!("cmd post ENG_BUF_LOAD zbc");
        self.init
            .fw_state_change(init::PmuFwState::LoadingZbc, false);
        self.hal.hw_load_zbc(self.rpc.as_ref()).map_err(|err| {
            error!("cmd LOAD zbc buffer failed: {}", err);
            PmuError::RpcSubmitFailed(err)
        })
    }

    pub(crate) fn setup_hw_enable_elpg(&self) -> Result<()> {
        self.initialized.store(true, Ordering::SeqCst);
        self.init.fw_state_change(init::PmuFwState::Started, false);

        if self.config.zbc_save_enabled {
            // Save zbc table after PMU is initialized.
            self.zbc_ready.store(true, Ordering::SeqCst);
            self.hal.save_zbc(self.rpc.as_ref(), 0xf);
        }

        if self.config.elpg_enabled {
            self.hal.setup_elpg();
            self.enable()?;
        }

        if self.config.aelpg_enabled {
            self.rpc
                .execute(RpcCall::PgThresholdUpdate {
                    engine: PgEngineId::Graphics,
                    params: self.config.aelpg_param,
                })
                .map_err(PmuError::RpcSubmitFailed)?;
        }

        info!("PMU booted");
        Ok(())
    }
}
