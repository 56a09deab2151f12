//! Power-gating bring-up worker
//!
//! A background thread drives the strictly ordered one-time bring-up
//! sequence: INIT received -> ELPG booting -> ELPG booted -> loading PG
//! buffer -> loading ZBC -> started. The thread wakes on a condition
//! variable, processes exactly one state transition per wake, and exits when
//! the poison state is posted. Acknowledgment messages from the firmware
//! advance the state between wakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};

use crate::error::{PmuError, Result};
use crate::pg::PgController;

/// PMU firmware bring-up states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuFwState {
    Off,
    InitReceived,
    ElpgBooting,
    ElpgBooted,
    LoadingPgBuf,
    LoadingZbc,
    Started,
    Exit,
}

struct InitInner {
    fw_state: PmuFwState,
    state_change: bool,
    destroy: bool,
}

/// State shared between the worker, the message handlers and the controller
pub struct PgInitShared {
    inner: Mutex<InitInner>,
    wakeup: Condvar,
}

impl PgInitShared {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(InitInner {
                fw_state: PmuFwState::Off,
                state_change: false,
                destroy: false,
            }),
            wakeup: Condvar::new(),
        }
    }

    pub fn fw_state(&self) -> PmuFwState {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .fw_state
    }

    /// Set the firmware state; with `post` the worker is woken to process it
    pub fn fw_state_change(&self, state: PmuFwState, post: bool) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.fw_state = state;
        if post {
            inner.state_change = true;
            self.wakeup.notify_all();
        }
    }

    /// Advance `expected -> next` atomically; returns whether the transition
    /// happened
    ///
    /// Acknowledgment handlers race each other on the dispatch context; the
    /// check-and-set must be one critical section or a state could be
    /// advanced twice.
    pub fn advance_from(&self, expected: PmuFwState, next: PmuFwState, post: bool) -> bool {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if inner.fw_state != expected {
            return false;
        }
        inner.fw_state = next;
        if post {
            inner.state_change = true;
            self.wakeup.notify_all();
        }
        true
    }

    fn post_destroy(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.fw_state = PmuFwState::Exit;
        inner.destroy = true;
        inner.state_change = true;
        self.wakeup.notify_all();
    }

    /// Park until a state change is posted; returns `(state, destroy)`
    fn wait_change(&self) -> (PmuFwState, bool) {
        let guard = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut inner = self
            .wakeup
            .wait_while(guard, |inner| !inner.state_change)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.state_change = false;
        (inner.fw_state, inner.destroy)
    }
}

impl Default for PgInitShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the running bring-up worker
pub struct PgInitWorker {
    handle: Option<thread::JoinHandle<()>>,
    shared: Arc<PgInitShared>,
    running: Arc<AtomicBool>,
}

/// Spawn the bring-up worker for a controller
pub fn spawn(pg: Arc<PgController>) -> Result<PgInitWorker> {
    let shared = pg.init_shared();
    let running = Arc::new(AtomicBool::new(true));
    let thread_running = running.clone();
    let thread_shared = shared.clone();

    let handle = thread::Builder::new()
        .name("gpmu_pg_init".into())
        .spawn(move || {
            debug!("pg init thread start");
            loop {
                let (state, destroy) = thread_shared.wait_change();
                if destroy {
                    debug!("pmu state exit");
                    break;
                }
                // Errors are logged by the step itself; the worker keeps
                // serving states until destroyed.
                let step = match state {
                    PmuFwState::InitReceived => {
                        debug!("pmu starting");
                        pg.init_powergating()
                    }
                    PmuFwState::ElpgBooted => {
                        debug!("elpg booted");
                        pg.init_bind_fecs()
                    }
                    PmuFwState::LoadingPgBuf => {
                        debug!("loaded pg buf");
                        pg.setup_hw_load_zbc()
                    }
                    PmuFwState::LoadingZbc => {
                        debug!("loaded zbc");
                        pg.setup_hw_enable_elpg()
                    }
                    other => {
                        debug!("invalid state {:?}", other);
                        Ok(())
                    }
                };
                if let Err(err) = step {
                    error!("pg init step failed: {}", err);
                }
            }
            thread_running.store(false, Ordering::SeqCst);
            debug!("pg init thread exit");
        })
        .map_err(|err| {
            error!("failed to start pg init thread: {}", err);
            PmuError::WorkerSpawnFailed
        })?;

    Ok(PgInitWorker {
        handle: Some(handle),
        shared,
        running,
    })
}

impl PgInitWorker {
    /// Post the poison state and join, bounded by a retry loop
    ///
    /// Exceeding the bound abandons the thread and is fatal: the worker
    /// still holds a reference to the controller.
    pub fn stop(mut self) -> Result<()> {
        self.shared.post_destroy();

        let mut stopped = false;
        for _ in 0..1000 {
            if !self.running.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        if !stopped {
            error!("timeout - waiting PMU state machine thread stop");
            return Err(PmuError::WorkerJoinTimedOut);
        }

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("pg init thread stopped");
        Ok(())
    }
}
