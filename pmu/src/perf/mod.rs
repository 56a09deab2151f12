//! Perf facade
//!
//! Owns the parsed firmware tables, the change-sequence controller, the
//! power-gating controller and the two background threads: the PG bring-up
//! worker and the VFE invalidation watcher. There is exactly one
//! `PerfController` per GPU device; every operation reaches it through a
//! shared reference, never through an ambient global.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::boardobj::{BoardObjGroup, BoardObjGrpMask, E32_MAX_OBJECTS};
use crate::changeseq::{ChangeRequest, ChangeSeq, ChangeSeqFlags};
use crate::error::{PmuError, Result};
use crate::hal::{
    BiosTable, ChipGen, ClockDomainOps, Diagnostics, Gm20b, Gv11b, PerfTableId, PgHal,
    VoltRailOps,
};
use crate::pg::{init, PgConfig, PgController};
use crate::pstate::{parse_pstate_table, ClkDomain, Pstates};
use crate::rpc::RpcChannel;
use crate::surface::SuperSurface;
use crate::vfe::{build_dependency_masks, parse_vfe_table, VfeEqu, VfeVar};

/// Top-level subsystem configuration
#[derive(Debug, Clone)]
pub struct PmuConfig {
    pub chip: ChipGen,
    /// Bound for the change-sequence completion wait
    pub change_timeout: Duration,
    pub pg: PgConfig,
}

impl Default for PmuConfig {
    fn default() -> Self {
        Self {
            chip: ChipGen::Gv11b,
            change_timeout: Duration::from_secs(2),
            pg: PgConfig::default(),
        }
    }
}

/// Collaborators injected at construction
pub struct PerfDeps {
    pub rpc: Arc<dyn RpcChannel>,
    pub surface: Arc<dyn SuperSurface>,
    pub bios: Arc<dyn BiosTable>,
    pub clk_ops: Arc<dyn ClockDomainOps>,
    pub volt_ops: Arc<dyn VoltRailOps>,
    pub diag: Arc<dyn Diagnostics>,
}

/// Events consumed by the VFE invalidation watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfeEvent {
    /// One variable's sensed value changed
    VarChanged(u8),
    /// The PMU invalidated its VFE tables wholesale
    TablesInvalidated,
    /// Poison event: stop the watcher
    Exit,
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The perf subsystem, one instance per GPU device
pub struct PerfController {
    pstates: Pstates,
    vfe_vars: BoardObjGroup<VfeVar>,
    vfe_equs: BoardObjGroup<VfeEqu>,
    change_seq: Arc<ChangeSeq>,
    pg: Arc<PgController>,
    clk_ops: Arc<dyn ClockDomainOps>,
    volt_ops: Arc<dyn VoltRailOps>,
    pg_worker: Mutex<Option<init::PgInitWorker>>,
    vfe_tx: Mutex<mpsc::Sender<VfeEvent>>,
    vfe_watcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PerfController {
    /// Construct the subsystem: parse tables, build dependency masks, read
    /// the boot script, exchange change-sequence info, start the workers
    pub fn new(deps: PerfDeps, config: PmuConfig) -> Result<Self> {
        let pstate_table = deps
            .bios
            .get_perf_table(PerfTableId::PstateTable)
            .ok_or(PmuError::MalformedTableHeader)?;
        let pstates = parse_pstate_table(&pstate_table)?;

        let vfe_table = deps
            .bios
            .get_perf_table(PerfTableId::VfeTable)
            .ok_or(PmuError::MalformedTableHeader)?;
        let (mut vfe_vars, mut vfe_equs) = parse_vfe_table(&vfe_table)?;
        build_dependency_masks(&mut vfe_equs, &mut vfe_vars)?;

        let change_seq = Arc::new(ChangeSeq::new(
            deps.rpc.clone(),
            deps.surface.clone(),
            config.change_timeout,
        ));
        // Discover the operating point firmware left behind, then exchange
        // step ownership.
        let boot_script = change_seq.read_boot_script()?;
        debug!(
            "firmware boot script carries {} steps",
            boot_script.header.num_steps
        );
        change_seq.info_get()?;
        change_seq.info_set()?;

        let hal: Arc<dyn PgHal> = match config.chip {
            ChipGen::Gm20b => Arc::new(Gm20b),
            ChipGen::Gv11b => Arc::new(Gv11b),
        };
        let pg = Arc::new(PgController::new(
            deps.rpc.clone(),
            hal,
            deps.diag.clone(),
            config.pg.clone(),
        ));

        let pg_worker = init::spawn(pg.clone())?;

        let (vfe_tx, vfe_rx) = mpsc::channel();
        let watcher = spawn_vfe_watcher(vfe_rx, &vfe_vars, change_seq.clone())?;

        info!(
            "perf subsystem up: {} pstates, {} vfe vars, {} vfe equs",
            pstates.len(),
            vfe_vars.len(),
            vfe_equs.len()
        );

        Ok(Self {
            pstates,
            vfe_vars,
            vfe_equs,
            change_seq,
            pg,
            clk_ops: deps.clk_ops,
            volt_ops: deps.volt_ops,
            pg_worker: Mutex::new(Some(pg_worker)),
            vfe_tx: Mutex::new(vfe_tx),
            vfe_watcher: Mutex::new(Some(watcher)),
        })
    }

    /// Program one clock domain of a pstate; the single client entry point
    pub fn set_clocks(
        &self,
        pstate_id: u32,
        domain: ClkDomain,
        freq_mhz: u32,
    ) -> Result<Duration> {
        self.change_seq.request_change(
            ChangeRequest {
                pstate_id,
                domain,
                freq_mhz,
                flags: ChangeSeqFlags::empty(),
            },
            &self.pstates,
            self.clk_ops.as_ref(),
            self.volt_ops.as_ref(),
        )
    }

    pub fn pstates(&self) -> &Pstates {
        &self.pstates
    }

    pub fn vfe_vars(&self) -> &BoardObjGroup<VfeVar> {
        &self.vfe_vars
    }

    pub fn vfe_equs(&self) -> &BoardObjGroup<VfeEqu> {
        &self.vfe_equs
    }

    pub fn change_seq(&self) -> &Arc<ChangeSeq> {
        &self.change_seq
    }

    pub fn pg(&self) -> &Arc<PgController> {
        &self.pg
    }

    /// Queue a VFE event for the watcher; called from the firmware-message
    /// dispatch context
    pub fn notify_vfe_event(&self, event: VfeEvent) {
        if lock_unpoisoned(&self.vfe_tx).send(event).is_err() {
            warn!("vfe watcher gone, dropping {:?}", event);
        }
    }

    /// Orderly teardown: watcher first, then the PG worker, then a final
    /// disable. Worker-join failure is fatal and surfaces to the caller.
    pub fn shutdown(&self) -> Result<()> {
        {
            let tx = lock_unpoisoned(&self.vfe_tx);
            let _ = tx.send(VfeEvent::Exit);
        }
        if let Some(watcher) = lock_unpoisoned(&self.vfe_watcher).take() {
            if watcher.join().is_err() {
                error!("vfe watcher panicked");
            }
        }

        if let Some(worker) = lock_unpoisoned(&self.pg_worker).take() {
            worker.stop()?;
        }

        self.pg.destroy();
        info!("perf subsystem down");
        Ok(())
    }
}

/// Start the watcher thread over a snapshot of the dependent-equation masks
fn spawn_vfe_watcher(
    rx: mpsc::Receiver<VfeEvent>,
    vars: &BoardObjGroup<VfeVar>,
    change_seq: Arc<ChangeSeq>,
) -> Result<thread::JoinHandle<()>> {
    let mut dependent: Vec<Option<BoardObjGrpMask>> = vec![None; E32_MAX_OBJECTS];
    for (idx, var) in vars.iter() {
        dependent[idx as usize] = Some(var.mask_dependent_equs.clone());
    }

    thread::Builder::new()
        .name("gpmu_vfe_watch".into())
        .spawn(move || {
            debug!("vfe watcher start");
            while let Ok(event) = rx.recv() {
                match event {
                    VfeEvent::Exit => break,
                    VfeEvent::TablesInvalidated => {
                        info!("vfe tables invalidated, forcing vf-point rebuild");
                        change_seq.note_vf_points_invalidated();
                    }
                    VfeEvent::VarChanged(idx) => match dependent.get(idx as usize) {
                        Some(Some(mask)) => {
                            let count = mask.bit_count();
                            debug!("vfe var {} changed, {} dependent equs", idx, count);
                            if count > 0 {
                                change_seq.note_vf_points_invalidated();
                            }
                        }
                        _ => warn!("vfe event for unknown var {}", idx),
                    },
                }
            }
            debug!("vfe watcher exit");
        })
        .map_err(|err| {
            error!("failed to start vfe watcher thread: {}", err);
            PmuError::WorkerSpawnFailed
        })
}
