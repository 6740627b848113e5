//! Incremental tri-color mark & sweep collector with debt-based pacing.
//!
//! Every allocation adds its size to `debt`; once the debt turns positive,
//! allocating entry points run a collector step whose size is proportional
//! to the debt times the step multiplier. After a cycle the debt is reset so
//! the next cycle starts when the heap has grown by `pause` percent over the
//! live-size estimate.

mod barrier;
mod finalize;
mod mark;
mod sweep;


use serde::Serialize;
use tracing::{debug, trace};

use crate::obj::{GcRef, Marked};
use crate::state::{Runtime, RuntimeError, ThreadRef};

/// Debt, in bytes, paid by one basic step.
pub const GC_STEP_SIZE: isize = 2400;
/// Converts between step multiplier percentages and work units.
const STEP_MUL_ADJ: isize = 200;
/// Divisor applied to the estimate before scaling by the pause.
const PAUSE_ADJ: usize = 100;
/// Cost of sweeping one object, in work units.
const SWEEP_COST: usize = 7;
/// Objects swept per sweep step.
const SWEEP_MAX: usize = (GC_STEP_SIZE as usize / SWEEP_COST) / 4;
/// Cost of running one finalizer, in work units.
const FINALIZE_COST: usize = SWEEP_COST;

/// Collector phases, in cycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GcPhase {
    Propagate,
    Atomic,
    SweepAllGc,
    SweepFinObj,
    SweepToBeFnz,
    SweepEnd,
    CallFin,
    Pause,
    /// Inside the atomic step; never observable between steps.
    InsideAtomic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcKind {
    Normal,
    /// Full collection forced by an allocation failure: no finalizers run
    /// and stacks are not shrunk.
    Emergency,
}

/// Per-runtime collection counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GcStats {
    /// Completed cycles.
    pub cycles: u64,
    pub emergency_cycles: u64,
    pub steps: u64,
    pub objects_freed: u64,
    pub bytes_freed: u64,
    pub finalizers_run: u64,
    pub finalizer_errors: u64,
    /// Live bytes estimated at the end of the last cycle.
    pub estimate: usize,
}

/// Heads of the intrusive object lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GcList {
    AllGc,
    FinObj,
    ToBeFnz,
    FixedGc,
}

/// A position in an object list: either a list head or the `next` field of
/// an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Link {
    Head(GcList),
    After(GcRef),
}

/// Collector bookkeeping. Objects are threaded through `GcHeader::next`
/// into exactly one of the four lists.
pub struct Collector {
    pub(crate) phase: GcPhase,
    pub(crate) kind: GcKind,
    /// Automatic steps enabled.
    pub(crate) running: bool,
    pub(crate) current_white: u8,
    /// Bytes accounted, not counting `debt`.
    pub(crate) total_bytes: usize,
    pub(crate) debt: isize,
    pub(crate) estimate: usize,
    pub(crate) pause: u32,
    pub(crate) step_mul: u32,
    pub(crate) allgc: Option<GcRef>,
    /// Objects with a finalizer.
    pub(crate) finobj: Option<GcRef>,
    /// Unreachable objects whose finalizer is pending.
    pub(crate) tobefnz: Option<GcRef>,
    /// Never collected.
    pub(crate) fixedgc: Option<GcRef>,
    /// Next position to sweep.
    pub(crate) sweep: Option<Link>,
    pub(crate) gray: Vec<GcRef>,
    /// Objects to traverse again in the atomic step.
    pub(crate) gray_again: Vec<GcRef>,
    /// Weak-value tables to clear.
    pub(crate) weak: Vec<GcRef>,
    /// Ephemeron tables (weak keys) to converge and clear.
    pub(crate) ephemeron: Vec<GcRef>,
    /// Tables with weak keys and values.
    pub(crate) all_weak: Vec<GcRef>,
    /// Threads with open upvalues.
    pub(crate) twups: Vec<ThreadRef>,
    /// Finalizers to run per step.
    pub(crate) fin_num: u32,
    pub(crate) stats: GcStats,
}

impl Collector {
    pub(crate) fn new(pause: u32, step_mul: u32, base_bytes: usize) -> Self {
        Self {
            phase: GcPhase::Pause,
            kind: GcKind::Normal,
            running: false,
            current_white: Marked::WHITE0,
            total_bytes: base_bytes,
            debt: 0,
            estimate: base_bytes,
            pause,
            step_mul,
            allgc: None,
            finobj: None,
            tobefnz: None,
            fixedgc: None,
            sweep: None,
            gray: Vec::new(),
            gray_again: Vec::new(),
            weak: Vec::new(),
            ephemeron: Vec::new(),
            all_weak: Vec::new(),
            twups: Vec::new(),
            fin_num: 0,
            stats: GcStats::default(),
        }
    }

    #[inline]
    pub(crate) fn other_white(&self) -> u8 {
        self.current_white ^ Marked::WHITE_BITS
    }

    /// While marking, black objects must never point to white ones.
    #[inline]
    pub(crate) fn keep_invariant(&self) -> bool {
        self.phase <= GcPhase::Atomic
    }

    #[inline]
    pub(crate) fn is_sweep_phase(&self) -> bool {
        (GcPhase::SweepAllGc..=GcPhase::SweepEnd).contains(&self.phase)
    }

    /// Accounted bytes, debt included.
    #[inline]
    pub(crate) fn total(&self) -> usize {
        (self.total_bytes as isize + self.debt).max(0) as usize
    }

    /// Moves `debt` while keeping the total unchanged.
    pub(crate) fn set_debt(&mut self, debt: isize) {
        let total = self.total() as isize;
        self.total_bytes = (total - debt).max(0) as usize;
        self.debt = debt;
    }

    /// Debt converted to work units.
    fn work_debt(&self) -> isize {
        if self.debt <= 0 {
            return 0;
        }
        let units = self.debt / STEP_MUL_ADJ + 1;
        units.saturating_mul(self.step_mul.max(1) as isize)
    }

    /// Schedules the next cycle once the heap reaches `pause` percent of the
    /// estimate.
    fn set_pause(&mut self) {
        let estimate = (self.estimate / PAUSE_ADJ).max(1);
        let threshold = estimate.saturating_mul(self.pause as usize);
        let total = self.total();
        let debt = total as isize - threshold.min(isize::MAX as usize) as isize;
        self.set_debt(debt);
    }
}

impl Runtime {
    /// Current phase.
    pub fn gc_phase(&self) -> GcPhase {
        self.gc.phase
    }

    /// Total bytes accounted to this runtime.
    pub fn total_bytes(&self) -> usize {
        self.gc.total()
    }

    pub fn gc_debt(&self) -> isize {
        self.gc.debt
    }

    pub fn gc_stats(&self) -> &GcStats {
        &self.gc.stats
    }

    pub fn gc_is_running(&self) -> bool {
        self.gc.running
    }

    /// Stops automatic collection steps. Emergency collections still happen.
    pub fn gc_stop(&mut self) {
        self.gc.running = false;
        debug!(target: "lume::gc", "stop");
    }

    pub fn gc_restart(&mut self) {
        self.gc.set_debt(0);
        self.gc.running = true;
        debug!(target: "lume::gc", "restart");
    }

    /// Sets the pause percentage, returning the previous one.
    pub fn set_gc_pause(&mut self, pause: u32) -> u32 {
        std::mem::replace(&mut self.gc.pause, pause)
    }

    /// Sets the step multiplier, returning the previous one.
    pub fn set_gc_step_mul(&mut self, step_mul: u32) -> u32 {
        std::mem::replace(&mut self.gc.step_mul, step_mul.max(1))
    }

    /// Runs a complete cycle, finalizers included.
    pub fn full_gc(&mut self) -> Result<(), RuntimeError> {
        self.full_collect(false)
    }

    /// Performs an explicit step. With `kb == 0` one basic step runs;
    /// otherwise `kb` kilobytes are added to the debt first. Returns whether
    /// the step finished a cycle.
    pub fn gc_step(&mut self, kb: usize) -> Result<bool, RuntimeError> {
        let was_running = std::mem::replace(&mut self.gc.running, true);
        let mut debt = 1isize;
        let res = if kb == 0 {
            self.gc.set_debt(0);
            self.collect_step()
        } else {
            debt = (kb as isize).saturating_mul(1024).saturating_add(self.gc.debt);
            self.gc.set_debt(debt);
            self.check_gc()
        };
        self.gc.running = was_running;
        res?;
        Ok(debt > 0 && self.gc.phase == GcPhase::Pause)
    }

    /// Pays collector debt when it is positive. Called by allocating entry
    /// points before they allocate.
    #[inline]
    pub(crate) fn check_gc(&mut self) -> Result<(), RuntimeError> {
        if self.gc.debt > 0 {
            self.collect_step()?;
        }
        Ok(())
    }

    /// One incremental step, sized by the current debt.
    pub(crate) fn collect_step(&mut self) -> Result<(), RuntimeError> {
        if !self.gc.running {
            self.gc.set_debt(-GC_STEP_SIZE * 10);
            return Ok(());
        }
        self.gc.stats.steps += 1;
        let mut debt = self.gc.work_debt();
        loop {
            let work = self.single_step()?;
            debt -= work as isize;
            if debt <= -GC_STEP_SIZE || self.gc.phase == GcPhase::Pause {
                break;
            }
        }
        if self.gc.phase == GcPhase::Pause {
            self.gc.set_pause();
        } else {
            let debt = (debt / self.gc.step_mul.max(1) as isize) * STEP_MUL_ADJ;
            self.gc.set_debt(debt);
            self.run_a_few_finalizers()?;
        }
        trace!(target: "lume::gc", phase = ?self.gc.phase, debt = self.gc.debt, total = self.gc.total(), "step");
        Ok(())
    }

    fn single_step(&mut self) -> Result<usize, RuntimeError> {
        match self.gc.phase {
            GcPhase::Pause => {
                let work = crate::intern::StringTable::footprint_for(self.strings.size());
                self.restart_collection();
                self.enter_phase(GcPhase::Propagate);
                Ok(work)
            }
            GcPhase::Propagate => {
                let work = self.propagate_mark();
                if self.gc.gray.is_empty() {
                    self.enter_phase(GcPhase::Atomic);
                }
                Ok(work)
            }
            GcPhase::Atomic => {
                self.propagate_all();
                let work = self.atomic();
                self.enter_sweep();
                self.gc.estimate = self.gc.total();
                Ok(work)
            }
            GcPhase::SweepAllGc => Ok(self.sweep_step(GcPhase::SweepFinObj, Some(Link::Head(GcList::FinObj)))),
            GcPhase::SweepFinObj => Ok(self.sweep_step(GcPhase::SweepToBeFnz, Some(Link::Head(GcList::ToBeFnz)))),
            GcPhase::SweepToBeFnz => Ok(self.sweep_step(GcPhase::SweepEnd, None)),
            GcPhase::SweepEnd => {
                let main = self.main_thread;
                let white = self.gc.current_white;
                self.heap.header_mut(main).marked.set_white(white);
                self.check_sizes();
                self.enter_phase(GcPhase::CallFin);
                Ok(0)
            }
            GcPhase::CallFin => {
                if self.gc.tobefnz.is_some() && self.gc.kind != GcKind::Emergency {
                    let n = self.run_a_few_finalizers()?;
                    Ok(n * FINALIZE_COST)
                } else {
                    self.finish_cycle();
                    Ok(0)
                }
            }
            GcPhase::InsideAtomic => unreachable!("collector step observed inside the atomic phase"),
        }
    }

    fn enter_phase(&mut self, phase: GcPhase) {
        debug!(target: "lume::gc", from = ?self.gc.phase, to = ?phase, "phase");
        self.gc.phase = phase;
    }

    fn finish_cycle(&mut self) {
        self.gc.stats.cycles += 1;
        if self.gc.kind == GcKind::Emergency {
            self.gc.stats.emergency_cycles += 1;
        }
        self.gc.stats.estimate = self.gc.estimate;
        self.enter_phase(GcPhase::Pause);
    }

    /// Steps until the phase satisfies `until`.
    fn run_until(&mut self, until: impl Fn(GcPhase) -> bool) -> Result<(), RuntimeError> {
        while !until(self.gc.phase) {
            self.single_step()?;
        }
        Ok(())
    }

    /// Full cycle. An emergency collection runs no finalizers.
    pub(crate) fn full_collect(&mut self, emergency: bool) -> Result<(), RuntimeError> {
        debug_assert_eq!(self.gc.kind, GcKind::Normal);
        if emergency {
            self.gc.kind = GcKind::Emergency;
        }
        debug!(target: "lume::gc", emergency, total = self.gc.total(), "full_gc");
        let res = self.full_collect_cycle();
        self.gc.kind = GcKind::Normal;
        res?;
        self.gc.set_pause();
        Ok(())
    }

    fn full_collect_cycle(&mut self) -> Result<(), RuntimeError> {
        if self.gc.keep_invariant() {
            // whiten black objects before restarting
            self.enter_sweep();
        }
        self.run_until(|p| p == GcPhase::Pause)?;
        self.run_until(|p| p != GcPhase::Pause)?;
        self.run_until(|p| p == GcPhase::CallFin)?;
        self.run_until(|p| p == GcPhase::Pause)
    }
}
