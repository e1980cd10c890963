//! # Scheduler
//!
//! The kernel context object and the dispatch algorithm.
//!
//! [`Scheduler`] owns the task table, the semaphore set and the scheduling
//! cursor. Every kernel operation is a method on it; the global facade in
//! `kernel.rs` merely locks the single static instance. Host tests build as
//! many independent instances as they like.
//!
//! ## Scheduling Algorithm
//!
//! Priority round robin with skip-count aging:
//! 1. Scan the table circularly, starting just after the last dispatched
//!    slot.
//! 2. A Ready task whose skip budget is exhausted is selected and its budget
//!    is reloaded from its effective priority.
//! 3. Every other Ready task the scan passes over spends one unit of budget.
//!
//! A task of priority `p` is therefore passed over `p` times between
//! dispatches: priority 0 runs on every visit, priority 7 on every eighth.
//! Tasks of equal priority rotate in table order, and since every pass ages
//! every Ready task, nothing that is Ready starves.
//!
//! ## Preemption
//!
//! In [`SchedulingMode::Preemptive`] every tick requests a context switch.
//! In [`SchedulingMode::Cooperative`] only `yield`, `sleep` and a blocking
//! `wait` do.

use crate::arch::Port;
use crate::config::{MAX_SEMAPHORES, MAX_TASKS};
use crate::error::KernelError;
use crate::semaphore::Semaphore;
use crate::task::{TaskEntry, TaskId, TaskState, TaskStats, TaskTable};

/// When the scheduler runs. Chosen once at `kernel::init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulingMode {
    /// Switch only on yield, sleep or a blocking wait.
    Cooperative,
    /// Additionally switch on every tick.
    Preemptive,
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central kernel state. Stored as a global in `kernel.rs`.
pub struct Scheduler<P: Port> {
    /// Task control blocks.
    pub(crate) tasks: TaskTable,

    /// Semaphore slots, addressed by `SemaphoreId`.
    pub(crate) semaphores: [Semaphore; MAX_SEMAPHORES],

    /// Slot of the last dispatched task. The next scan starts after it.
    cursor: usize,

    /// The task currently executing, if it is still live.
    pub(crate) running: Option<TaskId>,

    mode: SchedulingMode,

    /// Monotonic tick counter.
    tick_count: u64,

    started: bool,

    pub(crate) port: P,
}

impl<P: Port> Scheduler<P> {
    /// Create an empty scheduler in cooperative mode.
    pub const fn new(port: P) -> Self {
        Self {
            tasks: TaskTable::new(),
            semaphores: [Semaphore::EMPTY; MAX_SEMAPHORES],
            cursor: MAX_TASKS - 1,
            running: None,
            mode: SchedulingMode::Cooperative,
            tick_count: 0,
            started: false,
            port,
        }
    }

    pub fn set_mode(&mut self, mode: SchedulingMode) {
        self.mode = mode;
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    /// The task currently executing.
    pub fn running(&self) -> Option<TaskId> {
        self.running
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Scheduling snapshot of a task.
    pub fn stats(&self, id: TaskId) -> TaskStats {
        self.tasks.get(id).stats()
    }

    /// Scheduling snapshot of the live task created from `entry`.
    pub fn task_stats(&self, entry: TaskEntry) -> Option<TaskStats> {
        self.tasks.find(entry).map(|id| self.stats(id))
    }

    // -----------------------------------------------------------------------
    // Task lifecycle
    // -----------------------------------------------------------------------

    /// Register a new task.
    ///
    /// # Returns
    /// - `Ok(task_id)` — the slot of the new, Ready task
    /// - `Err(InvalidPriority)` — `priority` is not below `PRIORITY_LEVELS`
    /// - `Err(DuplicateRegistration)` — `entry` already has a live task
    /// - `Err(TaskTableFull)` — no Invalid slot left
    pub fn create_task(&mut self, entry: TaskEntry, priority: u8) -> Result<TaskId, KernelError> {
        match self.tasks.allocate(entry, priority) {
            Ok(id) => {
                debug!("task {} created at priority {}", id, priority);
                Ok(id)
            }
            Err(e) => {
                warn!("task creation refused: {}", e);
                Err(e)
            }
        }
    }

    /// Destroy the live task created from `entry`. No-op if there is none.
    ///
    /// The task is removed from every wait queue and holder set it appears
    /// in, and the priority boosts it caused are withdrawn. Destroying the
    /// running task requests a switch away from it.
    ///
    /// Units the task holds are not returned: a waiter on a semaphore only
    /// it could post stays Blocked until another task posts it.
    pub fn destroy_task(&mut self, entry: TaskEntry) -> Option<TaskId> {
        let id = self.tasks.free(entry)?;
        debug!("task {} destroyed", id);

        let mut scrubbed = false;
        for sem in self.semaphores.iter_mut() {
            scrubbed |= sem.forget(id);
        }
        if scrubbed {
            self.refresh_priorities();
        }

        if self.running == Some(id) {
            self.running = None;
            self.port.request_switch();
        }
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Select the next task to run and make it the running task.
    ///
    /// Returns `None`, leaving the cursor alone, if no task is Ready.
    pub fn schedule(&mut self) -> Option<TaskId> {
        if !self.tasks.any_ready() {
            return None;
        }

        let mut slot = self.cursor;
        loop {
            slot = (slot + 1) % MAX_TASKS;
            let tcb = self.tasks.get_mut(TaskId::new(slot));
            if !tcb.is_ready() {
                continue;
            }
            if tcb.skip_count == 0 {
                tcb.skip_count = tcb.effective_priority;
                tcb.dispatches = tcb.dispatches.wrapping_add(1);
                break;
            }
            tcb.skip_count -= 1;
        }

        let id = TaskId::new(slot);
        self.cursor = slot;
        self.running = Some(id);
        Some(id)
    }

    /// Pick the first task. Returns its saved stack pointer for the port to
    /// launch.
    pub fn start(&mut self) -> Result<*mut u32, KernelError> {
        let first = self.schedule().ok_or(KernelError::NoReadyTask)?;
        self.started = true;
        info!("scheduler started in {} mode, first task {}", self.mode, first);
        Ok(self.tasks.get(first).stack_pointer)
    }

    /// Context switch body, called from PendSV.
    ///
    /// Stores `saved_sp` as the outgoing task's stack pointer, unless that
    /// task was destroyed, then schedules and returns the incoming task's
    /// stack pointer.
    pub fn switch_context(&mut self, saved_sp: *mut u32) -> Result<*mut u32, KernelError> {
        if let Some(prev) = self.running {
            self.tasks.get_mut(prev).stack_pointer = saved_sp;
        }
        let next = self.schedule().ok_or(KernelError::NoReadyTask)?;
        Ok(self.tasks.get(next).stack_pointer)
    }

    // -----------------------------------------------------------------------
    // Yield, sleep, tick
    // -----------------------------------------------------------------------

    /// Give up the CPU. The caller stays Ready.
    ///
    /// Before `start` there is no task context to save, so nothing is
    /// requested.
    pub fn yield_now(&mut self) -> Result<(), KernelError> {
        self.running.ok_or(KernelError::NotStarted)?;
        self.port.request_switch();
        Ok(())
    }

    /// Suspend the running task for `ticks` ticks. `sleep(0)` is a yield.
    pub fn sleep(&mut self, ticks: u32) -> Result<(), KernelError> {
        let id = self.running.ok_or(KernelError::NotStarted)?;
        if ticks > 0 {
            let tcb = self.tasks.get_mut(id);
            tcb.state = TaskState::Delayed;
            tcb.delay_ticks = ticks;
            trace!("task {} sleeping for {} ticks", id, ticks);
        }
        self.port.request_switch();
        Ok(())
    }

    /// Periodic tick: age every Delayed task and wake those that expire.
    ///
    /// Requests a switch on every tick in preemptive mode.
    pub fn tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);

        for tcb in self.tasks.iter_mut() {
            if tcb.state != TaskState::Delayed {
                continue;
            }
            tcb.delay_ticks = tcb.delay_ticks.saturating_sub(1);
            if tcb.delay_ticks == 0 {
                tcb.state = TaskState::Ready;
            }
        }

        if self.started && self.mode == SchedulingMode::Preemptive {
            self.port.request_switch();
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::RecordingPort;
    use crate::config::PRIORITY_LEVELS;
    use crate::frame::Stack;
    use crate::task::tests::{task_a, task_b, task_c, task_d, ENTRIES};

    fn new_scheduler() -> Scheduler<RecordingPort> {
        Scheduler::new(RecordingPort::default())
    }

    /// Run `n` scheduling decisions and count dispatches per slot.
    fn dispatch_counts(s: &mut Scheduler<RecordingPort>, n: usize) -> [u32; MAX_TASKS] {
        let mut counts = [0u32; MAX_TASKS];
        for _ in 0..n {
            let id = s.schedule().expect("a task is ready");
            counts[id.index()] += 1;
        }
        counts
    }

    #[test]
    fn test_task_count_tracks_creations() {
        let mut s = new_scheduler();
        for (i, entry) in ENTRIES.iter().take(MAX_TASKS).enumerate() {
            assert!(s.create_task(*entry, (i % 8) as u8).is_ok());
            assert_eq!(s.task_count(), i + 1);
        }
        assert_eq!(s.create_task(ENTRIES[MAX_TASKS], 0), Err(KernelError::TaskTableFull));
        assert_eq!(s.task_count(), MAX_TASKS);
    }

    #[test]
    fn test_duplicate_creation_fails() {
        let mut s = new_scheduler();
        s.create_task(task_a, 2).unwrap();
        assert_eq!(s.create_task(task_a, 2), Err(KernelError::DuplicateRegistration));
        assert_eq!(s.task_count(), 1);
    }

    #[test]
    fn test_destroy_unknown_is_noop() {
        let mut s = new_scheduler();
        s.create_task(task_a, 2).unwrap();
        assert_eq!(s.destroy_task(task_b), None);
        assert_eq!(s.task_count(), 1);
        assert_eq!(s.port().switches(), 0);
    }

    #[test]
    fn test_destroy_frees_slot_for_reuse() {
        let mut s = new_scheduler();
        s.create_task(task_a, 2).unwrap();
        let b = s.create_task(task_b, 2).unwrap();
        assert_eq!(s.destroy_task(task_b), Some(b));
        assert_eq!(s.task_count(), 1);
        assert_eq!(s.stats(b).state, TaskState::Invalid);
        assert_eq!(s.create_task(task_c, 5), Ok(b));
    }

    #[test]
    fn test_schedule_with_nothing_ready() {
        let mut s = new_scheduler();
        assert_eq!(s.schedule(), None);
        assert_eq!(s.start(), Err(KernelError::NoReadyTask));
        assert!(!s.is_started());
    }

    #[test]
    fn test_equal_priority_round_robin() {
        let mut s = new_scheduler();
        let n = 4;
        for entry in ENTRIES.iter().take(n) {
            s.create_task(*entry, 3).unwrap();
        }
        // Any window of n consecutive decisions covers every task
        let picks: [usize; 12] = core::array::from_fn(|_| s.schedule().unwrap().index());
        for window in picks.windows(n) {
            for slot in 0..n {
                assert!(window.contains(&slot), "slot {} missing from {:?}", slot, window);
            }
        }
        assert_eq!(&picks[..4], &[0, 1, 2, 3]);
    }

    #[test]
    fn test_mixed_priority_weighting() {
        let mut s = new_scheduler();
        s.create_task(task_a, 0).unwrap();
        s.create_task(task_b, 3).unwrap();
        s.create_task(task_c, 7).unwrap();

        let counts = dispatch_counts(&mut s, 100);
        assert!(counts[0] > counts[1], "{:?}", counts);
        assert!(counts[1] > counts[2], "{:?}", counts);
        // Aging keeps the lowest priority alive
        assert!(counts[2] > 0);
        assert_eq!(counts.iter().sum::<u32>(), 100);
    }

    #[test]
    fn test_skip_count_stays_below_ceiling() {
        let mut s = new_scheduler();
        for (i, entry) in ENTRIES.iter().take(8).enumerate() {
            s.create_task(*entry, i as u8).unwrap();
        }
        for _ in 0..200 {
            let id = s.schedule().unwrap();
            assert!(s.stats(id).skip_count < PRIORITY_LEVELS);
        }
        for i in 0..8 {
            let stats = s.stats(TaskId::new(i));
            assert!(stats.skip_count < PRIORITY_LEVELS);
            assert!(stats.dispatches > 0, "priority {} starved", i);
        }
    }

    #[test]
    fn test_only_ready_tasks_dispatched() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 0).unwrap();
        let b = s.create_task(task_b, 0).unwrap();
        s.tasks.get_mut(a).state = TaskState::Blocked;
        for _ in 0..10 {
            assert_eq!(s.schedule(), Some(b));
        }
        assert_eq!(s.stats(a).dispatches, 0);
    }

    #[test]
    fn test_start_returns_first_frame() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 0).unwrap();
        let sp = s.start().unwrap();
        assert!(s.is_started());
        assert_eq!(s.running(), Some(a));
        let tcb = s.tasks.get(a);
        assert_eq!(tcb.stack.offset_of(sp), Some(Stack::FRAME_BASE));
    }

    #[test]
    fn test_switch_context_saves_outgoing_sp() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 0).unwrap();
        let b = s.create_task(task_b, 0).unwrap();
        let sp_a = s.start().unwrap();
        let sp_b = s.tasks.get(b).stack_pointer;

        // Task A ran deeper into its stack before being switched out
        let saved = sp_a.wrapping_sub(8);
        let next = s.switch_context(saved).unwrap();
        assert_eq!(next, sp_b);
        assert_eq!(s.running(), Some(b));
        assert_eq!(s.tasks.get(a).stack_pointer, saved);

        let next = s.switch_context(sp_b).unwrap();
        assert_eq!(next, saved);
        assert_eq!(s.running(), Some(a));
    }

    #[test]
    fn test_destroying_running_task_skips_save() {
        let mut s = new_scheduler();
        s.create_task(task_a, 0).unwrap();
        let b = s.create_task(task_b, 0).unwrap();
        s.start().unwrap();
        assert_eq!(s.running().map(|id| id.index()), Some(0));

        s.destroy_task(task_a);
        assert_eq!(s.running(), None);
        assert_eq!(s.port().switches(), 1);

        let sp_b = s.tasks.get(b).stack_pointer;
        assert_eq!(s.switch_context(core::ptr::null_mut()), Ok(sp_b));
        assert_eq!(s.running(), Some(b));
    }

    #[test]
    fn test_sleep_and_tick_wakeup() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 0).unwrap();
        let idle = s.create_task(task_d, 7).unwrap();
        s.start().unwrap();
        assert_eq!(s.running(), Some(a));

        s.sleep(3).unwrap();
        assert_eq!(s.stats(a).state, TaskState::Delayed);
        assert_eq!(s.port().switches(), 1);
        assert_eq!(s.schedule(), Some(idle));

        s.tick();
        s.tick();
        assert_eq!(s.stats(a).state, TaskState::Delayed);
        assert_eq!(s.stats(a).delay_ticks, 1);
        s.tick();
        assert_eq!(s.stats(a).state, TaskState::Ready);
        assert_eq!(s.tick_count(), 3);
    }

    #[test]
    fn test_sleep_zero_is_yield() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 0).unwrap();
        s.start().unwrap();
        s.sleep(0).unwrap();
        assert_eq!(s.stats(a).state, TaskState::Ready);
        assert_eq!(s.port().switches(), 1);
    }

    #[test]
    fn test_sleep_before_start() {
        let mut s = new_scheduler();
        s.create_task(task_a, 0).unwrap();
        assert_eq!(s.sleep(5), Err(KernelError::NotStarted));
    }

    #[test]
    fn test_tick_preempts_only_in_preemptive_mode() {
        let mut s = new_scheduler();
        s.create_task(task_a, 0).unwrap();
        s.start().unwrap();
        s.tick();
        assert_eq!(s.port().switches(), 0);

        s.set_mode(SchedulingMode::Preemptive);
        s.tick();
        s.tick();
        assert_eq!(s.port().switches(), 2);
    }

    #[test]
    fn test_yield_keeps_caller_ready() {
        let mut s = new_scheduler();
        let a = s.create_task(task_a, 3).unwrap();
        s.create_task(task_b, 3).unwrap();
        s.start().unwrap();
        s.yield_now().unwrap();
        assert_eq!(s.stats(a).state, TaskState::Ready);
        assert_eq!(s.port().switches(), 1);
    }

    #[test]
    fn test_yield_before_start_requests_nothing() {
        let mut s = new_scheduler();
        s.create_task(task_a, 3).unwrap();
        assert_eq!(s.yield_now(), Err(KernelError::NotStarted));
        assert_eq!(s.port().switches(), 0);
    }
}
