//! # Task Control Block
//!
//! Defines the task model for SkipOS. Each task owns one private stack and
//! one slot in a fixed-capacity [`TaskTable`]. The table is the single source
//! of truth for task identity, state, priority and saved stack pointer.
//!
//! Slots are an arena with index reuse: creation takes the first Invalid
//! slot, destruction returns the slot to Invalid. Nothing is allocated.

use crate::config::{MAX_TASKS, PRIORITY_LEVELS};
use crate::error::KernelError;
use crate::frame::Stack;

/// The function signature of a task entry point.
///
/// Tasks run forever and take no arguments. The entry address doubles as
/// the task's identity, so one function backs at most one live task.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a task slot.
///
/// ```text
///               create()
///   Invalid ─────────────► Ready ◄──────────────┐
///      ▲                   │   │                 │
///      │ destroy()   wait()│   │sleep()          │ post() / tick expiry
///      │                   ▼   ▼                 │
///      └──────────── Blocked   Delayed ──────────┘
/// ```
///
/// The running task is also Ready; there is no separate Running state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Free slot. No stack pointer, not schedulable.
    Invalid,
    /// Eligible for dispatch.
    Ready,
    /// Waiting for a semaphore post.
    Blocked,
    /// Waiting for `delay_ticks` to reach zero.
    Delayed,
}

/// Index of a task slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskId(u8);

impl TaskId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    /// Slot index in the task table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit representing this task in a holder mask.
    #[inline]
    pub(crate) const fn mask(self) -> u16 {
        1 << self.0
    }
}

/// Check a requested priority against the configured number of levels.
pub fn validate_priority(priority: u8) -> Result<u8, KernelError> {
    if priority < PRIORITY_LEVELS {
        Ok(priority)
    } else {
        Err(KernelError::InvalidPriority)
    }
}

#[inline]
fn same_entry(a: TaskEntry, b: TaskEntry) -> bool {
    a as usize == b as usize
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — everything needed to schedule and
/// context-switch one task.
pub struct TaskControlBlock {
    /// Current scheduling state.
    pub state: TaskState,

    /// Entry point, which is also the task's identity. `None` when Invalid.
    pub entry: Option<TaskEntry>,

    /// Saved process stack pointer. Points into `self.stack` while the task
    /// is live, null when Invalid.
    pub stack_pointer: *mut u32,

    /// Configured priority, 0 = highest.
    pub base_priority: u8,

    /// Priority used for scheduling. Never numerically above
    /// `base_priority`; lower while the task holds a semaphore a more
    /// urgent task is waiting on.
    pub effective_priority: u8,

    /// Remaining passes the scheduler may bypass this task. Reloaded from
    /// `effective_priority` on every dispatch, so it stays below
    /// `PRIORITY_LEVELS`.
    pub skip_count: u8,

    /// Ticks left before a Delayed task becomes Ready.
    pub delay_ticks: u32,

    /// Times the scheduler has selected this task since creation.
    pub dispatches: u32,

    /// Private stack.
    pub stack: Stack,
}

// Safety: `stack_pointer` only ever points into the TCB's own stack, and
// TCBs are only touched inside critical sections.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    /// An Invalid slot. Used to initialize the static table.
    pub const EMPTY: Self = Self {
        state: TaskState::Invalid,
        entry: None,
        stack_pointer: core::ptr::null_mut(),
        base_priority: 0,
        effective_priority: 0,
        skip_count: 0,
        delay_ticks: 0,
        dispatches: 0,
        stack: Stack::EMPTY,
    };

    /// Turn an Invalid slot into a Ready task with a freshly primed stack.
    pub fn init(&mut self, entry: TaskEntry, priority: u8) {
        self.state = TaskState::Ready;
        self.entry = Some(entry);
        self.base_priority = priority;
        self.effective_priority = priority;
        self.skip_count = priority;
        self.delay_ticks = 0;
        self.dispatches = 0;
        self.stack_pointer = self.stack.prime(entry);
    }

    /// Return the slot to Invalid.
    pub fn release(&mut self) {
        self.state = TaskState::Invalid;
        self.entry = None;
        self.stack_pointer = core::ptr::null_mut();
        self.delay_ticks = 0;
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.state != TaskState::Invalid
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Whether this live task was created from `entry`.
    pub fn runs(&self, entry: TaskEntry) -> bool {
        self.is_live() && self.entry.map_or(false, |own| same_entry(own, entry))
    }

    /// Set the effective priority. Shortens the pending skip budget when the
    /// priority rises, so a boost applies from the next scheduling pass.
    pub fn set_effective_priority(&mut self, priority: u8) {
        self.effective_priority = priority;
        self.skip_count = self.skip_count.min(priority);
    }

    /// Snapshot of the scheduling-relevant fields.
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            state: self.state,
            base_priority: self.base_priority,
            effective_priority: self.effective_priority,
            skip_count: self.skip_count,
            delay_ticks: self.delay_ticks,
            dispatches: self.dispatches,
        }
    }
}

/// Copy of a task's scheduling state, safe to hand out of a critical
/// section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskStats {
    pub state: TaskState,
    pub base_priority: u8,
    pub effective_priority: u8,
    pub skip_count: u8,
    pub delay_ticks: u32,
    pub dispatches: u32,
}

// ---------------------------------------------------------------------------
// Task table
// ---------------------------------------------------------------------------

/// Fixed-capacity table of TCBs.
pub struct TaskTable {
    tcbs: [TaskControlBlock; MAX_TASKS],
    live: usize,
}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tcbs: [TaskControlBlock::EMPTY; MAX_TASKS],
            live: 0,
        }
    }

    /// Number of live (non-Invalid) tasks.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Allocate the first Invalid slot for `entry`.
    ///
    /// Fails without touching the table if the priority is out of range,
    /// `entry` already has a live task, or every slot is taken.
    pub fn allocate(&mut self, entry: TaskEntry, priority: u8) -> Result<TaskId, KernelError> {
        let priority = validate_priority(priority)?;
        if self.find(entry).is_some() {
            return Err(KernelError::DuplicateRegistration);
        }
        let index = self
            .tcbs
            .iter()
            .position(|tcb| !tcb.is_live())
            .ok_or(KernelError::TaskTableFull)?;

        self.tcbs[index].init(entry, priority);
        self.live += 1;
        Ok(TaskId::new(index))
    }

    /// Free the slot of the live task created from `entry`, if any.
    pub fn free(&mut self, entry: TaskEntry) -> Option<TaskId> {
        let id = self.find(entry)?;
        self.tcbs[id.index()].release();
        self.live -= 1;
        Some(id)
    }

    /// Find the live task created from `entry`.
    pub fn find(&self, entry: TaskEntry) -> Option<TaskId> {
        self.tcbs
            .iter()
            .position(|tcb| tcb.runs(entry))
            .map(TaskId::new)
    }

    #[inline]
    pub fn get(&self, id: TaskId) -> &TaskControlBlock {
        &self.tcbs[id.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, id: TaskId) -> &mut TaskControlBlock {
        &mut self.tcbs[id.index()]
    }

    /// Whether any live task is Ready.
    pub fn any_ready(&self) -> bool {
        self.tcbs.iter().any(TaskControlBlock::is_ready)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskControlBlock> {
        self.tcbs.iter_mut()
    }

    /// Ids of every live task in `mask`.
    pub fn ids_in(&self, mask: u16) -> impl Iterator<Item = TaskId> + '_ {
        (0..MAX_TASKS)
            .map(TaskId::new)
            .filter(move |id| mask & id.mask() != 0 && self.get(*id).is_live())
    }
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
