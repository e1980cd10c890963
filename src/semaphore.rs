//! # Counting Semaphores
//!
//! Counting semaphores with a FIFO wait queue and priority inheritance.
//!
//! ## Protocol
//!
//! - `wait`: take a unit if one is available, otherwise join the back of the
//!   wait queue as Blocked and request a switch.
//! - `post`: hand the unit straight to the head of the queue if anyone is
//!   waiting (the count is untouched), otherwise bump the count.
//!
//! A unit is never counted twice: either it sits in `count`, or it was
//! handed to exactly one woken waiter. `count > 0` therefore implies an
//! empty queue.
//!
//! ## Priority Inheritance
//!
//! A task that took a unit is a *holder* until it posts the same semaphore.
//! While any task waits on a semaphore, every holder of that semaphore runs
//! at no worse than the best effective priority among the waiters. Boosts
//! pass along chains: a boosted waiter boosts the holders of whatever it
//! waits on. Priorities are recomputed from scratch whenever a queue or
//! holder set changes, so a boost disappears as soon as its cause does.

use heapless::Deque;

use crate::arch::Port;
use crate::config::{MAX_QUEUE_SIZE, MAX_SEMAPHORES, MAX_TASKS};
use crate::error::KernelError;
use crate::scheduler::Scheduler;
use crate::task::{TaskId, TaskState};

/// Handle to one of the kernel's semaphore slots.
///
/// Handles are plain indices so applications can declare them as
/// constants: `const FLASH_REQ: SemaphoreId = SemaphoreId::new(0);`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SemaphoreId(u8);

impl SemaphoreId {
    pub const fn new(index: usize) -> Self {
        Self(index as u8)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Result of a `wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitOutcome {
    /// A unit was available; the caller keeps running.
    Acquired,
    /// The caller is Blocked and resumes once a post hands it a unit.
    Blocked,
}

/// One semaphore slot.
pub struct Semaphore {
    count: u32,
    queue: Deque<TaskId, MAX_QUEUE_SIZE>,
    /// Bit `i` set: task `i` holds a unit of this semaphore.
    ///
    /// Cleared only when the task posts this semaphore (or is destroyed). A
    /// pure consumer of a signalling semaphore never posts it, so it stays a
    /// holder and is boosted by whoever waits on it next.
    holders: u16,
    initialized: bool,
}

impl Semaphore {
    pub const EMPTY: Self = Self {
        count: 0,
        queue: Deque::new(),
        holders: 0,
        initialized: false,
    };

    /// Available units.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Waiting tasks, first blocked first.
    pub fn waiters(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.queue.iter().copied()
    }

    #[inline]
    pub fn waiter_count(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_held_by(&self, id: TaskId) -> bool {
        self.holders & id.mask() != 0
    }

    fn reset(&mut self, count: u32) {
        self.count = count;
        self.queue.clear();
        self.holders = 0;
        self.initialized = true;
    }

    /// Fast path of `wait`.
    fn try_take(&mut self, id: TaskId) -> bool {
        if self.count == 0 {
            return false;
        }
        self.count -= 1;
        self.holders |= id.mask();
        true
    }

    fn enqueue(&mut self, id: TaskId) -> Result<(), KernelError> {
        self.queue.push_back(id).map_err(|_| KernelError::WaitQueueFull)
    }

    /// Return a unit: wake the oldest waiter with it, or add it to the
    /// count.
    fn give(&mut self, poster: Option<TaskId>) -> Option<TaskId> {
        if let Some(id) = poster {
            self.holders &= !id.mask();
        }
        match self.queue.pop_front() {
            Some(woken) => {
                self.holders |= woken.mask();
                Some(woken)
            }
            None => {
                self.count = self.count.saturating_add(1);
                None
            }
        }
    }

    /// Drop every trace of `id`. Returns whether anything changed.
    pub(crate) fn forget(&mut self, id: TaskId) -> bool {
        let held = self.is_held_by(id);
        self.holders &= !id.mask();

        let before = self.queue.len();
        for _ in 0..before {
            if let Some(waiter) = self.queue.pop_front() {
                if waiter != id {
                    // Re-queue in order; cannot overflow, the queue only shrank
                    let _ = self.queue.push_back(waiter);
                }
            }
        }
        held || self.queue.len() != before
    }
}

// ---------------------------------------------------------------------------
// Semaphore operations on the scheduler
// ---------------------------------------------------------------------------

impl<P: Port> Scheduler<P> {
    /// (Re)initialize a semaphore slot with `count` available units.
    ///
    /// Refused with `SemaphoreBusy` while tasks are queued on the slot.
    /// Holders are forgotten; with an empty queue they carry no boost.
    pub fn init_semaphore(&mut self, id: SemaphoreId, count: u32) -> Result<(), KernelError> {
        let sem = self
            .semaphores
            .get_mut(id.index())
            .ok_or(KernelError::InvalidSemaphore)?;
        if sem.waiter_count() > 0 {
            warn!("semaphore {} reinitialized with waiters queued", id.index());
            return Err(KernelError::SemaphoreBusy);
        }
        sem.reset(count);
        Ok(())
    }

    /// Read access to an initialized semaphore.
    pub fn semaphore(&self, id: SemaphoreId) -> Result<&Semaphore, KernelError> {
        self.semaphores
            .get(id.index())
            .filter(|sem| sem.initialized)
            .ok_or(KernelError::InvalidSemaphore)
    }

    fn semaphore_mut(&mut self, id: SemaphoreId) -> Result<&mut Semaphore, KernelError> {
        self.semaphores
            .get_mut(id.index())
            .filter(|sem| sem.initialized)
            .ok_or(KernelError::InvalidSemaphore)
    }

    /// Take a unit of `id` on behalf of the running task, blocking it if
    /// none is available.
    ///
    /// On `Blocked` the switch has already been requested; it happens once
    /// the caller leaves the critical section.
    pub fn wait(&mut self, id: SemaphoreId) -> Result<WaitOutcome, KernelError> {
        let current = self.running.ok_or(KernelError::NotStarted)?;
        let sem = self.semaphore_mut(id)?;

        if sem.try_take(current) {
            return Ok(WaitOutcome::Acquired);
        }

        if let Err(e) = sem.enqueue(current) {
            warn!("semaphore {} wait queue overflow", id.index());
            return Err(e);
        }
        self.tasks.get_mut(current).state = TaskState::Blocked;
        trace!("task {} blocked on semaphore {}", current, id.index());

        self.refresh_priorities();
        self.port.request_switch();
        Ok(WaitOutcome::Blocked)
    }

    /// Return a unit of `id`. Wakes and returns the oldest waiter, if any.
    pub fn post(&mut self, id: SemaphoreId) -> Result<Option<TaskId>, KernelError> {
        let poster = self.running;
        let woken = self.semaphore_mut(id)?.give(poster);

        if let Some(woken) = woken {
            self.tasks.get_mut(woken).state = TaskState::Ready;
            trace!("semaphore {} woke task {}", id.index(), woken);
        }

        self.refresh_priorities();
        Ok(woken)
    }

    /// Recompute every live task's effective priority from scratch.
    ///
    /// A holder inherits the effective priority of each waiter on a
    /// semaphore it holds, and that waiter may itself be boosted as a holder
    /// elsewhere, so boosts are relaxed along holder chains until they stop
    /// changing. A chain visits each task at most once, so `MAX_TASKS`
    /// rounds reach the fixed point.
    pub(crate) fn refresh_priorities(&mut self) {
        let mut priority = [u8::MAX; MAX_TASKS];
        for (slot, p) in priority.iter_mut().enumerate() {
            let tcb = self.tasks.get(TaskId::new(slot));
            if tcb.is_live() {
                *p = tcb.base_priority;
            }
        }

        for _ in 0..MAX_TASKS {
            let mut changed = false;
            for sem in self.semaphores.iter().filter(|sem| sem.initialized) {
                let Some(best) = sem.waiters().map(|w| priority[w.index()]).min() else {
                    continue;
                };
                for holder in self.tasks.ids_in(sem.holders) {
                    if best < priority[holder.index()] {
                        priority[holder.index()] = best;
                        changed = true;
                    }
                }
            }
            if !changed {
                break;
            }
        }

        for (slot, &p) in priority.iter().enumerate() {
            let id = TaskId::new(slot);
            let tcb = self.tasks.get_mut(id);
            if tcb.is_live() && tcb.effective_priority != p {
                trace!("task {} effective priority {} -> {}", id, tcb.effective_priority, p);
                tcb.set_effective_priority(p);
            }
        }
    }
}

const _: () = assert!(MAX_SEMAPHORES <= u8::MAX as usize);

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
