//! # Kernel
//!
//! Top-level kernel initialization and public API for SkipOS.
//!
//! The kernel owns the single global [`Scheduler`] instance. Every public
//! function takes the kernel lock (a critical section) for its whole body,
//! so task code, SysTick and PendSV never see partial updates.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(mode)           ← Mode + built-in idle task
//!         ├─► kernel::init_semaphore()     ← (×N)
//!         ├─► kernel::create_process()     ← Register tasks (×N)
//!         └─► kernel::start()              ← Launch scheduler (no return)
//!               ├─► Mask interrupts, set handler priorities
//!               ├─► Pick the first task
//!               ├─► Configure SysTick
//!               └─► arch::start_first_task()
//! ```
//!
//! ## Suspension Points
//!
//! [`yield_now`], [`sleep`] and a blocking [`wait_semaphore`] request a
//! switch inside the critical section. PendSV is pended, and runs the moment
//! the section ends, so the call returns only once the task is dispatched
//! again.

use crate::arch::cortex_m4::{self, CortexM4};
use crate::config::IDLE_PRIORITY;
use crate::error::KernelError;
use crate::scheduler::{Scheduler, SchedulingMode};
use crate::semaphore::SemaphoreId;
use crate::sync::Exclusive;
use crate::task::{TaskEntry, TaskId, TaskStats};

/// Global kernel instance.
static KERNEL: Exclusive<Scheduler<CortexM4>> = Exclusive::new(Scheduler::new(CortexM4));

/// Built-in idle task. Guarantees that one task is always Ready.
extern "C" fn idle_task() -> ! {
    loop {
        cortex_m::asm::wfi();
        yield_now();
    }
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel.
///
/// Selects the scheduling mode for the lifetime of the system and registers
/// the idle task at the lowest priority. Call once, before any other
/// kernel function.
pub fn init(mode: SchedulingMode) -> Result<(), KernelError> {
    KERNEL.lock(|k| {
        k.set_mode(mode);
        k.create_task(idle_task, IDLE_PRIORITY).map(|_| ())
    })
}

/// Create a new task and register it with the scheduler.
///
/// Safe to call before `start()` and from any running task.
///
/// # Example
/// ```ignore
/// kernel::create_process(flash_4hz, 0)?;
/// ```
pub fn create_process(entry: TaskEntry, priority: u8) -> Result<TaskId, KernelError> {
    KERNEL.lock(|k| k.create_task(entry, priority))
}

/// Destroy the task created from `entry`. Does nothing if there is none.
///
/// A task destroying itself stops at once.
pub fn destroy_process(entry: TaskEntry) -> Option<TaskId> {
    KERNEL.lock(|k| k.destroy_task(entry))
}

/// (Re)initialize semaphore `id` with `count` units. Refused while tasks
/// are waiting on it.
pub fn init_semaphore(id: SemaphoreId, count: u32) -> Result<(), KernelError> {
    KERNEL.lock(|k| k.init_semaphore(id, count))
}

/// Voluntarily yield the CPU from the current task. The task stays Ready.
///
/// Ignored before `start()`.
pub fn yield_now() {
    if let Err(e) = KERNEL.lock(|k| k.yield_now()) {
        warn!("yield ignored: {}", e);
    }
}

/// Suspend the current task for `ticks` kernel ticks.
pub fn sleep(ticks: u32) {
    if let Err(e) = KERNEL.lock(|k| k.sleep(ticks)) {
        warn!("sleep ignored: {}", e);
    }
}

/// Take a unit of semaphore `id`, blocking until one is posted.
///
/// # Panics
/// If the wait queue overflows: `MAX_QUEUE_SIZE` is configured below the
/// number of tasks that can wait at once.
pub fn wait_semaphore(id: SemaphoreId) -> Result<(), KernelError> {
    match KERNEL.lock(|k| k.wait(id)) {
        Ok(_) => Ok(()),
        Err(KernelError::WaitQueueFull) => {
            panic!("semaphore {} wait queue overflow", id.index())
        }
        Err(e) => Err(e),
    }
}

/// Return a unit of semaphore `id`, waking its oldest waiter.
pub fn post_semaphore(id: SemaphoreId) -> Result<(), KernelError> {
    KERNEL.lock(|k| k.post(id)).map(|_| ())
}

/// Scheduling snapshot of the task created from `entry`.
pub fn task_stats(entry: TaskEntry) -> Option<TaskStats> {
    KERNEL.lock(|k| k.task_stats(entry))
}

/// Ticks since `start()`.
pub fn ticks() -> u64 {
    KERNEL.lock(|k| k.tick_count())
}

/// Start the scheduler. **Does not return.**
///
/// # Panics
/// If no task is Ready, which cannot happen after a successful `init()`.
pub fn start(mut cp: cortex_m::Peripherals) -> ! {
    // Nothing may preempt us until the first task runs; the first task
    // re-enables interrupts.
    cortex_m::interrupt::disable();
    cortex_m4::set_interrupt_priorities(&mut cp.SCB);

    let first_sp = match KERNEL.lock(|k| k.start()) {
        Ok(sp) => sp,
        Err(e) => panic!("cannot start scheduler: {}", e),
    };

    cortex_m4::configure_systick(&mut cp.SYST);

    // Safety: interrupts are masked and `first_sp` is a primed frame.
    unsafe { cortex_m4::start_first_task(first_sp) }
}

// ---------------------------------------------------------------------------
// Exception entry points
// ---------------------------------------------------------------------------

/// PendSV body: save the outgoing stack pointer, return the incoming one.
pub(crate) fn switch_context(saved_sp: *mut u32) -> *mut u32 {
    match KERNEL.lock(|k| k.switch_context(saved_sp)) {
        Ok(sp) => sp,
        Err(e) => panic!("context switch failed: {}", e),
    }
}

/// SysTick body.
pub(crate) fn tick() {
    KERNEL.lock(|k| k.tick());
}
