//! # SkipOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — no dynamic allocation.

/// Maximum number of tasks the kernel can manage simultaneously, including
/// the built-in idle task. Each task consumes `STACK_WORDS * 4` bytes of RAM.
pub const MAX_TASKS: usize = 10;

/// Per-task stack size in 32-bit words. Must hold the deepest call chain
/// plus one saved context frame (`frame::FRAME_WORDS`).
pub const STACK_WORDS: usize = 256;

/// Number of semaphore slots available to applications.
pub const MAX_SEMAPHORES: usize = 8;

/// Capacity of each semaphore's wait queue.
///
/// A task waits on at most one semaphore at a time, so this only overflows
/// if it is configured below `MAX_TASKS`.
pub const MAX_QUEUE_SIZE: usize = 10;

/// Number of priority levels. Priorities run from 0 (highest) to
/// `PRIORITY_LEVELS - 1` (lowest), and this is also the ceiling that bounds
/// every task's skip count.
pub const PRIORITY_LEVELS: u8 = 8;

/// Priority of the built-in idle task.
pub const IDLE_PRIORITY: u8 = PRIORITY_LEVELS - 1;

/// SysTick frequency in Hz. One tick is the unit of `kernel::sleep`.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (TM4C123 PLL at 40 MHz).
pub const SYSTEM_CLOCK_HZ: u32 = 40_000_000;

/// SysTick reload value for one tick period.
pub const SYSTICK_RELOAD: u32 = SYSTEM_CLOCK_HZ / TICK_HZ - 1;

// Holder sets are stored as a `u16` bitmask per semaphore.
const _: () = assert!(MAX_TASKS <= 16);
const _: () = assert!(MAX_QUEUE_SIZE >= 1);
