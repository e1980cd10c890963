//! # SkipOS
//!
//! A preemptible, priority-aware multitasking kernel for single-core ARM
//! Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! SkipOS runs a fixed pool of statically allocated tasks, each with its own
//! stack, and provides:
//!
//! - **Priority round robin with aging**: each task has a skip budget equal
//!   to its priority (0 highest .. 7 lowest), so urgent tasks run more often
//!   and every Ready task still runs eventually
//! - **Counting semaphores** with FIFO release and priority inheritance
//! - **Timed delays** driven by a 1 ms SysTick
//! - **Cooperative or preemptive** operation, chosen at initialization
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   init · create_process · wait_semaphore · sleep · start │
//! ├──────────────────────────┬─────────────────────────────┤
//! │  Scheduler               │  Semaphores                 │
//! │  scheduler.rs            │  semaphore.rs               │
//! │  ─ schedule()  ─ tick()  │  ─ wait()  ─ post()         │
//! ├──────────────────────────┴─────────────────────────────┤
//! │   Task Table (task.rs) · Context Frame (frame.rs)       │
//! ├────────────────────────────────────────────────────────┤
//! │   Critical Sections (sync.rs) · Port trait (arch)       │
//! ├────────────────────────────────────────────────────────┤
//! │   Cortex-M4 Port (arch/cortex_m4.rs)                    │
//! │   PendSV · SysTick · First task launch                  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **Fixed-size TCB table**: `[TaskControlBlock; MAX_TASKS]`, slots reused
//! - **Per-task stack**: `[u32; STACK_WORDS]` inline in each TCB
//! - **Critical sections**: `critical_section::with()` around all shared state
//!
//! ## Features
//!
//! - `firmware` — build the demo binary (`cortex-m-rt`, `panic-halt`)
//! - `defmt` — emit kernel log messages through `defmt`

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod arch;
pub mod config;
pub mod error;
pub mod frame;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod kernel;
pub mod scheduler;
pub mod semaphore;
pub mod sync;
pub mod task;

pub use error::KernelError;
pub use scheduler::{Scheduler, SchedulingMode};
pub use semaphore::{SemaphoreId, WaitOutcome};
pub use task::{TaskEntry, TaskId, TaskState, TaskStats};
