//! # SkipOS Example Firmware
//!
//! Demonstrates the kernel with a handful of tasks:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `flash_4hz` | 0 | Toggles a flag every 125 ticks; created and destroyed at run time |
//! | `oneshot` | 3 | Waits on `FLASH_REQ`, holds the flag for 1000 ticks |
//! | `lengthy` | 6 | Long computation split into yielded chunks |
//! | `requester` | 1 | Posts `FLASH_REQ` and toggles `flash_4hz` every 2 s |
//! | `logger` | 4 | Shares `CONSOLE` with `lengthy`, exercising inheritance |
//!
//! The kernel adds its own idle task at priority 7. Board bring-up is not
//! part of this demo; the "LEDs" are atomics a debugger can watch.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use cortex_m_rt::entry;
use panic_halt as _;

use skipos::kernel;
use skipos::{KernelError, SchedulingMode, SemaphoreId};

const FLASH_REQ: SemaphoreId = SemaphoreId::new(0);
const CONSOLE: SemaphoreId = SemaphoreId::new(1);

static GREEN_LED: AtomicBool = AtomicBool::new(false);
static YELLOW_LED: AtomicBool = AtomicBool::new(false);
static RED_LED: AtomicBool = AtomicBool::new(false);
static CONSOLE_LINES: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn flash_4hz() -> ! {
    loop {
        GREEN_LED.fetch_xor(true, Ordering::Relaxed);
        kernel::sleep(125);
    }
}

extern "C" fn oneshot() -> ! {
    loop {
        if kernel::wait_semaphore(FLASH_REQ).is_ok() {
            YELLOW_LED.store(true, Ordering::Relaxed);
            kernel::sleep(1000);
            YELLOW_LED.store(false, Ordering::Relaxed);
        }
    }
}

/// Holds `CONSOLE` across a long stretch of work. When `logger` blocks on it,
/// this task inherits `logger`'s priority until it posts.
extern "C" fn lengthy() -> ! {
    loop {
        checked(kernel::wait_semaphore(CONSOLE));
        for _ in 0..4000 {
            let mut work: u32 = 0;
            for _ in 0..100 {
                work = core::hint::black_box(work.wrapping_add(1));
            }
            kernel::yield_now();
        }
        RED_LED.fetch_xor(true, Ordering::Relaxed);
        checked(kernel::post_semaphore(CONSOLE));
        kernel::yield_now();
    }
}

extern "C" fn logger() -> ! {
    loop {
        checked(kernel::wait_semaphore(CONSOLE));
        CONSOLE_LINES.fetch_add(1, Ordering::Relaxed);
        checked(kernel::post_semaphore(CONSOLE));
        kernel::sleep(500);
    }
}

extern "C" fn requester() -> ! {
    loop {
        kernel::sleep(2000);
        checked(kernel::post_semaphore(FLASH_REQ));

        // Dynamic task add/remove
        if kernel::destroy_process(flash_4hz).is_none() {
            checked(kernel::create_process(flash_4hz, 0));
        }
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn boot() -> Result<(), KernelError> {
    kernel::init(SchedulingMode::Preemptive)?;
    kernel::init_semaphore(FLASH_REQ, 0)?;
    kernel::init_semaphore(CONSOLE, 1)?;

    kernel::create_process(flash_4hz, 0)?;
    kernel::create_process(requester, 1)?;
    kernel::create_process(oneshot, 3)?;
    kernel::create_process(logger, 4)?;
    kernel::create_process(lengthy, 6)?;
    Ok(())
}

/// Firmware entry point. Registers the tasks and starts the scheduler.
/// If any registration fails the kernel is never started.
#[entry]
fn main() -> ! {
    let Some(cp) = cortex_m::Peripherals::take() else {
        halt_on_fault();
    };

    if boot().is_err() {
        halt_on_fault();
    }

    kernel::start(cp)
}

/// Unwrap a kernel result inside a task. A refused call means the demo is
/// misconfigured, so it halts.
fn checked<T>(result: Result<T, KernelError>) -> T {
    match result {
        Ok(value) => value,
        Err(_) => halt_on_fault(),
    }
}

/// Visible fault indicator: light the red LED and park on a breakpoint.
fn halt_on_fault() -> ! {
    RED_LED.store(true, Ordering::Relaxed);
    loop {
        cortex_m::asm::bkpt();
    }
}
