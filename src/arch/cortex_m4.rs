//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements context switching via PendSV, SysTick timer configuration,
//! and the launch of the first task.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR
//! onto the process stack. PendSV saves R4–R11 and EXC_RETURN below them,
//! which completes the `ContextFrame` described in `frame.rs`.
//!
//! ## Interrupt Priorities
//!
//! PendSV and SysTick both run at the lowest priority, so PendSV never
//! preempts an application ISR and SysTick never preempts a switch.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::arch::Port;
use crate::config::SYSTICK_RELOAD;
use crate::frame::SoftwareFrame;

/// The Cortex-M4 port. Switches are deferred to PendSV.
#[derive(Debug, Clone, Copy, Default)]
pub struct CortexM4;

impl Port for CortexM4 {
    /// Pend PendSV. With interrupts masked it fires as soon as the critical
    /// section ends.
    #[inline]
    fn request_switch(&self) {
        SCB::set_pendsv();
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire every `SYSTICK_RELOAD + 1` core clocks
/// (one kernel tick).
pub fn configure_systick(syst: &mut SYST) {
    syst.set_reload(SYSTICK_RELOAD);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set PendSV and SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: lowering the priority of the kernel's own handlers cannot
    // break a priority-based critical section elsewhere.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching Thread mode to PSP and branching to
/// the entry point recorded in its initial frame.
///
/// # Safety
/// Must only be called once, with interrupts disabled, with the stack
/// pointer of a primed, never-run task.
pub unsafe fn start_first_task(sp: *mut u32) -> ! {
    const SOFTWARE_FRAME_BYTES: usize = core::mem::size_of::<SoftwareFrame>();

    asm!(
        // Skip R4-R11 and EXC_RETURN; they hold placeholders
        "adds r0, #{skip}",
        "msr psp, r0",

        // Thread mode uses PSP from now on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Unstack the hardware frame by hand
        "pop {{r0-r3, r12}}",
        "pop {{r4, r5}}",         // LR (exit trap), PC (entry)
        "add sp, sp, #4",         // xPSR
        "mov lr, r4",
        "orr r5, r5, #1",         // bx needs the Thumb bit

        "cpsie i",
        "bx r5",

        skip = const SOFTWARE_FRAME_BYTES,
        in("r0") sp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 and EXC_RETURN onto the outgoing task's stack (PSP)
/// 2. Hand that stack pointer to the scheduler, get the incoming one back
/// 3. Restore R4–R11 and EXC_RETURN from the incoming task's stack
/// 4. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Naked; called directly by the NVIC.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// Store the outgoing stack pointer and return the incoming one.
extern "C" fn pendsv_switch(saved_sp: *mut u32) -> *mut u32 {
    crate::kernel::switch_context(saved_sp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — kernel tick entry point.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    crate::kernel::tick();
}
