//! # Initial Context Frame
//!
//! Builds the saved-register image of a task that has never run, so that
//! the PendSV handler restores it exactly like a task it switched out
//! earlier.
//!
//! ## Stack Layout (top = high address, growing down)
//!
//! ```text
//! [Hardware exception frame]    <- 8-byte aligned top of stack
//!   xPSR  (Thumb bit set)
//!   PC    (task entry point)
//!   LR    (task_exit trap)
//!   R12   (12)
//!   R3    (3)
//!   R2    (2)
//!   R1    (1)
//!   R0    (0)
//! [Software saved context]
//!   EXC_RETURN (thread mode, PSP)
//!   R11   (11)
//!   ...
//!   R4    (4)                   <- stack_pointer after init
//! ```
//!
//! The software block matches `stmdb r0!, {r4-r11, lr}` in the PendSV
//! handler; the hardware block matches what the core pops on exception
//! return.

use crate::config::STACK_WORDS;
use crate::task::TaskEntry;

/// xPSR with only the Thumb state bit set.
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// EXC_RETURN: return to Thread mode, use the process stack, no FP state.
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Number of words in a full saved context.
pub const FRAME_WORDS: usize = core::mem::size_of::<ContextFrame>() / 4;

/// Registers the PendSV handler saves and restores itself.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareFrame {
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
    /// EXC_RETURN value loaded into LR before `bx lr`.
    pub exc_return: u32,
}

/// Registers the core stacks automatically on exception entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
}

/// A complete saved context, lowest address first.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextFrame {
    pub software: SoftwareFrame,
    pub hardware: ExceptionFrame,
}

impl ContextFrame {
    /// The frame a task is first dispatched from.
    ///
    /// Registers without a defined incoming value hold their own register
    /// number, which makes a fresh frame easy to spot in a memory dump.
    pub fn initial(entry: TaskEntry) -> Self {
        Self {
            software: SoftwareFrame {
                r4: 4,
                r5: 5,
                r6: 6,
                r7: 7,
                r8: 8,
                r9: 9,
                r10: 10,
                r11: 11,
                exc_return: EXC_RETURN_THREAD_PSP,
            },
            hardware: ExceptionFrame {
                r0: 0,
                r1: 1,
                r2: 2,
                r3: 3,
                r12: 12,
                lr: code_address(task_exit),
                // The exception return path requires bit 0 clear.
                pc: code_address(entry) & !1,
                xpsr: INITIAL_XPSR,
            },
        }
    }

    /// The frame as the sequence of words it occupies on the stack.
    pub fn to_words(&self) -> [u32; FRAME_WORDS] {
        let s = &self.software;
        let h = &self.hardware;
        [
            s.r4, s.r5, s.r6, s.r7, s.r8, s.r9, s.r10, s.r11, s.exc_return,
            h.r0, h.r1, h.r2, h.r3, h.r12, h.lr, h.pc, h.xpsr,
        ]
    }

    /// Read a frame back from stack words, lowest address first.
    pub fn from_words(w: &[u32; FRAME_WORDS]) -> Self {
        Self {
            software: SoftwareFrame {
                r4: w[0],
                r5: w[1],
                r6: w[2],
                r7: w[3],
                r8: w[4],
                r9: w[5],
                r10: w[6],
                r11: w[7],
                exc_return: w[8],
            },
            hardware: ExceptionFrame {
                r0: w[9],
                r1: w[10],
                r2: w[11],
                r3: w[12],
                r12: w[13],
                lr: w[14],
                pc: w[15],
                xpsr: w[16],
            },
        }
    }
}

/// Per-task stack memory. Aligned to 8 bytes as required by AAPCS.
#[repr(C, align(8))]
pub struct Stack(pub [u32; STACK_WORDS]);

impl Stack {
    pub const EMPTY: Self = Self([0; STACK_WORDS]);

    /// Word index at which a freshly primed frame starts.
    ///
    /// `STACK_WORDS` is even and the array is 8-byte aligned, so the top of
    /// the stack, and with it the hardware frame, stays 8-byte aligned.
    pub const FRAME_BASE: usize = STACK_WORDS - FRAME_WORDS;

    /// Write the initial frame for `entry` at the top of the stack and
    /// return the resulting stack pointer.
    pub fn prime(&mut self, entry: TaskEntry) -> *mut u32 {
        let frame = ContextFrame::initial(entry);
        self.0[Self::FRAME_BASE..].copy_from_slice(&frame.to_words());
        &mut self.0[Self::FRAME_BASE] as *mut u32
    }

    /// Word offset of `sp` from the bottom of this stack, if it points
    /// inside it.
    pub fn offset_of(&self, sp: *const u32) -> Option<usize> {
        let base = self.0.as_ptr() as usize;
        let addr = sp as usize;
        if addr < base || addr >= base + STACK_WORDS * 4 {
            return None;
        }
        Some((addr - base) / 4)
    }

    /// The saved frame starting at word `offset`.
    pub fn frame_at(&self, offset: usize) -> Option<ContextFrame> {
        let words = self.0.get(offset..offset + FRAME_WORDS)?;
        let words: &[u32; FRAME_WORDS] = words.try_into().ok()?;
        Some(ContextFrame::from_words(words))
    }
}

const _: () = assert!(STACK_WORDS % 2 == 0);
const _: () = assert!(STACK_WORDS > FRAME_WORDS);

/// Address of a code item as the 32-bit value the core sees.
fn code_address(f: TaskEntry) -> u32 {
    f as usize as u32
}

/// Landing pad if a task entry ever returns. Entries are `-> !`, so reaching
/// this means the stack was corrupted; park the task.
extern "C" fn task_exit() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn entry() -> ! {
        loop {
            core::hint::black_box(0xF00Du32);
        }
    }

    #[test]
    fn test_frame_layout() {
        assert_eq!(FRAME_WORDS, 17);
        let frame = ContextFrame::initial(entry);
        let words = frame.to_words();
        for (i, r) in (4..=11).enumerate() {
            assert_eq!(words[i], r, "r{} placeholder", r);
        }
        assert_eq!(words[8], EXC_RETURN_THREAD_PSP);
        assert_eq!(&words[9..13], &[0, 1, 2, 3]);
        assert_eq!(words[13], 12);
        assert_eq!(words[15], (entry as usize as u32) & !1);
        assert_eq!(words[16], INITIAL_XPSR);
        assert_eq!(ContextFrame::from_words(&words), frame);
    }

    #[test]
    fn test_prime_writes_top_of_stack() {
        let mut stack = Stack::EMPTY;
        let sp = stack.prime(entry);
        assert_eq!(stack.offset_of(sp), Some(Stack::FRAME_BASE));
        assert_eq!((sp as usize) % 4, 0);
        // Hardware frame lands on an 8-byte boundary
        let hw = unsafe { sp.add(9) } as usize;
        assert_eq!(hw % 8, 0);
        assert_eq!(
            stack.frame_at(Stack::FRAME_BASE),
            Some(ContextFrame::initial(entry))
        );
        // Nothing below the frame is touched
        assert!(stack.0[..Stack::FRAME_BASE].iter().all(|&w| w == 0));
    }

    #[test]
    fn test_offset_outside_stack() {
        let stack = Stack::EMPTY;
        assert_eq!(stack.offset_of(core::ptr::null()), None);
        assert_eq!(stack.frame_at(STACK_WORDS - 1), None);
    }
}
