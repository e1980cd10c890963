//! # Kernel Errors
//!
//! Every fallible kernel operation returns `Result<_, KernelError>`. Nothing
//! unwinds across the scheduler or an exception handler.

use core::fmt;

/// Reasons a kernel operation can be refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// Every TCB slot already holds a live task.
    TaskTableFull,
    /// A semaphore's wait queue has no room for another waiter.
    WaitQueueFull,
    /// The entry point already belongs to a live task.
    DuplicateRegistration,
    /// Priority outside `0..PRIORITY_LEVELS`.
    InvalidPriority,
    /// The semaphore handle is out of range or was never initialized.
    InvalidSemaphore,
    /// The semaphore still has tasks waiting on it.
    SemaphoreBusy,
    /// The scheduler found no Ready task.
    NoReadyTask,
    /// The operation needs a running task and the kernel has not started.
    NotStarted,
}

impl KernelError {
    /// True for the errors that signal a capacity limit.
    pub const fn is_capacity(self) -> bool {
        matches!(self, Self::TaskTableFull | Self::WaitQueueFull)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::TaskTableFull => "task table is full",
            Self::WaitQueueFull => "semaphore wait queue is full",
            Self::DuplicateRegistration => "entry point already has a live task",
            Self::InvalidPriority => "priority out of range",
            Self::InvalidSemaphore => "invalid or uninitialized semaphore",
            Self::SemaphoreBusy => "semaphore has waiting tasks",
            Self::NoReadyTask => "no task is ready to run",
            Self::NotStarted => "kernel has not started",
        };
        f.write_str(msg)
    }
}
