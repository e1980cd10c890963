//! # Architecture Abstraction Layer
//!
//! The scheduler never touches registers itself. It asks its [`Port`] for a
//! context switch, and the port arranges for the architecture's switch
//! handler to run once the current critical section ends.
//!
//! Currently implements the Cortex-M4 port; other architectures add sibling
//! modules.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

/// The architecture-specific half of a context switch.
pub trait Port {
    /// Request a context switch. It must not happen before the caller's
    /// critical section ends.
    fn request_switch(&self);
}

/// Port that only counts switch requests. Used by host tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingPort {
    switches: core::cell::Cell<u32>,
}

#[cfg(test)]
impl RecordingPort {
    /// Switch requests so far.
    pub fn switches(&self) -> u32 {
        self.switches.get()
    }
}

#[cfg(test)]
impl Port for RecordingPort {
    fn request_switch(&self) {
        self.switches.set(self.switches.get() + 1);
    }
}
