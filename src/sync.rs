//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections for the kernel. All shared kernel state
//! is accessed inside one, so the PendSV and SysTick handlers never observe
//! a half-finished update.
//!
//! On the target, `cortex-m`'s `critical-section-single-core` feature
//! implements the section by masking interrupts with PRIMASK; host tests use
//! the `std` implementation from `critical-section`.

use core::cell::RefCell;

use critical_section::Mutex;

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and the previous state is restored on
/// every exit path, including early returns and `?` inside the closure.
/// Sections nest; the outermost one restores the original state.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}

/// A value only reachable inside a critical section.
///
/// Mutation happens in place; the value is never copied out or moved.
pub struct Exclusive<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Exclusive<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access to the value.
    ///
    /// # Panics
    /// If called again from inside `f`.
    #[inline]
    pub fn lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mutates_in_place() {
        let cell = Exclusive::new([0u8; 4]);
        cell.lock(|v| v[2] = 7);
        assert_eq!(cell.lock(|v| *v), [0, 0, 7, 0]);
    }

    #[test]
    fn test_lock_result_propagates() {
        let cell = Exclusive::new(3u32);
        let r: Result<u32, ()> = cell.lock(|v| {
            if *v > 2 {
                return Err(());
            }
            Ok(*v)
        });
        assert_eq!(r, Err(()));
        // The early return released the section
        assert_eq!(cell.lock(|v| *v + 1), 4);
    }

    #[test]
    fn test_sections_serialize_threads() {
        static COUNTER: Exclusive<u32> = Exclusive::new(0);

        let handles: [_; 4] = core::array::from_fn(|_| {
            std::thread::spawn(|| {
                for _ in 0..1000 {
                    COUNTER.lock(|c| *c += 1);
                }
            })
        });
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(COUNTER.lock(|c| *c), 4000);
    }
}
