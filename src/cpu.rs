//! Current-core context.
//!
//! The arbiter never reads ambient per-core globals directly. Everything it
//! needs to know about "where am I running" goes through [`CoreContext`], so
//! tests can run simulated cores on ordinary threads.

use crate::state::{CoreId, MAX_CORES};

/// Execution environment of the calling context.
pub trait CoreContext: Send + Sync {
    /// Core the caller is running on.
    fn current_core(&self) -> CoreId;

    /// Number of cores. Core ids are `0..core_count()`.
    fn core_count(&self) -> usize;

    /// Stop the scheduler from migrating or preempting the caller.
    ///
    /// Calls nest and must be balanced with [`CoreContext::preempt_enable`].
    fn preempt_disable(&self);

    /// Undo one [`CoreContext::preempt_disable`].
    fn preempt_enable(&self);

    /// Monotonic microsecond clock.
    fn now_us(&self) -> u64;

    /// Busy-wait hint while polling another core's progress.
    #[inline]
    fn relax(&self) {
        core::hint::spin_loop();
    }
}

#[cfg(not(target_os = "espidf"))]
pub use host::ThreadCores;

#[cfg(target_os = "espidf")]
pub use esp::EspCores;

#[cfg(not(target_os = "espidf"))]
mod host {
    use super::*;
    use std::cell::Cell;
    use std::time::Instant;

    std::thread_local! {
        static CURRENT_CORE: Cell<CoreId> = const { Cell::new(0) };
        static PREEMPT_DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    /// Simulated cores backed by host threads.
    ///
    /// A thread runs on core 0 until it calls [`ThreadCores::bind`].
    /// Preemption control only tracks nesting depth per thread, which tests
    /// use to check that sections are balanced.
    pub struct ThreadCores {
        cores: usize,
        epoch: Instant,
    }

    impl ThreadCores {
        /// # Panics
        ///
        /// Panics if `cores` is zero or larger than the state word can name.
        pub fn new(cores: usize) -> Self {
            assert!(cores > 0 && cores <= MAX_CORES, "core count out of range: {}", cores);
            Self {
                cores,
                epoch: Instant::now(),
            }
        }

        /// Pin the calling thread to simulated core `core`.
        pub fn bind(core: CoreId) {
            CURRENT_CORE.with(|c| c.set(core));
        }

        /// Preemption-disable depth of the calling thread.
        pub fn preempt_depth() -> u32 {
            PREEMPT_DEPTH.with(|d| d.get())
        }
    }

    impl CoreContext for ThreadCores {
        fn current_core(&self) -> CoreId {
            let core = CURRENT_CORE.with(|c| c.get());
            debug_assert!(core < self.cores, "thread bound to core {} of {}", core, self.cores);
            core.min(self.cores - 1)
        }

        fn core_count(&self) -> usize {
            self.cores
        }

        fn preempt_disable(&self) {
            PREEMPT_DEPTH.with(|d| d.set(d.get() + 1));
        }

        fn preempt_enable(&self) {
            PREEMPT_DEPTH.with(|d| {
                debug_assert!(d.get() > 0, "unbalanced preempt_enable");
                d.set(d.get().saturating_sub(1));
            });
        }

        fn now_us(&self) -> u64 {
            self.epoch.elapsed().as_micros() as u64
        }

        // Simulated cores share host CPUs; give the owner a chance to run.
        fn relax(&self) {
            std::thread::yield_now();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_bind_is_per_thread() {
            let cores = ThreadCores::new(4);
            ThreadCores::bind(2);
            assert_eq!(cores.current_core(), 2);

            let other = std::thread::spawn(|| {
                let cores = ThreadCores::new(4);
                cores.current_core()
            })
            .join()
            .unwrap();
            assert_eq!(other, 0);
            ThreadCores::bind(0);
        }

        #[test]
        fn test_preempt_depth_nests() {
            let cores = ThreadCores::new(1);
            cores.preempt_disable();
            cores.preempt_disable();
            assert_eq!(ThreadCores::preempt_depth(), 2);
            cores.preempt_enable();
            cores.preempt_enable();
            assert_eq!(ThreadCores::preempt_depth(), 0);
        }

        #[test]
        fn test_clock_is_monotonic() {
            let cores = ThreadCores::new(1);
            let a = cores.now_us();
            std::thread::sleep(std::time::Duration::from_millis(2));
            assert!(cores.now_us() > a);
        }
    }
}

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use esp_idf_svc::sys;

    /// FreeRTOS cores of the ESP32 family.
    pub struct EspCores;

    impl CoreContext for EspCores {
        fn current_core(&self) -> CoreId {
            // The core we are running on, not the task's pinning: unpinned
            // tasks report tskNO_AFFINITY there.
            esp_idf_svc::hal::cpu::core() as CoreId
        }

        fn core_count(&self) -> usize {
            sys::CONFIG_FREERTOS_NUMBER_OF_CORES as usize
        }

        fn preempt_disable(&self) {
            // SAFETY: balanced by preempt_enable, task context only
            unsafe { sys::vTaskSuspendAll() };
        }

        fn preempt_enable(&self) {
            // SAFETY: paired with vTaskSuspendAll above
            unsafe {
                sys::xTaskResumeAll();
            }
        }

        fn now_us(&self) -> u64 {
            // SAFETY: esp_timer is started by the IDF before app_main
            unsafe { sys::esp_timer_get_time() as u64 }
        }
    }
}
