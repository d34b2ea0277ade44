//! Fixed-interval update thread.
//!
//! Functions registered with a [`TickRegistry`] are called from a dedicated
//! thread roughly every 16 ms with the seconds elapsed since the previous
//! tick.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Per-tick callback
pub type UpdateFn = Box<dyn FnMut(f32) + Send>;

/// Callbacks run by the update thread
#[derive(Default)]
pub struct TickRegistry {
    functions: Mutex<Vec<UpdateFn>>,
}

impl std::fmt::Debug for TickRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickRegistry").field("functions", &self.len()).finish()
    }
}

impl TickRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `function` on every tick from now on
    pub fn add_update_function(&self, function: impl FnMut(f32) + Send + 'static) {
        self.functions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(function));
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every function in registration order.
    ///
    /// The lock is released while the functions run, so they may register
    /// more functions; those first run on the next tick.
    pub fn run_all(&self, delta_seconds: f32) {
        let mut running = std::mem::take(&mut *self.functions.lock().unwrap_or_else(PoisonError::into_inner));
        for function in &mut running {
            function(delta_seconds);
        }

        let mut functions = self.functions.lock().unwrap_or_else(PoisonError::into_inner);
        running.append(&mut functions);
        *functions = running;
    }
}

/// Handle to a running update thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct UpdateLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateLoop {
    /// Default tick interval
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(16);

    /// Spawn a thread calling `registry.run_all` every `interval`
    pub fn start(registry: Arc<TickRegistry>, interval: Duration) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let handle = {
            let running = running.clone();
            thread::Builder::new().name("update-loop".to_string()).spawn(move || {
                let mut last = Instant::now();
                while running.load(Ordering::Acquire) {
                    thread::park_timeout(interval);
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    let now = Instant::now();
                    if now.duration_since(last) < interval {
                        // Spurious wake-up
                        continue;
                    }
                    registry.run_all(now.duration_since(last).as_secs_f32());
                    last = now;
                }
                log::debug!("Update loop exited");
            })?
        };

        log::info!("Update loop started with a {:?} interval", interval);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.is_some() && self.running.load(Ordering::Acquire)
    }

    /// Stop the thread and wait for the current tick to finish
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("Update loop panicked");
            }
        }
    }
}

impl Drop for UpdateLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn run_all_calls_in_order_and_accepts_late_registration() {
        let registry = Arc::new(TickRegistry::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let (inner_log, inner_registry) = (log.clone(), registry.clone());
        let mut registered = false;
        registry.add_update_function(move |_| {
            inner_log.lock().unwrap().push("first");
            if !registered {
                registered = true;
                let late_log = inner_log.clone();
                inner_registry.add_update_function(move |_| late_log.lock().unwrap().push("late"));
            }
        });
        let second = log.clone();
        registry.add_update_function(move |_| second.lock().unwrap().push("second"));

        registry.run_all(0.016);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        registry.run_all(0.016);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "first", "second", "late"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn thread_ticks_until_stopped() {
        let registry = Arc::new(TickRegistry::new());
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        registry.add_update_function(move |delta| {
            assert!(delta > 0.0);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let mut update_loop = UpdateLoop::start(registry, Duration::from_millis(2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        update_loop.stop();
        assert!(!update_loop.is_running());

        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 3);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }
}
