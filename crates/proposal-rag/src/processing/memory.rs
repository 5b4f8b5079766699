//! System memory pressure detection

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sysinfo::System;

/// Callback run when memory usage crosses the threshold
pub type ReliefHook = Arc<dyn Fn() + Send + Sync>;

/// Point-in-time memory reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub percent_used: f32,
}

/// Samples system memory and runs relief hooks under pressure
pub struct MemoryMonitor {
    system: Mutex<System>,
    threshold_percent: f32,
    hooks: RwLock<Vec<ReliefHook>>,
}

impl MemoryMonitor {
    pub fn new(threshold_percent: f32) -> Self {
        Self {
            system: Mutex::new(System::new()),
            threshold_percent,
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn threshold_percent(&self) -> f32 {
        self.threshold_percent
    }

    /// Register a hook, e.g. one that clears caches
    pub fn add_relief_hook(&self, hook: ReliefHook) {
        self.hooks.write().push(hook);
    }

    pub fn sample(&self) -> MemoryUsage {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        let used = system.used_memory();

        MemoryUsage {
            used_bytes: used,
            total_bytes: total,
            percent_used: if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64 * 100.0) as f32
            },
        }
    }

    /// Sample memory and run the relief hooks if usage is at or above the
    /// threshold. Returns whether the hooks ran.
    pub fn check(&self) -> bool {
        let usage = self.sample();
        if usage.percent_used < self.threshold_percent {
            return false;
        }

        tracing::warn!(
            "Memory usage {:.1}% exceeds threshold {:.1}%; running {} relief hooks",
            usage.percent_used,
            self.threshold_percent,
            self.hooks.read().len()
        );
        let hooks: Vec<ReliefHook> = self.hooks.read().clone();
        for hook in hooks {
            hook();
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_zero_threshold_runs_hooks() {
        let monitor = MemoryMonitor::new(0.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        monitor.add_relief_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(monitor.check());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unreachable_threshold_skips_hooks() {
        let monitor = MemoryMonitor::new(101.0);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        monitor.add_relief_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(!monitor.check());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sample_is_bounded() {
        let usage = MemoryMonitor::new(90.0).sample();
        assert!(usage.percent_used >= 0.0 && usage.percent_used <= 100.0);
        assert!(usage.used_bytes <= usage.total_bytes || usage.total_bytes == 0);
    }
}
