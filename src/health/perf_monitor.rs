//! Per-task execution-time statistics and deadline accounting.
//!
//! Tasks register with their nominal period and report elapsed time at the
//! end of every iteration. Statistics never block the measuring task beyond
//! the registry lock; violations and high utilization only emit log lines.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::time::Instant;

use parking_lot::Mutex;

/// Rolling window used for the standard-deviation estimate.
const WINDOW_CAPACITY: usize = 100;

/// Utilization fraction above which a warning is emitted.
const HIGH_UTILIZATION: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct TaskStats {
    pub task_name: String,
    pub period_ms: u64,
    pub last_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub std_dev_us: f64,
    pub deadline_violations: u64,
    pub worst_overrun_us: u64,
    pub sample_count: u64,
    window: VecDeque<u64>,
}

impl TaskStats {
    fn new(task_name: String, period_ms: u64) -> Self {
        Self {
            task_name,
            period_ms,
            last_us: 0,
            min_us: u64::MAX,
            max_us: 0,
            mean_us: 0.0,
            std_dev_us: 0.0,
            deadline_violations: 0,
            worst_overrun_us: 0,
            sample_count: 0,
            window: VecDeque::with_capacity(WINDOW_CAPACITY),
        }
    }

    fn record(&mut self, elapsed_us: u64) {
        self.last_us = elapsed_us;
        self.sample_count += 1;
        self.min_us = self.min_us.min(elapsed_us);
        self.max_us = self.max_us.max(elapsed_us);

        if self.window.len() == WINDOW_CAPACITY {
            self.window.pop_front();
        }
        self.window.push_back(elapsed_us);

        // Incremental running mean over the full history.
        let delta = elapsed_us as f64 - self.mean_us;
        self.mean_us += delta / self.sample_count as f64;

        if self.window.len() >= 2 {
            let sum_sq: f64 = self
                .window
                .iter()
                .map(|&v| {
                    let diff = v as f64 - self.mean_us;
                    diff * diff
                })
                .sum();
            self.std_dev_us = (sum_sq / self.window.len() as f64).sqrt();
        }
    }

    pub fn utilization_pct(&self) -> f64 {
        if self.period_ms == 0 {
            return 0.0;
        }
        100.0 * self.mean_us / (self.period_ms as f64 * 1000.0)
    }
}

pub struct PerfMonitor {
    stats: Mutex<BTreeMap<String, TaskStats>>,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self {
            stats: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn register_task(&self, name: &str, period_ms: u64) {
        let mut stats = self.stats.lock();
        stats.insert(name.to_string(), TaskStats::new(name.to_string(), period_ms));
        log::info!(target: "MA", "event=perf_registered,task={},period_ms={}", name, period_ms);
    }

    /// Records one finished iteration started at `start`.
    pub fn end_iteration(&self, name: &str, start: Instant) {
        let elapsed_us = start.elapsed().as_micros() as u64;

        let mut stats = self.stats.lock();
        let entry = stats.entry(name.to_string()).or_insert_with(|| {
            log::warn!(target: "MA", "event=auto_register_perf,task={}", name);
            TaskStats::new(name.to_string(), 0)
        });

        entry.record(elapsed_us);

        let deadline_us = entry.period_ms * 1000;
        if deadline_us > 0 {
            if elapsed_us > deadline_us {
                entry.deadline_violations += 1;
                let overrun = elapsed_us - deadline_us;
                entry.worst_overrun_us = entry.worst_overrun_us.max(overrun);
                log::warn!(
                    target: "MA",
                    "event=deadline_miss,task={},exec_us={},deadline_us={},overrun_us={}",
                    name, elapsed_us, deadline_us, overrun
                );
            } else if elapsed_us as f64 > deadline_us as f64 * HIGH_UTILIZATION {
                log::warn!(
                    target: "MA",
                    "event=high_utilization,task={},exec_us={},deadline_us={}",
                    name, elapsed_us, deadline_us
                );
            }
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<TaskStats> {
        self.stats.lock().get(name).cloned()
    }

    pub fn reset(&self, name: &str) {
        let mut stats = self.stats.lock();
        if let Some(entry) = stats.get_mut(name) {
            *entry = TaskStats::new(entry.task_name.clone(), entry.period_ms);
        }
    }

    pub fn reset_all(&self) {
        let mut stats = self.stats.lock();
        for entry in stats.values_mut() {
            *entry = TaskStats::new(entry.task_name.clone(), entry.period_ms);
        }
    }

    pub fn has_deadline_violations(&self) -> bool {
        self.stats
            .lock()
            .values()
            .any(|s| s.deadline_violations > 0)
    }

    /// Tabular shutdown report keyed by task name.
    pub fn report_string(&self) -> String {
        let stats = self.stats.lock();
        let mut out = String::new();

        out.push_str("\n========================================\n");
        out.push_str("    TASK PERFORMANCE REPORT\n");
        out.push_str("========================================\n\n");

        if stats.is_empty() {
            out.push_str("No performance data available.\n");
            return out;
        }

        let _ = writeln!(
            out,
            "{:<16}{:>8}{:>10}{:>10}{:>10}{:>10}{:>10}{:>8}{:>12}",
            "Task", "Period", "Last", "Min", "Avg", "Max", "StdDev", "Util%", "Violations"
        );
        out.push_str(&"-".repeat(94));
        out.push('\n');

        let mut total_violations = 0;
        for entry in stats.values() {
            total_violations += entry.deadline_violations;
            let min = if entry.min_us == u64::MAX {
                "-".to_string()
            } else {
                format!("{}us", entry.min_us)
            };
            let _ = writeln!(
                out,
                "{:<16}{:>6}ms{:>8}us{:>10}{:>8}us{:>8}us{:>8}us{:>8.1}{:>12}",
                entry.task_name,
                entry.period_ms,
                entry.last_us,
                min,
                entry.mean_us as u64,
                entry.max_us,
                entry.std_dev_us as u64,
                entry.utilization_pct(),
                entry.deadline_violations
            );
        }

        out.push_str(&"-".repeat(94));
        out.push('\n');
        let _ = writeln!(out, "\nSummary:");
        let _ = writeln!(out, "  Total Tasks: {}", stats.len());
        let _ = writeln!(out, "  Total Deadline Violations: {}", total_violations);
        if total_violations > 0 {
            out.push_str("  WARNING: deadline violations detected\n");
        } else {
            out.push_str("  All tasks meeting deadlines\n");
        }
        out.push_str("========================================\n");

        out
    }
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn records_basic_statistics() {
        let monitor = PerfMonitor::new();
        monitor.register_task("task", 10);

        for _ in 0..3 {
            let start = Instant::now() - Duration::from_micros(500);
            monitor.end_iteration("task", start);
        }

        let stats = monitor.snapshot("task").unwrap();
        assert_eq!(stats.sample_count, 3);
        assert!(stats.min_us >= 500);
        assert!(stats.mean_us >= 500.0);
        assert_eq!(stats.deadline_violations, 0);
    }

    #[test]
    fn overrun_counts_as_deadline_violation() {
        let monitor = PerfMonitor::new();
        monitor.register_task("slow", 1);

        let start = Instant::now() - Duration::from_millis(3);
        monitor.end_iteration("slow", start);

        let stats = monitor.snapshot("slow").unwrap();
        assert_eq!(stats.deadline_violations, 1);
        assert!(stats.worst_overrun_us >= 2_000);
        assert!(monitor.has_deadline_violations());
    }

    #[test]
    fn unregistered_task_is_auto_registered() {
        let monitor = PerfMonitor::new();
        monitor.end_iteration("surprise", Instant::now());

        let stats = monitor.snapshot("surprise").unwrap();
        assert_eq!(stats.period_ms, 0);
        assert_eq!(stats.sample_count, 1);
        // Period 0 disables deadline checks.
        assert_eq!(stats.deadline_violations, 0);
    }

    #[test]
    fn window_is_bounded() {
        let monitor = PerfMonitor::new();
        monitor.register_task("task", 1000);

        for _ in 0..(WINDOW_CAPACITY + 50) {
            monitor.end_iteration("task", Instant::now());
        }

        let stats = monitor.snapshot("task").unwrap();
        assert_eq!(stats.window.len(), WINDOW_CAPACITY);
        assert_eq!(stats.sample_count, (WINDOW_CAPACITY + 50) as u64);
    }

    #[test]
    fn reset_preserves_registration() {
        let monitor = PerfMonitor::new();
        monitor.register_task("task", 10);
        monitor.end_iteration("task", Instant::now());
        monitor.reset("task");

        let stats = monitor.snapshot("task").unwrap();
        assert_eq!(stats.sample_count, 0);
        assert_eq!(stats.period_ms, 10);
    }

    #[test]
    fn report_lists_registered_tasks() {
        let monitor = PerfMonitor::new();
        monitor.register_task("alpha", 10);
        monitor.register_task("beta", 20);

        let report = monitor.report_string();
        assert!(report.contains("alpha"));
        assert!(report.contains("beta"));
        assert!(report.contains("Total Tasks: 2"));
    }
}
