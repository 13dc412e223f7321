use std::io::{self, Write};
use std::time::Instant;

/// Elapsed-time prefixed status lines on stderr.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.line(msg.as_ref());
    }

    /// Warnings are printed even when progress output is disabled.
    pub fn warn(&self, msg: impl AsRef<str>) {
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] [warn] {}", msg.as_ref());
    }

    pub fn progress(&self, label: &str, current: usize, total: usize) {
        if !self.enabled {
            return;
        }
        let total = total.max(1);
        let current = current.min(total);
        let pct = (current as f64 / total as f64) * 100.0;
        self.line(&format!("{label} {current}/{total} ({pct:5.1}%)"));
    }

    /// Like [`progress`](Self::progress) but only every `every` items and at the last one.
    pub fn progress_every(&self, label: &str, current: usize, total: usize, every: usize) {
        if is_report_point(current, total, every) {
            self.progress(label, current, total);
        }
    }

    fn line(&self, msg: &str) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {msg}");
    }
}

fn is_report_point(current: usize, total: usize, every: usize) -> bool {
    current == total || (every > 0 && current % every == 0)
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::{fmt_elapsed, is_report_point};

    #[test]
    fn elapsed_switches_to_hours() {
        assert_eq!(fmt_elapsed(0.4), "00:00");
        assert_eq!(fmt_elapsed(75.0), "01:15");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
    }

    #[test]
    fn throttled_progress_reports_multiples_and_last() {
        let points: Vec<usize> = (1..=120).filter(|&i| is_report_point(i, 120, 50)).collect();
        assert_eq!(points, vec![50, 100, 120]);
        assert!(is_report_point(3, 3, 0));
        assert!(!is_report_point(1, 3, 0));
    }
}
