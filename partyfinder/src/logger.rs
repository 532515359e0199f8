use crate::export::{PeriodReport, PeriodStatus, RunSummary};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // Only progress bar and final summary
    Summary = 1,   // Per-period progress (default)
    Detailed = 2,  // Lookup details
    Debug = 3,     // Everything
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default `tracing` filter directive for this level.
    pub fn filter_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "error",
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

/// User-facing diagnostics for a device run.
#[derive(Clone)]
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<Mutex<Option<ProgressBar>>>,
    started: Arc<Mutex<Option<Instant>>>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(Mutex::new(None)),
            started: Arc::new(Mutex::new(None)),
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // Errors are shown at every verbosity
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", timestamp(), level, message);

        // Route through the progress bar so the bar stays pinned
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub fn start_progress(&self, total_periods: u64) {
        let pb = ProgressBar::new(total_periods);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} periods {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );

        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
    }

    pub fn update_progress(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
            }
        }
    }

    pub fn advance_progress(&self) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(1);
            }
        }
    }

    pub fn finish_progress(&self) {
        if let Ok(mut guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    /// Report how one period ended.
    pub fn log_period(&self, report: &PeriodReport) {
        match report.status {
            PeriodStatus::Processed => self.info(&format!(
                "{}: {} domains classified{}",
                report.period,
                report.records,
                report
                    .output
                    .as_deref()
                    .map(|o| format!(" -> {}", o))
                    .unwrap_or_default()
            )),
            PeriodStatus::SkippedMissingPeriod => {
                self.debug(&format!("{}: no data directory, skipping", report.period))
            }
            PeriodStatus::SkippedMissingArtifact => self.info(&format!(
                "{}: skipped, missing {}",
                report.period,
                report.detail.as_deref().unwrap_or("artifact")
            )),
            PeriodStatus::FailedMalformed => self.error(&format!(
                "{}: skipped, {}",
                report.period,
                report.detail.as_deref().unwrap_or("malformed artifact")
            )),
        }
    }

    /// Final summary, always printed.
    pub fn print_final_summary(&self, summary: &RunSummary) {
        self.finish_progress();

        let elapsed = self
            .started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|s| s.elapsed().as_secs_f64());

        println!("\n=== RUN SUMMARY ===");
        println!("Device: {}", summary.device);
        if let Some(secs) = elapsed {
            println!("Duration: {:.2}s", secs);
        }
        println!("Periods Processed: {}", summary.processed);
        println!("Periods Skipped: {}", summary.skipped);
        if summary.failed > 0 {
            println!("Periods Failed: {}", summary.failed);
        }
        println!("Records Written: {}", summary.total_records);
        for (category, count) in &summary.categories {
            println!("  {}: {}", category, count);
        }
        println!(
            "Live Lookups: {} ({} failed, {} timed out, {} cached)",
            summary.lookups.attempted,
            summary.lookups.failed,
            summary.lookups.timed_out,
            summary.lookups.cache_hits
        );
        println!("===================\n");

        if summary.processed > 0 {
            println!(
                "Run completed: {} of {} periods processed.",
                summary.processed, summary.periods_total
            );
        } else {
            println!("Run completed. No periods had complete data.");
        }
    }
}

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();

    format!(
        "{:02}:{:02}:{:02}.{:03}",
        (secs / 3600) % 24,
        (secs % 3600) / 60,
        secs % 60,
        now.subsec_millis()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_from_count() {
        assert_eq!(VerbosityLevel::from_verbose_count(0), VerbosityLevel::Summary);
        assert_eq!(VerbosityLevel::from_verbose_count(1), VerbosityLevel::Detailed);
        assert_eq!(VerbosityLevel::from_verbose_count(5), VerbosityLevel::Debug);
        assert!(VerbosityLevel::Debug > VerbosityLevel::Summary);
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(VerbosityLevel::Summary.filter_directive(), "warn");
        assert_eq!(VerbosityLevel::Debug.filter_directive(), "debug");
    }

    #[test]
    fn test_timestamp_shape() {
        let ts = timestamp();
        assert_eq!(ts.len(), 12);
        assert_eq!(&ts[2..3], ":");
        assert_eq!(&ts[8..9], ".");
    }

    #[test]
    fn test_progress_lifecycle_without_terminal() {
        let logger = RunLogger::new(VerbosityLevel::Silent);
        logger.start_progress(3);
        logger.update_progress("Jan-2024");
        logger.advance_progress();
        logger.info("hidden at silent level");
        logger.finish_progress();
        assert!(logger.progress_bar.lock().unwrap().is_none());
    }
}
