use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::RwLock;
use std::io::{self, Write};
use std::fs::OpenOptions;
use std::path::Path;

use crate::pipeline::StateOutcome;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // Only show progress bar and final summary
    Summary = 1,   // Per-state progress (default)
    Detailed = 2,  // Per-section results, fetch and oracle warnings
    Debug = 3,     // Everything including locator strategies
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }

    /// Default `tracing` filter directive for this level
    pub fn tracing_directive(&self) -> &'static str {
        match self {
            VerbosityLevel::Silent => "error",
            VerbosityLevel::Summary => "warn",
            VerbosityLevel::Detailed => "info",
            VerbosityLevel::Debug => "debug",
        }
    }
}

#[derive(Clone)]
pub struct AnalysisLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    run_metadata: Arc<Mutex<RunMetadata>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<String>,
}

#[derive(Default, Clone)]
struct RunMetadata {
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
    states_processed: usize,
    states_failed: usize,
    sections_resolved: usize,
    sections_unresolved: usize,
    oracle_name: String,
    oracle_calls: usize,
    oracle_fallbacks: usize,
    state_lines: Vec<String>,
    output_files: Vec<String>,
}

impl AnalysisLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            run_metadata: Arc::new(Mutex::new(RunMetadata::default())),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: String) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    fn metadata(&self) -> MutexGuard<'_, RunMetadata> {
        self.run_metadata.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // Core logging functions with consistent timestamp formatting
    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // Errors are shown at every verbosity level
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let timestamp = self.get_timestamp();
        let msg = format!("[{}] {}: {}", timestamp, level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        // Print through the progress bar so it keeps its position
        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    fn get_timestamp(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs();
        let millis = now.subsec_millis();

        let hours = (secs / 3600) % 24;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    }

    // Progress bar over states
    pub async fn start_progress(&self, total_states: u64) {
        let pb = ProgressBar::new(total_states);

        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} states {msg}")
                .unwrap_or_else(|_| {
                    ProgressStyle::default_bar()
                        .template("{bar:40} {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                })
                .progress_chars("##-")
        );

        pb.set_message("Starting...");

        let mut progress_guard = self.progress_bar.write().await;
        *progress_guard = Some(pb);

        self.metadata().start_time = Some(SystemTime::now());
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self, steps: u64) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(steps);
        }
    }

    pub async fn finish_progress(&self, final_message: &str) {
        let mut progress_guard = self.progress_bar.write().await;
        if let Some(pb) = progress_guard.take() {
            pb.finish_and_clear();
        }
        drop(progress_guard);

        self.metadata().end_time = Some(SystemTime::now());

        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", final_message);
        }
    }

    // Metadata recording functions
    pub fn record_oracle(&self, name: &str) {
        self.metadata().oracle_name = name.to_string();
    }

    pub fn record_output_file(&self, path: &str) {
        self.metadata().output_files.push(path.to_string());
    }

    /// Record one finished state and log its per-section results.
    pub fn log_state_complete(&self, outcome: &StateOutcome) {
        let resolved = outcome.result.resolved_count();
        let unresolved = outcome.result.unresolved_count();

        {
            let mut metadata = self.metadata();
            metadata.states_processed += 1;
            if !outcome.fetched() {
                metadata.states_failed += 1;
            }
            metadata.sections_resolved += resolved;
            metadata.sections_unresolved += unresolved;
            metadata.oracle_calls += outcome.oracle_calls;
            metadata.oracle_fallbacks += outcome.oracle_fallbacks;
            metadata.state_lines.push(format!(
                "{} ({}): {} resolved, {} unresolved{}",
                outcome.config.state_name,
                outcome.config.state_code,
                resolved,
                unresolved,
                if outcome.fetched() { "" } else { " [fetch failed]" }
            ));
        }

        match &outcome.fetch_failure {
            None => self.info(&format!(
                "{}: {} of {} sections resolved",
                outcome.config.state_code,
                resolved,
                resolved + unresolved
            )),
            Some(failure) => self.warn(&format!(
                "{}: {}; placeholders recorded for every section",
                outcome.config.state_code, failure
            )),
        }

        for fact in &outcome.result.facts {
            self.debug(&format!(
                "{} {} = {} [{}]",
                outcome.config.state_code, fact.section, fact.value, fact.method
            ));
        }
    }

    pub fn log_initialization(&self, state_count: usize, entity: &str, industry: &str) {
        self.info(&format!(
            "Processing {} state(s) for {} in {} industry",
            state_count,
            entity.replace('_', "-"),
            industry
        ));
    }

    pub fn log_export_success(&self, path: &str) {
        self.record_output_file(path);
        self.info(&format!("Export completed: {}", path));
    }

    // Final summary message
    pub fn print_final_summary(&self) {
        let metadata = self.metadata().clone();

        // Clear any remaining progress bar artifacts
        print!("\x1b[2K\r");
        let _ = io::stdout().flush();

        println!("\n=== EXTRACTION SUMMARY ===");

        if let (Some(start), Some(end)) = (metadata.start_time, metadata.end_time) {
            let duration = end.duration_since(start).unwrap_or_default();
            println!("Run Duration: {:.2}s", duration.as_secs_f64());
        }

        println!("Oracle: {}", if metadata.oracle_name.is_empty() { "disabled" } else { metadata.oracle_name.as_str() });
        println!("States Processed: {}", metadata.states_processed);
        println!("States Failed To Fetch: {}", metadata.states_failed);
        println!("Sections Resolved: {}", metadata.sections_resolved);
        println!("Sections Unresolved: {}", metadata.sections_unresolved);
        println!("Oracle Calls: {} ({} fell back to local heuristics)", metadata.oracle_calls, metadata.oracle_fallbacks);

        for line in &metadata.state_lines {
            println!("  {}", line);
        }

        for file in &metadata.output_files {
            println!("Results Exported: {}", file);
        }

        println!("==========================\n");

        let succeeded = metadata.states_processed - metadata.states_failed;
        println!("{}/{} states processed successfully", succeeded, metadata.states_processed);
    }

    /// Export all collected logs to the specified file
    pub fn export_logs(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(ref log_file_path) = self.log_file_path {
            if let Ok(buffer) = self.log_buffer.lock() {
                if let Some(parent) = Path::new(log_file_path).parent() {
                    std::fs::create_dir_all(parent)?;
                }

                let mut file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(log_file_path)?;

                for log_entry in buffer.iter() {
                    writeln!(file, "{}", log_entry)?;
                }

                file.flush()?;
            }
        }
        Ok(())
    }

    pub fn is_log_export_enabled(&self) -> bool {
        self.log_file_path.is_some()
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn states_failed(&self) -> usize {
        self.metadata().states_failed
    }
}
