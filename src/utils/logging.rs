//! Logging Module
//!
//! Provides structured logging utilities using the `tracing` crate, plus the
//! default [`MetricsObserver`] that turns training events into log lines.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::training::metrics::{MetricsObserver, Phase, TrainingEvent};
use crate::utils::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Create a quiet logging config (errors only)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize logging with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Training progress logger, the default metrics observer
pub struct TrainingLogger {
    /// Log bottleneck progress every N images
    bottleneck_interval: usize,
    /// Best validation accuracy seen so far
    best_accuracy: Option<f64>,
    /// Training start time
    training_start: Instant,
    /// Draw a progress bar while bottlenecks are computed
    show_progress: bool,
    bottleneck_bar: Option<ProgressBar>,
}

impl Default for TrainingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingLogger {
    pub fn new() -> Self {
        Self {
            bottleneck_interval: 25,
            best_accuracy: None,
            training_start: Instant::now(),
            show_progress: true,
            bottleneck_bar: None,
        }
    }

    /// Disable the bottleneck progress bar (log lines only)
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    fn progress_bar(&mut self, total: usize) -> Option<&ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let bar = self.bottleneck_bar.get_or_insert_with(|| {
            let bar = ProgressBar::new(total as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        });
        Some(bar)
    }

    fn finish_progress(&mut self) {
        if let Some(bar) = self.bottleneck_bar.take() {
            bar.finish_and_clear();
        }
    }

    /// Best validation accuracy reported so far
    pub fn best_accuracy(&self) -> Option<f64> {
        self.best_accuracy
    }
}

impl MetricsObserver for TrainingLogger {
    fn on_event(&mut self, event: &TrainingEvent) {
        match event {
            TrainingEvent::Bottleneck(progress) => {
                let done = progress.index + 1;
                if let Some(bar) = self.progress_bar(progress.total) {
                    bar.set_position(done as u64);
                }
                if done == progress.total {
                    self.finish_progress();
                }
                if done % self.bottleneck_interval == 0 || done == progress.total {
                    tracing::info!(
                        "Bottlenecks ({}): {}/{} computed",
                        progress.dataset,
                        done,
                        progress.total
                    );
                }
            }
            TrainingEvent::Epoch(metrics) => {
                self.finish_progress();
                tracing::info!(
                    "Epoch {} [{}] | Loss: {:.4} | Acc: {:.2}% | LR: {:.6} | Elapsed: {}",
                    metrics.epoch + 1,
                    metrics.phase,
                    metrics.loss,
                    metrics.accuracy * 100.0,
                    metrics.learning_rate,
                    format_duration(self.training_start.elapsed().as_secs_f64())
                );

                if metrics.phase == Phase::Validation
                    && self.best_accuracy.map_or(true, |best| metrics.accuracy > best)
                {
                    self.best_accuracy = Some(metrics.accuracy);
                    tracing::debug!("New best validation accuracy: {:.2}%", metrics.accuracy * 100.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::metrics::EpochMetrics;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("debug"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("INFO"), LogLevel::Info);
        assert_eq!(LogLevel::parse("Warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("unknown"), LogLevel::Info);
    }

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LogLevel::Info);
        assert!(!config.include_target);
    }

    #[test]
    fn test_training_logger_tracks_best_validation() {
        let mut logger = TrainingLogger::new().without_progress();
        for (epoch, accuracy) in [(0, 0.5), (1, 0.8), (2, 0.7)] {
            logger.on_event(&TrainingEvent::Epoch(EpochMetrics {
                phase: Phase::Validation,
                epoch,
                loss: 1.0,
                accuracy,
                learning_rate: 0.01,
            }));
        }
        assert_eq!(logger.best_accuracy(), Some(0.8));
    }
}
