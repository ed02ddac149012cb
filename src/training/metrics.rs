//! Training events and the observer interface
//!
//! Trainable stages report progress through an injected [`MetricsObserver`]
//! instead of printing. Two kinds of events exist:
//! - bottleneck progress, one event per image whose backbone features were computed
//! - epoch metrics, one event per epoch and phase (train / validation)

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which half of a split an event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Train,
    Validation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => write!(f, "train"),
            Phase::Validation => write!(f, "validation"),
        }
    }
}

/// Metrics for one epoch of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub phase: Phase,
    /// Epoch index (0-based)
    pub epoch: usize,
    /// Mean cross-entropy
    pub loss: f64,
    /// Fraction of correctly classified samples
    pub accuracy: f64,
    pub learning_rate: f64,
}

/// A bottleneck value was computed (not served from cache)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckProgress {
    pub dataset: Phase,
    /// Position of the sample within its split
    pub index: usize,
    pub total: usize,
    pub identifier: String,
}

/// Structured payload handed to a [`MetricsObserver`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrainingEvent {
    Bottleneck(BottleneckProgress),
    Epoch(EpochMetrics),
}

/// Receives training progress from trainable stages
pub trait MetricsObserver {
    fn on_event(&mut self, event: &TrainingEvent);
}

impl<F> MetricsObserver for F
where
    F: FnMut(&TrainingEvent),
{
    fn on_event(&mut self, event: &TrainingEvent) {
        self(event)
    }
}

/// Observer that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl MetricsObserver for NullObserver {
    fn on_event(&mut self, _event: &TrainingEvent) {}
}

/// Observer that keeps every event in memory
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    pub events: Vec<TrainingEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch metrics for one phase, in arrival order
    pub fn epochs(&self, phase: Phase) -> Vec<&EpochMetrics> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TrainingEvent::Epoch(m) if m.phase == phase => Some(m),
                _ => None,
            })
            .collect()
    }

    /// Number of bottleneck computations for one split
    pub fn bottlenecks_computed(&self, dataset: Phase) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TrainingEvent::Bottleneck(b) if b.dataset == dataset))
            .count()
    }
}

impl MetricsObserver for EventLog {
    fn on_event(&mut self, event: &TrainingEvent) {
        self.events.push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(phase: Phase, epoch: usize) -> TrainingEvent {
        TrainingEvent::Epoch(EpochMetrics {
            phase,
            epoch,
            loss: 0.5,
            accuracy: 0.9,
            learning_rate: 0.01,
        })
    }

    #[test]
    fn test_closure_observer() {
        let mut seen = 0usize;
        {
            let mut observer = |_: &TrainingEvent| seen += 1;
            observer.on_event(&epoch(Phase::Train, 0));
            observer.on_event(&epoch(Phase::Validation, 0));
        }
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_event_log_filters() {
        let mut log = EventLog::new();
        log.on_event(&epoch(Phase::Train, 0));
        log.on_event(&epoch(Phase::Validation, 0));
        log.on_event(&TrainingEvent::Bottleneck(BottleneckProgress {
            dataset: Phase::Validation,
            index: 0,
            total: 1,
            identifier: "a.png".to_string(),
        }));

        assert_eq!(log.epochs(Phase::Train).len(), 1);
        assert_eq!(log.epochs(Phase::Validation).len(), 1);
        assert_eq!(log.bottlenecks_computed(Phase::Validation), 1);
        assert_eq!(log.bottlenecks_computed(Phase::Train), 0);
    }
}
