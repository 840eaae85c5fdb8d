//! Events and metrics
//!
//! Reconciliation reports what it did through an [`EventRecorder`]. Recording
//! is fire-and-forget: nothing a recorder does can change the outcome of a
//! pass.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::models::{HelmChart, ObjectKey};
use crate::status::{self, ConditionStatus, READY};

pub const NEW_ARTIFACT_REASON: &str = "NewArtifact";
pub const GARBAGE_COLLECTION_SUCCEEDED_REASON: &str = "GarbageCollectionSucceeded";
pub const GARBAGE_COLLECTION_FAILED_REASON: &str = "GarbageCollectionFailed";

/// How many events [`LogRecorder`] keeps for inspection
const RECENT_EVENTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Sink for events and reconciliation metrics
pub trait EventRecorder: Send + Sync {
    fn event(
        &self,
        obj: &HelmChart,
        severity: Severity,
        reason: &str,
        message: &str,
        meta: &BTreeMap<String, String>,
    );

    /// Record the current `Ready` status of the object
    fn record_readiness(&self, obj: &HelmChart);

    /// Record how long a pass took
    fn record_duration(&self, obj: &HelmChart, start: Instant);

    /// Record whether the object is suspended
    fn record_suspend(&self, obj: &HelmChart, suspended: bool);

    /// Drop everything recorded for an object that has been released
    fn forget(&self, key: &ObjectKey);
}

/// An event as recorded by [`LogRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectKey,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    pub meta: BTreeMap<String, String>,
}

/// Per-object metrics kept by [`LogRecorder`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetrics {
    pub ready: Option<ConditionStatus>,
    pub suspended: bool,
    pub reconciles: u64,
    pub total_duration: Duration,
}

#[derive(Default)]
struct RecorderState {
    events: VecDeque<RecordedEvent>,
    metrics: HashMap<ObjectKey, ObjectMetrics>,
}

/// [`EventRecorder`] writing events to the log and keeping metrics in memory
#[derive(Default)]
pub struct LogRecorder {
    state: Mutex<RecorderState>,
}

impl LogRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut RecorderState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> Vec<RecordedEvent> {
        self.with_state(|s| s.events.iter().cloned().collect())
    }

    /// Recent events recorded for one object with the given reason
    pub fn events_for(&self, key: &ObjectKey, reason: &str) -> Vec<RecordedEvent> {
        self.with_state(|s| {
            s.events
                .iter()
                .filter(|e| &e.object == key && e.reason == reason)
                .cloned()
                .collect()
        })
    }

    pub fn metrics(&self, key: &ObjectKey) -> Option<ObjectMetrics> {
        self.with_state(|s| s.metrics.get(key).cloned())
    }
}

impl EventRecorder for LogRecorder {
    fn event(
        &self,
        obj: &HelmChart,
        severity: Severity,
        reason: &str,
        message: &str,
        meta: &BTreeMap<String, String>,
    ) {
        let key = obj.key();
        match severity {
            Severity::Info => tracing::info!(chart = %key, reason, ?meta, "{}", message),
            Severity::Error => tracing::warn!(chart = %key, reason, ?meta, "{}", message),
        }

        self.with_state(|s| {
            if s.events.len() == RECENT_EVENTS {
                s.events.pop_front();
            }
            s.events.push_back(RecordedEvent {
                object: key,
                severity,
                reason: reason.to_string(),
                message: message.to_string(),
                meta: meta.clone(),
            });
        });
    }

    fn record_readiness(&self, obj: &HelmChart) {
        let ready = status::get(&obj.status.conditions, READY).map(|c| c.status);
        self.with_state(|s| s.metrics.entry(obj.key()).or_default().ready = ready);
    }

    fn record_duration(&self, obj: &HelmChart, start: Instant) {
        let elapsed = start.elapsed();
        tracing::debug!(
            chart = %obj.key(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Reconciliation finished"
        );
        self.with_state(|s| {
            let metrics = s.metrics.entry(obj.key()).or_default();
            metrics.reconciles += 1;
            metrics.total_duration += elapsed;
        });
    }

    fn record_suspend(&self, obj: &HelmChart, suspended: bool) {
        self.with_state(|s| s.metrics.entry(obj.key()).or_default().suspended = suspended);
    }

    fn forget(&self, key: &ObjectKey) {
        self.with_state(|s| s.metrics.remove(key));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HelmChartSpec, ObjectMeta, SourceKind, SourceReference};

    fn chart() -> HelmChart {
        HelmChart::new(
            ObjectMeta::new("default", "podinfo"),
            HelmChartSpec::new(
                "podinfo",
                SourceReference {
                    kind: SourceKind::HelmRepository,
                    name: "podinfo".to_string(),
                    api_version: None,
                },
            ),
        )
    }

    #[test]
    fn test_events_are_kept_in_order() {
        let recorder = LogRecorder::new();
        let obj = chart();
        recorder.event(&obj, Severity::Info, NEW_ARTIFACT_REASON, "first", &BTreeMap::new());
        recorder.event(
            &obj,
            Severity::Error,
            GARBAGE_COLLECTION_FAILED_REASON,
            "second",
            &BTreeMap::new(),
        );

        let events = recorder.recent_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "first");
        assert_eq!(recorder.events_for(&obj.key(), GARBAGE_COLLECTION_FAILED_REASON).len(), 1);
    }

    #[test]
    fn test_recent_events_are_bounded() {
        let recorder = LogRecorder::new();
        let obj = chart();
        for i in 0..RECENT_EVENTS + 10 {
            recorder.event(&obj, Severity::Info, "Test", &i.to_string(), &BTreeMap::new());
        }
        let events = recorder.recent_events();
        assert_eq!(events.len(), RECENT_EVENTS);
        assert_eq!(events[0].message, "10");
    }

    #[test]
    fn test_metrics() {
        let recorder = LogRecorder::new();
        let mut obj = chart();
        status::mark_true(&mut obj.status.conditions, READY, "Succeeded", "", 1);

        recorder.record_suspend(&obj, true);
        recorder.record_readiness(&obj);
        recorder.record_duration(&obj, Instant::now());

        let metrics = recorder.metrics(&obj.key()).unwrap();
        assert!(metrics.suspended);
        assert_eq!(metrics.ready, Some(ConditionStatus::True));
        assert_eq!(metrics.reconciles, 1);

        recorder.forget(&obj.key());
        assert!(recorder.metrics(&obj.key()).is_none());
    }
}
