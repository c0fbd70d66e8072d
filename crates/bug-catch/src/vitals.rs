// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Vitals collection service.
//!
//! The vitals library pushes samples through a [`VitalsTracker`]. A
//! [`VitalsService`] task accumulates them and, on completion, defers the
//! flush to an idle callback and stops. Samples arriving afterwards are dropped.

use crate::accumulator::{VitalsAccumulator, VitalsPayload, VitalsSample};
use crate::idle::request_idle_callback;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub type FlushFn = Box<dyn FnOnce(VitalsPayload) + Send>;

/// Sending half handed to the vitals library.
#[derive(Debug, Clone)]
pub struct VitalsTracker {
    tx: mpsc::UnboundedSender<VitalsSample>,
}

impl VitalsTracker {
    pub fn track(&self, sample: VitalsSample) {
        if let Err(e) = self.tx.send(sample) {
            debug!(
                "Bug Catch | Vitals collection finished, dropping sample {}",
                e.0.metric_name
            );
        }
    }

    /// True once the service has flushed or stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Producer of vitals samples, started only when the send gate allows it.
pub trait VitalsSource: Send + Sync {
    fn start(&self, tracker: VitalsTracker);
}

/// Source fed by hand through [`ManualVitalsSource::report`].
#[derive(Debug, Default)]
pub struct ManualVitalsSource {
    tracker: OnceLock<VitalsTracker>,
}

impl ManualVitalsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.tracker.get().is_some()
    }

    /// Forwards a sample. Returns `false` if the source was never started.
    pub fn report(&self, sample: VitalsSample) -> bool {
        match self.tracker.get() {
            Some(tracker) => {
                tracker.track(sample);
                true
            }
            None => {
                debug!(
                    "Bug Catch | Vitals source not started, ignoring sample {}",
                    sample.metric_name
                );
                false
            }
        }
    }
}

impl VitalsSource for ManualVitalsSource {
    fn start(&self, tracker: VitalsTracker) {
        if self.tracker.set(tracker).is_err() {
            warn!("Bug Catch | Vitals source already started, ignoring new tracker");
        }
    }
}

pub struct VitalsService {
    accumulator: VitalsAccumulator,
    rx: mpsc::UnboundedReceiver<VitalsSample>,
    on_complete: FlushFn,
}

impl VitalsService {
    pub fn new(required: Vec<String>, on_complete: FlushFn) -> (Self, VitalsTracker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            accumulator: VitalsAccumulator::new(required),
            rx,
            on_complete,
        };
        (service, VitalsTracker { tx })
    }

    pub async fn run(self) {
        let Self {
            mut accumulator,
            mut rx,
            on_complete,
        } = self;
        debug!("Bug Catch | Vitals service started");

        while let Some(sample) = rx.recv().await {
            debug!("Bug Catch | Received vitals sample {}", sample.metric_name);
            if let Some(payload) = accumulator.record(sample) {
                debug!(
                    "Bug Catch | Required vitals collected ({} entries), scheduling flush",
                    payload.len()
                );
                request_idle_callback(move |_deadline| on_complete(payload));
                return;
            }
        }

        debug!("Bug Catch | Vitals service stopped before completion");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::time::{sleep, Duration};

    fn required(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_service_flushes_once_and_stops() {
        let flushed: Arc<Mutex<Vec<VitalsPayload>>> = Arc::default();
        let sink = flushed.clone();
        let (service, tracker) = VitalsService::new(
            required(&["fcp", "lcp"]),
            Box::new(move |payload: VitalsPayload| sink.lock().unwrap().push(payload)),
        );
        let task = tokio::spawn(service.run());

        tracker.track(VitalsSample::new("fcp", json!(1)));
        sleep(Duration::from_millis(10)).await;
        assert!(flushed.lock().unwrap().is_empty());

        tracker.track(VitalsSample::new("lcp", json!(2)));
        task.await.expect("service task failed");
        assert!(tracker.is_closed());

        tracker.track(VitalsSample::new("fcp", json!(3)));
        sleep(Duration::from_millis(10)).await;

        let flushed = flushed.lock().unwrap();
        assert_eq!(flushed.len(), 1);
        assert!(flushed[0].contains("fcp") && flushed[0].contains("lcp"));
    }

    #[tokio::test]
    async fn test_service_stops_when_trackers_dropped() {
        let (service, tracker) = VitalsService::new(required(&["fcp"]), Box::new(|_: VitalsPayload| {
            panic!("must not flush");
        }));
        let task = tokio::spawn(service.run());
        drop(tracker);
        task.await.expect("service task failed");
    }

    #[test]
    fn test_manual_source_requires_start() {
        let source = ManualVitalsSource::new();
        assert!(!source.report(VitalsSample::new("fcp", json!(1))));

        let (_service, tracker) = VitalsService::new(required(&["fcp"]), Box::new(|_: VitalsPayload| {}));
        source.start(tracker);
        assert!(source.is_started());
        assert!(source.report(VitalsSample::new("fcp", json!(1))));
    }
}
