// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The agent: wires host capabilities to the normalizer, the vitals service
//! and the transport.
//!
//! Every entry point the host can trigger (listener callbacks, the vitals
//! flush) logs and swallows its failures. Nothing is allowed to surface as a
//! second uncaught error, which would loop back through the same listener.

use crate::accumulator::VitalsPayload;
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::device::{DeviceDetector, DeviceInfo};
use crate::envelope::{Envelope, EventData};
use crate::error::Error;
use crate::gate::VitalsGate;
use crate::normalizer::normalize;
use crate::source::{EventKind, EventSource, UncaughtEvent};
use crate::store::{KeyValueStore, MemoryStore};
use crate::transport::{HttpTransport, Transport};
use crate::vitals::{VitalsService, VitalsSource};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, error, info};

/// Returns the current page location.
pub type LocationFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Collects the capabilities an [`Agent`] runs against.
pub struct AgentBuilder {
    config: Config,
    event_source: Option<Arc<dyn EventSource>>,
    vitals_source: Option<Arc<dyn VitalsSource>>,
    store: Option<Arc<dyn KeyValueStore>>,
    device_detector: Option<Arc<dyn DeviceDetector>>,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    location: Option<LocationFn>,
}

impl AgentBuilder {
    pub fn event_source(mut self, source: Arc<dyn EventSource>) -> Self {
        self.event_source = Some(source);
        self
    }

    pub fn vitals_source(mut self, source: Arc<dyn VitalsSource>) -> Self {
        self.vitals_source = Some(source);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn device_detector(mut self, detector: Arc<dyn DeviceDetector>) -> Self {
        self.device_detector = Some(detector);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn location<F>(mut self, location: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.location = Some(Arc::new(location));
        self
    }

    /// Constructs the agent: snapshots device info, subscribes the listeners
    /// and, if the send gate allows it, starts vitals collection.
    ///
    /// Vitals collection needs a tokio runtime; without one it is skipped.
    pub fn init(self) -> Agent {
        let config = self.config;
        let device = if config.capture_device_info {
            capture_device_info(self.device_detector.as_deref(), config.log_events)
        } else {
            None
        };

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new(config.https_proxy.as_deref())));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let gate = VitalsGate::new(store, clock, config.release.clone());

        let agent = Agent {
            inner: Arc::new(Inner {
                config,
                device,
                transport,
                gate,
                location: self.location,
            }),
        };

        if let Some(source) = &self.event_source {
            agent.listen(source.as_ref());
        }

        if !agent.inner.config.disable_web_vitals {
            match &self.vitals_source {
                Some(source) => agent.start_vitals(source.as_ref()),
                None => debug!("Bug Catch | No vitals source configured"),
            }
        }

        agent
    }
}

fn capture_device_info(detector: Option<&dyn DeviceDetector>, log_events: bool) -> Option<DeviceInfo> {
    let Some(detector) = detector else {
        debug!("Bug Catch | No device detector configured");
        return None;
    };
    match detector.detect() {
        Ok(info) => {
            let info = info.lowercased();
            if log_events {
                info!("Bug Catch | Device info {:?}", info);
            }
            Some(info)
        }
        Err(e) => {
            error!("Bug Catch | Device info error: {e}");
            None
        }
    }
}

struct Inner {
    config: Config,
    device: Option<DeviceInfo>,
    transport: Arc<dyn Transport>,
    gate: VitalsGate,
    location: Option<LocationFn>,
}

/// Handle to a running agent. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub fn builder(config: Config) -> AgentBuilder {
        AgentBuilder {
            config,
            event_source: None,
            vitals_source: None,
            store: None,
            device_detector: None,
            transport: None,
            clock: None,
            location: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.inner.device.as_ref()
    }

    fn listen(&self, source: &dyn EventSource) {
        let config = &self.inner.config;
        if !config.disable_error {
            let agent = self.clone();
            source.add_listener(
                EventKind::Error,
                Arc::new(move |event: &UncaughtEvent| agent.on_error(event)),
            );
        }
        if !config.disable_unhandled_rejection {
            let agent = self.clone();
            source.add_listener(
                EventKind::UnhandledRejection,
                Arc::new(move |event: &UncaughtEvent| agent.on_error(event)),
            );
        }
    }

    fn start_vitals(&self, source: &dyn VitalsSource) {
        let log_events = self.inner.config.log_events;
        if !self.inner.gate.should_collect() {
            if log_events {
                info!("Bug Catch | web-vitals limit has been reached");
            }
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("Bug Catch | Cannot start web-vitals collection: {e}");
                return;
            }
        };

        let agent = self.clone();
        let (service, tracker) = VitalsService::new(
            self.inner.config.required_vitals.clone(),
            Box::new(move |mut payload: VitalsPayload| {
                agent.flush_vitals(&mut payload);
            }),
        );
        runtime.spawn(service.run());
        source.start(tracker);

        if log_events {
            info!(
                "Bug Catch | Collecting web-vitals: {}",
                self.inner.config.required_vitals.join(", ")
            );
        }
    }

    /// Handles an uncaught error or unhandled rejection.
    pub fn on_error(&self, event: &UncaughtEvent) {
        match normalize(event) {
            Ok(normalized) => {
                let envelope = self.new_event("error", EventData::Error(normalized), None);
                self.catch_event(&envelope);
            }
            Err(e) => error!("Bug Catch | Unable to format {} event: {e}", event.kind),
        }
    }

    /// Records a caller-defined event.
    pub fn record_event(&self, name: &str, data: Value, incident_data: Option<Value>) {
        if self.inner.config.log_events {
            info!(
                "Bug Catch | Event: {name} data={} incident_data={:?}",
                data, incident_data
            );
        }
        let envelope = self.new_event(name, EventData::Custom(data), incident_data);
        self.catch_event(&envelope);
    }

    /// Sends an accumulated vitals payload and records the send in the gate.
    ///
    /// Returns `false` without sending when the payload was already marked as
    /// sent, or when the request could not be issued.
    pub fn flush_vitals(&self, payload: &mut VitalsPayload) -> bool {
        if payload.has_sent {
            debug!("Bug Catch | Vitals payload already sent, skipping");
            return false;
        }
        payload.has_sent = true;

        if self.inner.config.log_events {
            info!(
                "Bug Catch | Web-Vitals data: {}",
                payload.names().collect::<Vec<_>>().join(", ")
            );
        }

        if let Err(e) = self.send(&self.inner.config.vitals_url(), &*payload) {
            error!("Bug Catch | Vitals post error: {e}");
            return false;
        }

        match self.inner.gate.record_sent() {
            Ok(state) => debug!(
                "Bug Catch | Recorded vitals send for release {} at {}",
                state.release, state.last_sent
            ),
            Err(e) => error!("Bug Catch | Failed to persist vitals state: {e}"),
        }
        true
    }

    fn new_event(&self, event_type: &str, data: EventData, incident_data: Option<Value>) -> Envelope {
        Envelope {
            event_type: event_type.to_string(),
            data,
            incident_data,
            device: self.inner.device.clone(),
            release: self.inner.config.release.clone(),
            location: self
                .inner
                .location
                .as_ref()
                .map(|location| location())
                .unwrap_or_default(),
        }
    }

    fn catch_event(&self, envelope: &Envelope) {
        if let Err(e) = self.send(&self.inner.config.event_url(), envelope) {
            error!("Bug Catch | Event post error: {e}");
        }
    }

    fn send<T: serde::Serialize + ?Sized>(&self, url: &str, payload: &T) -> Result<(), Error> {
        let body = serde_json::to_value(payload)?;
        self.inner.transport.send(url, &body)
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.inner.config)
            .field("device", &self.inner.device)
            .finish_non_exhaustive()
    }
}
