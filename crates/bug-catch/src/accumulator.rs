// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collects named vitals samples until every required metric has arrived.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const NAVIGATOR_INFORMATION_KEY: &str = "navigatorInformation";
/// Payload key of the sent marker; samples may not use it as a metric name.
pub const HAS_SENT_KEY: &str = "hasSent";

/// One measurement reported by the vitals library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSample {
    pub metric_name: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigator_information: Option<Value>,
}

impl VitalsSample {
    pub fn new(metric_name: impl Into<String>, data: Value) -> Self {
        Self {
            metric_name: metric_name.into(),
            data,
            navigator_information: None,
        }
    }

    pub fn with_navigator_information(mut self, info: Value) -> Self {
        self.navigator_information = Some(info);
        self
    }
}

/// Accumulated vitals, serialized as one flat JSON object keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VitalsPayload {
    #[serde(flatten)]
    entries: BTreeMap<String, Value>,
    /// Set by the flush path before sending; a marked payload is never resent.
    #[serde(rename = "hasSent", skip_serializing_if = "std::ops::Not::not")]
    pub has_sent: bool,
}

impl VitalsPayload {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn navigator_information(&self) -> Option<&Value> {
        self.entries.get(NAVIGATOR_INFORMATION_KEY)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct VitalsAccumulator {
    required: Vec<String>,
    payload: VitalsPayload,
    completed: bool,
}

impl VitalsAccumulator {
    pub fn new(required: Vec<String>) -> Self {
        Self {
            required,
            payload: VitalsPayload::default(),
            completed: false,
        }
    }

    /// Stores a sample. Returns the accumulated payload the first time the
    /// required set becomes complete, and `None` otherwise.
    pub fn record(&mut self, sample: VitalsSample) -> Option<VitalsPayload> {
        if self.completed {
            debug!(
                "Bug Catch | Ignoring vitals sample {} received after completion",
                sample.metric_name
            );
            return None;
        }

        if sample.metric_name == HAS_SENT_KEY {
            warn!("Bug Catch | Dropping vitals sample named {HAS_SENT_KEY}, the key is reserved");
            return None;
        }

        if let Some(info) = sample.navigator_information {
            if !self.payload.contains(NAVIGATOR_INFORMATION_KEY) {
                self.payload
                    .entries
                    .insert(NAVIGATOR_INFORMATION_KEY.to_string(), info);
            }
        }
        self.payload.entries.insert(sample.metric_name, sample.data);

        if self.has_required() {
            self.completed = true;
            return Some(self.payload.clone());
        }
        None
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    pub fn payload(&self) -> &VitalsPayload {
        &self.payload
    }

    fn has_required(&self) -> bool {
        self.payload.len() >= self.required.len()
            && self.required.iter().all(|name| self.payload.contains(name))
    }
}
