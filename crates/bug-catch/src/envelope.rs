// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::device::DeviceInfo;
use crate::normalizer::NormalizedError;
use serde::Serialize;
use serde_json::Value;

/// Payload of an envelope: a normalized error, or whatever the caller recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Error(NormalizedError),
    Custom(Value),
}

/// Outbound record for `/catch/event`. Built once, sent once.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceInfo>,
    pub release: String,
    pub location: String,
}
