// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Send-once-per-release policy for vitals.
//!
//! A flush is suppressed while the persisted record names the current release
//! and was written less than [`RESEND_WINDOW_DAYS`] ago. A different release,
//! an old record, or no readable record at all permits a flush.

use crate::clock::Clock;
use crate::error::Error;
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

pub const VITALS_STORAGE_KEY: &str = "bug-catch/vitals";
pub const RESEND_WINDOW_DAYS: f64 = 14.0;

const MS_PER_DAY: f64 = 24.0 * 3_600_000.0;

/// Persisted record of the last vitals flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalsSendState {
    pub release: String,
    /// Epoch milliseconds
    pub last_sent: i64,
}

impl VitalsSendState {
    /// Parses a stored value. Anything that is not a complete record is `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Decides whether vitals may be collected for `current_release` at `now_ms`.
pub fn should_collect(
    current_release: &str,
    persisted: Option<&VitalsSendState>,
    now_ms: i64,
) -> bool {
    match persisted {
        Some(state) if state.release == current_release => {
            // An elapsed time outside i64 is unusable, same as no record.
            match now_ms.checked_sub(state.last_sent) {
                Some(elapsed) => elapsed as f64 / MS_PER_DAY >= RESEND_WINDOW_DAYS,
                None => true,
            }
        }
        _ => true,
    }
}

/// Gate bound to a store, a clock and the agent's release.
#[derive(Clone)]
pub struct VitalsGate {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    release: String,
}

impl VitalsGate {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, release: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            release: release.into(),
        }
    }

    /// Reads the persisted record. Storage failures read as "no record".
    pub fn load(&self) -> Option<VitalsSendState> {
        match self.store.get(VITALS_STORAGE_KEY) {
            Ok(Some(raw)) => {
                let state = VitalsSendState::parse(&raw);
                if state.is_none() {
                    debug!("Bug Catch | Ignoring unparseable vitals state: {raw}");
                }
                state
            }
            Ok(None) => None,
            Err(e) => {
                error!("Bug Catch | Failed to read vitals state: {e}");
                None
            }
        }
    }

    pub fn should_collect(&self) -> bool {
        should_collect(&self.release, self.load().as_ref(), self.clock.now_ms())
    }

    /// Persists `{release, lastSent: now}` and returns what was written.
    pub fn record_sent(&self) -> Result<VitalsSendState, Error> {
        let state = VitalsSendState {
            release: self.release.clone(),
            last_sent: self.clock.now_ms(),
        };
        self.store
            .set(VITALS_STORAGE_KEY, &serde_json::to_string(&state)?)?;
        Ok(state)
    }
}

impl std::fmt::Debug for VitalsGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VitalsGate")
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}
