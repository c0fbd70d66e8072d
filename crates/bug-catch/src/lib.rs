// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error and web-vitals telemetry agent.
//!
//! The agent listens for uncaught errors and unhandled rejections on an
//! injected [`EventSource`], collects a required set of vitals once per
//! release (at most every 14 days), and POSTs JSON to `<base_url>/catch/event`
//! and `<base_url>/catch/vitals`.
//!
//! ```rust,ignore
//! use bug_catch::{Agent, Config, EventTarget, Options};
//! use std::sync::Arc;
//!
//! let window = Arc::new(EventTarget::new());
//! let agent = Agent::builder(Config::new(Options::new("https://collector.test", "1.4.0"))?)
//!     .event_source(window.clone())
//!     .init();
//!
//! agent.record_event("signup", serde_json::json!({"plan": "pro"}), None);
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod agent;
pub mod clock;
pub mod config;
pub mod device;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod idle;
pub mod normalizer;
pub mod source;
pub mod store;
pub mod transport;
pub mod vitals;

pub use accumulator::{VitalsPayload, VitalsSample};
pub use agent::{Agent, AgentBuilder};
pub use config::{Config, Options};
pub use error::Error;
pub use source::{capture_panics, ErrorObject, EventKind, EventSource, EventTarget, UncaughtEvent};
pub use vitals::{ManualVitalsSource, VitalsSource, VitalsTracker};

use std::sync::Arc;

/// Validates `options` and starts an agent that reports panics of this process
/// as uncaught errors, with in-memory storage and the HTTP transport.
///
/// Vitals, device info and other event sources need host capabilities; wire
/// those through [`Agent::builder`].
pub fn init(options: Options) -> Result<Agent, Error> {
    let config = Config::new(options)?;
    let target = Arc::new(EventTarget::new());
    let agent = Agent::builder(config).event_source(target.clone()).init();
    capture_panics(target);
    Ok(agent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_rejects_invalid_options() {
        assert!(matches!(
            init(Options::new("", "1.4.0")),
            Err(Error::InvalidConfig(_))
        ));
    }
}
