// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Reads newline-delimited JSON commands from stdin and forwards them to a
//! bug-catch collector. Configuration comes from `BUG_CATCH_*` variables.
//!
//! ```text
//! {"kind":"event","name":"signup","data":{"plan":"pro"}}
//! {"kind":"vital","metricName":"fcp","data":{"value":312.5}}
//! {"kind":"error","message":"boom","filename":"app.js","line":3,"column":7,"error":{"name":"Error","message":"boom"}}
//! {"kind":"rejection","reason":{"name":"TypeError","message":"x","stack":"at a.js:1:2"}}
//! ```

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use std::{env, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use bug_catch::{
    device::UserAgentDetector, store::FileStore, transport::HttpTransport, Agent, Config,
    ErrorObject, EventTarget, ManualVitalsSource, UncaughtEvent, VitalsSample,
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const IDLE_GRACE: Duration = Duration::from_millis(10);
const DEFAULT_STATE_PATH: &str = ".bug-catch/storage.json";

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Command {
    Event {
        name: String,
        #[serde(default)]
        data: Value,
        #[serde(default, rename = "incidentData")]
        incident_data: Option<Value>,
    },
    Vital(VitalsSample),
    Error {
        message: String,
        #[serde(default)]
        filename: String,
        #[serde(default)]
        line: u32,
        #[serde(default)]
        column: u32,
        error: ErrorObject,
    },
    Rejection {
        reason: ErrorObject,
    },
}

fn handle(agent: &Agent, window: &EventTarget, vitals: &ManualVitalsSource, command: Command) {
    match command {
        Command::Event {
            name,
            data,
            incident_data,
        } => agent.record_event(&name, data, incident_data),
        Command::Vital(sample) => {
            if !vitals.report(sample) {
                debug!("Vitals collection is not active, sample dropped");
            }
        }
        Command::Error {
            message,
            filename,
            line,
            column,
            error,
        } => window.dispatch(&UncaughtEvent::error(message, filename, line, column, error)),
        Command::Rejection { reason } => window.dispatch(&UncaughtEvent::rejection(reason)),
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn main() -> anyhow::Result<()> {
    let log_level = env::var("BUG_CATCH_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    let config = Config::from_env().context("invalid bug-catch configuration")?;
    let state_path = env::var("BUG_CATCH_STATE_PATH").unwrap_or_else(|_| DEFAULT_STATE_PATH.to_string());
    let location = env::var("BUG_CATCH_LOCATION").unwrap_or_default();

    let window = Arc::new(EventTarget::new());
    let vitals = Arc::new(ManualVitalsSource::new());
    let transport = Arc::new(HttpTransport::new(config.https_proxy.as_deref()));

    info!(
        "Starting bug-catch agent for release {} reporting to {}",
        config.release, config.base_url
    );

    let mut builder = Agent::builder(config)
        .event_source(window.clone())
        .vitals_source(vitals.clone())
        .store(Arc::new(FileStore::new(state_path)))
        .transport(transport.clone())
        .location(move || location.clone());
    if let Ok(user_agent) = env::var("BUG_CATCH_USER_AGENT") {
        builder = builder.device_detector(Arc::new(UserAgentDetector::new(user_agent)));
    }
    let agent = builder.init();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_number = 0usize;
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        line_number += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Command>(line) {
            Ok(command) => handle(&agent, &window, &vitals, command),
            Err(e) => warn!("Skipping malformed line {line_number}: {e}"),
        }
        // Let the vitals service and any idle flush run between commands.
        tokio::task::yield_now().await;
    }

    sleep(IDLE_GRACE).await;
    if timeout(DRAIN_TIMEOUT, transport.wait_idle()).await.is_err() {
        error!(
            "Gave up on {} in-flight request(s) after {:?}",
            transport.in_flight(),
            DRAIN_TIMEOUT
        );
    }
    debug!("Processed {line_number} line(s), exiting");
    Ok(())
}
