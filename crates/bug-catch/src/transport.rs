// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fire-and-forget JSON POST.
//!
//! A send serializes the payload on the caller's stack and hands the request
//! to a background task. The response is never inspected beyond a debug log,
//! and nothing is retried.

use crate::error::Error;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

pub trait Transport: Send + Sync {
    /// Issues the request. Only failures to issue it are reported.
    fn send(&self, url: &str, payload: &Value) -> Result<(), Error>;
}

/// Builds a client, routing through `proxy_url` when given.
pub fn build_client(proxy_url: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
    let mut builder = reqwest::Client::builder();
    if let Some(proxy) = proxy_url {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }
    builder.build()
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    tracker: TaskTracker,
}

impl HttpTransport {
    pub fn new(proxy_url: Option<&str>) -> Self {
        let client = build_client(proxy_url).unwrap_or_else(|e| {
            error!(
                "Bug Catch | Unable to parse proxy configuration: {}, no proxy will be used",
                e
            );
            reqwest::Client::new()
        });
        Self::with_client(client)
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            tracker: TaskTracker::new(),
        }
    }

    /// Number of requests still in flight.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every request issued so far has completed.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Transport for HttpTransport {
    fn send(&self, url: &str, payload: &Value) -> Result<(), Error> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Transport(format!("no async runtime available: {e}")))?;
        let body = serde_json::to_vec(payload)?;
        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        let url = url.to_string();
        self.tracker.spawn_on(
            async move {
                let time = std::time::Instant::now();
                match request.send().await {
                    Ok(response) => debug!(
                        "Bug Catch | POST {url} answered {} in {} ms",
                        response.status(),
                        time.elapsed().as_millis()
                    ),
                    Err(e) => warn!("Bug Catch | POST {url} failed: {e}"),
                }
            },
            &runtime,
        );
        Ok(())
    }
}
