// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Idle-time callbacks.
//!
//! A callback yields back to the scheduler, then waits a single 1 ms tick
//! before running, so whatever triggered it is never delayed by it. Callers
//! get up to 50 ms of budget, reported through [`IdleDeadline`].

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

const IDLE_TICK: Duration = Duration::from_millis(1);
const IDLE_BUDGET: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct IdleDeadline {
    pub did_timeout: bool,
    requested_at: Instant,
}

impl IdleDeadline {
    /// Budget left, measured from when the callback was requested.
    pub fn time_remaining(&self) -> Duration {
        IDLE_BUDGET.saturating_sub(self.requested_at.elapsed())
    }
}

/// Handle to a pending idle callback.
#[derive(Debug)]
pub struct IdleHandle(JoinHandle<()>);

impl IdleHandle {
    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }

    /// Waits for the callback to run. Returns `false` if it was cancelled.
    pub async fn join(self) -> bool {
        self.0.await.is_ok()
    }
}

/// Schedules `callback` to run once the current task has yielded.
///
/// Must be called from within a tokio runtime.
pub fn request_idle_callback<F>(callback: F) -> IdleHandle
where
    F: FnOnce(IdleDeadline) + Send + 'static,
{
    let requested_at = Instant::now();
    IdleHandle(tokio::spawn(async move {
        tokio::task::yield_now().await;
        sleep(IDLE_TICK).await;
        callback(IdleDeadline {
            did_timeout: false,
            requested_at,
        });
    }))
}

pub fn cancel_idle_callback(handle: &IdleHandle) {
    handle.0.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_callback_runs_after_yield() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = request_idle_callback(move |deadline| {
            assert!(!deadline.did_timeout);
            assert!(deadline.time_remaining() <= IDLE_BUDGET);
            flag.store(true, Ordering::SeqCst);
        });

        // Nothing runs synchronously on a current-thread runtime.
        assert!(!ran.load(Ordering::SeqCst));
        assert!(handle.join().await);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancelled_callback_never_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let handle = request_idle_callback(move |_| flag.store(true, Ordering::SeqCst));

        cancel_idle_callback(&handle);

        assert!(!handle.join().await);
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_remaining_shrinks() {
        let handle = request_idle_callback(|deadline| {
            assert!(deadline.time_remaining() <= IDLE_BUDGET - IDLE_TICK);
        });
        assert!(handle.join().await);
    }
}
