// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Start/stop plumbing for the background loops.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shutdown signal handed to a loop body.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once `stop()` has been called (or the handle was dropped).
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }

    /// Run `fut` unless shutdown fires first.
    pub async fn race<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.wait() => None,
            out = fut => Some(out),
        }
    }

    /// Sleep for `duration`. Returns `false` if interrupted by shutdown.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        self.race(tokio::time::sleep(duration)).await.is_some()
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Owns at most one running instance of a named background loop.
pub struct LoopHandle {
    name: &'static str,
    running: Mutex<Option<Running>>,
}

impl LoopHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|r| !r.join.is_finished())
            .unwrap_or(false)
    }

    /// Spawn the loop unless it is already running. Returns `false` for the
    /// no-op case.
    pub fn start<F, Fut>(&self, body: F) -> bool
    where
        F: FnOnce(Shutdown) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.join.is_finished()) {
            info!("{} already running", self.name);
            return false;
        }

        let (tx, rx) = watch::channel(false);
        let join = tokio::spawn(body(Shutdown { rx }));
        *running = Some(Running { shutdown: tx, join });
        info!("▶️ {} started", self.name);
        true
    }

    /// Signal the loop and wait up to `grace` for it to exit, aborting it
    /// afterwards. Returns `false` if nothing was running.
    pub async fn stop(&self, grace: Duration) -> bool {
        let Some(running) = self.running.lock().take() else {
            debug!("{} not running", self.name);
            return false;
        };

        let _ = running.shutdown.send(true);
        let mut join = running.join;
        if tokio::time::timeout(grace, &mut join).await.is_err() {
            warn!("{} did not exit within {:?}, aborting", self.name, grace);
            join.abort();
            let _ = join.await;
        }
        info!("⏹️ {} stopped", self.name);
        true
    }
}

/// Exponential backoff step, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    let next_ms = current.as_millis().saturating_mul(2) as u64;
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(next_ms.min(max_ms))
}
