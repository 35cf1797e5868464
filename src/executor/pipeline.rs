// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Gated execution pipeline for snipe requests.
//!
//! Requests are queued FIFO and drained by a fixed pool of workers. Each request
//! passes admission checks (liquidity, honeypot probe, gas ceiling), is built
//! into a router call, waits for a signature until its deadline, and is then
//! broadcast and followed to a receipt. Every request ends in exactly one
//! terminal state, visible through [`ExecutionPipeline::status`].

use crate::arbitrage::scanner::gas_cost_in_base;
use crate::cache::BoundedCache;
use crate::chain::ChainClient;
use crate::dex::{to_wei, wei_to_f64, DexRegistry, SwapParams};
use crate::error::{ChainError, ConfigError, ErrorClass, SubmitError};
use crate::executor::gas::{effective_gas_price, GasSettings};
use crate::executor::request::{
    min_out, CancelOutcome, RequestId, RequestState, RequestStatus, SnipeRequest, SnipeResult,
    UnsignedTx,
};
use crate::signer::{SignatureOutcome, Signer};
use crate::storage::{NewTrade, TradeStatus, TradeStore, TradeType};
use crate::task::{LoopHandle, Shutdown};
use alloy::primitives::{Address, B256, U256};
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Number of requests processed concurrently.
pub const DEFAULT_WORKERS: usize = 5;

/// Requests that may wait for a worker before `submit` reports `Overloaded`.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Pool liquidity required, as a multiple of the request amount.
pub const MIN_LIQUIDITY_RATIO: f64 = 0.5;

/// How long a prepared transaction waits for its signature.
pub const DEFAULT_SIGNATURE_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub base_token: Address,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Request records kept for `status()`. Raised to at least
    /// `queue_capacity + workers`, so a full cache always holds a settled
    /// record to evict and live records are never evicted.
    pub results_capacity: usize,
    pub signature_timeout: Duration,
    pub receipt_timeout: Duration,
    /// Router deadline, counted from preparation.
    pub swap_deadline: Duration,
    /// Used when gas estimation fails.
    pub default_gas_limit: u64,
    pub stop_grace: Duration,
    pub chain_id: Option<u64>,
}

impl PipelineConfig {
    pub fn new(base_token: Address) -> Self {
        Self {
            base_token,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            results_capacity: 100,
            signature_timeout: DEFAULT_SIGNATURE_TIMEOUT,
            receipt_timeout: Duration::from_secs(120),
            swap_deadline: Duration::from_secs(300),
            default_gas_limit: 300_000,
            stop_grace: Duration::from_secs(5),
            chain_id: None,
        }
    }
}

#[derive(Clone)]
struct RequestRecord {
    status: RequestStatus,
    cancel: Arc<Notify>,
    started: Option<Instant>,
}

impl RequestRecord {
    /// Terminal, or abandoned by a stopped worker.
    fn is_settled(&self) -> bool {
        self.status.state.is_terminal() || self.status.interrupted
    }

    fn elapsed_ms(&self) -> u64 {
        self.started
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStats {
    pub total: usize,
    pub active: usize,
    pub confirmed: usize,
    pub failed: usize,
    pub rejected: usize,
    pub expired: usize,
    pub cancelled: usize,
    /// Left mid-flight by `stop()`.
    pub interrupted: usize,
    /// Confirmed share of finished requests, in percent.
    pub success_rate: f64,
    /// Mean worker time of finished requests.
    pub average_execution_ms: f64,
    pub queue_depth: usize,
    pub workers: usize,
}

/// Terminal outcome produced by a worker.
struct Finished {
    state: RequestState,
    result: SnipeResult,
}

impl Finished {
    fn new(state: RequestState, result: SnipeResult) -> Self {
        Self { state, result }
    }
}

struct Inner {
    config: PipelineConfig,
    registry: DexRegistry,
    chain: Arc<dyn ChainClient>,
    signer: Arc<dyn Signer>,
    store: Arc<dyn TradeStore>,
    gas: Arc<GasSettings>,
    records: BoundedCache<RequestRecord>,
    queue: mpsc::Sender<RequestId>,
    pending: tokio::sync::Mutex<mpsc::Receiver<RequestId>>,
    /// Serialises the duplicate check with the insert.
    admission: Mutex<()>,
}

pub struct ExecutionPipeline {
    inner: Arc<Inner>,
    task: LoopHandle,
}

impl ExecutionPipeline {
    pub fn new(
        config: PipelineConfig,
        registry: DexRegistry,
        chain: Arc<dyn ChainClient>,
        signer: Arc<dyn Signer>,
        store: Arc<dyn TradeStore>,
        gas: Arc<GasSettings>,
    ) -> Self {
        let queue_capacity = config.queue_capacity.max(1);
        let (queue, pending) = mpsc::channel(queue_capacity);
        let records_capacity = config
            .results_capacity
            .max(queue_capacity + config.workers.max(1));
        Self {
            inner: Arc::new(Inner {
                records: BoundedCache::new(records_capacity),
                config,
                registry,
                chain,
                signer,
                store,
                gas,
                queue,
                pending: tokio::sync::Mutex::new(pending),
                admission: Mutex::new(()),
            }),
            task: LoopHandle::new("execution pipeline"),
        }
    }

    /// Spawn the worker pool. Requests submitted while stopped stay queued.
    pub fn start(&self) -> bool {
        let inner = Arc::clone(&self.inner);
        self.task.start(move |shutdown| supervise(inner, shutdown))
    }

    /// In-flight requests keep whatever state they had reached and are flagged
    /// `interrupted`; queued requests resume on the next `start()`.
    pub async fn stop(&self) -> bool {
        let stopped = self.task.stop(self.inner.config.stop_grace).await;
        if stopped {
            self.inner.mark_interrupted();
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Queue a request. `Overloaded` means the queue is at capacity.
    pub fn submit(&self, request: SnipeRequest) -> Result<RequestId, SubmitError> {
        request.validate()?;
        if let Some(name) = &request.exchange {
            if self.inner.registry.get(name).is_none() {
                return Err(SubmitError::Invalid(format!("unknown exchange {name}")));
            }
        }

        let id = request.id();
        // The receiver lives in `Inner`, so only `Full` is reachable.
        let permit = self
            .inner
            .queue
            .try_reserve()
            .map_err(|_| SubmitError::Overloaded)?;

        let _admission = self.inner.admission.lock();
        if self
            .inner
            .records
            .any(|r| r.status.id == id && !r.is_settled())
        {
            return Err(SubmitError::Duplicate(id.to_string()));
        }
        self.inner.records.retain(|r| r.status.id != id);

        let summary = format!("{:.4} into {}", request.amount_in, request.token);
        let record = RequestRecord {
            status: RequestStatus {
                id: id.clone(),
                state: RequestState::Submitted,
                exchange: request.exchange.clone(),
                request,
                unsigned_tx: None,
                signature_deadline: None,
                result: None,
                trade_id: None,
                interrupted: false,
                updated_at: Utc::now(),
            },
            cancel: Arc::new(Notify::new()),
            started: None,
        };
        let evicted = self
            .inner
            .records
            .push_evicting(record, RequestRecord::is_settled);
        if let Some(evicted) = evicted {
            if !evicted.is_settled() {
                error!("Evicted live request {} to admit {}", evicted.status.id, id);
            }
        }

        permit.send(id.clone());
        info!("📥 Queued {} ({})", id, summary);
        Ok(id)
    }

    pub fn status(&self, id: &RequestId) -> Option<RequestStatus> {
        self.inner
            .records
            .find(|r| r.status.id == *id)
            .map(|r| r.status)
    }

    /// Cancel a request that has not been signed yet.
    pub fn cancel(&self, id: &RequestId) -> CancelOutcome {
        let outcome = self.inner.records.update(
            |r| r.status.id == *id,
            |r| {
                let state = r.status.state;
                if !state.is_cancellable() {
                    return Err(state);
                }
                r.status.state = RequestState::Cancelled;
                r.status.unsigned_tx = None;
                r.status.result = Some(SnipeResult::failure(
                    ErrorClass::Cancelled,
                    "cancelled_by_user",
                    r.elapsed_ms(),
                ));
                r.status.updated_at = Utc::now();
                r.cancel.notify_one();
                Ok(())
            },
        );

        match outcome {
            None => CancelOutcome::NotFound,
            Some(Ok(())) => {
                info!("🛑 Cancelled {}", id);
                CancelOutcome::Cancelled
            }
            Some(Err(state)) => CancelOutcome::NotCancellable(state),
        }
    }

    /// Requests still queued or held by a worker, oldest first.
    pub fn active_requests(&self) -> Vec<RequestStatus> {
        self.inner
            .records
            .snapshot()
            .into_iter()
            .filter(|r| !r.is_settled())
            .map(|r| r.status)
            .collect()
    }

    pub fn stats(&self) -> PipelineStats {
        let records = self.inner.records.snapshot();
        let mut stats = PipelineStats {
            total: records.len(),
            queue_depth: self.inner.queue.max_capacity() - self.inner.queue.capacity(),
            workers: self.inner.config.workers.max(1),
            ..PipelineStats::default()
        };

        let mut timed = 0usize;
        let mut total_ms = 0u64;
        for record in &records {
            match record.status.state {
                RequestState::Confirmed => stats.confirmed += 1,
                RequestState::Failed => stats.failed += 1,
                RequestState::Rejected => stats.rejected += 1,
                RequestState::Expired => stats.expired += 1,
                RequestState::Cancelled => stats.cancelled += 1,
                _ if record.status.interrupted => stats.interrupted += 1,
                _ => stats.active += 1,
            }
            if let (Some(result), Some(_)) = (&record.status.result, record.started) {
                timed += 1;
                total_ms += result.duration_ms;
            }
        }

        let finished = stats.total - stats.active - stats.interrupted;
        if finished > 0 {
            stats.success_rate = stats.confirmed as f64 / finished as f64 * 100.0;
        }
        if timed > 0 {
            stats.average_execution_ms = total_ms as f64 / timed as f64;
        }
        stats
    }

    /// Drop terminal and interrupted records. Returns how many were removed.
    pub fn clear_results(&self) -> usize {
        let removed = self.inner.records.retain(|r| !r.is_settled());
        info!("🧹 Cleared {} finished requests", removed);
        removed
    }

    /// Applies to requests that reach preflight after the call.
    pub fn set_max_gas_price(&self, wei: u128) -> Result<(), ConfigError> {
        self.inner.gas.set_max_gas_price(wei)?;
        info!("⛽ Max gas price set to {} gwei", wei / 1_000_000_000);
        Ok(())
    }

    pub fn set_priority_fee_multiplier(&self, multiplier: f64) -> Result<(), ConfigError> {
        self.inner.gas.set_priority_fee_multiplier(multiplier)?;
        info!("⛽ Priority fee multiplier set to {:.2}", multiplier);
        Ok(())
    }
}

/// Owns the worker tasks. Dropping it (on abort) aborts them too.
async fn supervise(inner: Arc<Inner>, shutdown: Shutdown) {
    let count = inner.config.workers.max(1);
    let mut workers = JoinSet::new();
    for index in 0..count {
        workers.spawn(work(Arc::clone(&inner), index, shutdown.clone()));
    }
    info!("⚙️ {} execution workers ready", count);

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            error!("Execution worker exited abnormally: {}", e);
        }
    }
}

async fn work(inner: Arc<Inner>, index: usize, mut shutdown: Shutdown) {
    loop {
        let next = shutdown
            .race(async { inner.pending.lock().await.recv().await })
            .await;
        let Some(Some(id)) = next else {
            break;
        };
        // Claimed before the next await, so a stop cannot strand it as Submitted.
        let Some((request, cancel)) = inner.begin(&id) else {
            debug!("Skipping {}: no longer queued", id);
            continue;
        };
        debug!("Worker {} picked up {}", index, id);

        let processed = AssertUnwindSafe(inner.process(&id, request, cancel)).catch_unwind();
        match shutdown.race(processed).await {
            None => {
                info!("Worker {} stopping with {} in flight", index, id);
                break;
            }
            Some(Ok(())) => {}
            Some(Err(_)) => {
                error!("💥 Worker {} panicked while processing {}", index, id);
                inner.fail_internal(&id).await;
            }
        }
    }
    debug!("Worker {} exited", index);
}

impl Inner {
    async fn process(&self, id: &RequestId, request: SnipeRequest, cancel: Arc<Notify>) {
        let finished = tokio::select! {
            _ = cancel.notified() => None,
            finished = self.execute(id, &request) => finished,
        };

        match finished {
            Some(finished) => self.finish(id, finished).await,
            None => self.settle_cancelled(id).await,
        }
    }

    /// `Submitted → PreflightChecking`. `None` if the request was cancelled
    /// while queued.
    fn begin(&self, id: &RequestId) -> Option<(SnipeRequest, Arc<Notify>)> {
        self.records
            .update(
                |r| r.status.id == *id,
                |r| {
                    if r.status.state != RequestState::Submitted {
                        return None;
                    }
                    r.status.state = RequestState::PreflightChecking;
                    r.status.updated_at = Utc::now();
                    r.started = Some(Instant::now());
                    Some((r.status.request.clone(), Arc::clone(&r.cancel)))
                },
            )
            .flatten()
    }

    /// Flag records a stopped worker left mid-flight.
    fn mark_interrupted(&self) {
        let count = self.records.update_all(
            |r| r.started.is_some() && !r.is_settled(),
            |r| {
                warn!("⚠️ {} interrupted in {}", r.status.id, r.status.state);
                r.status.interrupted = true;
                r.status.updated_at = Utc::now();
            },
        );
        if count > 0 {
            info!("{} in-flight requests interrupted by stop", count);
        }
    }

    /// Apply a non-terminal transition. `false` means the request moved on
    /// without us (it was cancelled).
    fn advance(
        &self,
        id: &RequestId,
        next: RequestState,
        edit: impl FnOnce(&mut RequestStatus),
    ) -> bool {
        self.records
            .update(
                |r| r.status.id == *id,
                |r| {
                    if !r.status.state.can_transition_to(next) {
                        return false;
                    }
                    r.status.state = next;
                    edit(&mut r.status);
                    r.status.updated_at = Utc::now();
                    true
                },
            )
            .unwrap_or(false)
    }

    fn edit(&self, id: &RequestId, edit: impl FnOnce(&mut RequestStatus)) {
        self.records.update(|r| r.status.id == *id, |r| edit(&mut r.status));
    }

    /// Steps 1 to 5. `None` when the request was cancelled mid-way.
    async fn execute(&self, id: &RequestId, request: &SnipeRequest) -> Option<Finished> {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;
        let reject = |class: ErrorClass, reason: &str| {
            Some(Finished::new(
                RequestState::Rejected,
                SnipeResult::failure(class, reason, elapsed()),
            ))
        };
        let fail = |class: ErrorClass, reason: &str| {
            Some(Finished::new(
                RequestState::Failed,
                SnipeResult::failure(class, reason, elapsed()),
            ))
        };

        // Step 1: admission.
        let dex = match &request.exchange {
            Some(name) => self.registry.get(name),
            None => self.registry.primary(),
        };
        let Some(dex) = dex else {
            warn!("No exchange available for {}", id);
            return reject(ErrorClass::DataUnavailable, "no_exchange");
        };
        let exchange = dex.name().to_string();
        self.edit(id, |s| s.exchange = Some(exchange));
        info!("🔍 Preflight for {} on {}", id, dex.name());

        match dex.liquidity(request.token).await {
            Ok(liquidity) if liquidity >= MIN_LIQUIDITY_RATIO * request.amount_in => {
                debug!("{} liquidity {:.4} ok", request.token, liquidity);
            }
            Ok(liquidity) => {
                warn!(
                    "❌ {} liquidity {:.4} below {:.4}",
                    request.token,
                    liquidity,
                    MIN_LIQUIDITY_RATIO * request.amount_in
                );
                return reject(ErrorClass::AdmissionRejected, "insufficient_liquidity");
            }
            Err(e) => {
                warn!("Liquidity check for {} failed: {}", request.token, e);
                return reject(e.class(), "liquidity_unavailable");
            }
        }

        match dex.probe_honeypot(request.token).await {
            Ok(report) if report.is_honeypot => {
                warn!("🍯 {} rejected as honeypot: {}", request.token, report.reason);
                return reject(ErrorClass::AdmissionRejected, "honeypot_detected");
            }
            Ok(report) => debug!("{} round-trip loss {:.2}%", request.token, report.loss_pct),
            Err(e) => {
                warn!("Honeypot probe for {} failed: {}", request.token, e);
                return reject(e.class(), "honeypot_probe_failed");
            }
        }

        let gas = self.gas.snapshot();
        let network_gas_price = match self.chain.gas_price().await {
            Ok(price) => price,
            Err(e) => {
                warn!("Gas price unavailable for {}: {}", id, e);
                return reject(ErrorClass::TransientNetwork, "gas_price_unavailable");
            }
        };
        if network_gas_price > gas.max_gas_price {
            warn!(
                "⛽ Gas price {} gwei above ceiling {} gwei",
                network_gas_price / 1_000_000_000,
                gas.max_gas_price / 1_000_000_000
            );
            return reject(ErrorClass::AdmissionRejected, "gas_price_above_ceiling");
        }

        // Step 2: construction.
        let amount_in = to_wei(request.amount_in);
        let path = vec![self.config.base_token, request.token];
        let quoted_out = match dex.amounts_out(amount_in, &path).await {
            Ok(amounts) => match amounts.last() {
                Some(out) if !out.is_zero() => *out,
                _ => return fail(ErrorClass::DataUnavailable, "quote_failed"),
            },
            Err(e) => {
                warn!("Quote for {} failed: {}", id, e);
                return fail(e.class(), "quote_failed");
            }
        };

        let now = Utc::now().timestamp().max(0) as u64;
        let swap_deadline = now + self.config.swap_deadline.as_secs();
        let params = SwapParams {
            amount_in,
            min_out: min_out(quoted_out, request.max_slippage_pct),
            path: path.clone(),
            to: request.wallet,
            deadline: swap_deadline,
        };
        let call = match dex.build_swap(&params).await {
            Ok(call) => call,
            Err(e) => {
                warn!("🔨 Building swap for {} failed: {}", id, e);
                return fail(ErrorClass::BuildFailure, "build_failed");
            }
        };

        let gas_limit = match dex.estimate_gas(amount_in, &path, request.wallet).await {
            Ok(gas_limit) => gas_limit,
            Err(e) => {
                debug!("Gas estimate for {} failed ({}), using default", id, e);
                self.config.default_gas_limit
            }
        };
        let multiplier = request
            .priority_fee_multiplier
            .unwrap_or(gas.priority_fee_multiplier);
        let tx = UnsignedTx {
            from: request.wallet,
            to: call.to,
            value: call.value,
            data: call.data,
            gas_limit,
            gas_price: effective_gas_price(network_gas_price, multiplier, gas.max_gas_price),
            chain_id: self.config.chain_id,
            swap_deadline,
        };
        if !self.advance(id, RequestState::Prepared, |s| s.unsigned_tx = Some(tx.clone())) {
            return None;
        }

        // Step 3: record the pending trade.
        let trade = NewTrade {
            request_id: id.to_string(),
            token: request.token,
            token_symbol: dex.token_symbol(request.token).await,
            trade_type: TradeType::Buy,
            amount_in: request.amount_in,
            gas_estimate: gas_limit,
        };
        let trade_id = match self.store.create_trade(trade).await {
            Ok(trade_id) => Some(trade_id),
            Err(e) => {
                warn!("Failed to record trade for {}: {}", id, e);
                None
            }
        };
        self.edit(id, |s| s.trade_id = trade_id);

        let window_ms = self.config.signature_timeout.as_millis() as i64;
        let window = chrono::Duration::milliseconds(window_ms);
        let deadline = Utc::now() + window;
        if !self.advance(id, RequestState::AwaitingSignature, |s| {
            s.signature_deadline = Some(deadline)
        }) {
            return None;
        }
        info!("✍️ {} awaiting signature until {}", id, deadline.format("%H:%M:%S"));

        // Steps 4 and 5: signature or expiry.
        let signed =
            tokio::time::timeout(self.config.signature_timeout, self.signer.sign(id, &tx)).await;
        let raw = match signed {
            Ok(SignatureOutcome::Signed(raw)) => raw,
            Ok(SignatureOutcome::Declined(reason)) => {
                info!("🙅 Signature for {} declined: {}", id, reason);
                return Some(Finished::new(
                    RequestState::Cancelled,
                    SnipeResult::failure(ErrorClass::Cancelled, "signature_declined", elapsed()),
                ));
            }
            Err(_) => {
                warn!("⌛ Signature window for {} elapsed", id);
                return Some(Finished::new(
                    RequestState::Expired,
                    SnipeResult::failure(ErrorClass::Expired, "signature_expired", elapsed()),
                ));
            }
        };
        if !self.advance(id, RequestState::Signed, |_| {}) {
            return None;
        }

        let hash = match self.chain.send_raw_transaction(raw).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("📡 Broadcast of {} failed: {}", id, e);
                let class = match e {
                    ChainError::Rejected(_) => ErrorClass::OnChainFailure,
                    ChainError::Rpc(_) => ErrorClass::TransientNetwork,
                };
                return fail(class, "broadcast_rejected");
            }
        };
        self.advance(id, RequestState::Broadcast, |_| {});
        info!("🚀 {} broadcast: {:?}", id, hash);
        if let Some(trade_id) = trade_id {
            self.update_trade(trade_id, Some(hash), TradeStatus::Pending).await;
        }

        let with_hash = |class: ErrorClass, reason: &str| {
            let mut result = SnipeResult::failure(class, reason, elapsed());
            result.tx_hash = Some(hash);
            Some(Finished::new(RequestState::Failed, result))
        };
        let receipt = match self.chain.wait_for_receipt(hash, self.config.receipt_timeout).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                warn!("⏱️ No receipt for {} within {:?}", id, self.config.receipt_timeout);
                return with_hash(ErrorClass::OnChainFailure, "receipt_timeout");
            }
            Err(e) => {
                warn!("Receipt lookup for {} failed: {}", id, e);
                return with_hash(ErrorClass::TransientNetwork, "receipt_unavailable");
            }
        };

        let gas_cost = gas_cost_in_base(receipt.gas_used, receipt.effective_gas_price);
        if !receipt.success {
            warn!("❌ {} reverted in block {:?}", id, receipt.block_number);
            let mut result =
                SnipeResult::failure(ErrorClass::OnChainFailure, "transaction_reverted", elapsed());
            result.tx_hash = Some(hash);
            result.gas_used = Some(receipt.gas_used);
            result.gas_cost = Some(gas_cost);
            return Some(Finished::new(RequestState::Failed, result));
        }

        let tokens_received = receipt.received(request.token, request.wallet);
        let realized_slippage_pct =
            tokens_received.map(|got| realized_slippage_pct(quoted_out, got));
        info!(
            "✅ {} confirmed in block {:?} (gas {}, cost {:.6})",
            id, receipt.block_number, receipt.gas_used, gas_cost
        );
        Some(Finished::new(
            RequestState::Confirmed,
            SnipeResult {
                success: true,
                tx_hash: Some(hash),
                error_class: None,
                reason: None,
                gas_used: Some(receipt.gas_used),
                gas_cost: Some(gas_cost),
                tokens_received,
                realized_slippage_pct,
                duration_ms: elapsed(),
            },
        ))
    }

    async fn finish(&self, id: &RequestId, finished: Finished) {
        let Finished { state, result } = finished;
        let tx_hash = result.tx_hash;
        let reason = result.reason.clone();
        let trade_id = self
            .records
            .update(
                |r| r.status.id == *id,
                |r| {
                    if !r.status.state.can_transition_to(state) {
                        return None;
                    }
                    r.status.state = state;
                    if matches!(state, RequestState::Expired | RequestState::Cancelled) {
                        r.status.unsigned_tx = None;
                    }
                    r.status.result = Some(result);
                    r.status.updated_at = Utc::now();
                    Some(r.status.trade_id)
                },
            )
            .flatten();

        let Some(trade_id) = trade_id else {
            debug!("{} already settled, dropping {} outcome", id, state);
            return;
        };
        if state != RequestState::Confirmed {
            info!("{} ended {} ({})", id, state, reason.as_deref().unwrap_or("-"));
        }
        if let Some(trade_id) = trade_id {
            self.update_trade(trade_id, tx_hash, trade_status(state)).await;
        }
    }

    /// A cancel won the race with the worker; mirror it to storage.
    async fn settle_cancelled(&self, id: &RequestId) {
        let trade_id = self
            .records
            .find(|r| r.status.id == *id)
            .filter(|r| r.status.state == RequestState::Cancelled)
            .and_then(|r| r.status.trade_id);
        if let Some(trade_id) = trade_id {
            self.update_trade(trade_id, None, TradeStatus::Cancelled).await;
        }
    }

    async fn fail_internal(&self, id: &RequestId) {
        let trade_id = self
            .records
            .update(
                |r| r.status.id == *id,
                |r| {
                    if r.status.state.is_terminal() {
                        return None;
                    }
                    r.status.state = RequestState::Failed;
                    r.status.result = Some(SnipeResult::failure(
                        ErrorClass::Internal,
                        "internal_error",
                        r.elapsed_ms(),
                    ));
                    r.status.updated_at = Utc::now();
                    Some(r.status.trade_id)
                },
            )
            .flatten()
            .flatten();
        if let Some(trade_id) = trade_id {
            self.update_trade(trade_id, None, TradeStatus::Failed).await;
        }
    }

    async fn update_trade(&self, trade_id: u64, tx_hash: Option<B256>, status: TradeStatus) {
        if let Err(e) = self
            .store
            .update_trade_status(trade_id, tx_hash, status, None)
            .await
        {
            warn!("Failed to update trade {}: {}", trade_id, e);
        }
    }
}

fn trade_status(state: RequestState) -> TradeStatus {
    match state {
        RequestState::Confirmed => TradeStatus::Confirmed,
        RequestState::Expired => TradeStatus::Expired,
        RequestState::Cancelled => TradeStatus::Cancelled,
        _ => TradeStatus::Failed,
    }
}

/// Shortfall of `received` against `quoted`, in percent. Negative when the
/// swap returned more than quoted.
fn realized_slippage_pct(quoted: U256, received: U256) -> f64 {
    let quoted = wei_to_f64(quoted);
    if quoted <= 0.0 {
        return 0.0;
    }
    (quoted - wei_to_f64(received)) / quoted * 100.0
}
