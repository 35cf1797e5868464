// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Signature collection for prepared transactions.
//!
//! The pipeline hands every prepared transaction to a [`Signer`] and bounds the
//! wait with its own deadline. [`SignatureInbox`] parks requests until a
//! front-end supplies the signed bytes; [`LocalKeySigner`] signs with a key from
//! the environment.

use crate::executor::request::{RequestId, UnsignedTx};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes};
use alloy::providers::Provider;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SignatureOutcome {
    /// EIP-2718 encoded signed transaction.
    Signed(Bytes),
    Declined(String),
}

#[async_trait]
pub trait Signer: Send + Sync {
    /// May wait indefinitely; the caller enforces the deadline by dropping the future.
    async fn sign(&self, id: &RequestId, tx: &UnsignedTx) -> SignatureOutcome;
}

type Waiters = Arc<Mutex<HashMap<RequestId, (UnsignedTx, oneshot::Sender<SignatureOutcome>)>>>;

/// Parks each request until `submit_signature` or `decline` is called for it.
#[derive(Clone, Default)]
pub struct SignatureInbox {
    waiters: Waiters,
}

/// Removes the waiter when the pipeline stops waiting.
struct WaiterGuard {
    waiters: Waiters,
    id: RequestId,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        self.waiters.lock().remove(&self.id);
    }
}

impl SignatureInbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if nothing is waiting under `id`.
    pub fn submit_signature(&self, id: &RequestId, raw: Bytes) -> bool {
        self.resolve(id, SignatureOutcome::Signed(raw))
    }

    pub fn decline(&self, id: &RequestId, reason: impl Into<String>) -> bool {
        self.resolve(id, SignatureOutcome::Declined(reason.into()))
    }

    /// Requests currently waiting, with the transaction to sign.
    pub fn pending(&self) -> Vec<(RequestId, UnsignedTx)> {
        self.waiters
            .lock()
            .iter()
            .map(|(id, (tx, _))| (id.clone(), tx.clone()))
            .collect()
    }

    fn resolve(&self, id: &RequestId, outcome: SignatureOutcome) -> bool {
        let Some((_, tx)) = self.waiters.lock().remove(id) else {
            debug!("No signature pending for {}", id);
            return false;
        };
        tx.send(outcome).is_ok()
    }
}

#[async_trait]
impl Signer for SignatureInbox {
    async fn sign(&self, id: &RequestId, tx: &UnsignedTx) -> SignatureOutcome {
        let (sender, receiver) = oneshot::channel();
        self.waiters.lock().insert(id.clone(), (tx.clone(), sender));
        let _guard = WaiterGuard {
            waiters: Arc::clone(&self.waiters),
            id: id.clone(),
        };
        info!("✍️ Awaiting signature for {}", id);

        receiver
            .await
            .unwrap_or_else(|_| SignatureOutcome::Declined("signature channel closed".into()))
    }
}

/// Signs with a local private key, tracking the nonce itself.
pub struct LocalKeySigner<P> {
    provider: P,
    wallet: EthereumWallet,
    address: Address,
    chain_id: u64,
    next_nonce: tokio::sync::Mutex<Option<u64>>,
}

impl<P: Provider + Clone + 'static> LocalKeySigner<P> {
    pub fn new(provider: P, private_key: &str, chain_id: u64) -> Result<Self, String> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .map_err(|e| format!("Invalid private key: {e}"))?;
        let address = signer.address();
        Ok(Self {
            provider,
            wallet: EthereumWallet::from(signer),
            address,
            chain_id,
            next_nonce: tokio::sync::Mutex::new(None),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }
}

#[async_trait]
impl<P: Provider + Clone + 'static> Signer for LocalKeySigner<P> {
    async fn sign(&self, id: &RequestId, tx: &UnsignedTx) -> SignatureOutcome {
        if tx.from != self.address {
            return SignatureOutcome::Declined(format!(
                "wallet {} does not match signer {}",
                tx.from, self.address
            ));
        }

        let mut next_nonce = self.next_nonce.lock().await;
        let nonce = match *next_nonce {
            Some(nonce) => nonce,
            None => match self.provider.get_transaction_count(self.address).await {
                Ok(nonce) => nonce,
                Err(e) => return SignatureOutcome::Declined(format!("Failed to get nonce: {e}")),
            },
        };

        let request = tx
            .to_request()
            .with_nonce(nonce)
            .with_chain_id(tx.chain_id.unwrap_or(self.chain_id));

        match request.build(&self.wallet).await {
            Ok(envelope) => {
                *next_nonce = Some(nonce + 1);
                debug!("Signed {} with nonce {}", id, nonce);
                SignatureOutcome::Signed(Bytes::from(envelope.encoded_2718()))
            }
            Err(e) => {
                warn!("Local signing failed for {}: {}", id, e);
                SignatureOutcome::Declined(format!("signing failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use std::time::Duration;

    fn tx() -> UnsignedTx {
        UnsignedTx {
            from: Address::repeat_byte(2),
            to: Address::repeat_byte(3),
            value: U256::from(1u64),
            data: Bytes::new(),
            gas_limit: 21_000,
            gas_price: 1,
            chain_id: None,
            swap_deadline: 0,
        }
    }

    #[tokio::test]
    async fn inbox_delivers_signature() {
        let inbox = SignatureInbox::new();
        let id = RequestId::from("snipe_bob_1");
        let waiting = {
            let inbox = inbox.clone();
            let id = id.clone();
            tokio::spawn(async move { inbox.sign(&id, &tx()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(inbox.pending().len(), 1);
        assert!(inbox.submit_signature(&id, Bytes::from(vec![0xaa])));
        assert_eq!(
            waiting.await.unwrap(),
            SignatureOutcome::Signed(Bytes::from(vec![0xaa]))
        );
        assert!(inbox.pending().is_empty());
        assert!(!inbox.decline(&id, "late"));
    }

    #[tokio::test]
    async fn dropped_wait_clears_pending_entry() {
        let inbox = SignatureInbox::new();
        let id = RequestId::from("snipe_bob_2");
        let result = tokio::time::timeout(Duration::from_millis(20), inbox.sign(&id, &tx())).await;
        assert!(result.is_err());
        assert!(inbox.pending().is_empty());
        assert!(!inbox.submit_signature(&id, Bytes::new()));
    }

    #[tokio::test]
    async fn decline_is_forwarded() {
        let inbox = SignatureInbox::new();
        let id = RequestId::from("snipe_bob_3");
        let waiting = {
            let inbox = inbox.clone();
            let id = id.clone();
            tokio::spawn(async move { inbox.sign(&id, &tx()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(inbox.decline(&id, "user rejected"));
        assert_eq!(
            waiting.await.unwrap(),
            SignatureOutcome::Declined("user rejected".into())
        );
    }
}
