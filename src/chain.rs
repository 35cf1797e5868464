// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Chain RPC boundary: gas price, raw transaction broadcast, receipts.

use crate::error::ChainError;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Interval between receipt polls.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// ERC-20 `Transfer` emitted by a mined transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenTransfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
}

/// The parts of a receipt the pipeline records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptSummary {
    pub success: bool,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub block_number: Option<u64>,
    pub transfers: Vec<TokenTransfer>,
}

impl ReceiptSummary {
    /// Total of `token` transferred to `recipient`.
    pub fn received(&self, token: Address, recipient: Address) -> Option<U256> {
        let mut matched = self
            .transfers
            .iter()
            .filter(|t| t.token == token && t.to == recipient)
            .peekable();
        matched.peek()?;
        Some(matched.fold(U256::ZERO, |acc, t| acc.saturating_add(t.amount)))
    }
}

/// Decode an ERC-20 `Transfer(address,address,uint256)` log.
pub fn decode_transfer(address: Address, topics: &[B256], data: &[u8]) -> Option<TokenTransfer> {
    if topics.len() != 3 || topics[0] != keccak256("Transfer(address,address,uint256)") {
        return None;
    }
    if data.len() < 32 {
        return None;
    }
    Some(TokenTransfer {
        token: address,
        from: Address::from_slice(&topics[1].as_slice()[12..]),
        to: Address::from_slice(&topics[2].as_slice()[12..]),
        amount: U256::from_be_slice(&data[..32]),
    })
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current network gas price in wei.
    async fn gas_price(&self) -> Result<u128, ChainError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainError>;

    /// Poll for a receipt until `timeout`. `Ok(None)` means none arrived in time.
    async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ChainError>;
}

/// HTTP JSON-RPC implementation.
#[derive(Clone)]
pub struct RpcChain<P> {
    provider: P,
}

impl<P: Provider + Clone + 'static> RpcChain<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider + Clone + 'static> ChainClient for RpcChain<P> {
    async fn gas_price(&self) -> Result<u128, ChainError> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ChainError::Rpc(format!("eth_gasPrice failed: {e}")))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ChainError> {
        let pending = self
            .provider
            .send_raw_transaction(&raw)
            .await
            .map_err(|e| ChainError::Rejected(e.to_string()))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(
        &self,
        hash: B256,
        timeout: Duration,
    ) -> Result<Option<ReceiptSummary>, ChainError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| ChainError::Rpc(format!("eth_getTransactionReceipt failed: {e}")))?;

            if let Some(receipt) = receipt {
                let transfers = receipt
                    .inner
                    .logs()
                    .iter()
                    .filter_map(|log| {
                        decode_transfer(log.address(), log.topics(), &log.data().data)
                    })
                    .collect();
                return Ok(Some(ReceiptSummary {
                    success: receipt.status(),
                    gas_used: receipt.gas_used,
                    effective_gas_price: receipt.effective_gas_price,
                    block_number: receipt.block_number,
                    transfers,
                }));
            }

            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                debug!("No receipt for {:?} within {:?}", hash, timeout);
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

/// Read-only HTTP provider for `rpc_url`.
pub fn connect_http(rpc_url: &str) -> Result<impl Provider + Clone + 'static, ChainError> {
    let url: Url = rpc_url
        .parse()
        .map_err(|e| ChainError::Rpc(format!("Invalid RPC URL: {e}")))?;
    Ok(ProviderBuilder::new().connect_http(url))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_erc20_transfer() {
        let token = Address::repeat_byte(0x11);
        let from = Address::repeat_byte(0x22);
        let to = Address::repeat_byte(0x33);
        let topics = [
            keccak256("Transfer(address,address,uint256)"),
            from.into_word(),
            to.into_word(),
        ];
        let data = U256::from(5_000u64).to_be_bytes::<32>();

        let transfer = decode_transfer(token, &topics, &data).unwrap();
        assert_eq!(transfer.from, from);
        assert_eq!(transfer.to, to);
        assert_eq!(transfer.amount, U256::from(5_000u64));

        assert!(decode_transfer(token, &topics[..2], &data).is_none());
        assert!(decode_transfer(token, &topics, &data[..8]).is_none());
    }

    #[test]
    fn received_sums_matching_transfers() {
        let token = Address::repeat_byte(1);
        let wallet = Address::repeat_byte(2);
        let transfer = |token, to, amount: u64| TokenTransfer {
            token,
            from: Address::ZERO,
            to,
            amount: U256::from(amount),
        };
        let receipt = ReceiptSummary {
            success: true,
            gas_used: 1,
            effective_gas_price: 1,
            block_number: None,
            transfers: vec![
                transfer(token, wallet, 10),
                transfer(token, Address::repeat_byte(9), 99),
                transfer(Address::repeat_byte(7), wallet, 50),
                transfer(token, wallet, 5),
            ],
        };
        assert_eq!(receipt.received(token, wallet), Some(U256::from(15u64)));
        assert_eq!(receipt.received(Address::repeat_byte(8), wallet), None);
    }
}
