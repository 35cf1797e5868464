// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! `PairCreated` log subscription over WebSocket `eth_subscribe`.

use crate::error::FeedError;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use async_trait::async_trait;
use futures_util::stream::{self, Stream};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Canonical signature of the V2 factory event.
pub const PAIR_CREATED_SIGNATURE: &str = "PairCreated(address,address,address,uint256)";

pub fn pair_created_topic() -> B256 {
    keccak256(PAIR_CREATED_SIGNATURE.as_bytes())
}

/// A log as delivered by the node, before decoding.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPairLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(rename = "blockNumber", default, deserialize_with = "hex_u64_opt")]
    pub block_number: Option<u64>,
    #[serde(rename = "transactionHash", default)]
    pub transaction_hash: Option<B256>,
}

/// Decoded `PairCreated(token0, token1, pair, allPairsLength)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PairCreatedLog {
    pub factory: Address,
    pub token0: Address,
    pub token1: Address,
    pub pair: Address,
    pub index: u64,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
}

/// Decode a raw factory log. Any structural mismatch is a [`FeedError::Decode`].
pub fn decode_pair_created(log: &RawPairLog) -> Result<PairCreatedLog, FeedError> {
    if log.topics.len() < 3 {
        return Err(FeedError::Decode(format!(
            "expected 3 topics, got {}",
            log.topics.len()
        )));
    }
    if log.topics[0] != pair_created_topic() {
        return Err(FeedError::Decode(format!("unexpected topic0 {}", log.topics[0])));
    }
    if log.data.len() < 64 {
        return Err(FeedError::Decode(format!(
            "expected 64 data bytes, got {}",
            log.data.len()
        )));
    }

    let index = U256::from_be_slice(&log.data[32..64]);
    Ok(PairCreatedLog {
        factory: log.address,
        token0: topic_address(&log.topics[1]),
        token1: topic_address(&log.topics[2]),
        pair: Address::from_slice(&log.data[12..32]),
        index: index.saturating_to(),
        block_number: log.block_number,
        transaction_hash: log.transaction_hash,
    })
}

/// Last 20 bytes of a 32-byte topic.
fn topic_address(topic: &B256) -> Address {
    Address::from_slice(&topic.as_slice()[12..32])
}

fn hex_u64_opt<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) => u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

pub type PairLogStream = Pin<Box<dyn Stream<Item = Result<RawPairLog, FeedError>> + Send>>;

/// Source of factory `PairCreated` logs.
///
/// A returned stream yields `Decode` errors for single bad messages and ends
/// after yielding a `Transport` error.
#[async_trait]
pub trait PairEventSource: Send + Sync {
    async fn subscribe(&self, factory: Address) -> Result<PairLogStream, FeedError>;
}

#[derive(Debug, Serialize)]
struct SubscribeRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcMessage {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    params: Option<SubscriptionParams>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionParams {
    result: serde_json::Value,
}

#[derive(Debug, PartialEq)]
enum Frame {
    Log(RawPairLog),
    Confirmed(String),
    Ignored,
}

fn parse_frame(text: &str) -> Result<Frame, FeedError> {
    let msg: JsonRpcMessage =
        serde_json::from_str(text).map_err(|e| FeedError::Decode(format!("bad frame: {e}")))?;

    if let Some(err) = msg.error {
        return Err(FeedError::Transport(format!(
            "rpc error {}: {}",
            err.code, err.message
        )));
    }
    if let Some(params) = msg.params {
        let log: RawPairLog = serde_json::from_value(params.result)
            .map_err(|e| FeedError::Decode(format!("bad log: {e}")))?;
        return Ok(Frame::Log(log));
    }
    match msg.result {
        Some(serde_json::Value::String(id)) => Ok(Frame::Confirmed(id)),
        _ => Ok(Frame::Ignored),
    }
}

/// `eth_subscribe("logs")` over a WebSocket connection.
pub struct WsPairFeed {
    ws_url: String,
}

impl WsPairFeed {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }
}

#[async_trait]
impl PairEventSource for WsPairFeed {
    async fn subscribe(&self, factory: Address) -> Result<PairLogStream, FeedError> {
        info!("Connecting to WebSocket: {}", self.ws_url);
        let (ws_stream, _) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| FeedError::Transport(format!("Failed to connect: {e}")))?;

        let (mut write, read) = ws_stream.split();

        let subscribe = SubscribeRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_subscribe",
            params: vec![
                serde_json::json!("logs"),
                serde_json::json!({
                    "address": factory,
                    "topics": [pair_created_topic()],
                }),
            ],
        };
        let subscribe_msg = serde_json::to_string(&subscribe)
            .map_err(|e| FeedError::Transport(format!("Failed to serialize: {e}")))?;
        write
            .send(Message::Text(subscribe_msg))
            .await
            .map_err(|e| FeedError::Transport(format!("Failed to send subscribe: {e}")))?;

        info!("Subscribed to PairCreated logs on factory {}", factory);

        let stream = stream::unfold(Some((write, read)), |state| async move {
            let (mut write, mut read) = state?;
            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => match parse_frame(&text) {
                        Ok(Frame::Log(log)) => return Some((Ok(log), Some((write, read)))),
                        Ok(Frame::Confirmed(id)) => {
                            info!("Subscription confirmed: {}", id);
                        }
                        Ok(Frame::Ignored) => debug!("Ignoring frame: {}", text),
                        Err(e @ FeedError::Decode(_)) => {
                            return Some((Err(e), Some((write, read))))
                        }
                        Err(e) => return Some((Err(e), None)),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = send_control(&mut write, Message::Pong(data)).await {
                            warn!("{}", e);
                            return Some((Err(e), None));
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return Some((
                            Err(FeedError::Transport("closed by server".to_string())),
                            None,
                        ))
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let err = FeedError::Transport(format!("receive error: {e}"));
                        return Some((Err(err), None));
                    }
                    None => {
                        return Some((Err(FeedError::Transport("stream ended".to_string())), None))
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

/// Write a control frame. A failed write means the connection is gone.
async fn send_control<S>(write: &mut S, frame: Message) -> Result<(), FeedError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    write
        .send(frame)
        .await
        .map_err(|e| FeedError::Transport(format!("Failed to answer ping: {e}")))
}

#[cfg(test)]
pub(crate) mod testing {
    //! Channel-backed event source for monitor tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Each `subscribe` hands out the next pre-registered receiver. Once they
    /// run out, subscriptions fail with a transport error.
    pub struct ChannelSource {
        pending: Mutex<Vec<mpsc::UnboundedReceiver<Result<RawPairLog, FeedError>>>>,
        pub subscriptions: AtomicUsize,
    }

    impl ChannelSource {
        pub fn new() -> Self {
            Self {
                pending: Mutex::new(Vec::new()),
                subscriptions: AtomicUsize::new(0),
            }
        }

        /// Queue another subscription; returns its sender.
        pub fn add_subscription(&self) -> mpsc::UnboundedSender<Result<RawPairLog, FeedError>> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.pending.lock().insert(0, rx);
            tx
        }
    }

    #[async_trait]
    impl PairEventSource for ChannelSource {
        async fn subscribe(&self, _factory: Address) -> Result<PairLogStream, FeedError> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            let rx = self
                .pending
                .lock()
                .pop()
                .ok_or_else(|| FeedError::Transport("no more subscriptions".into()))?;
            let stream = stream::unfold(rx, |mut rx| async move {
                let item = rx.recv().await?;
                Some((item, rx))
            });
            Ok(Box::pin(stream))
        }
    }

    /// Build a well-formed `PairCreated` log.
    pub fn pair_log(
        factory: Address,
        token0: Address,
        token1: Address,
        pair: Address,
        index: u64,
    ) -> RawPairLog {
        let mut data = vec![0u8; 64];
        data[12..32].copy_from_slice(pair.as_slice());
        data[32..64].copy_from_slice(&U256::from(index).to_be_bytes::<32>());
        RawPairLog {
            address: factory,
            topics: vec![
                pair_created_topic(),
                token0.into_word(),
                token1.into_word(),
            ],
            data: Bytes::from(data),
            block_number: Some(100 + index),
            transaction_hash: Some(B256::repeat_byte(index as u8)),
        }
    }
}
