// Copyright (C) 2025 Category Labs, Inc.
// SPDX-License-Identifier: GPL-3.0-or-later

//! Telegram notifier module.

use crate::listeners::{LaunchObserver, TokenLaunchEvent};
use anyhow::Context;
use async_trait::async_trait;
use teloxide::prelude::*;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Option<Bot>,
    chat_id: Option<ChatId>,
}

impl TelegramNotifier {
    pub fn new(token: Option<String>, chat_id: Option<String>) -> Self {
        info!(
            "📱 Initializing Telegram: token={}, chat_id={}",
            token.as_ref().map(|_| "SET").unwrap_or("NONE"),
            chat_id.as_ref().map(|_| "SET").unwrap_or("NONE")
        );

        let bot = token.map(Bot::new);
        let chat_id = chat_id.and_then(|id| match id.trim().parse::<i64>() {
            Ok(num) => Some(ChatId(num)),
            Err(_) => {
                warn!("Invalid TELEGRAM_CHAT_ID {:?}, notifications disabled", id);
                None
            }
        });

        Self { bot, chat_id }
    }

    pub fn is_enabled(&self) -> bool {
        self.bot.is_some() && self.chat_id.is_some()
    }

    pub async fn send_message(&self, message: &str) {
        if let Err(e) = self.try_send(message).await {
            error!("Failed to send Telegram message: {:#}", e);
        }
    }

    async fn try_send(&self, message: &str) -> anyhow::Result<()> {
        let (Some(bot), Some(chat_id)) = (&self.bot, &self.chat_id) else {
            return Ok(());
        };
        bot.send_message(*chat_id, message)
            .await
            .context("telegram send_message")?;
        info!("📤 Sent Telegram message");
        Ok(())
    }
}

pub fn format_launch(event: &TokenLaunchEvent) -> String {
    let block = event
        .block_number
        .map(|b| b.to_string())
        .unwrap_or_else(|| "pending".to_string());
    format!(
        "🆕 New token launch\nToken: {}\nPair: {}\nPaired with: {}\nBlock: {}",
        event.token, event.pair, event.paired_with, block
    )
}

#[async_trait]
impl LaunchObserver for TelegramNotifier {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn notify(&self, event: &TokenLaunchEvent) -> anyhow::Result<()> {
        self.try_send(&format_launch(event)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;
    use chrono::Utc;

    fn event() -> TokenLaunchEvent {
        TokenLaunchEvent {
            token: Address::repeat_byte(0x11),
            paired_with: Address::repeat_byte(0x22),
            token0: Address::repeat_byte(0x11),
            token1: Address::repeat_byte(0x22),
            pair: Address::repeat_byte(0x33),
            index: 7,
            block_number: Some(42),
            tx_hash: None,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn launch_message_lists_addresses() {
        let text = format_launch(&event());
        assert!(text.contains(&Address::repeat_byte(0x11).to_string()));
        assert!(text.contains(&Address::repeat_byte(0x33).to_string()));
        assert!(text.contains("Block: 42"));
    }

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        let notifier = TelegramNotifier::new(None, Some("not-a-number".into()));
        assert!(!notifier.is_enabled());
        notifier.notify(&event()).await.unwrap();
    }
}
