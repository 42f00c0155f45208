//! Delivers attendance reports to the operator's Telegram chat.

use async_trait::async_trait;
use tapster_scheduler::{Notifier, SchedulerError};
use teloxide::prelude::*;
use tracing::debug;

use crate::send;

/// [`Notifier`] backed by a teloxide `Bot`.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, operator_id: i64, text: &str) -> tapster_scheduler::Result<()> {
        send::send_text(&self.bot, ChatId(operator_id), text)
            .await
            .map_err(|e| SchedulerError::Delivery(e.to_string()))?;
        debug!(operator_id, "telegram: report delivered");
        Ok(())
    }
}
