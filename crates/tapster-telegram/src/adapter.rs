//! Telegram channel adapter.
//!
//! Wraps a teloxide `Bot` + `Dispatcher` and drives the long-polling loop
//! until shutdown is signalled.

use std::sync::Arc;

use teloxide::prelude::*;
use tokio::sync::watch;
use tracing::{info, warn};

use tapster_core::config::TelegramConfig;

use crate::context::OperatorContext;
use crate::error::TelegramError;
use crate::handler::handle_message;
use crate::notifier::TelegramNotifier;

/// Telegram channel adapter. Long polling, so no public URL is required.
pub struct TelegramAdapter {
    bot: Bot,
}

impl TelegramAdapter {
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        if config.bot_token.trim().is_empty() {
            return Err(TelegramError::NoToken);
        }
        Ok(Self {
            bot: Bot::new(&config.bot_token),
        })
    }

    /// A notifier sharing this adapter's bot.
    pub fn notifier(&self) -> TelegramNotifier {
        TelegramNotifier::new(self.bot.clone())
    }

    /// Drive the long-polling loop until `shutdown` broadcasts `true`.
    pub async fn run<C: OperatorContext + 'static>(
        self,
        ctx: Arc<C>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Telegram: starting long-polling dispatcher");

        let handler = Update::filter_message().endpoint(handle_message::<C>);
        let mut dispatcher = Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![ctx])
            .default_handler(|_upd| async {})
            .build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => warn!(error = %e, "Telegram: dispatcher was not running"),
            }
        });

        dispatcher.dispatch().await;
        info!("Telegram: dispatcher stopped");
    }
}
