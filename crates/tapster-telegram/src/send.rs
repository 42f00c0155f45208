//! Message sending helpers for the Telegram adapter.
//!
//! Telegram caps a message at 4096 characters; longer texts go out in
//! line-aligned chunks. Everything is sent as plain text.

use std::time::Duration;

use teloxide::prelude::*;
use teloxide::RequestError;
use tracing::warn;

/// Maximum characters per Telegram message (limit is 4096; we use 4090).
const CHUNK_MAX: usize = 4090;

/// Split `text` on line boundaries into chunks of at most [`CHUNK_MAX`] chars.
///
/// A single line longer than the limit is force-split on a char boundary.
pub fn split_chunks(text: &str) -> Vec<String> {
    if text.chars().count() <= CHUNK_MAX {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for line in text.split('\n') {
        let line_len = line.chars().count();
        let cost = if current.is_empty() { line_len } else { line_len + 1 };
        if !current.is_empty() && current_len + cost > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > CHUNK_MAX {
            let chars: Vec<char> = line.chars().collect();
            for piece in chars.chunks(CHUNK_MAX) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Send `text` to `chat_id`, stopping at the first chunk Telegram rejects.
///
/// A 100ms delay between chunks keeps clear of rate limits.
pub async fn send_text(bot: &Bot, chat_id: ChatId, text: &str) -> Result<(), RequestError> {
    let chunks = split_chunks(text);
    for (i, chunk) in chunks.iter().enumerate() {
        bot.send_message(chat_id, chunk).await?;
        if i + 1 < chunks.len() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    Ok(())
}

/// Best-effort reply to an operator command.
pub async fn reply(bot: &Bot, chat_id: ChatId, text: &str) {
    if let Err(e) = send_text(bot, chat_id, text).await {
        warn!(error = %e, chat_id = chat_id.0, "Telegram: failed to send reply");
    }
}
