//! Telegram update handlers.
//!
//! Every message is checked against the allow-list first; commands are then
//! routed to `commands`, anything else gets a short hint.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use crate::router::AppState;

mod commands;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user_id) = msg.from().map(|u| u.id.0 as i64) else {
        return Ok(());
    };

    if !state.cfg.is_allowed(user_id) {
        tracing::warn!(user_id, "rejected message from unauthorized user");
        let _ = bot
            .send_message(
                msg.chat.id,
                "Unauthorized. Contact the bot owner for access.",
            )
            .await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(msg.chat.id.0, user_id, text, state).await;
        }
    }

    let _ = bot
        .send_message(msg.chat.id, "Send /help to see what I can do.")
        .await;
    Ok(())
}
