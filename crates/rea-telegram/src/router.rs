use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use rea_core::{
    config::Config,
    messaging::port::MessagingPort,
    ports::{AlertStore, ListingSource, NotificationLedger},
    scheduler::PollingScheduler,
};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub alerts: Arc<dyn AlertStore>,
    pub ledger: Arc<dyn NotificationLedger>,
    pub source: Arc<dyn ListingSource>,
    pub scheduler: PollingScheduler,
    pub messenger: Arc<dyn MessagingPort>,
}

/// Serve owner commands until Ctrl-C.
pub async fn run_polling(bot: Bot, state: AppState) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => tracing::info!(username = %me.username(), "telegram bot started"),
        Err(e) => tracing::warn!("get_me failed, continuing: {e}"),
    }
    tracing::info!(
        allowed_users = state.cfg.telegram_allowed_users.len(),
        data_dir = %state.cfg.data_dir.display(),
        "accepting commands"
    );

    let state = Arc::new(state);
    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
