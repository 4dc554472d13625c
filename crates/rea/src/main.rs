use std::sync::Arc;

use teloxide::Bot;

use rea_core::{
    config::Config,
    engine::{AlertEngine, EngineSettings},
    messaging::{
        delivery::MessengerDelivery,
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    ports::{Clock, SystemClock},
    scheduler::PollingScheduler,
    store::{JsonAlertStore, JsonLedger},
};
use rea_flatfox::{FlatfoxClient, FlatfoxConfig};
use rea_telegram::{router::AppState, TelegramMessenger};

#[tokio::main]
async fn main() -> Result<(), rea_core::Error> {
    rea_core::logging::init("rea")?;

    let cfg = Arc::new(Config::load()?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let alerts = Arc::new(JsonAlertStore::open(cfg.alerts_path(), clock.clone()).await?);
    let ledger = Arc::new(JsonLedger::open(cfg.ledger_path(), clock.clone()).await?);
    let source = Arc::new(FlatfoxClient::new(FlatfoxConfig::from(cfg.as_ref()))?);

    // One throttled messenger for both notifications and command replies.
    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let engine = Arc::new(AlertEngine::new(
        alerts.clone(),
        ledger.clone(),
        source.clone(),
        Arc::new(MessengerDelivery::new(messenger.clone())),
        EngineSettings::from(cfg.as_ref()),
    ));
    let scheduler = PollingScheduler::new(engine, cfg.poll_interval, clock);

    let poller = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    let state = AppState {
        cfg,
        alerts,
        ledger,
        source,
        scheduler: scheduler.clone(),
        messenger,
    };
    let served = rea_telegram::router::run_polling(bot, state).await;

    tracing::info!("shutting down, waiting for the running cycle");
    scheduler.shutdown();
    if let Err(e) = poller.await {
        tracing::error!("scheduler task failed: {e}");
    }

    served.map_err(|e| rea_core::Error::External(format!("telegram bot failed: {e}")))?;
    Ok(())
}
