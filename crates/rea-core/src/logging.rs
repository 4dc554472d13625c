use crate::Result;

/// Initialize logging/tracing for the bot.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    // Default: info for our crates, warn for everything else.
    // Can be overridden with `RUST_LOG`.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let crate_name = service_name.replace('-', "_");
        EnvFilter::new(format!(
            "warn,rea=info,rea_core=info,rea_flatfox=info,rea_telegram=info,{crate_name}=info"
        ))
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init();

    Ok(())
}
