use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod logging;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use logging::init_tracing;
pub use settings::{
    AlertClock, AlertConfig, Config, Confirmation, DiscordConfig, LoggingConfig, MockConfig, PlaybackAlignment,
    PlaybackConfig, RsiConfig, SinkConfig, TelegramConfig, TradierConfig,
};

/// Prefix of the environment variables layered over the file, e.g.
/// `SENTINEL_SYMBOL=QQQ` or `SENTINEL_ALERTS__COOLDOWN_SECONDS=600`.
pub const ENV_PREFIX: &str = "SENTINEL";

/// Loads the application configuration.
///
/// Sources, lowest precedence first:
/// 1. built-in defaults,
/// 2. the TOML file at `path` (or an optional `config.toml` in the working directory),
/// 3. `SENTINEL_*` environment variables,
/// 4. the provider secrets the product has always read from the environment
///    (`TRADIER_API_KEY`, `DISCORD_WEBHOOK_URL`, `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`).
///
/// The result is validated before it is returned.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let file = match path {
        Some(path) => config::File::from(path).required(true),
        None => config::File::with_name("config").required(false),
    };

    let builder = config::Config::builder()
        .add_source(file)
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("timeframes")
                .try_parsing(true),
        )
        .set_override_option("tradier.api_key", std::env::var("TRADIER_API_KEY").ok())?
        .set_override_option("sinks.discord.webhook_url", std::env::var("DISCORD_WEBHOOK_URL").ok())?
        .set_override_option("sinks.telegram.token", std::env::var("TELEGRAM_BOT_TOKEN").ok())?
        .set_override_option("sinks.telegram.chat_id", std::env::var("TELEGRAM_CHAT_ID").ok())?
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    config.validate()?;

    Ok(config)
}
