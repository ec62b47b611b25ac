//! Configuration loading.
//!
//! Sources, lowest priority first: built-in defaults, an optional
//! `config/default.{toml,yaml,json}` file, then environment variables
//! prefixed with `EDGEBROKER__` (for example
//! `EDGEBROKER__BROKER__MAX_TRIES=5`). A `.env` file in the working
//! directory is read into the environment before anything else.

mod settings;

use config::{Config, Environment, File};

use crate::utils::Result;
use settings::PartialSettings;

pub use settings::{
    BrokerSettings, ClientSettings, LoggingSettings, MAX_WIRE_MSG_SIZE, MIN_MSG_SIZE,
    ServerSettings, Settings,
};

/// Loads the configuration from the default file and environment variables,
/// merges it with default values and validates the result.
pub fn load_config() -> Result<Settings> {
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("EDGEBROKER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;
    let settings = partial.merge(Settings::default());
    settings.validate()?;

    Ok(settings)
}
