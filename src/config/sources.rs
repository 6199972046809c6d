use super::models::Config;
use config::{ConfigError, Environment, File, FileFormat};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "LEASEWORKER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/leaseworker.toml";
const ENV_PREFIX: &str = "LEASEWORKER";
const ENV_SEPARATOR: &str = "__";
const TOKEN_ENV_VAR: &str = "WORKER_TOKEN";

/// Path of the configuration file: `LEASEWORKER_CONFIG` or the default location
pub fn default_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(config_path: PathBuf) -> Result<Config, ConfigError> {
    // A missing .env file is normal in production
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path)?;
    load_secrets(&mut config);

    Ok(config)
}

/// The worker token may come from the plain `WORKER_TOKEN` variable when it
/// was not set through the file or `LEASEWORKER__QUEUE__TOKEN`
fn load_secrets(config: &mut Config) {
    if config.queue.token.is_none() {
        if let Ok(token) = env::var(TOKEN_ENV_VAR) {
            config.queue.token = Some(token);
        }
    }
}

/// Load configuration from a specific path and environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Runs before tracing is set up; the caller logs which file was used
    if config_path.exists() {
        builder = builder.add_source(File::from(config_path).format(FileFormat::Toml));
    }

    // LEASEWORKER__QUEUE__BASE_URL -> queue.base_url
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
