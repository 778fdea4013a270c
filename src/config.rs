//! Configuration for the x402-chat server.

use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use x402_chat_types::chain::{ChecksummedAddress, TokenDeployment};
use x402_chat_types::config::LiteralOrEnv;

/// CLI arguments for the x402-chat server.
#[derive(Parser, Debug)]
#[command(name = "x402-chat")]
#[command(about = "Pay-per-post comment wall behind an x402 pay-wall")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    #[serde(default = "config_defaults::default_database")]
    database: PathBuf,
    #[serde(default = "config_defaults::default_public_url")]
    public_url: Url,
    facilitator: FacilitatorConfig,
    server_wallet: LiteralOrEnv<ChecksummedAddress>,
    #[serde(default)]
    pricing: PricingConfig,
    engine: EngineConfig,
    #[serde(default = "config_defaults::default_view_cache_ttl_seconds")]
    view_cache_ttl_seconds: u64,
}

/// Where payments are verified and settled.
#[derive(Debug, Clone, Deserialize)]
pub struct FacilitatorConfig {
    pub url: LiteralOrEnv<Url>,
    /// Sent as `Authorization: Bearer <api_key>` when present.
    #[serde(default)]
    pub api_key: Option<LiteralOrEnv<String>>,
    #[serde(default = "config_defaults::default_facilitator_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl FacilitatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Prices are human-readable amounts, scaled by the asset's decimals at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "config_defaults::default_post_asset")]
    pub post_asset: TokenDeployment,
    #[serde(default = "config_defaults::default_post_unit_price")]
    pub post_unit_price: String,
    #[serde(default = "config_defaults::default_mint_unit_price")]
    pub mint_unit_price: String,
    #[serde(default = "config_defaults::default_max_timeout_seconds")]
    pub max_timeout_seconds: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            post_asset: config_defaults::default_post_asset(),
            post_unit_price: config_defaults::default_post_unit_price(),
            mint_unit_price: config_defaults::default_mint_unit_price(),
            max_timeout_seconds: config_defaults::default_max_timeout_seconds(),
        }
    }
}

/// Transaction engine that sends tokens from the server wallet.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub url: LiteralOrEnv<Url>,
    pub secret_key: LiteralOrEnv<String>,
    #[serde(default = "config_defaults::default_engine_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use url::Url;
    use x402_chat_types::chain::TokenDeployment;
    use x402_chat_types::networks::CHAT;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    pub const DEFAULT_DATABASE: &str = "x402-chat.sqlite";
    pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080/";

    /// Returns the default port value with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Returns the default host value with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HOST)
    }

    /// $DATABASE_PATH env var -> "x402-chat.sqlite"
    pub fn default_database() -> PathBuf {
        env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATABASE))
    }

    /// $PUBLIC_URL env var -> "http://localhost:8080/"
    pub fn default_public_url() -> Url {
        env::var("PUBLIC_URL")
            .ok()
            .and_then(|s| Url::parse(&s).ok())
            .unwrap_or_else(|| Url::parse(DEFAULT_PUBLIC_URL).expect("default public URL is valid"))
    }

    pub fn default_facilitator_timeout_seconds() -> u64 {
        30
    }

    pub fn default_engine_timeout_seconds() -> u64 {
        30
    }

    pub fn default_post_asset() -> TokenDeployment {
        CHAT::arbitrum()
    }

    pub fn default_post_unit_price() -> String {
        "1".to_string()
    }

    pub fn default_mint_unit_price() -> String {
        "0.001".to_string()
    }

    pub fn default_max_timeout_seconds() -> u64 {
        300
    }

    pub fn default_view_cache_ttl_seconds() -> u64 {
        60
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Path of the SQLite ledger database.
    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Externally visible base URL; payment requirements name resources relative to it.
    pub fn public_url(&self) -> &Url {
        &self.public_url
    }

    pub fn facilitator(&self) -> &FacilitatorConfig {
        &self.facilitator
    }

    /// Receives mint payments and funds minted CHAT.
    pub fn server_wallet(&self) -> ChecksummedAddress {
        *self.server_wallet.inner()
    }

    pub fn pricing(&self) -> &PricingConfig {
        &self.pricing
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn view_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.view_cache_ttl_seconds)
    }

    /// Load configuration from CLI arguments and JSON file.
    ///
    /// The config file path is determined by:
    /// 1. `--config <path>` CLI argument
    /// 2. `$CONFIG`
    /// 3. `./config.json`
    ///
    /// Values not present in the config file will be resolved via
    /// environment variables or defaults during deserialization.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = Path::new(&cli_args.config)
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    /// Load configuration from a specific path.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.public_url = with_trailing_slash(config.public_url);
        Ok(config)
    }
}

/// Resource URLs are joined onto the public URL, so its path must read as a directory.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use x402_chat_paygate::FacilitatorClient;
    use x402_chat_types::networks::CHAT;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(
            r#"{
                "facilitator": {"url": "https://facilitator.example.com/"},
                "server_wallet": "0x1111111111111111111111111111111111111111",
                "engine": {"url": "https://engine.example.com", "secret_key": "s3cret"}
            }"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.pricing().post_asset, CHAT::arbitrum());
        assert_eq!(config.pricing().post_unit_price, "1");
        assert_eq!(config.pricing().mint_unit_price, "0.001");
        assert_eq!(config.pricing().max_timeout_seconds, 300);
        assert_eq!(config.facilitator().timeout(), Duration::from_secs(30));
        assert!(config.facilitator().api_key.is_none());
        assert_eq!(config.view_cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.engine().secret_key.inner(), "s3cret");
        assert_eq!(config.engine().timeout(), Duration::from_secs(30));
        assert_eq!(
            config.server_wallet().to_string(),
            "0x1111111111111111111111111111111111111111"
        );
    }

    #[test]
    fn test_secrets_resolved_from_env() {
        unsafe {
            std::env::set_var("X402_CHAT_TEST_ENGINE_KEY", "from-env");
            std::env::set_var("X402_CHAT_TEST_FACILITATOR_KEY", "api-key");
        }
        let file = write_config(
            r#"{
                "port": 3000,
                "host": "127.0.0.1",
                "database": "/tmp/chat.sqlite",
                "public_url": "https://x402.chat/",
                "facilitator": {
                    "url": "https://facilitator.example.com/",
                    "api_key": "$X402_CHAT_TEST_FACILITATOR_KEY",
                    "timeout_seconds": 5
                },
                "server_wallet": "0x2222222222222222222222222222222222222222",
                "pricing": {"post_unit_price": "0.5"},
                "engine": {"url": "https://engine.example.com", "secret_key": "${X402_CHAT_TEST_ENGINE_KEY}"},
                "view_cache_ttl_seconds": 5
            }"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.port(), 3000);
        assert_eq!(config.host().to_string(), "127.0.0.1");
        assert_eq!(config.database(), Path::new("/tmp/chat.sqlite"));
        assert_eq!(config.public_url().as_str(), "https://x402.chat/");
        assert_eq!(
            config.facilitator().api_key.as_ref().map(|k| k.inner().as_str()),
            Some("api-key")
        );
        assert_eq!(config.engine().secret_key.inner(), "from-env");
        assert_eq!(config.pricing().post_unit_price, "0.5");
        assert_eq!(config.pricing().mint_unit_price, "0.001");
    }

    #[test]
    fn test_base_urls_with_paths() {
        let file = write_config(
            r#"{
                "public_url": "https://x402.chat/app",
                "facilitator": {"url": "https://facilitator.example/x402"},
                "server_wallet": "0x1111111111111111111111111111111111111111",
                "engine": {"url": "https://engine.example.com", "secret_key": "s3cret", "timeout_seconds": 7}
            }"#,
        );
        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.public_url().as_str(), "https://x402.chat/app/");
        assert_eq!(
            config.public_url().join("api/comment").unwrap().as_str(),
            "https://x402.chat/app/api/comment"
        );
        let facilitator =
            FacilitatorClient::try_new(config.facilitator().url.inner().clone()).unwrap();
        assert_eq!(
            facilitator.verify_url().as_str(),
            "https://facilitator.example/x402/verify"
        );
        assert_eq!(config.engine().timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_missing_file_and_bad_json() {
        let err = Config::load_from_path("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(_, _)));
        let file = write_config("{ not json");
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::JsonParse(_)));
    }
}
