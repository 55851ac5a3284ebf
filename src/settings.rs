use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use plaid_client::{ClientConfig, Credentials};
use serde::Deserialize;

use crate::link::LinkOptions;
use crate::sync::SyncOptions;
use crate::CLIENT_NAME;

const CONFIG_NAME: &str = "config.toml";
const ENV_PREFIX: &str = "CASH_SNAPSHOT";

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub db_file: String,
    pub plaid: Plaid,
    pub sync: SyncSettings,
    pub link: LinkSettings,
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize)]
pub struct Plaid {
    pub client_id: String,
    pub secret: String,
    pub env: plaid_client::Environment,
    pub base_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct SyncSettings {
    pub max_concurrent_items: usize,
    pub max_concurrent_upserts: usize,
    pub page_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct LinkSettings {
    pub client_name: String,
    pub products: Vec<String>,
    pub country_codes: Vec<String>,
    pub language: String,
    pub webhook: Option<String>,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    pub addr: String,
}

impl Settings {
    /// Layers defaults, the config file and `CASH_SNAPSHOT__*` environment
    /// variables, later sources winning. The default config file may be
    /// missing; an explicitly named one may not.
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let defaults = SyncOptions::default();
        let link = LinkOptions::default();
        let mut s = Config::builder()
            .set_default("db_file", default_data_path())?
            .set_default("plaid.env", "sandbox")?
            .set_default("plaid.connect_timeout_ms", 5_000)?
            .set_default("plaid.timeout_ms", 15_000)?
            .set_default("sync.max_concurrent_items", defaults.max_concurrent_items as u64)?
            .set_default(
                "sync.max_concurrent_upserts",
                defaults.max_concurrent_upserts as u64,
            )?
            .set_default("sync.page_size", u64::from(defaults.page_size))?
            .set_default("link.client_name", link.client_name)?
            .set_default("link.products", link.products)?
            .set_default("link.country_codes", link.country_codes)?
            .set_default("link.language", link.language)?
            .set_default("server.addr", "127.0.0.1:8080")?;

        s = match config_path {
            Some(path) => s.add_source(File::with_name(path)),
            None => s.add_source(File::with_name(&default_config_path()).required(false)),
        };

        s.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.plaid.base_url.clone(),
            connect_timeout: Duration::from_millis(self.plaid.connect_timeout_ms),
            timeout: Duration::from_millis(self.plaid.timeout_ms),
            ..ClientConfig::new(
                Credentials {
                    client_id: self.plaid.client_id.clone(),
                    secret: self.plaid.secret.clone(),
                },
                self.plaid.env,
            )
        }
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_concurrent_items: self.sync.max_concurrent_items,
            max_concurrent_upserts: self.sync.max_concurrent_upserts,
            page_size: self.sync.page_size,
        }
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            client_name: self.link.client_name.clone(),
            products: self.link.products.clone(),
            country_codes: self.link.country_codes.clone(),
            language: self.link.language.clone(),
            webhook: self.link.webhook.clone(),
            redirect_uri: self.link.redirect_uri.clone(),
        }
    }

    /// Connection string for the store. A bare path is opened as a SQLite
    /// file, creating its directory when needed.
    pub fn database_uri(&self) -> std::io::Result<String> {
        if self.db_file.starts_with("sqlite:") {
            return Ok(self.db_file.clone());
        }

        if let Some(dir) = Path::new(&self.db_file).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }

        Ok(format!("sqlite://{}", self.db_file))
    }
}

fn default_data_path() -> String {
    dirs::data_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()))
        .join(CLIENT_NAME)
        .join(format!("{}.db", CLIENT_NAME))
        .display()
        .to_string()
}

fn default_config_path() -> String {
    dirs::config_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()))
        .join(CLIENT_NAME)
        .join(CONFIG_NAME)
        .display()
        .to_string()
}
