use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use url::Url;

pub const ENV_PREFIX: &str = "ROLESYNC";
pub const CONFIG_URL_VAR: &str = "ROLESYNC_CONFIG_URL";

const LOCAL_CONFIG_FILE: &str = ".rolesync.toml";
const HOME_CONFIG_DIR: &str = ".rolesync";
const HOME_CONFIG_FILE: &str = "config.toml";
const CACHED_CONFIG_FILE: &str = "cached.config.toml";

/// Per-account metadata: a friendlier name for profiles and extra keys
/// copied into every profile of that account.
#[derive(Debug, Default, Clone, Deserialize, PartialEq, Eq)]
pub struct Account {
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

pub trait AccountLookup {
    fn account(&self, account_id: &str) -> Option<&Account>;
}

impl AccountLookup for HashMap<String, Account> {
    fn account(&self, account_id: &str) -> Option<&Account> {
        self.get(account_id)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StsSettings {
    pub region: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IdpSettings {
    pub authentication_url: Url,
    pub target_url: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub sts: StsSettings,
    pub idp: Option<IdpSettings>,
    #[serde(default)]
    pub accounts: HashMap<String, Account>,
}

impl AccountLookup for Settings {
    fn account(&self, account_id: &str) -> Option<&Account> {
        self.accounts.get(account_id)
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        log::debug!("Loading configuration file: {}", path.display());

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Could not process configuration file {}", path.display()))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Where profiles are stored: the configured file or `~/.aws/credentials`.
    pub fn credentials_path(&self) -> anyhow::Result<PathBuf> {
        match &self.credentials_file {
            Some(path) => expand_home(path),
            None => Ok(home_dir()?.join(".aws").join("credentials")),
        }
    }
}

/// Finds the configuration file to use.
///
/// Checked in order: the explicit path, the remote URL in
/// `ROLESYNC_CONFIG_URL` (or its last cached download), `./.rolesync.toml`,
/// and `~/.rolesync/config.toml`.
pub async fn locate_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        log::debug!("Using configuration file from flag: {}", path.display());
        return expand_home(path);
    }

    let home_config_dir = home_dir()?.join(HOME_CONFIG_DIR);

    if let Ok(url) = std::env::var(CONFIG_URL_VAR) {
        let cached = home_config_dir.join(CACHED_CONFIG_FILE);
        if let Err(e) = download_config(&url, &cached).await {
            log::error!("Failed to download configuration file: {e:#}");
        }
        if cached.is_file() {
            return Ok(cached);
        }
        log::debug!("No cached configuration file at {}", cached.display());
    } else {
        log::debug!("{CONFIG_URL_VAR} not set, checking for local configuration file");
    }

    let local_config_path = PathBuf::from(LOCAL_CONFIG_FILE);
    if local_config_path.is_file() {
        return Ok(local_config_path);
    }

    let global_config_path = home_config_dir.join(HOME_CONFIG_FILE);
    if global_config_path.is_file() {
        return Ok(global_config_path);
    }

    bail!(
        "No configuration file found. Checked the --config-file flag, {CONFIG_URL_VAR}, {} and {}",
        LOCAL_CONFIG_FILE,
        global_config_path.display()
    )
}

async fn download_config(url: &str, destination: &Path) -> anyhow::Result<()> {
    log::debug!("Downloading configuration file from {url} to {}", destination.display());

    let body = reqwest::get(url)
        .await?
        .error_for_status()?
        .bytes()
        .await?;

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(destination, &body).await?;

    Ok(())
}

fn home_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir().context("Could not determine home directory")
}

fn expand_home(path: &Path) -> anyhow::Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}
