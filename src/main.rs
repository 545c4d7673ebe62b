use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use rolesync::aws::StsRoleAssumer;
use rolesync::form_login::FormLogin;
use rolesync::http_client;
use rolesync::identity_provider::{AssertionFile, IdentityProvider};
use rolesync::profiles::ProfileStore;
use rolesync::reconcile::Reconciler;
use rolesync::settings::{self, Settings};
use rolesync::ui::StdUI;

/// Manages AWS profiles that are linked to a SAML identity provider.
#[derive(Parser)]
#[command(name = "rolesync", version)]
struct Cli {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    /// Local path to the configuration file
    #[arg(short, long, global = true, env = "ROLESYNC_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// Credentials file holding the profiles, instead of ~/.aws/credentials
    #[arg(long, global = true, env = "ROLESYNC_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Update managed profiles to match authorized roles and refresh expired tokens
    RefreshProfiles {
        /// Force a refresh, even if all profiles are valid
        #[arg(short, long)]
        force_refresh: bool,

        /// Read a base64 SAMLResponse from this file (`-` for stdin) instead of signing in
        #[arg(long)]
        assertion_file: Option<PathBuf>,
    },

    /// List the managed profiles
    ListProfiles,

    /// Print the value of a key from a profile
    GetProfileKey { profile: String, key: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .init();

    log::debug!("rolesync version: {}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::RefreshProfiles {
            force_refresh,
            assertion_file,
        } => {
            let settings = load_settings(&cli).await?;
            refresh_profiles(&cli, &settings, *force_refresh, assertion_file.clone()).await
        }
        Command::ListProfiles => {
            let settings = load_settings_or_default(&cli).await;
            for name in profile_store(&cli, &settings)?.list_managed_names()? {
                println!("{name}");
            }
            Ok(())
        }
        Command::GetProfileKey { profile, key } => {
            let settings = load_settings_or_default(&cli).await;
            let value = profile_store(&cli, &settings)?
                .get_key(profile, key)
                .with_context(|| format!("Unable to find key ({key}) in profile ({profile})"))?;
            println!("{value}");
            Ok(())
        }
    }
}

async fn refresh_profiles(
    cli: &Cli,
    settings: &Settings,
    force_refresh: bool,
    assertion_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let store = profile_store(cli, settings)?;

    if force_refresh {
        log::debug!("Forcing a refresh of all profiles");
    } else if !store.list_managed_names()?.is_empty() && !store.any_managed_expired()? {
        log::info!("All profiles are still valid... nothing to do!");
        return Ok(());
    }

    let assertion = match assertion_file {
        Some(path) => AssertionFile { path }.get_saml_assertion().await?,
        None => {
            let idp = settings
                .idp
                .as_ref()
                .context("No [idp] section in the configuration and no --assertion-file given")?;
            let client = http_client::create_http_client_with_redirects()?;
            let ui = StdUI;
            FormLogin {
                ui: &ui,
                http_client: &client,
                settings: idp,
            }
            .get_saml_assertion()
            .await
            .context("Unable to get SAML assertion")?
        }
    };
    log::debug!("Retrieved SAML assertion from IdP");

    let roles = assertion
        .extract_roles()
        .context("Unable to get authorized roles")?;
    log::debug!("Parsed {} authorized roles from SAML assertion", roles.len());

    let role_assumer = StsRoleAssumer::new(settings.sts.region.clone()).await;
    let report = Reconciler {
        store: &store,
        role_assumer: &role_assumer,
        accounts: settings,
        force_refresh,
    }
    .reconcile(&roles, &assertion)
    .await?;

    log::info!(
        "{} refreshed, {} still valid, {} deleted, {} failed",
        report.refreshed.len(),
        report.unchanged.len(),
        report.deleted.len(),
        report.failed.len()
    );
    for failure in &report.failed {
        log::warn!("Profile {} was not refreshed: {:#}", failure.profile, failure.error);
    }
    for name in &report.skipped {
        log::warn!("Profile {name} was skipped because it is not managed by rolesync");
    }

    Ok(())
}

async fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let path = settings::locate_config_file(cli.config_file.as_deref()).await?;
    Settings::load(&path)
}

/// Listing and reading profiles work without a configuration file.
async fn load_settings_or_default(cli: &Cli) -> Settings {
    load_settings(cli).await.unwrap_or_else(|e| {
        log::debug!("{e:#}, using default settings");
        Settings::default()
    })
}

fn profile_store(cli: &Cli, settings: &Settings) -> anyhow::Result<ProfileStore> {
    let path = match &cli.credentials_file {
        Some(path) => path.clone(),
        None => settings.credentials_path()?,
    };
    Ok(ProfileStore::new(path))
}
