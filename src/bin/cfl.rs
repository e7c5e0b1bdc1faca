//! cfl CLI — operator diagnostics for a Code for Life deployment.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use codeforlife_deploy::auth::{GoogleIdTokenVerifier, SchedulerAudiences, SchedulerAuthenticator};
use codeforlife_deploy::config::{Config, Env, ServiceSettings, load_env_files, set_up_settings};
use codeforlife_deploy::db::{DatabaseSettings, Db};
use codeforlife_deploy::store::{FileObjectStore, ObjectStore, S3ObjectStore};
use codeforlife_deploy::telemetry::{TelemetryConfig, init_telemetry};
use http::header::AUTHORIZATION;

const SERVICE_NAME: &str = "codeforlife";

#[derive(Parser)]
#[command(name = "cfl", about = "Code for Life deployment settings and checks")]
struct Cli {
    /// Service base directory (holds env/.env files)
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,
    /// Read objects from this directory instead of S3 ({dir}/{bucket}/{key})
    #[arg(long)]
    store_root: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the resolved, non-secret settings
    Settings,
    /// Secret inspection
    Secrets {
        #[command(subcommand)]
        action: SecretsAction,
    },
    /// Database checks
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Cloud scheduler authentication
    Scheduler {
        #[command(subcommand)]
        action: SchedulerAction,
    },
}

#[derive(Subcommand)]
enum SecretsAction {
    /// List declared secret keys
    Keys,
    /// Print one secret value
    Get {
        key: String,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Resolve database settings and run SELECT 1
    Check,
}

#[derive(Subcommand)]
enum SchedulerAction {
    /// Check a token as if it arrived on a request to PATH
    Verify {
        /// Request path, e.g. /indycleanup/
        #[arg(long)]
        path: String,
        /// Bearer ID token
        #[arg(long)]
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Telemetry first, so setup itself is logged. Env files never override,
    // so loading them again inside set_up_settings is harmless.
    load_env_files(&cli.base_dir, Env::from_env()?)?;
    let guard = init_telemetry(TelemetryConfig::from_config(&Config::from_env()?, SERVICE_NAME))?;

    let store: Box<dyn ObjectStore> = match &cli.store_root {
        Some(root) => Box::new(FileObjectStore::new(root)),
        None => Box::new(S3ObjectStore::from_env()?),
    };

    let settings = set_up_settings(&cli.base_dir, SERVICE_NAME, store.as_ref()).await?;

    let result = match cli.command {
        Command::Settings => cmd_settings(&settings),
        Command::Secrets { action } => cmd_secrets(&settings, action),
        Command::Db {
            action: DbAction::Check,
        } => cmd_db_check(&settings, store.as_ref()).await,
        Command::Scheduler {
            action: SchedulerAction::Verify { path, token },
        } => cmd_scheduler_verify(&settings, path, token).await,
    };

    guard.force_flush();
    result
}

fn cmd_settings(settings: &ServiceSettings) -> anyhow::Result<()> {
    let config = &settings.config;
    println!("Service:        {}", settings.service_name);
    println!("Base dir:       {}", settings.service_base_dir.display());
    println!("Environment:    {}", settings.env);
    println!("Domain:         {}", settings.env.domain());
    println!("Allowed hosts:  {}", settings.env.allowed_hosts().join(", "));
    println!("Debug:          {}", settings.env.debug());
    println!("App ID:         {}", config.app_id.as_deref().unwrap_or("-"));
    println!("App version:    {}", config.app_version.as_deref().unwrap_or("-"));
    println!("Bucket:         {}", config.app_bucket);
    println!("Secrets key:    {}", config.secrets_key());
    match config.db_data_key() {
        Ok(key) => println!("DB data key:    {key}"),
        Err(_) => println!("DB data key:    -"),
    }
    println!("Secrets loaded: {}", settings.secrets.len());
    Ok(())
}

fn cmd_secrets(settings: &ServiceSettings, action: SecretsAction) -> anyhow::Result<()> {
    match action {
        SecretsAction::Keys => {
            if settings.secrets.is_empty() {
                println!("No secrets declared.");
            }
            for key in settings.secrets.keys() {
                println!("{key}");
            }
        }
        SecretsAction::Get { key } => {
            println!("{}", settings.secrets.expose(&key).unwrap_or("<unset>"));
        }
    }
    Ok(())
}

async fn cmd_db_check(settings: &ServiceSettings, store: &dyn ObjectStore) -> anyhow::Result<()> {
    let db_settings = DatabaseSettings::resolve(settings.env, &settings.config, store).await?;
    println!(
        "Database: {}@{}:{}/{}",
        db_settings.user, db_settings.host, db_settings.port, db_settings.name
    );
    let db = Db::connect(&db_settings).await?;
    db.health_check().await?;
    println!("OK");
    Ok(())
}

async fn cmd_scheduler_verify(
    settings: &ServiceSettings,
    path: String,
    token: String,
) -> anyhow::Result<()> {
    let audiences = SchedulerAudiences::from_config(&settings.config)?;
    let authenticator =
        SchedulerAuthenticator::new(Arc::new(GoogleIdTokenVerifier::new()?), audiences);

    let (parts, ()) = http::Request::builder()
        .uri(path.as_str())
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(())?
        .into_parts();

    println!("Audience: {}", authenticator.audiences().for_path(&path));
    if authenticator.is_cloud_scheduler(&parts).await {
        println!("Allowed: request is from the cloud scheduler");
    } else {
        println!("Denied: see log output for the reason");
    }
    Ok(())
}
