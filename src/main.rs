//! permgate CLI entry point

mod cli;

use crate::cli::{Backend, Cli, Commands};
use anyhow::{bail, Context, Result};
use clap::Parser;
use permgate::auth::{PermissionMode, TokenSigner, UserId};
use permgate::events::Events;
use permgate::gateway::GatewayConfig;
use permgate::provisioning::ProvisioningConfig;
use permgate::server::{PermgateServer, ServerConfig};
use permgate::service::{Permgate, PermgateConfig};
use permgate::storage::{
    DocumentStore, MemoryDocumentStore, MemorySecretStore, PostgresConfig, PostgresStore,
    SecretStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve {
            bind,
            identity_header,
            warm_interval_secs,
        } => {
            let config = ServerConfig {
                bind_addr: bind.parse().context("Invalid bind address")?,
                identity_header: identity_header.clone(),
                warm_interval: Duration::from_secs(*warm_interval_secs),
            };
            serve(&cli, config).await
        }
        Commands::Token {
            database,
            collection,
            user,
            mode,
            duration_secs,
            inspect,
        } => {
            let user = UserId::from_header(user.as_deref()).context("Invalid user id")?;
            token(
                &cli,
                database,
                collection,
                &user,
                *mode,
                duration_secs.map(Duration::from_secs),
                *inspect,
            )
            .await
        }
        Commands::Ensure {
            database,
            collection,
        } => ensure(&cli, database, collection).await,
        Commands::Init => init(&cli).await,
        Commands::Status => status(&cli).await,
    }
}

fn db_config(cli: &Cli) -> Result<PostgresConfig> {
    if let Some(url) = &cli.database_url {
        PostgresConfig::from_url(url).context("Invalid DATABASE_URL")
    } else {
        PostgresConfig::from_env().context("DATABASE_URL not set")
    }
}

fn signer(cli: &Cli) -> TokenSigner {
    match &cli.token_secret {
        Some(secret) => TokenSigner::new(secret.as_bytes().to_vec()),
        None => {
            warn!("PERMGATE_TOKEN_SECRET not set, tokens are signed with a per-process secret");
            TokenSigner::ephemeral()
        }
    }
}

fn permgate_config(cli: &Cli) -> PermgateConfig {
    PermgateConfig {
        gateway: GatewayConfig::default()
            .with_vault_url(cli.vault_url.clone())
            .with_refresh_window(Duration::from_secs(cli.refresh_window_secs))
            .with_token_duration(Duration::from_secs(cli.token_duration_secs))
            .with_default_mode(cli.default_mode),
        provisioning: ProvisioningConfig {
            collection_throughput: Some(cli.collection_throughput),
        },
    }
}

async fn open_stores(
    cli: &Cli,
    signer: TokenSigner,
) -> Result<(Arc<dyn DocumentStore>, Arc<dyn SecretStore>)> {
    match cli.backend {
        Backend::Memory => {
            let documents: Arc<dyn DocumentStore> = Arc::new(MemoryDocumentStore::new(signer));
            let secrets: Arc<dyn SecretStore> = Arc::new(MemorySecretStore::new());
            Ok((documents, secrets))
        }
        Backend::Postgres => {
            let store = Arc::new(
                PostgresStore::new(db_config(cli)?, signer)
                    .await
                    .context("Failed to open Postgres store")?,
            );
            let documents: Arc<dyn DocumentStore> = store.clone();
            let secrets: Arc<dyn SecretStore> = store;
            Ok((documents, secrets))
        }
    }
}

async fn build(cli: &Cli, signer: TokenSigner) -> Result<Permgate> {
    let (documents, secrets) = open_stores(cli, signer).await?;
    Ok(Permgate::new(
        documents,
        secrets,
        permgate_config(cli),
        Events::new(),
    ))
}

async fn serve(cli: &Cli, config: ServerConfig) -> Result<()> {
    let permgate = build(cli, signer(cli)).await?;
    let server = PermgateServer::new(config, permgate);

    info!(backend = ?cli.backend, "Starting permgate server...");
    server.run().await
}

async fn token(
    cli: &Cli,
    database: &str,
    collection: &str,
    user: &UserId,
    mode: Option<PermissionMode>,
    duration: Option<Duration>,
    inspect: bool,
) -> Result<()> {
    let signer = signer(cli);
    let permgate = build(cli, signer.clone()).await?;
    let gateway = permgate.gateway();

    let mode = mode.unwrap_or(gateway.config().default_mode);
    let duration = duration.unwrap_or(gateway.config().token_duration);

    let token = gateway
        .get_token(database, collection, user.as_str(), mode, duration)
        .await
        .with_context(|| format!("Failed to get token for {}/{}", database, collection))?;

    println!("{}", token);

    if inspect {
        let verified = signer
            .verify(&token)
            .context("Token was not signed with this secret")?;
        println!();
        println!("{}", serde_json::to_string_pretty(verified.payload())?);
    }

    Ok(())
}

async fn ensure(cli: &Cli, database: &str, collection: &str) -> Result<()> {
    let permgate = build(cli, signer(cli)).await?;

    permgate
        .provisioner()
        .ensure(database, collection)
        .await
        .with_context(|| format!("Failed to provision {}/{}", database, collection))?;

    println!("Collection {}/{} is ready", database, collection);
    Ok(())
}

async fn init(cli: &Cli) -> Result<()> {
    if cli.backend != Backend::Postgres {
        bail!("init only applies to the postgres backend");
    }

    let _store = PostgresStore::new(db_config(cli)?, signer(cli)).await?;
    println!("Database schema initialized");

    Ok(())
}

async fn status(cli: &Cli) -> Result<()> {
    println!("permgate status");
    println!("===============");

    match cli.backend {
        Backend::Memory => {
            println!("Backend: memory (nothing is persisted)");
        }
        Backend::Postgres => {
            let store = PostgresStore::new(db_config(cli)?, signer(cli)).await?;
            let counts = store.counts().await?;

            println!("Backend: postgres (connected)");
            println!("Databases:   {}", counts.databases);
            println!("Collections: {}", counts.collections);
            println!("Users:       {}", counts.users);
            println!("Permissions: {}", counts.permissions);
            println!("Secrets:     {}", counts.secrets);
        }
    }

    println!("Vault:          {}", cli.vault_url);
    println!("Refresh window: {}s", cli.refresh_window_secs);
    println!("Token duration: {}s", cli.token_duration_secs);
    println!("Default mode:   {}", cli.default_mode);

    Ok(())
}
