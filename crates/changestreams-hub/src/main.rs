use changestreams_core::config::ChangeStreamsConfig;
use changestreams_hub::{app, hub::SubscriptionHub};
use changestreams_listener::{emitter, ChangeListener, ChangeSink};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "changestreams-hub", version, about = "Database change notification hub")]
struct Cli {
    /// Path to changestreams.toml (falls back to CHANGESTREAMS_CONFIG)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the listener and the WebSocket hub (default)
    Serve,
    /// Manage the row-level change triggers
    Triggers {
        #[command(subcommand)]
        action: TriggerAction,
    },
}

#[derive(Subcommand)]
enum TriggerAction {
    /// Print the install script without touching the database
    Print,
    /// Install the notify function and one trigger per tracked table
    Install,
    /// Drop every trigger and the notify function
    Uninstall,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "changestreams_hub=info,changestreams_listener=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > CHANGESTREAMS_CONFIG env > ~/.changestreams/changestreams.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CHANGESTREAMS_CONFIG").ok());
    let config = ChangeStreamsConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ChangeStreamsConfig::default()
    });

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Triggers { action } => triggers(config, action).await,
    }
}

async fn serve(config: ChangeStreamsConfig) -> anyhow::Result<()> {
    if config.listener.install_triggers {
        // triggers are optional at startup: the hub still serves with an unreachable database
        if let Err(e) = install_triggers(&config).await {
            warn!(error = %e, "trigger install failed, continuing without it");
        }
    }

    let hub = Arc::new(SubscriptionHub::new());

    let listener = ChangeListener::new(config.database.url.clone(), &config.listener)?;
    let listener_status = listener.status();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sink: Arc<dyn ChangeSink> = hub.clone();
    let listener_task = tokio::spawn(async move { listener.run(sink, shutdown_rx).await });

    let addr: SocketAddr = format!("{}:{}", config.hub.bind, config.hub.port).parse()?;
    let state = Arc::new(app::AppState::new(config, hub, listener_status));
    let router = app::build_router(state);

    info!("changestreams hub listening on {}", addr);
    let tcp = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(tcp, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // signal listener to stop
    let _ = shutdown_tx.send(true);
    let _ = listener_task.await;
    Ok(())
}

async fn triggers(config: ChangeStreamsConfig, action: TriggerAction) -> anyhow::Result<()> {
    let tables = config.listener.tracked_tables();
    match action {
        TriggerAction::Print => {
            for stmt in emitter::install_script(&tables, &config.listener.channel)? {
                println!("{};\n", stmt.trim_end());
            }
        }
        TriggerAction::Install => install_triggers(&config).await?,
        TriggerAction::Uninstall => {
            let pool = connect_pool(&config).await?;
            emitter::uninstall(&pool, &tables).await?;
        }
    }
    Ok(())
}

async fn install_triggers(config: &ChangeStreamsConfig) -> anyhow::Result<()> {
    let pool = connect_pool(config).await?;
    emitter::install(
        &pool,
        &config.listener.tracked_tables(),
        &config.listener.channel,
    )
    .await?;
    pool.close().await;
    Ok(())
}

async fn connect_pool(config: &ChangeStreamsConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    Ok(pool)
}
