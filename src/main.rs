// bizcard-proxy - Main Entry Point
//
// Admission proxy in front of a pay-per-call AI completion service:
// - CLI interface
// - Configuration loading and validation
// - Coordination store selection (Redis with local fallback)
// - HTTP server start-up

use anyhow::{Context, Result};
use bizcard_proxy::admission::AdmissionPipeline;
use bizcard_proxy::ai::EnvKeyProvider;
use bizcard_proxy::clock::{Clock, SystemClock};
use bizcard_proxy::config::Config;
use bizcard_proxy::downstream::HttpTransport;
use bizcard_proxy::metrics;
use bizcard_proxy::server::{self, AppState};
use bizcard_proxy::signature::sign;
use bizcard_proxy::store::{Backends, CoordinationStore, LocalStore, RedisStore, RedisStoreConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// bizcard-proxy: admission layer for a pay-per-call AI service
#[derive(Parser, Debug)]
#[command(name = "bizcard-proxy")]
#[command(author = "BizCard Proxy Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Admission proxy for pay-per-call AI services", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: ./bizcard-proxy.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Print a signature header value for a request body
    Sign {
        /// Request body to sign, exactly as it will be sent
        body: String,

        /// Signing secret (default: the configured current secret)
        #[arg(long)]
        secret: Option<String>,

        /// Timestamp in unix milliseconds (default: now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Validate the configuration and print the effective settings
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(args.config.as_ref()).context("Failed to load configuration")?;

    match args.command {
        Some(Commands::Sign {
            body,
            secret,
            timestamp,
        }) => {
            let secret = secret
                .or_else(|| config.signature.secrets().into_iter().next())
                .context("No signing secret: pass --secret or configure signature.secret")?;
            let timestamp = timestamp.unwrap_or_else(|| SystemClock::new().now_ms());
            println!("{}", sign(&secret, timestamp, body.as_bytes()));
        }
        Some(Commands::CheckConfig) => {
            let rendered =
                toml::to_string_pretty(&redacted(&config)).context("Failed to render config")?;
            println!("{}", rendered);
            println!("# configuration OK");
        }
        Some(Commands::Serve) => {
            init_tracing(&config, args.verbose)?;
            serve(config).await?;
        }
        None => {
            println!("No command specified. Use \"bizcard-proxy --help\" for usage.");
        }
    }

    Ok(())
}

/// Copy of the configuration safe to print
fn redacted(config: &Config) -> Config {
    let hide = |value: &mut Option<String>| {
        if value.is_some() {
            *value = Some("<redacted>".to_string());
        }
    };

    let mut config = config.clone();
    hide(&mut config.signature.secret);
    hide(&mut config.signature.previous_secret);
    for secret in config.signature.alternate_secrets.iter_mut() {
        *secret = "<redacted>".to_string();
    }
    for token in config.auth.app_tokens.iter_mut() {
        *token = "<redacted>".to_string();
    }
    config
}

async fn build_backends(config: &Config, clock: Arc<dyn Clock>) -> Result<Backends> {
    let local = LocalStore::new(clock);
    let _sweeper = local.spawn_sweeper(Duration::from_millis(config.store.sweep_interval_ms));

    let Some(url) = config.store.redis_url.as_deref() else {
        info!("No shared store configured, using local store only");
        return Ok(Backends::local_only(local));
    };

    let redis_config = RedisStoreConfig {
        command_timeout: Duration::from_millis(config.store.command_timeout_ms),
        ..Default::default()
    };
    let redis = RedisStore::open(url, redis_config).context("Invalid shared store URL")?;
    if let Err(e) = redis.ping().await {
        warn!(error = %e, "Shared store unavailable at startup, falling back per call until it answers");
    }
    Ok(Backends::with_shared(Arc::new(redis), local))
}

async fn serve(config: Config) -> Result<()> {
    info!("bizcard-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        metrics::init();
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let backends = build_backends(&config, clock.clone()).await?;

    let transport = HttpTransport::new(
        config.downstream.endpoint.clone(),
        config.downstream.api_key_name.clone(),
        Arc::new(EnvKeyProvider),
    )
    .and_then(|t| t.with_timeout(Duration::from_secs(config.downstream.timeout_secs)))
    .context("Failed to build downstream HTTP client")?;

    let pipeline = AdmissionPipeline::from_config(&config, backends, clock, Arc::new(transport));
    info!(
        signature = pipeline.signature_enabled(),
        token_auth = config.auth.enabled,
        "Admission pipeline ready"
    );

    let addr = config.server.bind_addr()?;
    let app = server::router(AppState::new(pipeline, &config), config.metrics.enabled);
    server::serve(addr, app).await
}
