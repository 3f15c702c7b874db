use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

mod demo_features;

use demo_features::{ClockFeature, FlakyFeature, GreeterFeature};
use feature_warden::{EventFilter, FeatureEventType, FeatureOrchestrator, WardenConfig};

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Lifecycle orchestration and failure isolation for pluggable features")]
#[command(version)]
#[command(long_about = "Runs a set of demo features under the feature orchestrator: \
dependency-ordered startup, per-feature circuit breakers, periodic health checks with \
automatic disable and recovery, and reverse-order shutdown on SIGINT/SIGTERM.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "warden.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting any feature")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR", help = "Directory for daily rolling log files")]
    log_dir: Option<String>,

    /// Seconds between guarded demo calls
    #[arg(long, default_value_t = 5, help = "Seconds between guarded calls to the greeter")]
    call_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting feature warden v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match WardenConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let orchestrator = FeatureOrchestrator::new(config);
    let greeter = Arc::new(GreeterFeature::new());

    orchestrator.add_filtered_event_listener(
        EventFilter::EventTypes(vec![
            FeatureEventType::Disabled,
            FeatureEventType::Recovered,
            FeatureEventType::CriticalFailure,
        ]),
        |event| println!("{} {}", event.timestamp.format("%H:%M:%S"), event.description()),
    );

    orchestrator.register_feature(Arc::new(ClockFeature::new()))?;
    orchestrator.register_feature(greeter.clone())?;
    orchestrator.register_feature(Arc::new(FlakyFeature::new(4)))?;

    match orchestrator.start_all().await {
        Ok(summary) if summary.is_complete() => {
            info!(started = ?summary.started, "All features started");
        }
        Ok(summary) => {
            warn!(
                started = ?summary.started,
                failed = ?summary.failed,
                "Running with some optional features unavailable"
            );
        }
        Err(e) => {
            error!("Failed to start features: {}", e);
            orchestrator.stop_all().await;
            return Err(e.into());
        }
    }

    let token = CancellationToken::new();
    let caller = spawn_demo_calls(
        Arc::clone(&orchestrator),
        greeter,
        Duration::from_secs(args.call_interval.max(1)),
        token.clone(),
    );

    let reason = wait_for_shutdown().await?;
    info!("Shutdown initiated: {}", reason);

    token.cancel();
    if let Err(e) = caller.await {
        warn!("Demo caller ended abnormally: {}", e);
    }

    let summary = orchestrator.stop_all().await;
    if !summary.is_clean() {
        error!(failed = ?summary.failed, "Some features failed to shut down");
        std::process::exit(1);
    }

    info!("Feature warden shutdown complete");
    Ok(())
}

/// Periodically greet through the guard so breaker behaviour is visible
fn spawn_demo_calls(
    orchestrator: Arc<FeatureOrchestrator>,
    greeter: Arc<GreeterFeature>,
    period: Duration,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let greeter = Arc::clone(&greeter);
                    let greeting = orchestrator
                        .execute_with_guard(
                            "greeter",
                            move || async move { greeter.greet("visitor") },
                            || "Greeter unavailable".to_string(),
                        )
                        .await;
                    info!("{}", greeting);
                }
            }
        }
    })
}

/// Wait for SIGINT or, on Unix, SIGTERM
async fn wait_for_shutdown() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT")
            }
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT")
    }
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("feature_warden={level},warden={level}", level = log_level))
    });

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_ids(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "warden.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Feature Warden Configuration File");
    println!("# This is the default configuration with all available options.");
    println!("# Any key can be overridden with WARDEN_<SECTION>__<KEY>, e.g.");
    println!("# WARDEN_HEALTH__CHECK_INTERVAL_MS=10000");
    println!();
    println!("{}", WardenConfig::default().to_toml()?);
    Ok(())
}
