//! tlsalpn - TLS-ALPN-01 challenge responder and probe

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tlsalpn_config::{Config, ValidationWarning};
use tlsalpn_solver::acme::{
    probe, AcmeIdentifier, ChallengeProvider, TlsAlpnListener,
};

/// tlsalpn - answer and inspect ACME TLS-ALPN-01 challenges
#[derive(Parser, Debug)]
#[command(name = "tlsalpn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path (.kdl or .json)
    #[arg(short = 'c', long = "config", env = "TLSALPN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve a challenge certificate until interrupted or timed out
    Serve(ServeArgs),
    /// Connect as a validating CA would and report the challenge certificate
    Probe(ProbeArgs),
    /// Validate configuration file and exit
    Test,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Domain being validated
    #[arg(long)]
    domain: String,

    /// Key authorization (`token.thumbprint`)
    #[arg(long = "key-authorization")]
    key_authorization: String,

    /// Challenge token, for logging
    #[arg(long, default_value = "manual")]
    token: String,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Override the configured listener port
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured listener interface
    #[arg(long)]
    interface: Option<String>,
}

impl ServeArgs {
    /// Apply the listener overrides given on the command line
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(interface) = &self.interface {
            config.listener.interface = interface.clone();
        }
    }
}

#[derive(Args, Debug)]
struct ProbeArgs {
    /// Listener address (`host:port`)
    #[arg(long)]
    address: String,

    /// Domain to send as SNI
    #[arg(long)]
    domain: String,

    /// Expected key authorization; the probe fails on mismatch
    #[arg(long = "key-authorization")]
    key_authorization: Option<String>,

    /// Connection and handshake timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Serve(args) => {
            let mut config = read_config(cli.config.as_deref())?;
            args.apply_overrides(&mut config);
            check_config(&config)?;
            serve(config, args).await
        }
        Commands::Probe(args) => run_probe(args).await,
        Commands::Test => test_config(cli.config.as_deref()),
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn read_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration");
            Config::from_file(path).context("Failed to load configuration file")
        }
        None => Ok(Config::default()),
    }
}

/// Validate the effective configuration and log its lint warnings
fn check_config(config: &Config) -> Result<Vec<ValidationWarning>> {
    config.validate()?;

    let warnings = config.lint().warnings;
    for warning in &warnings {
        warn!("{}", warning);
    }

    Ok(warnings)
}

/// Test configuration file and exit
fn test_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = read_config(path)?;
    check_config(&config)?;

    info!("Configuration test successful:");
    info!("  - listener: {} ({})", config.listener.address(), config.listener.address_family);
    info!("  - handshake timeout: {}s", config.listener.handshake_timeout_secs);
    info!("  - key algorithm: {}", config.challenge.key_algorithm);
    info!("  - certificate validity: {}s", config.challenge.certificate_validity_secs);
    info!("  - validation delay: {}s", config.challenge.delay_secs);

    println!(
        "tlsalpn: configuration {} test is successful",
        path.map(|p| p.display().to_string())
            .unwrap_or_else(|| "(defaults)".to_string())
    );

    Ok(())
}

/// Present a challenge and hold it until Ctrl-C or the timeout
async fn serve(config: Config, args: ServeArgs) -> Result<()> {
    let listener = TlsAlpnListener::from_config(&config);

    listener
        .present(&args.domain, &args.token, &args.key_authorization)
        .await
        .with_context(|| format!("Failed to present challenge for {}", args.domain))?;

    let address = match listener.local_addr().await {
        Some(addr) => addr.to_string(),
        None => listener.address(),
    };
    let digest = hex::encode(AcmeIdentifier::new(&args.key_authorization).digest());
    println!("Serving TLS-ALPN-01 challenge for {} on {}", args.domain, address);
    println!("acmeIdentifier digest: {}", digest);

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        },
        _ = sleep_or_forever(args.timeout) => info!("Serve timeout elapsed, shutting down"),
    }

    listener
        .cleanup(&args.domain, &args.token, &args.key_authorization)
        .await
        .context("Failed to stop challenge listener")?;

    Ok(())
}

async fn sleep_or_forever(timeout: Option<u64>) {
    match timeout {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending().await,
    }
}

/// Probe a listener and check what it serves
async fn run_probe(args: ProbeArgs) -> Result<()> {
    let outcome = probe(&args.address, &args.domain, Duration::from_secs(args.timeout))
        .await
        .with_context(|| format!("Failed to probe {}", args.address))?;

    let certificate = &outcome.certificate;
    println!("address: {}", outcome.address);
    println!(
        "alpn: {}",
        outcome
            .alpn_protocol
            .as_deref()
            .map(String::from_utf8_lossy)
            .unwrap_or_else(|| "(none)".into())
    );
    println!("dns names: {}", certificate.dns_names.join(", "));
    println!(
        "acmeIdentifier: {}",
        certificate
            .digest_hex()
            .unwrap_or_else(|| "(missing)".to_string())
    );

    if !outcome.negotiated_acme_tls() {
        bail!("{} did not negotiate acme-tls/1", args.address);
    }
    if !certificate.covers(&args.domain) {
        bail!(
            "Certificate names [{}] do not match {}",
            certificate.dns_names.join(", "),
            args.domain
        );
    }
    if let Some(key_authorization) = args.key_authorization {
        if !certificate.matches(&key_authorization) {
            bail!("acmeIdentifier digest does not match the key authorization");
        }
        println!("key authorization: match");
    }

    Ok(())
}
