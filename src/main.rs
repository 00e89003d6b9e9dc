use human_bytes::human_bytes;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use ul_nzb::{
    cli::{Cli, Commands},
    config::{Config, LoggingConfig},
    error::{ConfigError, UlNzbError},
    nntp::NntpConnection,
    nzb::NzbListing,
    progress::{format_upload_summary, ProgressObserver},
    upload::{UploadMode, UploadSummary, Uploader},
};

type Result<T> = std::result::Result<T, UlNzbError>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_and_validate();

    let fresh_config = !Config::resolve_path(cli.config.as_deref())?.exists();
    let config = Config::load(cli.config.as_deref()).map(|mut config| {
        config.apply_overrides(cli.get_config_overrides());
        config
    });

    init_logging(&cli, config.as_ref().ok().map(|config| &config.logging))?;
    if fresh_config && config.is_ok() {
        tracing::info!(
            "Created a default configuration at {}, add your server details",
            Config::resolve_path(cli.config.as_deref())?.display()
        );
    }

    if let Some(command) = &cli.command {
        return handle_command(command, &cli, config).await;
    }

    let config = config?;
    config.validate()?;
    let mode = cli.upload_mode()?;

    handle_upload(&cli, config, mode).await
}

/// Initialize logging from the CLI, falling back to the config file
///
/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_logging(cli: &Cli, logging: Option<&LoggingConfig>) -> Result<()> {
    let level = match (&cli.log_level, logging) {
        (None, Some(logging)) if cli.verbose == 0 && !cli.quiet => logging.level.as_str(),
        _ => cli.get_log_level(),
    };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let log_file = cli
        .log_file
        .as_deref()
        .or_else(|| logging.and_then(|logging| logging.file.as_deref()));
    let writer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let compact = logging.is_some_and(|logging| logging.format.eq_ignore_ascii_case("compact"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(log_file.is_none())
        .with_writer(writer);

    match (cli.quiet, compact) {
        (true, true) => subscriber.compact().without_time().init(),
        (true, false) => subscriber.without_time().init(),
        (false, true) => subscriber.compact().init(),
        (false, false) => subscriber.init(),
    }

    Ok(())
}

/// Handle subcommands
async fn handle_command(command: &Commands, cli: &Cli, config: Result<Config>) -> Result<()> {
    match command {
        Commands::Test => {
            let config = config?;
            if config.usenet.server.is_empty() {
                return Err(ConfigError::NoServer.into());
            }
            println!(
                "Testing connection to {}:{}...",
                config.usenet.server, config.usenet.port
            );

            let mut conn = match NntpConnection::connect(&config.usenet, None).await {
                Ok(conn) => conn,
                Err(e) => {
                    eprintln!("✗ Connection failed: {}", e);
                    return Err(e);
                }
            };
            println!("✓ Successfully connected to {}", config.usenet.server);
            if config.usenet.has_credentials() {
                println!(
                    "   Authentication: OK ({})",
                    config.usenet.auth_method.name()
                );
            }

            match conn.capabilities().await {
                Ok(capabilities) => {
                    println!(
                        "   Posting: {}",
                        if capabilities.can_post() {
                            "allowed"
                        } else {
                            "not advertised"
                        }
                    );
                    let methods: Vec<&str> = capabilities
                        .auth_methods()
                        .into_iter()
                        .map(|method| method.name())
                        .collect();
                    if !methods.is_empty() {
                        println!("   Auth methods: {}", methods.join(", "));
                    }
                    let labels: Vec<&str> = capabilities.labels().collect();
                    println!("   Capabilities: {}", labels.join(" "));
                }
                Err(e) => println!("   Capabilities: unavailable ({})", e),
            }

            conn.finish().await;
            Ok(())
        }

        Commands::Config => {
            let config_path = Config::resolve_path(cli.config.as_deref())?;

            println!("Configuration file location:");
            println!("  {}", config_path.display());
            println!();

            let mut config = config?;
            if !config.usenet.password.is_empty() {
                config.usenet.password = "********".to_string();
            }
            let toml = toml::to_string_pretty(&config).map_err(|e| {
                ConfigError::ParseError(format!("Failed to serialize config: {}", e))
            })?;
            println!("Effective configuration:");
            println!("{}", "─".repeat(60));
            println!("{}", toml);
            println!("{}", "─".repeat(60));
            Ok(())
        }

        Commands::List { nzb } => handle_list(cli, nzb),

        Commands::Version => {
            println!("ul-nzb {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Print the files and segments of an NZB
fn handle_list(cli: &Cli, path: &Path) -> Result<()> {
    let listing = NzbListing::from_file(path)?;

    if cli.json {
        let json = serde_json::to_string_pretty(&listing).map_err(std::io::Error::from)?;
        println!("{}", json);
        return Ok(());
    }

    println!("\n{}", listing.name.as_deref().unwrap_or(&path.display().to_string()));
    println!("{}", "─".repeat(50));
    println!("Total files: {}", listing.files.len());
    println!("Total size: {}", human_bytes(listing.total_size() as f64));
    println!("Total segments: {}", listing.total_segments());

    println!("\nFiles:");
    for file in &listing.files {
        let segments = match file.expected_segments {
            Some(expected) if !file.is_complete() => {
                format!("{}/{} segments, incomplete", file.segments, expected)
            }
            _ => format!("{} segments", file.segments),
        };
        println!(
            "  {} ({}, {})",
            file.name,
            human_bytes(file.bytes as f64),
            segments
        );
    }

    Ok(())
}

/// Post the files and report the outcome
async fn handle_upload(cli: &Cli, config: Config, mode: UploadMode) -> Result<()> {
    let observer = Arc::new(if cli.quiet || cli.json {
        ProgressObserver::hidden()
    } else {
        ProgressObserver::new()
    });

    let uploader = Uploader::new(config)?.with_observer(observer);

    let cancel = uploader.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping after the articles in flight");
            cancel.cancel();
        }
    });

    let summary = uploader.upload(mode).await?;
    print_summary(cli, &summary)
}

fn print_summary(cli: &Cli, summary: &UploadSummary) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::from)?;
        println!("{}", json);
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }

    println!();
    println!(
        "\x1b[1;32m✓ Complete:\x1b[0m \x1b[37m{} file(s)\x1b[0m",
        summary.files
    );
    println!(
        "  \x1b[90m└─\x1b[0m \x1b[36m{}\x1b[0m",
        format_upload_summary(summary)
    );
    for nzb in &summary.nzb {
        println!("  \x1b[90m└─\x1b[0m \x1b[34m{}\x1b[0m", nzb.display());
    }
    Ok(())
}
