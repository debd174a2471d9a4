//! Lightbox - resilient medical image acquisition from the command line
#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use lightbox::{
    AcquisitionEngine, Config, HttpTransport, ImageIdentifier, LoadOptions, RasterDecoder,
    StudyLoadResult, StudyLoader,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse CLI arguments
    match parse_args()? {
        Command::Fetch {
            ids,
            timeout,
            events,
        } => fetch_cli(&ids, timeout, events).await,
        Command::Study { study_id, ids } => study_cli(&study_id, &ids).await,
        Command::Config { init } => config_cli(init),
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Version => {
            print_version();
            Ok(())
        }
    }
}

/// CLI commands
enum Command {
    Fetch {
        ids: Vec<ImageIdentifier>,
        timeout: Option<Duration>,
        events: bool,
    },
    Study {
        study_id: String,
        ids: Vec<ImageIdentifier>,
    },
    Config {
        init: bool,
    },
    Help,
    Version,
}

fn parse_ids(args: &[String]) -> Result<Vec<ImageIdentifier>> {
    args.iter()
        .filter(|a| !a.starts_with('-'))
        .map(|a| a.parse().with_context(|| format!("Invalid identifier: {a}")))
        .collect()
}

fn parse_args() -> Result<Command> {
    let args: Vec<String> = std::env::args().collect();

    if args.len() == 1 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),

        "fetch" => {
            // Parse --timeout flag
            let mut rest = Vec::new();
            let mut timeout = None;
            let mut events = false;
            let mut i = 2;
            while i < args.len() {
                match args[i].as_str() {
                    "--timeout" | "-t" => {
                        let secs: u64 = args
                            .get(i + 1)
                            .and_then(|s| s.parse().ok())
                            .ok_or_else(|| anyhow::anyhow!("--timeout needs a number of seconds"))?;
                        timeout = Some(Duration::from_secs(secs));
                        i += 2;
                    }
                    "--events" | "-e" => {
                        events = true;
                        i += 1;
                    }
                    _ => {
                        rest.push(args[i].clone());
                        i += 1;
                    }
                }
            }

            let ids = parse_ids(&rest)?;
            if ids.is_empty() {
                return Err(anyhow::anyhow!("Missing image identifier"));
            }
            Ok(Command::Fetch {
                ids,
                timeout,
                events,
            })
        }

        "study" => {
            let study_id = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("Missing study id"))?
                .clone();
            let ids = parse_ids(&args[3..])?;
            Ok(Command::Study { study_id, ids })
        }

        "config" => Ok(Command::Config {
            init: args.iter().any(|a| a == "--init"),
        }),

        other => Err(anyhow::anyhow!(
            "Unknown command: {other}\nRun 'lightbox --help' for usage"
        )),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"Lightbox - resilient medical image acquisition

USAGE:
    lightbox [COMMAND]

COMMANDS:
    fetch <id>... [OPTIONS]            Load images and report the outcome
      Options:
        -t, --timeout <secs>           Override every strategy's deadline
        -e, --events                   Print engine events as JSON lines
      Examples:
        lightbox fetch "wadouri:https://pacs.local/wado?objectUID=1.2.3"
        lightbox fetch https://example.org/scan.png --timeout 10

    study <study-id> <id>...           Load a study with progress

    config [--init]                    Show configuration (--init writes defaults)

OPTIONS:
    -h, --help                         Show this help message
    -v, --version                      Show version information

IDENTIFIERS:
    wadouri:<url>                      WADO-URI object
    dicomweb:<url>                     DICOMweb instance
    <url>                              Plain web image

Press Ctrl-C to cancel a running load.

CONFIG:
    {}
"#,
        config_path
    );
}

fn print_version() {
    println!("lightbox {}", lightbox::VERSION);
}

fn build_engine(config: &Config) -> AcquisitionEngine {
    AcquisitionEngine::new(
        config,
        Arc::new(HttpTransport::new()),
        Arc::new(RasterDecoder),
    )
}

/// Cancel `token` on Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling...");
            handle.cancel();
        }
    });
    token
}

async fn fetch_cli(ids: &[ImageIdentifier], timeout: Option<Duration>, events: bool) -> Result<()> {
    let config = Config::load()?;
    let engine = build_engine(&config);

    if events {
        let mut rx = engine.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Ok(line) = serde_json::to_string(&event) {
                    eprintln!("{line}");
                }
            }
        });
    }

    let options = LoadOptions {
        timeout,
        cancel: Some(cancel_on_ctrl_c()),
        ..LoadOptions::default()
    };
    let outcome = engine.load_many(ids, options).await;

    for loaded in &outcome.successful {
        let image = &loaded.image;
        let via = image
            .metadata
            .strategy
            .map_or_else(|| "unknown".to_string(), |s| s.to_string());
        println!(
            "✓ {}  {}x{} {} via {}",
            loaded.identifier,
            image.width,
            image.height,
            image.metadata.format.name(),
            via
        );
    }
    for failed in &outcome.failed {
        println!("✗ {}  {}", failed.identifier, failed.error);
    }

    let stats = engine.cache_stats();
    println!(
        "\n{} loaded, {} failed · cache {} items, {} / {} bytes",
        outcome.successful.len(),
        outcome.failed.len(),
        stats.item_count,
        stats.total_size,
        stats.max_size
    );

    if outcome.successful.is_empty() {
        return Err(anyhow::anyhow!("No images could be loaded"));
    }
    Ok(())
}

async fn study_cli(study_id: &str, ids: &[ImageIdentifier]) -> Result<()> {
    let config = Config::load()?;
    let loader = StudyLoader::new(build_engine(&config), &config.study);
    let cancel = cancel_on_ctrl_c();

    let result = loader
        .load_study(study_id, ids, &cancel, |p| {
            eprintln!(
                "[{:>5.1}%] {}/{} loaded, {} failed, ~{}s left  {}",
                p.percentage,
                p.loaded,
                p.total,
                p.failed,
                p.eta_ms / 1000,
                p.current_id
            );
        })
        .await?;

    match result {
        StudyLoadResult::Loaded {
            images,
            errors,
            state,
        } => {
            println!(
                "Study {} {:?}: {} images loaded",
                state.study_id,
                state.status,
                images.len()
            );
            for failed in errors {
                println!("  ✗ {}  {}", failed.identifier, failed.error);
            }
            Ok(())
        }
        StudyLoadResult::Failed {
            message,
            recovery_options,
            state,
        } => {
            println!("{message}\n\nOptions:");
            for option in &recovery_options {
                println!("  • {}", serde_json::to_string(option)?);
            }

            let file_name = format!("{}.json", state.study_id.replace(['/', '\\'], "_"));
            let path = lightbox::paths::reports_dir()?.join(file_name);
            std::fs::write(&path, serde_json::to_string_pretty(&state)?)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("\nReport written to {}", path.display());

            Err(anyhow::anyhow!("Study {} failed to load", state.study_id))
        }
    }
}

fn config_cli(init: bool) -> Result<()> {
    let path = Config::default_path()?;

    if init {
        if path.exists() {
            println!("Config already exists at {}", path.display());
            return Ok(());
        }
        Config::default().save()?;
        println!("✓ Wrote default config to {}", path.display());
        return Ok(());
    }

    let config = Config::load()?;
    println!("# {}\n", path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
