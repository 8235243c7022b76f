//! Response Watch - command line entry point
//!
//! # Usage
//!
//! ```bash
//! # Paste a prompt into the target app and wait for the answer
//! response-watch run "summarize the open file" --strategy screen
//!
//! # Only wait (the prompt was entered by hand)
//! response-watch watch --strategy file_latest
//!
//! # Dependency status as JSON
//! response-watch status
//! ```

use async_trait::async_trait;
use response_watch::capture::CaptureService;
use response_watch::clipboard::{CommandPasteboard, Pasteboard};
use response_watch::health;
use response_watch::{
    AppAutomation, CancellationToken, CompletionOrchestrator, Config, ContentHasher, Delivery,
    DeliverySink, DeliveryTarget, OsaScriptAutomation, Resolution, ScreenCaptureSource,
    ScreenStabilityMonitor, SessionContext, StrategyKind, StrategyRegistry, SubmitRequest,
    TextExtractor, WatchError,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const SCREENSHOT_PREFIX: &str = "screen";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommandKind {
    Run(String),
    Watch,
    Status,
    Purge,
    Screenshot,
}

/// Parsed command line
#[derive(Debug, Clone)]
struct CliArgs {
    command: CommandKind,
    config_path: Option<PathBuf>,
    strategy: Option<String>,
    model: Option<String>,
    app: Option<String>,
}

/// Parse command line arguments
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut command: Option<CommandKind> = None;
    let mut prompt_parts: Vec<String> = Vec::new();
    let mut cli = CliArgs {
        command: CommandKind::Status,
        config_path: None,
        strategy: None,
        model: None,
        app: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("response-watch v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i < args.len() {
                    cli.config_path = Some(PathBuf::from(&args[i]));
                }
            }
            "--strategy" | "-s" => {
                i += 1;
                if i < args.len() {
                    cli.strategy = Some(args[i].clone());
                }
            }
            "--model" | "-m" => {
                i += 1;
                if i < args.len() {
                    cli.model = Some(args[i].clone());
                }
            }
            "--app" | "-a" => {
                i += 1;
                if i < args.len() {
                    cli.app = Some(args[i].clone());
                }
            }
            "run" if command.is_none() => command = Some(CommandKind::Run(String::new())),
            "watch" if command.is_none() => command = Some(CommandKind::Watch),
            "status" if command.is_none() => command = Some(CommandKind::Status),
            "purge" if command.is_none() => command = Some(CommandKind::Purge),
            "screenshot" if command.is_none() => command = Some(CommandKind::Screenshot),
            other if matches!(command, Some(CommandKind::Run(_))) && !other.starts_with('-') => {
                prompt_parts.push(other.to_string());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                eprintln!("Use --help for usage information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    cli.command = match command {
        Some(CommandKind::Run(_)) => {
            let prompt = prompt_parts.join(" ");
            if prompt.trim().is_empty() {
                eprintln!("run needs a prompt");
                std::process::exit(1);
            }
            CommandKind::Run(prompt)
        }
        Some(other) => other,
        None => CommandKind::Status,
    };
    cli
}

fn print_help() {
    println!(
        r#"Response Watch - completion detection for desktop apps without an API

USAGE:
    response-watch [OPTIONS] <COMMAND>

COMMANDS:
    run <prompt>     Paste the prompt into the target app and wait for the answer
    watch            Wait for the answer to a prompt entered by hand
    status           Print dependency status as JSON (default)
    purge            Delete stale screenshots and response files
    screenshot       Capture the screen once and print the file path

OPTIONS:
    -h, --help              Show this help message
    -v, --version           Show version
    -c, --config <PATH>     Configuration file
    -s, --strategy <NAME>   file_new | file_latest | clipboard | screen
    -m, --model <NAME>      Model selector passed along with the prompt
    -a, --app <NAME>        Target application (default from config)

ENVIRONMENT:
    RUST_LOG                Log filter, overrides general.log_level
"#
    );
}

/// Prints results to the terminal
struct StdoutSink;

#[async_trait]
impl DeliverySink for StdoutSink {
    async fn deliver(&self, _target: &DeliveryTarget, delivery: Delivery) -> Result<(), WatchError> {
        match delivery {
            Delivery::Text(text) => println!("{}", text),
            Delivery::Image { path, caption } => {
                if let Some(caption) = caption {
                    println!("{}", caption);
                }
                println!("{}", path.display());
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = parse_args();

    let config = match &cli.config_path {
        Some(path) => Config::load_from_path(path.clone()),
        None => Config::load(),
    };

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if !config.general.enabled {
        info!("Response watch is disabled in configuration, exiting");
        return Ok(());
    }

    config.validate()?;
    config.storage.ensure_dirs()?;

    let pasteboard: Arc<dyn Pasteboard> = Arc::new(CommandPasteboard::from_config(&config.clipboard));
    let capture = CaptureService::from_config(&config.screen, config.storage.screenshots_dir());
    let registry = StrategyRegistry::with_components(&config, pasteboard.clone(), Arc::new(capture));
    let automation: Arc<dyn AppAutomation> =
        Arc::new(OsaScriptAutomation::new(pasteboard, &config.automation));

    match cli.command {
        CommandKind::Status => {
            let report = health::check(&config, &registry, Some(automation.as_ref()));
            println!("{}", report.to_json()?);
            if !report.all_available() {
                warn!("Some strategy dependencies are unavailable");
            }
            Ok(())
        }
        CommandKind::Purge => {
            let mut removed = screenshot_janitor(&config).purge_old_captures(config.screen.purge_age());
            for kind in registry.kinds() {
                if let Some(strategy) = registry.get(kind) {
                    removed += strategy.housekeeping();
                }
            }
            println!("Removed {} stale artifacts", removed);
            Ok(())
        }
        CommandKind::Screenshot => {
            screenshot_janitor(&config).purge_old_captures(config.screen.purge_age());
            let service = CaptureService::from_config(&config.screen, config.storage.screenshots_dir())
                .with_prefix(SCREENSHOT_PREFIX);
            let path = service.capture().await?;
            println!("{}", path.display());
            Ok(())
        }
        CommandKind::Run(_) | CommandKind::Watch => {
            run_episode(&cli, &config, &registry, automation).await
        }
    }
}

/// Purges old captures taken by the `screenshot` command
fn screenshot_janitor(config: &Config) -> ScreenStabilityMonitor {
    let source = CaptureService::from_config(&config.screen, config.storage.screenshots_dir())
        .with_prefix(SCREENSHOT_PREFIX);
    ScreenStabilityMonitor::new(
        Arc::new(source),
        ContentHasher::new(config.screen.digest, config.screen.perceptual_threshold),
        config.storage.screenshots_dir(),
    )
    .with_prefix(SCREENSHOT_PREFIX)
}

async fn run_episode(
    cli: &CliArgs,
    config: &Config,
    registry: &StrategyRegistry,
    automation: Arc<dyn AppAutomation>,
) -> Result<(), Box<dyn std::error::Error>> {
    let kind = match &cli.strategy {
        Some(name) => name.parse::<StrategyKind>()?,
        None => config.general.strategy,
    };
    let strategy = registry
        .get(kind)
        .ok_or_else(|| WatchError::Configuration(format!("strategy '{}' is not registered", kind)))?;

    let target_app = cli.app.clone().unwrap_or_else(|| config.general.target_app.clone());
    let session = Arc::new(SessionContext::new(target_app.clone()));
    session.delivery().set(DeliveryTarget::new("stdout"));

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Cancelling...");
        token.cancel();
    })?;

    let mut orchestrator = CompletionOrchestrator::new(session, strategy)
        .with_automation(automation)
        .with_delivery_config(config.delivery.clone())
        .with_busy_policy(config.general.busy_policy)
        .with_cancel_token(shutdown);

    if kind == StrategyKind::Screen && config.extraction.enabled {
        match TextExtractor::from_config(&config.extraction) {
            Ok(extractor) if extractor.is_available() => {
                orchestrator = orchestrator.with_extractor(extractor);
            }
            Ok(_) => warn!("Recognition engine not found, screen results will be images"),
            Err(e) => warn!("Text extraction disabled: {}", e),
        }
    }

    let request = match &cli.command {
        CommandKind::Run(prompt) => {
            let mut request = SubmitRequest::new(prompt.clone(), target_app);
            if let Some(model) = &cli.model {
                request = request.with_model(model.clone());
            }
            Some(request)
        }
        _ => None,
    };

    info!("Starting {} episode", kind);
    let resolution = orchestrator.run_and_deliver(request.as_ref(), &StdoutSink).await;

    match resolution {
        Resolution::Success => Ok(()),
        Resolution::Timeout => std::process::exit(2),
        Resolution::Failed => std::process::exit(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_janitor_purges_old_manual_screenshots_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.root = Some(dir.path().to_path_buf());
        let shots = config.storage.screenshots_dir();
        std::fs::create_dir_all(&shots).unwrap();

        let manual = shots.join("screen_1_0.png");
        let frame = shots.join("monitor_1_0.png");
        let day_ago = SystemTime::now() - Duration::from_secs(24 * 3600);
        for path in [&manual, &frame] {
            std::fs::write(path, b"png").unwrap();
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(day_ago)
                .unwrap();
        }

        let removed = screenshot_janitor(&config).purge_old_captures(Duration::from_secs(3600));
        assert_eq!(removed, 1);
        assert!(!manual.exists());
        assert!(frame.exists());
    }
}
