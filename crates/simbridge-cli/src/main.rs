//! `simbridge-cli` – command line front end of the bridge
//!
//! ```text
//! simbridge [run [CONFIG]]   run the bridge (default)
//! simbridge init [CONFIG]    write a demo configuration file
//! ```
//!
//! `run`:
//!
//! 1. Loads the TOML configuration (see [`config`]); falls back to a built-in
//!    demo plant when no file exists.
//! 2. Initialises tracing, builds the signal layout and transfer pipeline and
//!    wires both sides to simulated adapters.
//! 3. Starts the [`IntegrationExecutive`] and prints a status line per side
//!    every `status_refresh_ms` (JSON lines when `log_format = "json"`).
//! 4. Intercepts **Ctrl-C** and stops the executive gracefully.

mod config;
mod status;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use simbridge_hal::{SimExternalSystem, SimProcessModel};
use simbridge_middleware::StageRegistry;
use simbridge_runtime::{BridgeConfig, IntegrationExecutive, LogFormat, init_tracing};
use simbridge_types::{BridgeError, Direction};

/// Granularity at which the status loop notices Ctrl-C.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Process model ⇄ external system integration bridge.
///
/// CONFIG defaults to $SIMBRIDGE_CONFIG, then ./simbridge.toml.
#[derive(Parser, Debug)]
#[command(name = "simbridge")]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Run the bridge against the simulated adapters.
    Run {
        /// Path to the TOML configuration.
        config: Option<PathBuf>,
    },

    /// Write a demo configuration file.
    Init {
        /// Where to write the configuration.
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command.unwrap_or(Commands::Run { config: None }) {
        Commands::Run { config } => run(config.as_deref()),
        Commands::Init { config } => init(config.as_deref()),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

fn init(arg: Option<&Path>) -> Result<(), BridgeError> {
    let path = config::config_path(arg);
    if path.exists() {
        return Err(BridgeError::Config(format!(
            "{} already exists, not overwriting",
            path.display()
        )));
    }
    config::save_to(&config::demo_config(), &path).map_err(BridgeError::Config)?;
    println!(
        "  {} Demo config written to {}",
        "✓".green().bold(),
        path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(path: &Path) -> Result<BridgeConfig, BridgeError> {
    match config::load_from(path).map_err(BridgeError::Config)? {
        Some(cfg) => {
            println!("  Config loaded from {}", path.display().to_string().bold());
            Ok(cfg)
        }
        None => {
            println!(
                "  {} not found, running the built-in demo plant.",
                path.display().to_string().bold()
            );
            let mut cfg = config::demo_config();
            config::apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

fn run(arg: Option<&Path>) -> Result<(), BridgeError> {
    print_banner();
    let cfg = load_config(&config::config_path(arg))?;
    let _guard = init_tracing("simbridge", cfg.executive.log_format);

    let layout = cfg.layout()?;
    let pipeline = StageRegistry::with_builtin().build_pipeline(&cfg.stage_specs(), &layout)?;
    let es = SimExternalSystem::new(
        "external-system",
        cfg.external_system.frequency_hz,
        layout.signals(Direction::ToProcessModel).to_vec(),
    );
    let pm = SimProcessModel::new(
        "process-model",
        cfg.process_model.frequency_hz,
        layout.signals(Direction::ToExternalSystem).to_vec(),
    );

    let json = cfg.executive.log_format == LogFormat::Json;
    let refresh = Duration::from_millis(cfg.executive.status_refresh_ms);
    println!(
        "  {} signals, {} stage(s)",
        layout.len().to_string().bold(),
        pipeline.len().to_string().bold()
    );
    let mut executive = IntegrationExecutive::new(cfg, layout, Box::new(es), Box::new(pm), pipeline)?;
    for line in status::stage_lines(executive.stages()) {
        println!("    {}", line.dimmed());
    }

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the bridge …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process with a signal instead");
    }

    executive.start()?;
    println!("  Bridge running. Press {} to stop.\n", "Ctrl-C".bold());

    let mut last_print = Instant::now();
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(POLL_INTERVAL);
        if last_print.elapsed() >= refresh {
            last_print = Instant::now();
            print_status(&executive, json);
        }
    }

    executive.stop();
    info!(frame = executive.mailbox().frame(), "bridge stopped");
    print_status(&executive, json);
    println!("{}", "  ✓ Bridge stopped.".green());
    Ok(())
}

fn print_status(executive: &IntegrationExecutive, json: bool) {
    for snapshot in [
        executive.external_system_snapshot(),
        executive.process_model_snapshot(),
    ] {
        if json {
            match serde_json::to_string(&snapshot) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "failed to serialise snapshot"),
            }
        } else {
            println!("  {}", status::colored_status_line(&snapshot));
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("  {} {}",
        "simbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Process model ⇄ external system integration bridge");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("simbridge").chain(args.iter().copied()))
    }

    #[test]
    fn no_arguments_runs_with_default_config() {
        assert_eq!(parse(&[]).unwrap().command, None);
    }

    #[test]
    fn run_and_init_take_an_optional_path() {
        assert_eq!(
            parse(&["run", "plant.toml"]).unwrap().command,
            Some(Commands::Run { config: Some(PathBuf::from("plant.toml")) })
        );
        assert_eq!(
            parse(&["init"]).unwrap().command,
            Some(Commands::Init { config: None })
        );
    }

    #[test]
    fn help_is_reported_as_display_help() {
        let err = parse(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn rejects_unknown_options_and_extra_arguments() {
        assert!(parse(&["--verbose"]).is_err());
        assert!(parse(&["run", "a.toml", "b.toml"]).is_err());
        assert!(parse(&["serve"]).is_err());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("plant.toml");

        init(Some(&path)).expect("first init");
        assert!(path.exists());
        assert!(matches!(init(Some(&path)), Err(BridgeError::Config(_))));
        assert!(load_config(&path).is_ok());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
