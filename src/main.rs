//! Jerry server binary.
//!
//! ```text
//! jerry --config jerry.toml            run until SIGTERM/SIGINT
//! jerry --config jerry.toml --check    install the configuration and exit
//! jerry --config jerry.toml --dump-tree
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use jerry::config::{install, load_config};
use jerry::lifecycle::{install_signal_handlers, Jerry};
use jerry::observability::{logging::init_logging, metrics::init_metrics};
use jerry::PluginRegistry;

#[derive(Parser)]
#[command(name = "jerry", version)]
#[command(about = "Application server routing HTTP and queue traffic through a context tree", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "jerry.toml")]
    config: PathBuf,

    /// Print the installed context tree and exit
    #[arg(long)]
    dump_tree: bool,

    /// Validate and install the configuration, then exit
    #[arg(long)]
    check: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("jerry: {}: {}", cli.config.display(), e);
            return ExitCode::from(2);
        }
    };

    init_logging(&config.logging);
    info!(config = %cli.config.display(), "jerry v{} starting", env!("CARGO_PKG_VERSION"));

    let plugins = PluginRegistry::with_builtins();
    let engine = match install(&config, &plugins).and_then(|builder| builder.initialize()) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "Failed to install configuration");
            return ExitCode::FAILURE;
        }
    };

    if cli.dump_tree {
        print!("{}", engine.dump_tree());
    }
    if cli.check || cli.dump_tree {
        info!(contexts = engine.tree().len(), "Configuration OK");
        return ExitCode::SUCCESS;
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let jerry = match Jerry::new(engine, &config) {
        Ok(jerry) => jerry,
        Err(e) => {
            error!(error = %e, "Failed to create services");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = install_signal_handlers(jerry.stop_handle()) {
        error!(error = %e, "Failed to install signal handlers");
        return ExitCode::FAILURE;
    }

    match jerry.run_until_stopped() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Jerry stopped with an error");
            ExitCode::FAILURE
        }
    }
}
