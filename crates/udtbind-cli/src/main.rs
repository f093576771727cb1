// ============================================
// File: crates/udtbind-cli/src/main.rs
// ============================================
//! # udtbind Command Line Entry Point
//!
//! ## Creation Reason
//! Gives the binding a runnable face: an echo demo exercising handles and
//! the multiplexer end to end, and configuration tooling.
//!
//! ## Main Functionality
//! - CLI argument parsing with clap
//! - Logging initialization with tracing
//! - Configuration loading and validation
//! - Echo demo over the in-process loopback engine
//!
//! ## Usage
//! ```bash
//! udtbind-cli echo --clients 4 --messages 10 --size 256
//! udtbind-cli validate --config udtbind.toml
//! udtbind-cli defaults > udtbind.toml
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The demo uses the process-wide runtime, so SIGINT during a run cleans
//!   the engine up before exiting
//!
//! ## Last Modified
//! v0.1.0 - Initial CLI implementation

mod demo;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::{error, info};

use udtbind::logging::init_logging;
use udtbind::BindingConfig;

// ============================================
// CLI Definition
// ============================================

/// udtbind - reliable UDP transport binding
#[derive(Parser, Debug)]
#[command(name = "udtbind-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the echo demo over the loopback engine
    Echo {
        /// Path to configuration file
        #[arg(short, long, default_value = "udtbind.toml")]
        config: PathBuf,

        /// Listener port
        #[arg(short, long, default_value_t = 9000)]
        port: u16,

        /// Number of concurrent clients
        #[arg(long, default_value_t = 3)]
        clients: usize,

        /// Messages sent by each client
        #[arg(long, default_value_t = 5)]
        messages: usize,

        /// Payload size in bytes
        #[arg(long, default_value_t = 64)]
        size: usize,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "udtbind.toml")]
        config: PathBuf,
    },

    /// Print the default configuration
    Defaults,
}

// ============================================
// Main
// ============================================

fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Execute command
    let result = match cli.command {
        Commands::Echo {
            config,
            port,
            clients,
            messages,
            size,
        } => cmd_echo(&config, demo::EchoOptions {
            port,
            clients,
            messages,
            size,
        }),
        Commands::Validate { config } => {
            init_logging("info");
            cmd_validate(&config)
        }
        Commands::Defaults => {
            print!("{}", BindingConfig::default().to_toml());
            Ok(())
        }
    };

    // Handle errors
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

// ============================================
// Commands
// ============================================

/// Runs the echo demo.
fn cmd_echo(config_path: &Path, options: demo::EchoOptions) -> anyhow::Result<()> {
    let config = load_or_default_config(config_path)?;
    init_logging(&config.logging.level);

    info!(
        port = options.port,
        clients = options.clients,
        messages = options.messages,
        size = options.size,
        "Starting echo demo"
    );
    let report = demo::run(&options, config)?;

    println!();
    println!("✅ Echo demo finished");
    println!("════════════════════════════════════════");
    println!("   Accepted:    {}", report.accepted);
    println!("   Echoed:      {}", report.echoed);
    println!("   Collected:   {}", report.collected);
    println!("   Heartbeats:  {}", report.heartbeats);
    println!("════════════════════════════════════════");
    println!();

    Ok(())
}

/// Validates configuration file.
fn cmd_validate(config_path: &Path) -> anyhow::Result<()> {
    if !config_path.exists() {
        println!("⚠️  Config file not found: {}", config_path.display());
        println!("   Default values will be used.");
        return Ok(());
    }

    let config = BindingConfig::load(config_path)?;

    println!("✅ Configuration is valid");
    println!();
    println!("Logging:");
    println!("   Level:           {}", config.logging.level);
    println!();
    println!("Socket:");
    println!("   Send Blocking:   {}", config.socket.send_blocking);
    println!("   Recv Blocking:   {}", config.socket.recv_blocking);
    println!("   Backlog:         {}", config.socket.default_backlog);
    println!();
    println!("Multiplexer:");
    println!("   GC On Wait:      {}", config.multiplexer.gc_on_wait);
    println!();
    println!("Signals:");
    println!("   Install:         {}", config.signals.install_handlers);
    println!();

    Ok(())
}

// ============================================
// Helper Functions
// ============================================

/// Loads config or returns default.
fn load_or_default_config(path: &Path) -> anyhow::Result<BindingConfig> {
    if path.exists() {
        Ok(BindingConfig::load(path)?)
    } else {
        Ok(BindingConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_echo_defaults() {
        let cli = Cli::parse_from(["udtbind-cli", "echo"]);
        match cli.command {
            Commands::Echo { port, clients, .. } => {
                assert_eq!(port, 9000);
                assert_eq!(clients, 3);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
