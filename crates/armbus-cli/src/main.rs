//! `armbus-cli` – armbus Command Line Interface
//!
//! Operator shell for the arm's hardware layer.  It:
//!
//! 1. Installs the `tracing` subscriber (`RUST_LOG`, `ARMBUS_LOG_FORMAT=json`,
//!    optional OTLP export via `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads `~/.armbus/config.toml` plus `ARMBUS_*` overrides.
//! 3. Builds the hardware backend, scans the buses and starts one connection
//!    supervisor per enabled bus.
//! 4. Drops the user into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to stop the supervisors and exit safely.

mod config;
mod repl;
mod session;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use armbus_runtime::telemetry::init_tracing;
use session::Session;

fn main() {
    // Held until exit so buffered spans are flushed.
    let _telemetry = init_tracing("armbus");

    print_banner();

    let cfg = match config::load() {
        Ok(cfg) => {
            println!(
                "  Config: {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };
    println!(
        "  Hardware {} – stepper bus {}, servo bus {}{}",
        cfg.hardware.hardware_version.to_string().bold(),
        on_off(cfg.hardware.stepper_bus_enabled),
        on_off(cfg.hardware.servo_bus_enabled),
        if cfg.fake_drivers { " (fake drivers)".yellow().to_string() } else { String::new() },
    );

    let mut session = match Session::start(&cfg) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}: {}", "Hardware error".red().bold(), e);
            std::process::exit(1);
        }
    };

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    let hardware = session.hardware.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping supervisors …".yellow().bold());
        hardware.shutdown();
        println!("{}", "  ✓ Connection supervision stopped.".green());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::run(&session, shutdown);
    session.shutdown();
}

fn on_off(enabled: bool) -> colored::ColoredString {
    if enabled { "on".green() } else { "off".dimmed() }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ _ _ __ _ __ ___ | |__  _   _ ___ "#.bold().cyan());
    println!("{}", r#"  / _` | '__| '_ ` _ \| '_ \| | | / __|"#.bold().cyan());
    println!("{}", r#" | (_| | |  | | | | | | |_) | |_| \__ \"#.bold().cyan());
    println!("{}", r#"  \__,_|_|  |_| |_| |_|_.__/ \__,_|___/"#.bold().cyan());
    println!();
    println!("  {} {}",
        "armbus".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Robot arm hardware supervisor");
    println!();
}
