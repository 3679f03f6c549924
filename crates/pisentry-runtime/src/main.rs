//! pisentry: presence-aware security camera daemon.
//!
//! Arms itself when no trusted device has been seen on the air for a while,
//! captures on motion, double-checks with an ARP probe and alerts over
//! Telegram.

use clap::Parser;

use pisentry_net::{InterfaceInspector, build_capture_filter};

mod alarm;
mod camera;
mod cli;
mod commands;
mod config;
mod daemon;
mod notifier;
mod pipeline;
mod preflight;
mod presence;
mod store;
mod supervisor;
mod telegram;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let command = args.command.unwrap_or(cli::Command::Run);

    let config = config::Config::load(&args.config)?;
    init_logging(args.debug || config.debug_mode);

    match command {
        cli::Command::Run => {
            tracing::info!("pisentry starting");
            let inspector = InterfaceInspector::default();
            let report = preflight::run_preflight(&inspector, &config.network_interface, true);
            report.log();
            let Some(ctx) = report.into_context() else {
                tracing::error!("preflight failed, run `pisentry check` for details");
                std::process::exit(1);
            };
            daemon::run_daemon(config, &args.data_file, ctx).await?;
        }
        cli::Command::Check => {
            let inspector = InterfaceInspector::default();
            let report = preflight::run_preflight(&inspector, &config.network_interface, true);
            report.print();
            let code = report.exit_code();
            if code != 0 {
                std::process::exit(code);
            }
        }
        cli::Command::Filter => {
            let own_mac = InterfaceInspector::default().mac_address(&config.network_interface)?;
            println!("{}", build_capture_filter(&config.trusted_macs()?, &own_mac));
        }
    }

    Ok(())
}

/// `PISENTRY_LOG`, then `RUST_LOG`, then `debug` or `info`.
fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    let filter = std::env::var("PISENTRY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| fallback.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}
