// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — console eSCL scanning client
//
// Entry point. Initialises logging, searches the network for scanners, walks
// the user through device and option selection, and saves every page.

mod cli;
mod console;
mod exit;
mod sink;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use scanwerk_core::diagnostics::{full_message, humanize_error};
use scanwerk_core::error::{Result, ScanError};
use scanwerk_escl::workflow::Termination;
use scanwerk_escl::{DeviceDiscovery, DeviceRegistry, HttpTransport, JobSessionManager, run_scan};

use cli::CommandLine;
use console::ConsoleSelector;
use sink::FileSink;

const PROGRESS_PERIOD: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CommandLine::parse_args();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Scanwerk starting");

    match run(&cli).await {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(e) => {
            report_error(&e);
            exit::exit_code(&e)
        }
    }
}

async fn run(cli: &CommandLine) -> Result<()> {
    let config = cli.resolve_config()?;
    tracing::debug!(config = %serde_json::to_string(&config)?, "configuration resolved");

    let registry = Arc::new(DeviceRegistry::new());
    let discovery = DeviceDiscovery::new(Arc::clone(&registry), &config);
    for url in &cli.device_urls {
        discovery.add_manual(url)?;
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            on_interrupt.cancel();
        }
    });

    let devices = if cli.no_discovery {
        registry.devices()
    } else {
        println!(
            "Searching for eSCL devices in network during {} seconds... Press Ctrl+C to stop searching.",
            config.discovery_timeout().as_secs()
        );
        let search = discovery.discover(None, &cancel);
        match console::with_progress(search, &mut std::io::stdout(), PROGRESS_PERIOD).await {
            Err(ScanError::SearchCanceled) => {
                println!("Searching is canceled.");
                return Err(ScanError::SearchCanceled);
            }
            other => other?,
        }
    };
    if devices.is_empty() {
        println!("Devices are not found.");
        return Err(ScanError::NoDevicesFound);
    }

    let transport = Arc::new(HttpTransport::new(&config)?);
    let manager = JobSessionManager::new(transport, registry, &config);
    let mut selector = ConsoleSelector::stdio();
    let mut sink = FileSink::new(&config.output_dir, config.file_prefix.clone(), std::io::stdout());

    let report = run_scan(&manager, &devices, &mut selector, &mut sink, &cancel).await?;
    match report.termination {
        Termination::Completed => {
            println!("Scan is completed.");
            Ok(())
        }
        Termination::Canceled => {
            println!("Scan is canceled after {} image(s).", report.images_saved);
            Err(ScanError::Canceled)
        }
        Termination::Failed(e) => {
            println!("Scan is failed: {e}");
            Err(e)
        }
    }
}

fn report_error(err: &ScanError) {
    tracing::error!(error = %full_message(err), "scan run failed");
    if matches!(
        err,
        ScanError::SearchCanceled | ScanError::NoDevicesFound | ScanError::Canceled
    ) {
        return;
    }
    let human = humanize_error(err);
    eprintln!("Error: {}", full_message(err));
    eprintln!("{} {}", human.message, human.suggestion);
}
