//! FrostKV - An In-Memory Key-Value Store with Snapshot Persistence
//!
//! This is the main entry point for the FrostKV server.
//! It restores persisted state, starts the worker and the persistence driver,
//! and handles incoming connections.

use anyhow::Context;
use frostkv::commands::Processor;
use frostkv::config::{help_text, CliAction, ServerConfig};
use frostkv::connection::{handle_connection, ConnectionStats, Timeouts};
use frostkv::persistence::{restore, PersistenceDriver};
use frostkv::worker::{self, WorkerHandle};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &ServerConfig) {
    println!(
        r#"
   ___               _   _  ____   __
  | __| _ ___  ___ _| |_| |/ /\ \ / /
  | _| '_/ _ \(_-<|_   _| ' <  \ V /
  |_||_| \___//__/  |_| |_|\_\  \_/

FrostKV v{} - In-Memory Key-Value Store
──────────────────────────────────────────────────────────────
Server started on {}
Datasets: {}   Append log: {}   Clone file: {}
Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        frostkv::VERSION,
        config.bind_address(),
        config.databases,
        config.persist.append_file.display(),
        config.persist.clone_file.display(),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = match ServerConfig::from_args(std::env::args().skip(1)) {
        Ok(CliAction::Run(config)) => config,
        Ok(CliAction::Help) => {
            println!("{}", help_text());
            return Ok(());
        }
        Ok(CliAction::Version) => {
            println!("FrostKV version {}", frostkv::VERSION);
            return Ok(());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("{}", help_text());
            std::process::exit(1);
        }
    };

    // Set up logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    // The worker owns every dataset; writes flow out to the persistence driver
    let (records_tx, records_rx) = mpsc::unbounded_channel();
    let processor = Processor::new(config.databases).with_records(records_tx);
    let (worker, _worker_task) = worker::spawn(processor);

    if config.persist.restore {
        let (from_clone, from_log) = restore(
            &worker,
            &config.persist.clone_file,
            &config.persist.append_file,
        )
        .await
        .context("failed to restore persisted state")?;
        if from_clone.rejected + from_log.rejected > 0 {
            warn!(
                rejected = from_clone.rejected + from_log.rejected,
                "Restore finished with rejected frames"
            );
        }
    } else {
        info!("Startup restore disabled");
    }

    let mut driver = PersistenceDriver::new(worker.clone(), records_rx, config.persist.clone())
        .await
        .context("failed to open the append log")?;

    // Compact whatever was replayed before accepting new writes
    let outcome = driver
        .clone_cycle()
        .await
        .context("initial snapshot failed")?;
    info!(
        committed = outcome.committed,
        entries = outcome.entries,
        "Initial snapshot finished"
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let persistence = tokio::spawn(driver.run(async move {
        let _ = stop_rx.await;
    }));

    // Create connection statistics
    let stats = Arc::new(ConnectionStats::new());
    let timeouts = Timeouts {
        read: config.read_timeout,
        write: config.write_timeout,
    };

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    print_banner(&config);
    info!("Listening on {}", config.bind_address());

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    // Main accept loop
    tokio::select! {
        _ = accept_loop(listener, worker, Arc::clone(&stats), timeouts) => {}
        _ = shutdown => {}
    }

    // Let the driver write out everything still buffered
    let _ = stop_tx.send(());
    match persistence.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Final append log flush failed"),
        Err(e) => error!(error = %e, "Persistence task panicked"),
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        "Server shutdown complete"
    );
    Ok(())
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    worker: WorkerHandle,
    stats: Arc<ConnectionStats>,
    timeouts: Timeouts,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let worker = worker.clone();
                let stats = Arc::clone(&stats);

                // Spawn a task to handle this connection
                tokio::spawn(async move {
                    handle_connection(stream, addr, worker, stats, timeouts).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
