//! msgbus-output: Measurement publisher binary
//!
//! Reads newline-delimited JSON measurements from stdin and publishes each
//! one to the message bus topic named after it.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msgbus_metadata::{FileConfigStore, OutputSettings};
use msgbus_output_lib::{run_server, Measurement, MsgbusOutput, ServerState};

#[derive(Parser, Debug)]
#[command(name = "msgbus-output")]
#[command(about = "Publishes measurements to message bus topics")]
struct Args {
    /// Path to the local settings file (YAML)
    #[arg(short, long, env = "MSGBUS_OUTPUT_SETTINGS")]
    settings: PathBuf,

    /// Path to the config store document (JSON)
    #[arg(short, long, env = "MSGBUS_OUTPUT_CONFIG")]
    config: PathBuf,

    /// Health server bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    health_addr: String,

    /// Measurements per write call
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Write a partial batch after this long without filling it
    #[arg(long, default_value_t = 1000)]
    flush_interval_ms: u64,

    /// Print the sample configuration and exit
    #[arg(long)]
    sample_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.sample_config {
        println!("{}", MsgbusOutput::sample_config());
        return Ok(());
    }

    let settings = OutputSettings::load(&args.settings)?;
    info!(instance = %settings.instance_name, "Loaded settings");

    let health_addr: SocketAddr = args.health_addr.parse()?;

    let mut output = MsgbusOutput::new(settings);
    output.init(&FileConfigStore::new(&args.config)).await?;

    let state = ServerState::new(
        output.settings().instance_name.clone(),
        output.connected_handle(),
    );
    tokio::spawn(async move {
        if let Err(e) = run_server(health_addr, state).await {
            error!(error = %e, "Health server failed");
        }
    });
    info!(addr = %health_addr, "Health server started");

    if let Err(e) = output.connect().await {
        error!(error = %e, "Failed to start publishers");
        output.close().await.ok();
        return Err(e.into());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        shutdown_tx.send(true).ok();
    });

    pump_stdin(
        &output,
        args.batch_size.max(1),
        Duration::from_millis(args.flush_interval_ms.max(1)),
        shutdown_rx,
    )
    .await;

    output.close().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Read measurements until EOF or shutdown, writing them in batches
async fn pump_stdin(
    output: &MsgbusOutput,
    batch_size: usize,
    flush_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<Measurement> = Vec::with_capacity(batch_size);
    let mut flush = tokio::time::interval(flush_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("Stopping input");
                break;
            }
            _ = flush.tick() => {
                if !batch.is_empty() {
                    write_batch(output, &mut batch).await;
                }
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Measurement>(line) {
                        Ok(measurement) => {
                            batch.push(measurement);
                            if batch.len() >= batch_size {
                                write_batch(output, &mut batch).await;
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping malformed measurement"),
                    }
                }
                Ok(None) => {
                    info!("End of input");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read input");
                    break;
                }
            }
        }
    }

    if !batch.is_empty() {
        write_batch(output, &mut batch).await;
    }
}

async fn write_batch(output: &MsgbusOutput, batch: &mut Vec<Measurement>) {
    match output.write(batch).await {
        Ok(report) => {
            for failure in &report.failures {
                warn!(
                    index = failure.index,
                    topic = %failure.topic,
                    kind = failure.error.kind(),
                    error = %failure.error,
                    "Measurement not published"
                );
            }
            debug!(
                attempted = report.attempted,
                published = report.published,
                "Batch written"
            );
        }
        Err(e) => {
            error!(error = %e, dropped = batch.len(), "Batch dropped");
        }
    }
    batch.clear();
}
