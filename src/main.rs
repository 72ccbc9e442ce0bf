use std::{path::PathBuf, sync::Arc};

use anyhow::{Context as _, Result};
use clap::Parser;
use futures_util::FutureExt as _;
use tokio::sync::oneshot;

use tokio_plcsim::{
    config::SimulatorConfig,
    server::{
        tcp::{accept_tcp_connection, bind, Server},
        Terminated,
    },
    store::{register_number, RegisterStore, Table},
};

/// Registers shown per table by the status task.
const STATUS_REGISTERS: usize = 10;

/// Modbus TCP PLC simulator
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overrides the configuration
    #[arg(short, long)]
    listen: Option<std::net::SocketAddr>,

    /// Only answer requests for this unit id
    #[arg(long, conflicts_with = "any_unit")]
    unit_id: Option<u8>,

    /// Answer requests for every unit id
    #[arg(long)]
    any_unit: bool,
}

fn log_status(store: &RegisterStore) {
    for table in [Table::Holding, Table::Input] {
        let count = store.capacity(table).min(STATUS_REGISTERS) as u16;
        match store.peek(table, 0, count) {
            Ok(values) => log::info!(
                "{table} registers {}..{}: {values:?}",
                register_number(table, 0),
                register_number(table, count - 1)
            ),
            Err(err) => log::error!("Status snapshot failed: {err}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulatorConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {path:?}"))?,
        None => SimulatorConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if args.any_unit {
        config.unit_id = None;
    } else if let Some(unit_id) = args.unit_id {
        config.unit_id = Some(unit_id);
    }

    let store = Arc::new(config.build_store()?);
    let dispatcher = config.build_dispatcher(Arc::clone(&store))?;

    let listener = bind(config.listen)
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    let server = Server::new(listener);
    log::info!(
        "Modbus TCP simulator listening on {} (unit id {:?}, {} holding / {} input registers)",
        server.local_addr()?,
        config.unit_id,
        store.capacity(Table::Holding),
        store.capacity(Table::Input)
    );
    log_status(&store);

    if let Some(interval) = config.status_interval()? {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                interval.tick().await;
                log_status(&store);
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {err}");
            return;
        }
        log::info!("Ctrl-C received, shutting down");
        let _ = shutdown_tx.send(());
    });

    let on_connected = move |stream, socket_addr| {
        let dispatcher = dispatcher.clone();
        async move { accept_tcp_connection(stream, socket_addr, move |_| Ok(Some(dispatcher.clone()))) }
    };
    let on_process_error = |err: std::io::Error| {
        log::warn!("Connection closed with error: {err}");
    };

    match server
        .serve_until(&on_connected, on_process_error, shutdown_rx.map(|_| ()))
        .await?
    {
        Terminated::Finished => log::info!("Server finished"),
        Terminated::Aborted => log::info!("Server stopped"),
    }
    Ok(())
}
