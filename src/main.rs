use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use edgeplane::{
    builder::{BuilderSettings, ResourceGraphBuilder},
    cli::Cli,
    epoch::EpochDriver,
    inventory::FileInventorySource,
    observability::{init_observability, log_config_info},
    storage::{DiskStorage, FileStorage},
    tls::{CertificateProvisioner, LocalCaIssuer},
    xds::{self, DiscoveryServer, SnapshotCache},
    APP_NAME, VERSION,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const INVENTORY_QUEUE: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = Cli::parse().into_config();
    config.validate().context("invalid configuration")?;

    init_observability(&config.observability).context("failed to initialize observability")?;
    info!(app_name = APP_NAME, version = VERSION, "Starting edgeplane control plane");
    log_config_info(&config);

    // Without certificate storage no snapshot can ever be built.
    let storage: Arc<dyn FileStorage> = Arc::new(
        DiskStorage::open(&config.storage.directory)
            .await
            .context("failed to open certificate storage")?,
    );

    let provisioner = if config.tls.provision_certificates {
        let issuer = LocalCaIssuer::load_or_create(storage.as_ref())
            .await
            .context("failed to load the local certificate authority")?;
        Some(CertificateProvisioner::new(Arc::new(issuer), storage.clone(), config.tls.validity()))
    } else {
        None
    };

    let cache = Arc::new(SnapshotCache::new(config.xds.control_plane_id.clone()));
    let builder = ResourceGraphBuilder::new(storage.clone(), BuilderSettings::from(&config));
    let driver = EpochDriver::new(&config, builder, cache.clone(), provisioner);
    let server = DiscoveryServer::new(
        cache,
        config.proxy.node_hash.clone(),
        config.xds.control_plane_id.clone(),
    );

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(INVENTORY_QUEUE);

    let source = FileInventorySource::new(config.inventory.path.clone(), config.inventory.poll_interval());
    let source_task = tokio::spawn(source.run(events_tx, shutdown.clone()));
    let driver_task = tokio::spawn(driver.run(events_rx, shutdown.clone()));

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let server_token = shutdown.clone();
    let served = xds::serve(&config.xds, server, async move { server_token.cancelled().await }).await;

    shutdown.cancel();
    let _ = tokio::join!(source_task, driver_task);
    served.context("discovery server failed")?;

    info!("Control plane shutdown completed");
    Ok(())
}
