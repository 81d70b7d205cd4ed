//! Blob archiver daemon: syncs blob sidecars from the configured chain into
//! bundles on a Greenfield-backed bundle service, verifies the archive, and
//! serves the cached sidecars back over HTTP.

mod config;

use archiver::{quota, Assembler, Syncer, Verifier};
use bundle_client::{BundleClient, SpClient};
use catalog::Catalog;
use chain_source::ChainSource;
use clap::Parser;
use config::{Config, ENV_CONFIG_FILE_PATH};
use http_api::BlobService;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "blob_archiver",
    about = "Archives EIP-4844 blob sidecars into bundle-service bundles and verifies them"
)]
struct Cli {
    /// Path to the JSON config file; falls back to $CONFIG_FILE_PATH.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn config_path(cli: &Cli) -> Result<PathBuf, String> {
    if let Some(path) = &cli.config {
        return Ok(path.clone());
    }
    std::env::var(ENV_CONFIG_FILE_PATH)
        .map(PathBuf::from)
        .map_err(|_| "no config file: pass --config or set CONFIG_FILE_PATH".to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match config_path(&cli).and_then(|path| Config::from_file(&path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let _logging_guard = logging::init_tracing(&config.log_config);

    if let Err(e) = run(config).await {
        error!(error = %e, "Archiver failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), String> {
    let archiver_config = &config.syncer_config;
    std::fs::create_dir_all(&archiver_config.temp_dir)
        .map_err(|e| format!("failed to create temp dir: {e}"))?;

    let catalog = Catalog::open(&config.db_config.path, config.db_config.max_open_conns)
        .map_err(|e| format!("failed to open catalog: {e}"))?;

    let private_key = archiver_config
        .private_key_bytes()
        .map_err(|e| e.to_string())?;
    let bundle_client = Arc::new(
        BundleClient::new(
            archiver_config.bundle_service_endpoints[0].clone(),
            &private_key,
        )
        .map_err(|e| format!("failed to build bundle client: {e}"))?,
    );
    let chain = Arc::new(
        ChainSource::new(
            archiver_config.chain,
            archiver_config.rpc_endpoints[0].clone(),
            archiver_config.beacon_rpc_endpoints.first().cloned(),
        )
        .map_err(|e| format!("failed to build chain source: {e}"))?,
    );
    let sp_client = Arc::new(
        SpClient::new(archiver_config.chain_endpoint.clone())
            .map_err(|e| format!("failed to build sp client: {e}"))?,
    );

    let assembler = Assembler::new(
        catalog.clone(),
        bundle_client.clone(),
        archiver_config.bucket_name.clone(),
        archiver_config.temp_dir.clone(),
    );
    let mut syncer = Syncer::new(
        catalog.clone(),
        chain.clone(),
        assembler,
        bundle_client.clone(),
        archiver_config,
    );
    syncer
        .load_progress_and_resume()
        .map_err(|e| format!("failed to load sync progress: {e}"))?;
    let verifier = Verifier::new(
        catalog.clone(),
        chain,
        bundle_client.clone(),
        sp_client,
        archiver_config,
    );

    tokio::spawn(syncer.run());
    tokio::spawn(verifier.run());

    if archiver_config.metrics.enable {
        let address: SocketAddr = archiver_config
            .metrics
            .address
            .parse()
            .map_err(|e| format!("invalid metrics address: {e}"))?;
        tokio::spawn(async move {
            if let Err(e) = http_api::serve(http_api::metrics_router(), address).await {
                error!(error = %e, "Metrics server exited");
            }
        });
        if let Some(sp_endpoint) = &archiver_config.metrics.sp_endpoint {
            let quota_client = Arc::new(
                SpClient::new(sp_endpoint.clone())
                    .map_err(|e| format!("failed to build quota client: {e}"))?,
            );
            tokio::spawn(quota::monitor_quota(
                quota_client,
                archiver_config.bucket_name.clone(),
            ));
        }
    }

    let api_address: SocketAddr = config
        .api_config
        .address
        .parse()
        .map_err(|e| format!("invalid api address: {e}"))?;
    let blob_service = Arc::new(BlobService::new(
        catalog,
        bundle_client,
        archiver_config.bucket_name.clone(),
    ));
    tokio::spawn(async move {
        if let Err(e) = http_api::serve(http_api::router(blob_service), api_address).await {
            error!(error = %e, "API server exited");
        }
    });

    info!(
        chain = %archiver_config.chain,
        bucket = %archiver_config.bucket_name,
        start = archiver_config.start_block_id,
        "Blob archiver started"
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("failed to wait for shutdown signal: {e}"))?;
    info!("Shutting down");
    Ok(())
}
