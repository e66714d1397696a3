// src/main.rs
//! CVM node
//!
//! Hosts a deployment context with the synchronizer manager and the dynamic
//! component creator, and serves remote peers when running distributed.

use anyhow::Result;
use cvm_runtime::cvm::{Cvm, DynamicComponentCreator};
use cvm_runtime::observability::{init_metrics, init_tracing};
use cvm_runtime::sync::SynchronizerManager;
use cvm_runtime::utils::config::CvmConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = CvmConfig::load()?;

    init_tracing(&config.logging)?;
    init_metrics(&config.metrics)?;

    info!("Starting CVM node v{}", cvm_runtime::VERSION);
    info!("Configuration loaded: {:?}", config);

    let cvm = Cvm::new(config)?;

    SynchronizerManager::install(&cvm).await?;
    DynamicComponentCreator::install(&cvm).await?;

    if cvm.is_distributed() {
        let addr = cvm.start_transport().await?;
        info!("Node {} serving peers on {}", cvm.node_id(), addr);
    }

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    match cvm.shutdown().await {
        Ok(()) => {
            info!("Node stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Shutdown error: {}", e);
            Err(e.into())
        }
    }
}
