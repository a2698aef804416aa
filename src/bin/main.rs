use {
    clap::Parser,
    scrypt_pool_core::{config::Options, coinbase::CoinbaseBuilder, registry::TemplateRegistry, updater::BlockUpdater, HttpNodeClient},
    std::process,
    tokio_util::sync::CancellationToken,
    tracing::{error, info},
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(error) = run().await {
        error!("{error}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let options = Options::parse();
    let config = options.into_config()?;

    let node = HttpNodeClient::new(
        config.node_rpc_url.clone(),
        config.node_rpc_user.clone(),
        config.node_rpc_password.clone(),
    );

    let coinbase_builder = CoinbaseBuilder {
        central_wallet: config.central_wallet.clone(),
        aux_flags: Vec::new(),
        pool_tag: config.coinbase_extras.clone(),
        extranonce1_len: 4,
        extranonce2_len: 4,
    };

    let registry = TemplateRegistry::new(node, coinbase_builder, config.instance_id);
    let (updater, mut jobs_rx) = BlockUpdater::new(registry, config.prevhash_refresh, config.merkle_refresh);

    let shutdown = CancellationToken::new();
    let driver_shutdown = shutdown.clone();

    let driver = tokio::spawn(updater.run(driver_shutdown));

    let watcher_shutdown = shutdown.clone();
    let watcher = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = watcher_shutdown.cancelled() => return,
                result = jobs_rx.changed() => {
                    if result.is_err() {
                        return;
                    }
                    if let Some(notify) = jobs_rx.borrow().clone() {
                        info!(job_id = %notify.job_id, clean_jobs = notify.clean_jobs, "new template broadcast");
                    }
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    shutdown.cancel();

    driver.await?;
    watcher.await?;

    Ok(())
}
