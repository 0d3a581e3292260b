use anyhow::Result;
use clap::Parser;

use bucketd_server::config::{Args, Config};
use bucketd_server::server::{ConfigSource, FileConfigSource, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors abort before anything binds or opens
    let config = Config::resolve(Args::parse())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("bucketd={}", config.log_level).parse()?)
                .add_directive(format!("bucketd_server={}", config.log_level).parse()?),
        )
        .init();

    if config.profile {
        tracing::warn!("--profile requested, but this build carries no embedded CPU profiler");
    }

    // Reload the file's bucket set periodically; a remote fetcher can be
    // wired in through Server::start by embedders
    let source: Option<Box<dyn ConfigSource>> = config.config_file.as_ref().map(|path| {
        Box::new(FileConfigSource::new(path.clone(), config.buckets.clone()))
            as Box<dyn ConfigSource>
    });
    if let Some(uri) = &config.remote_config_uri {
        tracing::warn!(
            %uri,
            "remoteConfigURI is configured but no remote fetcher is built in; \
             falling back to re-reading the config file"
        );
    }

    let server = Server::start(&config, source).await?;
    tracing::info!(
        addr = %server.local_addr(),
        protocol = %config.protocol,
        buckets = config.buckets.len(),
        "bucketd listening"
    );

    wait_for_signal().await;
    server.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("received interrupt");
}
