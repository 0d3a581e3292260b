//! Server lifecycle
//!
//! Startup ordering: open the store (snapshot load) -> spawn the store
//! actor -> build and publish the registry -> bind the listener ->
//! accept. Each accepted connection runs its own pipeline task; all
//! pipelines share one store handle and one registry handle.
//!
//! Shutdown: stop accepting, signal every pipeline to drain, give
//! in-flight requests a bounded grace period, abort stragglers, then
//! close the store (which drains queued operations and persists the
//! snapshot).

use crate::actor::{StoreActor, StoreHandle};
use crate::config::{BucketTypeConfig, Config, FileConfig};
use crate::handler::Handler;
use crate::metrics::Metrics;
use crate::pipeline::{self, PipelineError};
use crate::protocol::{Codec, FrameCodec};
use crate::registry::{Registry, RegistryHandle};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bucketd::{BucketEngine, MemoryStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

/// Result of one configuration fetch
pub enum ConfigUpdate {
    /// Nothing changed since the last fetch
    Unchanged,
    /// A new bucket-type set to validate and publish
    Buckets(BTreeMap<String, BucketTypeConfig>),
}

/// Periodic supplier of bucket-type configuration
///
/// The server polls the source on a fixed interval, validates whatever
/// it returns, and publishes it. A fetch or validation failure never
/// disturbs the currently published registry. Remote fetchers (HTTP,
/// service discovery) implement this trait; the bundled implementation
/// re-reads the local config file.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn fetch(&self) -> Result<ConfigUpdate>;
}

/// Config source that re-reads the YAML file's `buckets` map
pub struct FileConfigSource {
    path: PathBuf,
    last: Mutex<BTreeMap<String, BucketTypeConfig>>,
}

impl FileConfigSource {
    pub fn new(path: PathBuf, current: BTreeMap<String, BucketTypeConfig>) -> Self {
        FileConfigSource {
            path,
            last: Mutex::new(current),
        }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn fetch(&self) -> Result<ConfigUpdate> {
        let file = FileConfig::load(&self.path)?;
        let mut last = self.last.lock();
        if file.buckets == *last {
            return Ok(ConfigUpdate::Unchanged);
        }
        *last = file.buckets.clone();
        Ok(ConfigUpdate::Buckets(file.buckets))
    }
}

/// A running bucketd server
pub struct Server {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
    reload_task: Option<JoinHandle<()>>,
    store: StoreHandle,
    registry: RegistryHandle,
    metrics: Arc<Metrics>,
}

impl Server {
    /// Start a server from resolved configuration
    ///
    /// Fails (and the process should exit non-zero) on an invalid
    /// bucket-type set, an unreadable store snapshot, or a bind error.
    pub async fn start(
        config: &Config,
        config_source: Option<Box<dyn ConfigSource>>,
    ) -> Result<Server> {
        // Store first: nothing may accept traffic before it is ready
        let store_backend = MemoryStore::builder()
            .capacity(config.store_capacity)
            .cleanup_interval(config.store_cleanup_interval)
            .path(&config.db)
            .build()
            .with_context(|| format!("failed to open bucket store at {}", config.db.display()))?;
        tracing::info!(
            db = %config.db.display(),
            entries = store_backend.len(),
            "bucket store ready"
        );

        let store = StoreActor::spawn(config.buffer_size, BucketEngine::new(store_backend));

        let registry = RegistryHandle::new(
            Registry::build(&config.buckets).context("invalid bucket configuration")?,
        );

        let metrics = Arc::new(Metrics::new());
        let handler = Arc::new(Handler::new(
            registry.clone(),
            store.clone(),
            metrics.clone(),
        ));

        let addr = format!("{}:{}", config.hostname, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(
            listener,
            handler,
            Codec::new(config.protocol),
            FrameCodec::new(config.max_frame),
            metrics.clone(),
            shutdown_rx.clone(),
            config.grace_period,
        ));

        let reload_task = config_source.map(|source| {
            tokio::spawn(reload_loop(
                source,
                registry.clone(),
                config.remote_config_interval,
                shutdown_rx,
            ))
        });

        Ok(Server {
            local_addr,
            shutdown_tx,
            accept_task,
            reload_task,
            store,
            registry,
            metrics,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The live registry handle, for embedders that publish their own
    /// bucket-type sets
    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Graceful shutdown: drain connections, then close the store
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        self.accept_task
            .await
            .context("accept loop panicked during shutdown")?;
        if let Some(reload) = self.reload_task {
            reload.await.context("reload loop panicked")?;
        }

        self.store.close().await?;
        self.metrics.log_summary();
        tracing::info!("closed");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<Handler>,
    codec: Codec,
    frames: FrameCodec,
    metrics: Arc<Metrics>,
    mut shutdown_rx: watch::Receiver<bool>,
    grace: Duration,
) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer_addr)) => {
                        metrics.connection_opened();
                        tracing::debug!(%peer_addr, "connection accepted");

                        let handler = handler.clone();
                        let metrics = metrics.clone();
                        let shutdown_rx = shutdown_rx.clone();
                        connections.spawn(async move {
                            match pipeline::run(socket, handler, codec, frames, shutdown_rx).await {
                                Ok(()) => tracing::debug!(%peer_addr, "connection closed"),
                                Err(PipelineError::Protocol(e)) => {
                                    tracing::warn!(%peer_addr, "connection terminated: {e}");
                                }
                                Err(PipelineError::Io(e)) => {
                                    tracing::debug!(%peer_addr, "connection dropped: {e}");
                                }
                            }
                            metrics.connection_closed();
                        });
                    }
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }

                // Reap finished pipelines so the set stays bounded
                while connections.try_join_next().is_some() {}
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    drop(listener);
    drain_connections(&mut connections, grace).await;
}

/// Let draining pipelines finish within the grace period, then abort
/// whatever remains
async fn drain_connections(connections: &mut JoinSet<()>, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, connections.join_next()).await {
            Ok(Some(_)) => continue,
            Ok(None) => return,
            Err(_) => {
                let remaining = connections.len();
                if remaining > 0 {
                    tracing::warn!(remaining, "grace period expired, aborting connections");
                }
                connections.abort_all();
                while connections.join_next().await.is_some() {}
                return;
            }
        }
    }
}

async fn reload_loop(
    source: Box<dyn ConfigSource>,
    registry: RegistryHandle,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; the registry was published
    // at startup, so skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match source.fetch().await {
                    Ok(ConfigUpdate::Unchanged) => {
                        tracing::debug!("bucket configuration unchanged");
                    }
                    Ok(ConfigUpdate::Buckets(buckets)) => match Registry::build(&buckets) {
                        Ok(built) => {
                            tracing::info!(buckets = built.len(), "published new bucket registry");
                            registry.replace(built);
                        }
                        Err(e) => {
                            tracing::error!("rejected bucket configuration: {e}");
                        }
                    },
                    Err(e) => {
                        tracing::error!("bucket configuration fetch failed: {e}");
                    }
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(size: u64) -> BucketTypeConfig {
        BucketTypeConfig {
            size,
            per_interval: 1,
            interval: 1_000,
            unlimited: false,
            overrides: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_file_source_reports_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bucketd.yml");
        std::fs::write(
            &path,
            "db: /tmp/b.db\nbuckets:\n  ip:\n    size: 10\n    per_interval: 1\n    interval: 1000\n",
        )
        .unwrap();

        let mut initial = BTreeMap::new();
        initial.insert("ip".to_string(), bucket(10));
        let source = FileConfigSource::new(path.clone(), initial);

        // Same content as the initial set: unchanged
        assert!(matches!(
            source.fetch().await.unwrap(),
            ConfigUpdate::Unchanged
        ));

        std::fs::write(
            &path,
            "db: /tmp/b.db\nbuckets:\n  ip:\n    size: 20\n    per_interval: 1\n    interval: 1000\n",
        )
        .unwrap();

        match source.fetch().await.unwrap() {
            ConfigUpdate::Buckets(buckets) => assert_eq!(buckets["ip"].size, 20),
            ConfigUpdate::Unchanged => panic!("edit should be reported"),
        }

        // And the new set becomes the baseline
        assert!(matches!(
            source.fetch().await.unwrap(),
            ConfigUpdate::Unchanged
        ));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_an_error() {
        let source = FileConfigSource::new(PathBuf::from("/nonexistent/bucketd.yml"), BTreeMap::new());
        assert!(source.fetch().await.is_err());
    }
}
