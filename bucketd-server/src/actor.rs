//! Single-writer store actor
//!
//! One task owns the bucket engine and its store; every pipeline talks
//! to it through a bounded channel. Operations are applied in channel
//! order, which makes same-key operations linearizable without any
//! locking inside the engine, and the bounded buffer is the
//! backpressure seam between connections and the store.
//!
//! Timestamps are taken when the actor dequeues an operation, so
//! `last_drip` always comes from a single clock.

use anyhow::{anyhow, Result};
use bucketd::{BucketEngine, BucketError, BucketParams, BucketView, MemoryStore, PutAmount, TakeOutcome};
use std::time::SystemTime;
use tokio::sync::{mpsc, oneshot};

/// Message types for the store actor
pub enum StoreMessage {
    Take {
        key: String,
        params: BucketParams,
        count: u64,
        response_tx: oneshot::Sender<Result<TakeOutcome, BucketError>>,
    },
    Put {
        key: String,
        params: BucketParams,
        amount: PutAmount,
        response_tx: oneshot::Sender<Result<BucketView, BucketError>>,
    },
    Status {
        key: String,
        params: BucketParams,
        response_tx: oneshot::Sender<Result<BucketView, BucketError>>,
    },
    StatusPrefix {
        prefix: String,
        limit: usize,
        /// Resolves rate parameters for each matched key, so per-key
        /// overrides hold within a scan
        params_for: Box<dyn Fn(&str) -> BucketParams + Send>,
        response_tx: oneshot::Sender<Result<Vec<(String, BucketView)>, BucketError>>,
    },
    Reset {
        key: String,
        response_tx: oneshot::Sender<Result<bool, BucketError>>,
    },
    /// Drain queued operations, persist the snapshot, then acknowledge
    Close {
        response_tx: oneshot::Sender<()>,
    },
}

/// Handle to communicate with the store actor
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreMessage>,
}

impl StoreHandle {
    pub async fn take(&self, key: String, params: BucketParams, count: u64) -> Result<TakeOutcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::Take {
            key,
            params,
            count,
            response_tx,
        })
        .await?;
        Ok(Self::recv(response_rx).await??)
    }

    pub async fn put(
        &self,
        key: String,
        params: BucketParams,
        amount: PutAmount,
    ) -> Result<BucketView> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::Put {
            key,
            params,
            amount,
            response_tx,
        })
        .await?;
        Ok(Self::recv(response_rx).await??)
    }

    pub async fn status(&self, key: String, params: BucketParams) -> Result<BucketView> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::Status {
            key,
            params,
            response_tx,
        })
        .await?;
        Ok(Self::recv(response_rx).await??)
    }

    pub async fn status_prefix(
        &self,
        prefix: String,
        limit: usize,
        params_for: impl Fn(&str) -> BucketParams + Send + 'static,
    ) -> Result<Vec<(String, BucketView)>> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::StatusPrefix {
            prefix,
            limit,
            params_for: Box::new(params_for),
            response_tx,
        })
        .await?;
        Ok(Self::recv(response_rx).await??)
    }

    pub async fn reset(&self, key: String) -> Result<bool> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::Reset { key, response_tx }).await?;
        Ok(Self::recv(response_rx).await??)
    }

    /// Close the store: queued operations finish first, then the
    /// snapshot is persisted
    pub async fn close(&self) -> Result<()> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(StoreMessage::Close { response_tx }).await?;
        Self::recv(response_rx).await
    }

    async fn send(&self, msg: StoreMessage) -> Result<()> {
        self.tx
            .send(msg)
            .await
            .map_err(|_| anyhow!("bucket store actor has shut down"))
    }

    async fn recv<T>(rx: oneshot::Receiver<T>) -> Result<T> {
        rx.await
            .map_err(|_| anyhow!("bucket store actor dropped the response channel"))
    }
}

/// The store actor
pub struct StoreActor;

impl StoreActor {
    /// Spawn the actor task owning `engine`
    pub fn spawn(buffer_size: usize, engine: BucketEngine<MemoryStore>) -> StoreHandle {
        let (tx, rx) = mpsc::channel(buffer_size);
        tokio::spawn(run_actor(rx, engine));
        StoreHandle { tx }
    }
}

async fn run_actor(mut rx: mpsc::Receiver<StoreMessage>, mut engine: BucketEngine<MemoryStore>) {
    while let Some(msg) = rx.recv().await {
        if let StoreMessage::Close { response_tx } = msg {
            // Stop accepting, drain what is already queued, then persist
            rx.close();
            while let Some(queued) = rx.recv().await {
                handle_op(&mut engine, queued);
            }
            persist(&engine);
            let _ = response_tx.send(());
            return;
        }
        handle_op(&mut engine, msg);
    }

    // All handles dropped without an explicit close
    persist(&engine);
    tracing::info!("bucket store actor shutting down");
}

fn handle_op(engine: &mut BucketEngine<MemoryStore>, msg: StoreMessage) {
    let now = SystemTime::now();
    // Ignore send errors - the requester may have gone away
    match msg {
        StoreMessage::Take {
            key,
            params,
            count,
            response_tx,
        } => {
            let _ = response_tx.send(engine.take(&key, &params, count, now));
        }
        StoreMessage::Put {
            key,
            params,
            amount,
            response_tx,
        } => {
            let _ = response_tx.send(engine.put(&key, &params, amount, now));
        }
        StoreMessage::Status {
            key,
            params,
            response_tx,
        } => {
            let _ = response_tx.send(engine.status(&key, &params, now));
        }
        StoreMessage::StatusPrefix {
            prefix,
            limit,
            params_for,
            response_tx,
        } => {
            let _ = response_tx.send(engine.status_prefix(&prefix, limit, now, params_for));
        }
        StoreMessage::Reset { key, response_tx } => {
            let _ = response_tx.send(engine.reset(&key));
        }
        StoreMessage::Close { response_tx } => {
            let _ = response_tx.send(());
        }
    }
}

fn persist(engine: &BucketEngine<MemoryStore>) {
    if let Err(e) = engine.store().persist() {
        tracing::error!("failed to persist bucket store snapshot: {}", e);
    }
}
