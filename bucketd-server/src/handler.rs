//! Request handler
//!
//! Stateless per-request dispatcher: every decoded request produces
//! exactly one response carrying the same id. All bucket state lives
//! behind the store actor; the handler resolves the bucket type against
//! the registry snapshot current at dispatch time, applies overrides,
//! and maps engine outcomes onto wire bodies.

use crate::actor::StoreHandle;
use crate::metrics::Metrics;
use crate::registry::RegistryHandle;
use crate::types::{
    ErrorKind, Method, PutBody, Request, Response, ResponseBody, StatusBody, StatusItem, TakeBody,
};
use bucketd::{BucketView, PutAmount, TakeOutcome};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound on instances returned by a wildcard STATUS
pub const STATUS_SCAN_LIMIT: usize = 100;

struct Failure {
    kind: ErrorKind,
    message: String,
}

fn internal(e: anyhow::Error) -> Failure {
    Failure {
        kind: ErrorKind::Internal,
        message: e.to_string(),
    }
}

pub struct Handler {
    registry: RegistryHandle,
    store: StoreHandle,
    metrics: Arc<Metrics>,
}

impl Handler {
    pub fn new(registry: RegistryHandle, store: StoreHandle, metrics: Arc<Metrics>) -> Self {
        Handler {
            registry,
            store,
            metrics,
        }
    }

    /// Handle one request, always producing a response with its id
    pub async fn handle(&self, request: Request) -> Response {
        self.metrics.record_request(request.method);
        let id = request.id;

        match self.dispatch(request).await {
            Ok(body) => Response { id, body },
            Err(failure) => {
                self.metrics.record_error();
                match failure.kind {
                    ErrorKind::Internal => tracing::error!(id, "{}", failure.message),
                    _ => tracing::info!(id, "{}", failure.message),
                }
                Response::error(id, failure.kind, failure.message)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<ResponseBody, Failure> {
        let bucket = self.registry.get(&request.bucket).ok_or_else(|| Failure {
            kind: ErrorKind::UnknownBucketType,
            message: format!("unknown bucket type: {}", request.bucket),
        })?;

        if request.key.is_empty() {
            return Err(Failure {
                kind: ErrorKind::Validation,
                message: "key must not be empty".to_string(),
            });
        }
        if request.count == 0 && matches!(request.method, Method::Take | Method::Put | Method::Wait)
        {
            return Err(Failure {
                kind: ErrorKind::Validation,
                message: "count must be positive".to_string(),
            });
        }

        // Unlimited types never touch storage
        if bucket.unlimited {
            return Ok(unlimited_body(request.method, bucket.size, &request.key));
        }

        let params = bucket.effective_params(&request.key);
        let fused = fuse_key(&bucket.name, &request.key);

        match request.method {
            Method::Take => {
                let outcome = self
                    .store
                    .take(fused, params, request.count)
                    .await
                    .map_err(internal)?;
                if !outcome.conformant {
                    self.metrics.record_denied(&request.key);
                }
                Ok(take_body(outcome))
            }
            Method::Wait => {
                let mut outcome = self
                    .store
                    .take(fused.clone(), params, request.count)
                    .await
                    .map_err(internal)?;
                // One scheduled retry after the refill that satisfies the
                // count; a second deny is reported, never retried again
                if !outcome.conformant {
                    if let Some(delay) = outcome.retry_after {
                        tokio::time::sleep(delay).await;
                        outcome = self
                            .store
                            .take(fused, params, request.count)
                            .await
                            .map_err(internal)?;
                    }
                }
                if !outcome.conformant {
                    self.metrics.record_denied(&request.key);
                }
                Ok(take_body(outcome))
            }
            Method::Put => {
                let amount = if request.all {
                    PutAmount::Fill
                } else {
                    PutAmount::Count(request.count)
                };
                let view = self
                    .store
                    .put(fused, params, amount)
                    .await
                    .map_err(internal)?;
                Ok(ResponseBody::Put(put_body(view)))
            }
            Method::Status => {
                if let Some(prefix) = request.key.strip_suffix('*') {
                    let fused_prefix = fuse_key(&bucket.name, prefix);
                    let type_prefix = fuse_key(&bucket.name, "");

                    // Overrides bind to instance keys, so each matched
                    // entry resolves its own parameters, not the pattern's
                    let resolver_bucket = bucket.clone();
                    let resolver_prefix = type_prefix.clone();
                    let entries = self
                        .store
                        .status_prefix(fused_prefix, STATUS_SCAN_LIMIT, move |fused_key| {
                            let instance = fused_key
                                .strip_prefix(resolver_prefix.as_str())
                                .unwrap_or(fused_key);
                            resolver_bucket.effective_params(instance)
                        })
                        .await
                        .map_err(internal)?;

                    let items: BTreeMap<String, StatusItem> = entries
                        .into_iter()
                        .map(|(key, view)| {
                            let instance = key
                                .strip_prefix(&type_prefix)
                                .unwrap_or(&key)
                                .to_string();
                            (instance, status_item(view))
                        })
                        .collect();
                    Ok(ResponseBody::Status(StatusBody { items }))
                } else {
                    let view = self.store.status(fused, params).await.map_err(internal)?;
                    let mut items = BTreeMap::new();
                    items.insert(request.key.clone(), status_item(view));
                    Ok(ResponseBody::Status(StatusBody { items }))
                }
            }
            Method::Reset => {
                self.store.reset(fused).await.map_err(internal)?;
                // The bucket now reads as full
                Ok(ResponseBody::Put(PutBody {
                    remaining: params.size,
                    limit: params.size,
                    reset: unix_seconds(SystemTime::now()),
                }))
            }
        }
    }
}

/// Storage key for an instance: the type name and key fused so distinct
/// types never collide
fn fuse_key(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

fn unix_seconds(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64().ceil() as u64)
        .unwrap_or(0)
}

fn take_body(outcome: TakeOutcome) -> ResponseBody {
    ResponseBody::Take(TakeBody {
        conformant: outcome.conformant,
        remaining: outcome.view.remaining,
        limit: outcome.view.limit,
        reset: unix_seconds(outcome.view.reset),
    })
}

fn put_body(view: BucketView) -> PutBody {
    PutBody {
        remaining: view.remaining,
        limit: view.limit,
        reset: unix_seconds(view.reset),
    }
}

fn status_item(view: BucketView) -> StatusItem {
    StatusItem {
        remaining: view.remaining,
        limit: view.limit,
        reset: unix_seconds(view.reset),
    }
}

fn unlimited_body(method: Method, size: u64, key: &str) -> ResponseBody {
    let reset = unix_seconds(SystemTime::now());
    match method {
        Method::Take | Method::Wait => ResponseBody::Take(TakeBody {
            conformant: true,
            remaining: size,
            limit: size,
            reset,
        }),
        Method::Put | Method::Reset => ResponseBody::Put(PutBody {
            remaining: size,
            limit: size,
            reset,
        }),
        Method::Status => {
            // An unlimited type never creates instances, so a wildcard
            // query has nothing to enumerate; a singular query reads as
            // one full bucket
            let mut items = BTreeMap::new();
            if !key.ends_with('*') {
                items.insert(
                    key.to_string(),
                    StatusItem {
                        remaining: size,
                        limit: size,
                        reset,
                    },
                );
            }
            ResponseBody::Status(StatusBody { items })
        }
    }
}
