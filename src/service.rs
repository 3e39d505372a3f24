//! NATS request-reply surface for the coordinator.
//!
//! Transport glue only: payloads are JSON in and JSON out, errors are
//! replied as `{"error": {"kind", "message"}}` envelopes, and the core
//! components never see the wire.

use std::sync::Arc;
use std::time::Instant;

use async_nats::{Client, Subscriber};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::aggregator::{AggregationRequest, AggregationStrategy, Aggregator};
use crate::backend::InferenceBackend;
use crate::config::AppConfig;
use crate::error::Error;
use crate::registry::{ModelRegistry, RegistryStatus};
use crate::router::InferenceRouter;
use crate::types::request::InferenceRequest;

#[derive(Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
}

#[derive(Serialize)]
struct ErrorReply {
    error: ErrorBody,
}

/// Coordinator status reported on the status subject.
#[derive(Serialize)]
struct StatusReply {
    status: RegistryStatus,
    agent: String,
    models_loaded: usize,
    uptime_seconds: f64,
    backend_ready: bool,
    aggregation_strategies: Vec<&'static str>,
}

#[derive(Serialize)]
struct ModelsReply<'a> {
    models: Vec<&'a str>,
    metadata: &'a crate::types::tensor::SpecSnapshot,
}

fn json_reply<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize reply");
        br#"{"error":{"kind":"internal","message":"reply serialization failed"}}"#.to_vec()
    })
}

fn error_reply(error: &Error) -> Vec<u8> {
    json_reply(&ErrorReply {
        error: ErrorBody {
            kind: error.kind().to_string(),
            message: error.to_string(),
        },
    })
}

fn bad_request_reply(message: &str) -> Vec<u8> {
    json_reply(&ErrorReply {
        error: ErrorBody {
            kind: "bad_request".to_string(),
            message: message.to_string(),
        },
    })
}

pub(crate) async fn infer_reply(router: &InferenceRouter, payload: &[u8]) -> Vec<u8> {
    let request: InferenceRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return bad_request_reply(&format!("bad inference request: {e}")),
    };
    match router.route(&request).await {
        Ok(result) => json_reply(&result),
        Err(e) => error_reply(&e),
    }
}

pub(crate) async fn aggregate_reply(aggregator: &Aggregator, payload: &[u8]) -> Vec<u8> {
    let request: AggregationRequest = match serde_json::from_slice(payload) {
        Ok(request) => request,
        Err(e) => return bad_request_reply(&format!("bad aggregation request: {e}")),
    };
    match aggregator.aggregate(
        &request.results,
        request.aggregation_type,
        request.weights.as_deref(),
    ) {
        Ok(result) => json_reply(&result),
        Err(e) => error_reply(&e),
    }
}

fn models_reply(registry: &ModelRegistry) -> Vec<u8> {
    let snapshot = registry.snapshot();
    let mut models: Vec<&str> = snapshot.keys().map(String::as_str).collect();
    models.sort_unstable();
    json_reply(&ModelsReply {
        models,
        metadata: &snapshot,
    })
}

/// Which handler a subscription feeds.
#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Infer,
    Aggregate,
    Models,
    Status,
}

/// Serves the coordinator over NATS request-reply subjects.
pub struct CoordinatorService {
    client: Client,
    router: Arc<InferenceRouter>,
    aggregator: Arc<Aggregator>,
    registry: Arc<ModelRegistry>,
    backend: Arc<dyn InferenceBackend>,
    identity: String,
    infer_subject: String,
    aggregate_subject: String,
    models_subject: String,
    status_subject: String,
    workers: usize,
    start_time: Instant,
}

impl CoordinatorService {
    pub fn new(
        client: Client,
        router: Arc<InferenceRouter>,
        aggregator: Arc<Aggregator>,
        registry: Arc<ModelRegistry>,
        backend: Arc<dyn InferenceBackend>,
        config: &AppConfig,
    ) -> Self {
        Self {
            client,
            router,
            aggregator,
            registry,
            backend,
            identity: config.coordinator.identity.clone(),
            infer_subject: config.nats.infer_subject.clone(),
            aggregate_subject: config.nats.aggregate_subject.clone(),
            models_subject: config.nats.models_subject.clone(),
            status_subject: config.nats.status_subject.clone(),
            workers: config.coordinator.workers,
            start_time: Instant::now(),
        }
    }

    /// Subscribes every endpoint and serves until the subscriptions close.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let infer = self.client.subscribe(self.infer_subject.clone()).await?;
        let aggregate = self.client.subscribe(self.aggregate_subject.clone()).await?;
        let models = self.client.subscribe(self.models_subject.clone()).await?;
        let status = self.client.subscribe(self.status_subject.clone()).await?;

        info!(
            infer = %self.infer_subject,
            aggregate = %self.aggregate_subject,
            models = %self.models_subject,
            status = %self.status_subject,
            workers = self.workers,
            "Coordinator service listening"
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        tokio::try_join!(
            self.clone().serve(infer, Endpoint::Infer, semaphore.clone()),
            self.clone()
                .serve(aggregate, Endpoint::Aggregate, semaphore.clone()),
            self.clone().serve(models, Endpoint::Models, semaphore.clone()),
            self.clone().serve(status, Endpoint::Status, semaphore),
        )?;
        Ok(())
    }

    async fn serve(
        self: Arc<Self>,
        mut subscription: Subscriber,
        endpoint: Endpoint,
        semaphore: Arc<Semaphore>,
    ) -> anyhow::Result<()> {
        while let Some(message) = subscription.next().await {
            let permit = semaphore.clone().acquire_owned().await?;
            let service = self.clone();
            tokio::spawn(async move {
                let reply = service.handle(endpoint, &message.payload).await;
                if let Some(subject) = message.reply {
                    if let Err(e) = service.client.publish(subject, reply.into()).await {
                        error!(error = %e, "Failed to publish reply");
                    }
                }
                drop(permit);
            });
        }
        Ok(())
    }

    async fn handle(&self, endpoint: Endpoint, payload: &[u8]) -> Vec<u8> {
        match endpoint {
            Endpoint::Infer => infer_reply(&self.router, payload).await,
            Endpoint::Aggregate => aggregate_reply(&self.aggregator, payload).await,
            Endpoint::Models => models_reply(&self.registry),
            Endpoint::Status => self.status().await,
        }
    }

    async fn status(&self) -> Vec<u8> {
        let backend_ready = self.backend.is_ready().await.unwrap_or(false);
        json_reply(&StatusReply {
            status: self.registry.status(),
            agent: self.identity.clone(),
            models_loaded: self.registry.model_count(),
            uptime_seconds: self.start_time.elapsed().as_secs_f64(),
            backend_ready,
            aggregation_strategies: AggregationStrategy::ALL
                .iter()
                .map(AggregationStrategy::describe)
                .collect(),
        })
    }
}
