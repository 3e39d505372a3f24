//! Test Request Client
//!
//! Sends synthetic inference and aggregation requests to a running
//! coordinator over NATS request-reply and prints the replies.

use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    request_counter: u64,
}

impl RequestGenerator {
    fn new() -> Self {
        Self {
            rng: rand::thread_rng(),
            request_counter: 0,
        }
    }

    /// Generate an inference request with a random feature vector
    fn generate_infer(&mut self, model: &str, features: usize) -> serde_json::Value {
        self.request_counter += 1;
        let data: Vec<f32> = (0..features).map(|_| self.rng.gen_range(-1.0..1.0)).collect();
        json!({
            "model_name": model,
            "inputs": {"features": [data]}
        })
    }

    /// Generate an aggregation request over a few fake results
    fn generate_aggregate(&mut self, strategy: &str) -> serde_json::Value {
        let results: Vec<serde_json::Value> = (0..3)
            .map(|_| {
                let p0: f64 = self.rng.gen_range(0.0..1.0);
                json!({
                    "outputs": {"probabilities": [p0, 1.0 - p0]},
                    "metadata": {"execution_time_ms": self.rng.gen_range(20..500)}
                })
            })
            .collect();
        json!({
            "results": results,
            "aggregation_type": strategy
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().init();

    let nats_url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string());
    let model = std::env::var("MODEL").unwrap_or_else(|_| "text_classifier".to_string());
    let count: u64 = std::env::var("COUNT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);

    let client = async_nats::connect(&nats_url).await?;
    info!(nats_url = %nats_url, model = %model, count = count, "Connected, sending test requests");

    let mut generator = RequestGenerator::new();

    for i in 0..count {
        let request = generator.generate_infer(&model, 4);
        match client
            .request("inference.request", serde_json::to_vec(&request)?.into())
            .await
        {
            Ok(reply) => {
                let body: serde_json::Value = serde_json::from_slice(&reply.payload)?;
                info!(request = i, reply = %body, "Inference reply");
            }
            Err(e) => warn!(request = i, error = %e, "Inference request failed"),
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    for strategy in ["default", "ensemble", "weighted", "confidence"] {
        let request = generator.generate_aggregate(strategy);
        match client
            .request("inference.aggregate", serde_json::to_vec(&request)?.into())
            .await
        {
            Ok(reply) => {
                let body: serde_json::Value = serde_json::from_slice(&reply.payload)?;
                info!(strategy = strategy, reply = %body, "Aggregation reply");
            }
            Err(e) => warn!(strategy = strategy, error = %e, "Aggregation request failed"),
        }
    }

    let status = client.request("inference.status", "".into()).await?;
    let body: serde_json::Value = serde_json::from_slice(&status.payload)?;
    info!(status = %body, "Coordinator status");

    Ok(())
}
