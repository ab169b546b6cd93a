//! Minimal pubgate process on the in-memory broker.
//!
//! Publishes a sample every second and prints what comes back through a
//! durable subscription. Ctrl+C drains the queue and exits.
//!
//! ```bash
//! PUBGATE_PUBLISH_FAILURES_PATH=/tmp/pubgate_failures.tsv \
//!     cargo run -p pubgate-runtime --example simple_gateway
//! ```

use pubgate_runtime::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct Sample {
    request_id: String,
    samples: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let broker = MemoryBroker::default();

    RuntimeBuilder::new()
        .failure_sink(Arc::new(MemoryFailureSink::new(1_000)))
        .configure(Arc::new(broker), |gateway| async move {
            gateway
                .subscribe::<Sample, _>("samples.created", |sample: Sample| {
                    tracing::info!(request_id = %sample.request_id, samples = sample.samples, "Received sample");
                })
                .await?;

            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(1));
                for n in 0u32.. {
                    ticker.tick().await;
                    let sample = Sample {
                        request_id: format!("R{n}"),
                        samples: n,
                    };
                    if let Err(e) = gateway.publish("samples.created", sample) {
                        tracing::info!(error = %e, "Publisher loop stopping");
                        break;
                    }
                }
            });
            Ok(())
        })
        .await
}
