use std::time::Duration;

use microbatch::{BatcherBuilder, SpawningProcessor, SubmitError, SubmitJob, TokioSpawner};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let batcher = BatcherBuilder::new(Duration::from_secs(1))
        .batch_size(4)
        .max_batches(3)
        .spawn(SpawningProcessor::<TokioSpawner>::new())
        .expect("valid batcher configuration");

    let client = batcher.clone();
    let client_handle = async move {
        let mut interval = tokio::time::interval(Duration::from_millis(150));
        let mut results = tokio::task::JoinSet::new();
        for n in 0_u64..40 {
            interval.tick().await;
            let job = SubmitJob::new(move || async move {
                tokio::time::sleep(Duration::from_millis(n % 5 * 20)).await;
                if n % 7 == 6 {
                    return Err(format!("record {n} rejected downstream"));
                }
                Ok(n * n)
            })
            .name(format!("square-{n}"));

            match client.submit(job) {
                Ok(handle) => {
                    tracing::info!(job = handle.name(), "Enqueued job");
                    results.spawn(async move {
                        let name = handle.name().to_owned();
                        match handle.await {
                            Ok(value) => tracing::info!(job = name, value, "Job complete"),
                            Err(error) => tracing::warn!(job = name, error = %error, "Job failed"),
                        }
                    });
                }
                Err(SubmitError::QueueFull { capacity }) => {
                    tracing::warn!(n, capacity, "Queue full, dropping job")
                }
                Err(error) => {
                    tracing::error!(error = %error, "Failed to enqueue job");
                    break;
                }
            }
        }
        results.join_all().await;
    };

    client_handle.await;
    batcher.shutdown().await;
    tracing::info!("all jobs drained");
}
