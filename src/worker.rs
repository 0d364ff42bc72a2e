use std::time::Duration;

use tokio::sync::watch;

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
}

/// Start a worker pool on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled.
pub fn run_pool(
    orchestrator: Orchestrator,
    shutdown: watch::Receiver<bool>,
    settings: PoolSettings,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.worker_count.max(1))
        .thread_name("queue-worker")
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("worker-pool".into())
        .spawn(move || {
            runtime.block_on(async {
                let mut handles = Vec::with_capacity(settings.worker_count);

                for id in 0..settings.worker_count {
                    let worker = orchestrator.for_worker(format!("worker-{id}"));
                    handles.push(tokio::spawn(run(
                        id,
                        worker,
                        settings.clone(),
                        shutdown.clone(),
                    )));
                }

                tracing::info!("Queue worker pool started ({} workers)", settings.worker_count);

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("Queue worker pool stopped");
            });
        })
}

/// A single worker loop: drain batches while work is available, otherwise sleep.
pub async fn run(
    id: usize,
    orchestrator: Orchestrator,
    settings: PoolSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Worker {id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match orchestrator.process_batch(settings.batch_size).await {
            Ok(summary) if summary.claimed > 0 => {
                tracing::debug!("Worker {id} batch: {summary:?}");
                continue;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!("Worker {id} halted batch on storage error: {e}");
            }
        }

        // One worker is enough to sweep for stuck entries.
        if id == 0 {
            match orchestrator.reap_stale().await {
                Ok(0) => {}
                Ok(n) => tracing::warn!("Worker {id} reaped {n} stuck entries"),
                Err(e) => tracing::error!("Worker {id} stale sweep failed: {e}"),
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(settings.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!("Worker {id} stopped");
}
