use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::{PipelineContext, Reaper, ReaperConfig, Worker, WorkerConfig};

/// N independent workers sharing one store and queue, plus an optional reaper
pub struct WorkerPool {
    ctx: PipelineContext,
    config: WorkerConfig,
    concurrency: usize,
    id_prefix: String,
    reaper: Option<ReaperConfig>,
}

impl WorkerPool {
    pub fn new(
        ctx: PipelineContext,
        config: WorkerConfig,
        concurrency: usize,
        id_prefix: impl Into<String>,
    ) -> Self {
        Self {
            ctx,
            config,
            concurrency: concurrency.max(1),
            id_prefix: id_prefix.into(),
            reaper: None,
        }
    }

    pub fn with_reaper(mut self, config: ReaperConfig) -> Self {
        self.reaper = Some(config);
        self
    }

    pub fn worker_ids(&self) -> Vec<String> {
        (1..=self.concurrency)
            .map(|n| format!("{}-{n}", self.id_prefix))
            .collect()
    }

    /// Start every loop; they stop once `true` is sent on `shutdown`
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> PoolHandle {
        let mut tasks = Vec::with_capacity(self.concurrency + 1);

        for id in self.worker_ids() {
            let worker = Worker::new(id, self.ctx.clone(), self.config.clone(), shutdown.clone());
            tasks.push(tokio::spawn(worker.run()));
        }

        if let Some(config) = self.reaper {
            let reaper = Reaper::new(self.ctx.clone(), config);
            tasks.push(tokio::spawn(reaper.run(shutdown.clone())));
        }

        info!(
            workers = self.concurrency,
            prefix = %self.id_prefix,
            "Worker pool started"
        );
        PoolHandle { tasks }
    }
}

pub struct PoolHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PoolHandle {
    /// Wait for every loop to finish
    pub async fn join(self) {
        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Pool task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::Harness;
    use payflow_ledger::SubmitOutcome;
    use payflow_store::PaymentStore;
    use payflow_types::IntentStatus;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    async fn wait_until_terminal(h: &Harness, ids: &[String]) {
        let all_terminal = async {
            loop {
                let mut done = true;
                for id in ids {
                    let intent = h.store.get(id).await.unwrap().unwrap();
                    done &= intent.status.is_terminal() && intent.notified_at.is_some();
                }
                if done {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), all_terminal)
            .await
            .expect("intents did not settle");
    }

    #[tokio::test]
    async fn test_worker_ids() {
        let h = Harness::new().await;
        let pool = WorkerPool::new(h.ctx.clone(), WorkerConfig::default(), 3, "node-a");
        assert_eq!(pool.worker_ids(), vec!["node-a-1", "node-a-2", "node-a-3"]);
    }

    #[tokio::test]
    async fn test_pool_settles_every_intent_once() {
        let h = Harness::new().await;
        h.ledger
            .script_submits([
                SubmitOutcome::Retryable("busy".to_string()),
                SubmitOutcome::Unknown { broadcast: true },
            ])
            .await;

        let mut ids = Vec::new();
        for n in 0..12 {
            ids.push(h.create(&format!("k{n}"), dec!(100)).await.id);
        }

        let (tx, rx) = watch::channel(false);
        let handle = WorkerPool::new(h.ctx.clone(), h.config.clone(), 4, "w").spawn(rx);

        wait_until_terminal(&h, &ids).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();

        for id in &ids {
            let intent = h.store.get(id).await.unwrap().unwrap();
            assert_eq!(intent.status, IntentStatus::Confirmed);
        }
        assert_eq!(h.ledger.broadcast_count().await, ids.len());
        assert_eq!(h.notifier.events().len(), ids.len());
    }
}
