use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jobflow::{
    BatchProcessor, Job, JobDefinition, JobManager, JobManagerConfig, Progress, Task, TaskBody,
    TaskContext, Worker, WorkerExt, WorkerRegistry,
};

const RECORDS: i64 = 40;

/// Walks through a fixed number of records.
struct ScanRecords;

#[async_trait]
impl TaskBody for ScanRecords {
    async fn count_total_items(&self, _task: &TaskContext<'_>) -> anyhow::Result<i64> {
        Ok(RECORDS)
    }

    async fn execute(&self, task: &TaskContext<'_>) -> anyhow::Result<()> {
        for record in 0..RECORDS {
            if !task.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
            if record % 10 == 9 {
                task.increment_skipped_items();
            } else {
                task.increment_processed_items();
            }
            task.report_progress();
        }
        Ok(())
    }
}

/// Stores records in batches.
struct StoreRecords;

#[async_trait]
impl TaskBody for StoreRecords {
    async fn count_total_items(&self, _task: &TaskContext<'_>) -> anyhow::Result<i64> {
        Ok(RECORDS)
    }

    async fn execute(&self, task: &TaskContext<'_>) -> anyhow::Result<()> {
        let mut stored = 0usize;
        let mut batches = BatchProcessor::new(8, |batch: Vec<i64>| {
            stored += batch.len();
            tracing::debug!(items = batch.len(), "Stored batch");
            Ok(())
        });
        for record in 0..RECORDS {
            if !task.is_running() {
                break;
            }
            batches.process(record)?;
            task.increment_processed_items();
        }
        batches.close()?;
        tracing::info!(stored, "Records stored");
        Ok(())
    }
}

struct ImportJob;

#[async_trait]
impl JobDefinition for ImportJob {
    async fn build_tasks(&self, job: &Job) -> anyhow::Result<()> {
        job.add_new_task("scan")?;
        let store = job.add_new_task("store")?;
        store.core().set_weight(2);
        Ok(())
    }

    fn on_end(&self, job: &Job) {
        tracing::info!(status = %job.core().status(), "Import finished");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = JobManagerConfig::from_env()?;

    eprintln!("jobflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Max job idle: {}s", config.max_job_idle.as_secs());
    eprintln!(
        "   Max concurrent jobs: {}",
        config
            .max_concurrent_jobs
            .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
    );

    let registry = Arc::new(WorkerRegistry::new());
    registry.register_worker("scan", || {
        Task::new(ScanRecords).with_progress_listener(Arc::new(|p: &Progress| {
            if p.processed_items % 10 == 0 {
                tracing::debug!(
                    processed = p.processed_items,
                    total = p.total_items,
                    remaining_ms = ?p.remaining_ms,
                    "Scan progress"
                );
            }
        }))
    });
    registry.register_worker("store", || Task::new(StoreRecords));
    registry.register_job("import", || Job::new(ImportJob));

    let manager = JobManager::new(config, registry);

    let job = Arc::new(manager.create_job("import")?);
    manager.start_locked(Arc::clone(&job), "import").await?;

    // A second import under the same lock is refused while the first runs.
    let second = Arc::new(manager.create_job("import")?);
    if let Err(e) = manager.start_locked(Arc::clone(&second), "import").await {
        tracing::info!("Second import refused: {}", e);
    }

    while !job.wait_for(Duration::from_millis(250)).await && !job.core().is_ended() {
        let task = job
            .current_task()
            .map(|t| t.name().to_string())
            .unwrap_or_default();
        tracing::info!(progress = job.progress_percent(), task = %task, "Import running");
    }

    let snapshot = job.snapshot();
    tracing::info!(
        status = %snapshot.status,
        duration_ms = snapshot.duration_ms.unwrap_or_default(),
        "Import outcome"
    );
    if let Some(error) = snapshot.error_message {
        tracing::error!(error = %error, "Import failed");
    }
    println!("{}", serde_json::to_string_pretty(&manager.summary())?);

    manager.shutdown().await;
    Ok(())
}
