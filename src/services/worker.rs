use crate::services::upload_service::UploadService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Periodically reclaims abandoned part files in the default working directory.
pub struct BackgroundWorker {
    service: Arc<UploadService>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(service: Arc<UploadService>, shutdown: watch::Receiver<bool>) -> Self {
        let interval = service.config().sweep_interval;
        Self {
            service,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background sweeper started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    async fn perform_cleanup(&self) {
        tracing::info!("🧹 Sweeping stale part files...");

        match self.service.sweep_default_dir().await {
            Ok(report) => tracing::info!(
                "✅ Sweep completed: scanned={}, deleted={}, failed={}",
                report.scanned,
                report.deleted,
                report.failed
            ),
            Err(e) => tracing::error!("Sweep failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_worker_sweeps_and_stops() {
        let dir = TempDir::new().unwrap();
        let mut config = UploadConfig::development(dir.path());
        config.cleanup_max_age = Duration::ZERO;
        config.sweep_interval = Duration::from_millis(10);

        let work = dir.path().join(&config.default_target_dir);
        std::fs::create_dir_all(&work).unwrap();
        let stale = work.join("abandoned.part3");
        std::fs::write(&stale, b"x").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&stale)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(60))
            .unwrap();

        let service = Arc::new(UploadService::new(config));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(BackgroundWorker::new(service, rx).run());

        for _ in 0..100 {
            if !stale.exists() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!stale.exists());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
