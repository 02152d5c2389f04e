use crate::activity::ActivityLog;
use crate::backend::{AuthContext, Backend};
use crate::types::DetectedService;
use log::debug;
use std::sync::Arc;

/// Runs version detection over a host's ports in fixed-size batches, one batch
/// at a time.
#[derive(Clone)]
pub struct VersionDetector {
    backend: Arc<dyn Backend>,
    batch_size: usize,
}

impl VersionDetector {
    pub fn new(backend: Arc<dyn Backend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Services from every batch that succeeded, in batch order. A failed batch
    /// is logged and its ports dropped; it is never retried. No deduplication.
    pub async fn detect(
        &self,
        ctx: &AuthContext,
        log: &ActivityLog,
        host: &str,
        ports: &[u16],
    ) -> Vec<DetectedService> {
        let batches: Vec<&[u16]> = ports.chunks(self.batch_size).collect();
        let total = batches.len();
        let mut services = Vec::new();

        if total == 0 {
            log.warn(format!("No ports to fingerprint on {}", host));
            return services;
        }

        log.info(format!(
            "Detecting service versions on {} ({} port(s), {} batch(es) of up to {})",
            host,
            ports.len(),
            total,
            self.batch_size
        ));

        for (index, batch) in batches.into_iter().enumerate() {
            log.info(format!("Version detection batch {}/{}: ports {:?}", index + 1, total, batch));

            match self.backend.detect_versions(ctx, host, batch).await {
                Ok(found) => {
                    debug!("Batch {}/{} on {} returned {} service(s)", index + 1, total, host, found.len());
                    services.extend(found);
                }
                Err(e) => {
                    log.warn(format!("Version detection batch {}/{} failed, skipping: {}", index + 1, total, e));
                }
            }
        }

        log.info(format!("Version detection finished: {} service(s) identified", services.len()));
        services
    }
}
