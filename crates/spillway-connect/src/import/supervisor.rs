//! Import supervisor
//!
//! Schedules importers for one worker. For every importer it:
//!
//! 1. builds the formatter (configuration errors surface here, before any
//!    claim is taken or task spawned),
//! 2. claims the resource in the shared [`ResourceRegistry`] (losing the race
//!    is not an error; the importer simply does not start),
//! 3. spawns a task running `accept()` under an [`ImporterLifecycle`],
//! 4. moves the lifecycle to `Stopped` and only then drops the claim, on every
//!    exit path including a panicking `accept()`.

use super::lifecycle::{ImporterLifecycle, ImporterPhase};
use super::registry::{ResourceClaim, ResourceRegistry, WorkerId};
use super::resource::ResourceId;
use crate::error::{ConnectorError, ConnectorResult};
use crate::format::FormatErrorPolicy;
use crate::metrics::{ImportMetrics, ImportMetricsSnapshot};
use crate::traits::importer::{context_for, Importer};
use crate::traits::retry::RetryConfig;
use crate::traits::writer::RowWriter;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-importer scheduling options
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Destination table
    pub table: String,
    pub on_format_error: FormatErrorPolicy,
    pub write_retry: RetryConfig,
}

impl ImportOptions {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            on_format_error: FormatErrorPolicy::default(),
            write_retry: RetryConfig::default(),
        }
    }

    /// Set the format error policy (builder pattern)
    pub fn with_policy(mut self, policy: FormatErrorPolicy) -> Self {
        self.on_format_error = policy;
        self
    }

    /// Set the write retry policy (builder pattern)
    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }
}

/// Control handle for a scheduled importer
#[derive(Clone)]
pub struct ImporterHandle {
    resource: ResourceId,
    name: String,
    lifecycle: Arc<ImporterLifecycle>,
    importer: Arc<dyn Importer>,
    metrics: Arc<ImportMetrics>,
}

impl ImporterHandle {
    pub fn resource_id(&self) -> &ResourceId {
        &self.resource
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase(&self) -> ImporterPhase {
        self.lifecycle.phase()
    }

    /// Request stop. Idempotent; valid in any phase.
    pub fn stop(&self) {
        if self.lifecycle.phase() != ImporterPhase::Stopped {
            debug!(resource = %self.resource, importer = %self.name, "Stop requested");
        }
        self.lifecycle.request_stop();
        self.importer.stop();
    }

    /// Resolves once the importer reached `Stopped`
    pub async fn stopped(&self) {
        self.lifecycle.wait_stopped().await
    }

    pub fn metrics(&self) -> ImportMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl std::fmt::Debug for ImporterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImporterHandle")
            .field("resource", &self.resource)
            .field("name", &self.name)
            .field("phase", &self.phase())
            .finish()
    }
}

struct Scheduled {
    handle: ImporterHandle,
    task: JoinHandle<ConnectorResult<()>>,
}

/// Marks the lifecycle stopped, then releases the claim. Field order matters:
/// `Drop::drop` runs before the fields are dropped.
struct RunGuard {
    lifecycle: Arc<ImporterLifecycle>,
    _claim: ResourceClaim,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.lifecycle.finish();
    }
}

/// Runs importers on behalf of one worker
pub struct ImportSupervisor {
    worker_id: WorkerId,
    registry: Arc<ResourceRegistry>,
    writer: Arc<dyn RowWriter>,
    scheduled: Mutex<HashMap<ResourceId, Scheduled>>,
}

impl ImportSupervisor {
    pub fn new(
        worker_id: WorkerId,
        registry: Arc<ResourceRegistry>,
        writer: Arc<dyn RowWriter>,
    ) -> Self {
        Self {
            worker_id,
            registry,
            writer,
            scheduled: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Schedule an importer.
    ///
    /// Returns `Ok(None)` if another instance owns the resource, and an error
    /// if the importer's formatter configuration is invalid. In both cases
    /// `accept()` is never invoked.
    pub fn schedule(
        &self,
        importer: Arc<dyn Importer>,
        options: ImportOptions,
    ) -> ConnectorResult<Option<ImporterHandle>> {
        let resource = importer.resource_id().clone();
        let name = importer.name().to_string();

        let lifecycle = Arc::new(ImporterLifecycle::new());
        let metrics = Arc::new(ImportMetrics::default());
        let ctx = context_for(importer.as_ref(), options.table.clone(), self.writer.clone())?
            .with_policy(options.on_format_error)
            .with_write_retry(options.write_retry)
            .with_stop_signal(lifecycle.stop_signal().clone())
            .with_metrics(metrics.clone());

        let Some(claim) = self.registry.try_claim(&resource, &self.worker_id) else {
            debug!(
                resource = %resource,
                importer = %name,
                worker = %self.worker_id,
                "Resource owned elsewhere, not starting importer"
            );
            return Ok(None);
        };

        let handle = ImporterHandle {
            resource: resource.clone(),
            name: name.clone(),
            lifecycle: lifecycle.clone(),
            importer: importer.clone(),
            metrics,
        };

        let guard = RunGuard {
            lifecycle: lifecycle.clone(),
            _claim: claim,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            if !lifecycle.begin_run() {
                debug!(resource = %resource, importer = %name, "Stopped before start");
                return Ok(());
            }

            info!(
                resource = %resource,
                importer = %name,
                table = %ctx.table(),
                "Importer starting"
            );
            let result = importer.accept(&ctx).await;
            match &result {
                Ok(()) => info!(
                    resource = %resource,
                    importer = %name,
                    rows = ctx.metrics().snapshot().rows_written,
                    "Importer finished"
                ),
                Err(e) => error!(
                    resource = %resource,
                    importer = %name,
                    error = %e,
                    "Importer failed"
                ),
            }
            result
        });

        // an entry left for this resource belongs to an instance that has
        // already released its claim; its result is dropped with it
        self.scheduled.lock().insert(
            handle.resource.clone(),
            Scheduled {
                handle: handle.clone(),
                task,
            },
        );
        Ok(Some(handle))
    }

    /// Handle of a scheduled importer
    pub fn handle(&self, resource: &ResourceId) -> Option<ImporterHandle> {
        self.scheduled.lock().get(resource).map(|s| s.handle.clone())
    }

    /// Handles of every importer scheduled and not yet joined
    pub fn handles(&self) -> Vec<ImporterHandle> {
        self.scheduled
            .lock()
            .values()
            .map(|s| s.handle.clone())
            .collect()
    }

    /// Wait for an importer's task to finish and collect its result. The claim
    /// has been released by the time this returns.
    pub async fn join(&self, resource: &ResourceId) -> Option<ConnectorResult<()>> {
        let scheduled = self.scheduled.lock().remove(resource)?;
        Some(Self::join_task(&scheduled.handle, scheduled.task).await)
    }

    /// Stop one importer and wait for it
    pub async fn stop(&self, resource: &ResourceId) -> Option<ConnectorResult<()>> {
        self.handle(resource)?.stop();
        self.join(resource).await
    }

    /// Stop every importer and wait for all of them
    pub async fn stop_all(&self) -> Vec<(ResourceId, ConnectorResult<()>)> {
        let drained: Vec<Scheduled> = self.scheduled.lock().drain().map(|(_, s)| s).collect();
        for s in &drained {
            s.handle.stop();
        }

        let mut results = Vec::with_capacity(drained.len());
        for s in drained {
            let result = Self::join_task(&s.handle, s.task).await;
            results.push((s.handle.resource.clone(), result));
        }
        info!(worker = %self.worker_id, count = results.len(), "All importers stopped");
        results
    }

    async fn join_task(
        handle: &ImporterHandle,
        task: JoinHandle<ConnectorResult<()>>,
    ) -> ConnectorResult<()> {
        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    resource = %handle.resource,
                    importer = %handle.name,
                    error = %e,
                    "Importer task aborted"
                );
                Err(ConnectorError::Internal(format!(
                    "importer task for {} did not complete: {}",
                    handle.resource, e
                )))
            }
        }
    }
}
