//! Export manager
//!
//! Keeps one [`ExportStreamWorker`] per advertised source. Sources are routed
//! to a decoder by table name using the configured exporters; each worker gets
//! its own transport and a child of the manager's cancellation token, so a
//! single source can be invalidated or everything shut down at once.

use super::transport::ExportTransport;
use super::worker::{ExportSettings, ExportStreamWorker, WorkerReport};
use crate::error::{ConnectError, ConnectorStatus, Result};
use crate::metrics::{ExportMetrics, ExportMetricsSnapshot};
use crate::traits::decoder::RowDecoder;
use crate::traits::registry::DecoderFactory;
use futures::future::join_all;
use parking_lot::Mutex;
use spillway_protocol::{DataSourceDescriptor, SourceId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens a transport for a new worker
pub trait TransportFactory: Send + Sync {
    fn connect(&self, source: SourceId) -> Result<Box<dyn ExportTransport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(SourceId) -> Result<Box<dyn ExportTransport>> + Send + Sync,
{
    fn connect(&self, source: SourceId) -> Result<Box<dyn ExportTransport>> {
        self(source)
    }
}

/// Tables handled by one decoder factory
pub struct ExportRoute {
    pub name: String,
    pub tables: Vec<String>,
    pub factory: Arc<dyn DecoderFactory>,
    pub config: serde_yaml::Value,
}

impl ExportRoute {
    fn matches(&self, table: &str) -> bool {
        self.tables.iter().any(|t| t == "*" || t.eq_ignore_ascii_case(table))
    }
}

struct RunningWorker {
    cancel: CancellationToken,
    task: JoinHandle<WorkerReport>,
    metrics: Arc<ExportMetrics>,
    /// Set once the worker has returned
    outcome: Arc<Mutex<Option<ConnectorStatus>>>,
}

/// Runs export workers for every advertised source
pub struct ExportManager {
    settings: ExportSettings,
    transports: Arc<dyn TransportFactory>,
    routes: Vec<ExportRoute>,
    root: CancellationToken,
    workers: Mutex<HashMap<SourceId, RunningWorker>>,
}

impl ExportManager {
    pub fn new(settings: ExportSettings, transports: Arc<dyn TransportFactory>) -> Self {
        Self {
            settings,
            transports,
            routes: Vec::new(),
            root: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Route tables to a decoder factory (builder pattern). The configuration
    /// is validated here. `*` matches every table.
    pub fn with_route(mut self, route: ExportRoute) -> Result<Self> {
        route.factory.validate(&route.config)?;
        if route.tables.is_empty() {
            return Err(ConnectError::config(format!(
                "exporter '{}' lists no tables",
                route.name
            )));
        }
        self.routes.push(route);
        Ok(self)
    }

    /// Start exporting a source through the decoder its table is routed to.
    ///
    /// Returns `Ok(false)` if the source already has a running worker.
    pub fn advertise(&self, descriptor: DataSourceDescriptor) -> Result<bool> {
        let route = self
            .routes
            .iter()
            .find(|r| r.matches(&descriptor.table_name))
            .ok_or_else(|| {
                ConnectError::config(format!(
                    "no exporter configured for table '{}'",
                    descriptor.table_name
                ))
            })?;
        if self.is_running(descriptor.source_id()) {
            debug!(source = %descriptor.source_id(), "Source already exported");
            return Ok(false);
        }

        let decoder = route.factory.create(&descriptor, &route.config)?;
        debug!(source = %descriptor.source_id(), exporter = %route.name, "Routing source");
        self.advertise_with(descriptor, decoder)
    }

    /// Start exporting a source through an explicit decoder
    pub fn advertise_with(
        &self,
        descriptor: DataSourceDescriptor,
        decoder: Box<dyn RowDecoder>,
    ) -> Result<bool> {
        let source = descriptor.source_id();
        let mut workers = self.workers.lock();
        if workers.get(&source).is_some_and(|w| !w.task.is_finished()) {
            debug!(source = %source, "Source already exported");
            return Ok(false);
        }

        let transport = self.transports.connect(source)?;
        let metrics = Arc::new(ExportMetrics::default());
        let cancel = self.root.child_token();
        let worker = ExportStreamWorker::new(descriptor, transport, decoder, self.settings.clone())
            .with_metrics(metrics.clone());
        let outcome = Arc::new(Mutex::new(None));
        let task = {
            let cancel = cancel.clone();
            let outcome = outcome.clone();
            tokio::spawn(async move {
                let report = worker.run(cancel).await;
                *outcome.lock() = Some(report.exit.status());
                report
            })
        };

        // a finished worker left in the map is replaced; its report is dropped
        let running = RunningWorker {
            cancel,
            task,
            metrics,
            outcome,
        };
        if let Some(previous) = workers.insert(source, running) {
            debug!(
                source = %source,
                finished = previous.task.is_finished(),
                "Replaced previous worker"
            );
        }
        Ok(true)
    }

    /// Withdraw a source and wait for its worker to finish
    pub async fn invalidate(&self, source: SourceId) -> Option<WorkerReport> {
        let worker = self.workers.lock().remove(&source)?;
        worker.cancel.cancel();
        Self::join(source, worker).await
    }

    /// Wait for a worker that ends on its own (decoder stop, failure)
    pub async fn join_source(&self, source: SourceId) -> Option<WorkerReport> {
        let worker = self.workers.lock().remove(&source)?;
        Self::join(source, worker).await
    }

    pub fn is_running(&self, source: SourceId) -> bool {
        self.workers
            .lock()
            .get(&source)
            .is_some_and(|w| !w.task.is_finished())
    }

    /// `Failed` once the worker ended on an error, `Stopped` after any other
    /// exit or while a cancelled worker winds down
    pub fn status(&self, source: SourceId) -> Option<ConnectorStatus> {
        self.workers.lock().get(&source).map(|w| {
            if let Some(status) = *w.outcome.lock() {
                status
            } else if w.cancel.is_cancelled() {
                ConnectorStatus::Stopped
            } else {
                ConnectorStatus::Running
            }
        })
    }

    pub fn metrics(&self, source: SourceId) -> Option<ExportMetricsSnapshot> {
        self.workers.lock().get(&source).map(|w| w.metrics.snapshot())
    }

    pub fn sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = self.workers.lock().keys().copied().collect();
        sources.sort();
        sources
    }

    /// Cancel every worker and wait for all of them
    pub async fn shutdown(&self) -> Vec<WorkerReport> {
        self.root.cancel();
        let drained: Vec<(SourceId, RunningWorker)> = self.workers.lock().drain().collect();

        let reports: Vec<WorkerReport> = join_all(
            drained
                .into_iter()
                .map(|(source, worker)| Self::join(source, worker)),
        )
        .await
        .into_iter()
        .flatten()
        .collect();
        info!(workers = reports.len(), "Export manager shut down");
        reports
    }

    async fn join(source: SourceId, worker: RunningWorker) -> Option<WorkerReport> {
        match worker.task.await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(source = %source, error = %e, "Export worker task aborted");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::producer::{ExportProducer, StreamBuffer};
    use crate::export::transport::LocalTransport;
    use crate::export::worker::WorkerExit;
    use crate::testing::MockDecoder;
    use bytes::Bytes;
    use spillway_protocol::{ColumnType, ColumnValue, Request, Response, StreamOffset};
    use std::time::Duration;

    fn manager(buffer: Arc<StreamBuffer>) -> ExportManager {
        let transports = move |_source: SourceId| -> Result<Box<dyn ExportTransport>> {
            Ok(Box::new(LocalTransport::new(buffer.clone())))
        };
        ExportManager::new(
            ExportSettings::default().with_idle_backoff(Duration::from_millis(2)),
            Arc::new(transports),
        )
    }

    fn descriptor(table_id: u32) -> DataSourceDescriptor {
        DataSourceDescriptor::new(0, table_id, "events").with_column("id", ColumnType::BigInt)
    }

    #[tokio::test]
    async fn test_advertise_invalidate() {
        let buffer = Arc::new(StreamBuffer::new());
        let desc = descriptor(1);
        let id = desc.source_id();
        buffer.advertise(desc.clone());
        buffer
            .commit_rows(id, &[vec![ColumnValue::Integer(1)], vec![ColumnValue::Integer(2)]])
            .unwrap();

        let manager = manager(buffer.clone());
        let decoder = MockDecoder::new();
        let probe = decoder.probe();
        assert!(manager.advertise_with(desc.clone(), Box::new(decoder)).unwrap());
        assert!(!manager
            .advertise_with(desc.clone(), Box::new(MockDecoder::new()))
            .unwrap());
        assert_eq!(manager.status(id), Some(ConnectorStatus::Running));

        for _ in 0..200 {
            if buffer.pending_bytes(id) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let report = manager.invalidate(id).await.unwrap();
        assert!(matches!(report.exit, WorkerExit::Invalidated));
        assert_eq!(probe.seen_ids(), vec![1, 2]);
        assert_eq!(probe.no_longer_advertised(), 1);
        assert_eq!(Some(report.acknowledged), buffer.acknowledged(id));
        assert!(manager.status(id).is_none());
    }

    #[tokio::test]
    async fn test_unrouted_table_rejected() {
        let manager = manager(Arc::new(StreamBuffer::new()));
        assert!(manager.advertise(descriptor(1)).is_err());
    }

    #[tokio::test]
    async fn test_route_config_validated() {
        let manager = manager(Arc::new(StreamBuffer::new()));
        let route = ExportRoute {
            name: "files".into(),
            tables: vec!["events".into()],
            factory: Arc::new(crate::connectors::CsvFileDecoderFactory),
            config: serde_yaml::Value::Null,
        };
        assert!(manager.with_route(route).is_err());
    }

    /// Answers every request with a block at the wrong offset
    struct SkewedProducer;

    impl ExportProducer for SkewedProducer {
        fn handle(&self, request: Request) -> Response {
            Response::PollResponse {
                source: request.source(),
                start_offset: StreamOffset::new(42),
                payload: Bytes::from_static(b"zz"),
            }
        }
    }

    #[tokio::test]
    async fn test_violation_reported_as_failed() {
        let transports = |_source: SourceId| -> Result<Box<dyn ExportTransport>> {
            Ok(Box::new(LocalTransport::new(Arc::new(SkewedProducer))))
        };
        let manager = ExportManager::new(ExportSettings::default(), Arc::new(transports));
        let desc = descriptor(4);
        let id = desc.source_id();
        manager.advertise_with(desc, Box::new(MockDecoder::new())).unwrap();

        for _ in 0..200 {
            if manager.status(id) != Some(ConnectorStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.status(id), Some(ConnectorStatus::Failed));
        assert!(!manager.is_running(id));

        let report = manager.join_source(id).await.unwrap();
        assert!(report.exit.is_failed());
        assert_eq!(report.exit.status(), ConnectorStatus::Failed);
    }

    #[tokio::test]
    async fn test_decoder_stop_reported_as_stopped() {
        let buffer = Arc::new(StreamBuffer::new());
        let desc = descriptor(5);
        let id = desc.source_id();
        buffer.advertise(desc.clone());
        buffer.commit_rows(id, &[vec![ColumnValue::Integer(1)]]).unwrap();

        let manager = manager(buffer);
        let decoder = MockDecoder::new().stop_after_rows(1);
        manager.advertise_with(desc, Box::new(decoder)).unwrap();

        for _ in 0..200 {
            if manager.status(id) != Some(ConnectorStatus::Running) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.status(id), Some(ConnectorStatus::Stopped));
        let report = manager.join_source(id).await.unwrap();
        assert!(matches!(report.exit, WorkerExit::Stopped));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_all() {
        let buffer = Arc::new(StreamBuffer::new());
        let manager = manager(buffer.clone());
        for table_id in 1..=3 {
            let desc = descriptor(table_id);
            buffer.advertise(desc.clone());
            manager.advertise_with(desc, Box::new(MockDecoder::new())).unwrap();
        }
        assert_eq!(manager.sources().len(), 3);

        let reports = manager.shutdown().await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(|r| matches!(r.exit, WorkerExit::Invalidated)));
        assert!(manager.sources().is_empty());
    }
}
