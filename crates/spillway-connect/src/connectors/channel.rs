//! Push-fed importer
//!
//! Records are pushed into a bounded channel by application code; `accept`
//! waits on the channel and on the stop signal at the same time, so it
//! returns promptly on stop even when no record ever arrives. It also
//! returns once every sender is dropped.

use crate::error::ConnectorResult;
use crate::format::FormatterBuilder;
use crate::import::ResourceId;
use crate::traits::importer::{ImportContext, Importer};
use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Importer reading raw records from an in-process channel
#[derive(Debug)]
pub struct ChannelImporter {
    resource: ResourceId,
    formatter: FormatterBuilder,
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl ChannelImporter {
    /// Create the importer and the sender feeding it
    pub fn new(
        resource: ResourceId,
        formatter: FormatterBuilder,
        capacity: usize,
    ) -> (Self, mpsc::Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let importer = Self {
            resource,
            formatter,
            rx: Mutex::new(rx),
        };
        (importer, tx)
    }
}

#[async_trait]
impl Importer for ChannelImporter {
    fn resource_id(&self) -> &ResourceId {
        &self.resource
    }

    fn name(&self) -> &str {
        "channel"
    }

    fn formatter_builder(&self) -> &FormatterBuilder {
        &self.formatter
    }

    async fn accept(&self, ctx: &ImportContext) -> ConnectorResult<()> {
        let mut rx = self.rx.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = ctx.stopped() => {
                    debug!(resource = %self.resource, "Stop requested while waiting for records");
                    return Ok(());
                }
                record = rx.recv() => match record {
                    Some(record) => {
                        ctx.submit(&record).await?;
                    }
                    None => {
                        debug!(resource = %self.resource, "All senders gone");
                        return Ok(());
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryRowWriter;
    use crate::traits::importer::context_for;
    use std::sync::Arc;
    use std::time::Duration;

    fn importer() -> (Arc<ChannelImporter>, mpsc::Sender<Vec<u8>>) {
        let (importer, tx) = ChannelImporter::new(
            ResourceId::parse("channel://test/orders").unwrap(),
            FormatterBuilder::default(),
            4,
        );
        (Arc::new(importer), tx)
    }

    #[tokio::test]
    async fn test_records_written_until_senders_dropped() {
        let (importer, tx) = importer();
        let writer = Arc::new(MemoryRowWriter::new());
        let ctx = context_for(importer.as_ref(), "orders", writer.clone()).unwrap();

        tx.send(b"a,b".to_vec()).await.unwrap();
        tx.send(b"c".to_vec()).await.unwrap();
        drop(tx);

        importer.accept(&ctx).await.unwrap();
        assert_eq!(writer.rows("orders").len(), 2);
    }

    #[tokio::test]
    async fn test_stop_interrupts_idle_wait() {
        let (importer, _tx) = importer();
        let writer = Arc::new(MemoryRowWriter::new());
        let ctx = Arc::new(context_for(importer.as_ref(), "orders", writer).unwrap());

        let run = {
            let importer = importer.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move { importer.accept(&ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!run.is_finished());

        ctx.stop_signal().trigger();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("accept did not return after stop")
            .unwrap()
            .unwrap();
    }
}
