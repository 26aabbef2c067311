//! Export stream tests: worker against a real producer
//!
//! Run with: cargo test -p spillway-connect --test export_stream

use bytes::Bytes;
use proptest::prelude::*;
use spillway_connect::export::{
    ChannelTransport, ExportSettings, ExportStreamWorker, LocalTransport, StreamBuffer, WorkerExit,
};
use spillway_connect::testing::{MockDecoder, RecordingTransport};
use spillway_connect::{CancellationToken, RetryConfig};
use spillway_protocol::{
    ColumnType, ColumnValue, DataSourceDescriptor, Request, Response, SourceId, StreamOffset,
};
use std::sync::Arc;
use std::time::Duration;

fn descriptor() -> DataSourceDescriptor {
    DataSourceDescriptor::new(2, 11, "trades")
        .with_column("id", ColumnType::BigInt)
        .with_column("symbol", ColumnType::String)
}

fn row(id: i64) -> Vec<ColumnValue> {
    vec![ColumnValue::Integer(id), ColumnValue::from(format!("S{}", id))]
}

fn settings() -> ExportSettings {
    ExportSettings::default()
        .with_idle_backoff(Duration::from_millis(1))
        .with_restart(RetryConfig::fixed_delay(5, Duration::from_millis(1)))
}

/// Poll `cond` every few milliseconds, for at most five seconds
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn test_restart_scenario_end_to_end() {
    let buffer = Arc::new(StreamBuffer::new());
    let desc = descriptor();
    let id = desc.source_id();
    buffer.advertise(desc.clone());
    let end = buffer.commit_rows(id, &[row(1), row(2), row(3)]).unwrap();

    // restart when the third row arrives, once
    let decoder = MockDecoder::new().restart_once_at(2);
    let probe = decoder.probe();
    let (transport, service) = ChannelTransport::spawn(buffer.clone(), 16);
    let recording = RecordingTransport::new(transport);
    let log = recording.log();

    let cancel = CancellationToken::new();
    let worker = ExportStreamWorker::new(desc, Box::new(recording), Box::new(decoder), settings());
    let metrics = worker.metrics();
    let task = tokio::spawn(worker.run(cancel.clone()));

    // the worker's own ack count, not the producer's: the reply may still be in flight
    wait_until(|| metrics.snapshot().acks_sent == 1).await;
    cancel.cancel();
    let report = task.await.unwrap();

    assert!(matches!(report.exit, WorkerExit::Invalidated));
    assert_eq!(probe.seen_ids(), vec![1, 2, 1, 2, 3]);
    assert_eq!(report.acknowledged, end);
    assert_eq!(buffer.acknowledged(id), Some(end));
    assert_eq!(log.acks(), vec![end]);
    assert_eq!(report.metrics.block_restarts, 1);
    assert_eq!(probe.no_longer_advertised(), 1);

    service.abort();
}

#[tokio::test]
async fn test_restart_redelivers_identical_bytes() {
    let buffer = Arc::new(StreamBuffer::new());
    let desc = descriptor();
    let id = desc.source_id();
    buffer.advertise(desc.clone());
    buffer.commit_rows(id, &[row(10), row(20)]).unwrap();

    let first = buffer.handle_poll(id);
    let second = buffer.handle_poll(id);
    assert_eq!(first, second);

    // a worker restarting the block sees the same rows again
    let decoder = MockDecoder::new().restart_at(1, 2);
    let probe = decoder.probe();
    let cancel = CancellationToken::new();
    let worker = ExportStreamWorker::new(
        desc,
        Box::new(LocalTransport::new(buffer.clone())),
        Box::new(decoder),
        settings(),
    );
    let task = tokio::spawn(worker.run(cancel.clone()));
    wait_until(|| buffer.pending_bytes(id) == 0).await;
    cancel.cancel();
    task.await.unwrap();

    assert_eq!(probe.seen_ids(), vec![10, 10, 10, 20]);
    assert_eq!(probe.rows()[0], probe.rows()[1]);
}

#[tokio::test]
async fn test_idle_polls_send_no_ack() {
    let buffer = Arc::new(StreamBuffer::new());
    let desc = descriptor();
    buffer.advertise(desc.clone());

    let recording = RecordingTransport::new(LocalTransport::new(buffer.clone()));
    let log = recording.log();
    let decoder = MockDecoder::new();
    let probe = decoder.probe();

    let cancel = CancellationToken::new();
    let worker = ExportStreamWorker::new(desc, Box::new(recording), Box::new(decoder), settings());
    let task = tokio::spawn(worker.run(cancel.clone()));

    wait_until(|| log.polls() >= 2).await;
    cancel.cancel();
    let report = task.await.unwrap();

    assert!(log.acks().is_empty());
    assert!(report.metrics.idle_polls >= 2);
    assert_eq!(report.metrics.acks_sent, 0);
    assert_eq!(report.acknowledged, StreamOffset::ZERO);
    assert!(probe.rows().is_empty());
    assert_eq!(probe.blocks_started(), 0);
}

#[tokio::test]
async fn test_invalidation_mid_stream_calls_teardown_once() {
    let buffer = Arc::new(StreamBuffer::new());
    let desc = descriptor();
    let id = desc.source_id();
    buffer.advertise(desc.clone());
    let first_end = buffer.commit_rows(id, &[row(1)]).unwrap();

    let decoder = MockDecoder::new();
    let probe = decoder.probe();
    let cancel = CancellationToken::new();
    let worker = ExportStreamWorker::new(
        desc,
        Box::new(LocalTransport::new(buffer.clone())),
        Box::new(decoder),
        settings(),
    );
    let task = tokio::spawn(worker.run(cancel.clone()));

    wait_until(|| buffer.acknowledged(id) == Some(first_end)).await;
    // producer withdraws the source; the worker notices on its next poll
    buffer.invalidate(id);
    let report = task.await.unwrap();

    assert!(matches!(report.exit, WorkerExit::Invalidated));
    assert_eq!(report.acknowledged, first_end);
    assert_eq!(probe.no_longer_advertised(), 1);
    assert!(!cancel.is_cancelled());
}

#[tokio::test]
async fn test_stale_ack_rejected_by_producer() {
    let buffer = StreamBuffer::new();
    let desc = descriptor();
    let id = desc.source_id();
    buffer.advertise(desc);
    let end = buffer.append_block(id, Bytes::from_static(b"0123456789")).unwrap();
    buffer.handle_poll(id);

    let response = spillway_connect::ExportProducer::handle(
        &buffer,
        Request::Ack {
            source: id,
            offset: StreamOffset::new(end.get() - 1),
        },
    );
    assert!(matches!(response, Response::Error { .. }));
    assert_eq!(buffer.acknowledged(id), Some(StreamOffset::ZERO));
}

/// Poll helper for tests that inspect producer responses directly
trait PollExt {
    fn handle_poll(&self, source: SourceId) -> Response;
}

impl PollExt for StreamBuffer {
    fn handle_poll(&self, source: SourceId) -> Response {
        spillway_connect::ExportProducer::handle(self, Request::Poll { source })
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Acks only ever move forward, each one ends exactly the block that was
    /// delivered, and everything committed is eventually acknowledged
    #[test]
    fn prop_offsets_monotonic(
        blocks in prop::collection::vec(1usize..5, 1..6),
        restart_row in 0usize..4,
        restarts in 0u32..4,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();

        runtime.block_on(async {
            let buffer = Arc::new(StreamBuffer::new());
            let desc = descriptor();
            let id = desc.source_id();
            buffer.advertise(desc.clone());

            let mut next_id = 0i64;
            let mut ends = Vec::new();
            for rows in &blocks {
                let block: Vec<_> = (0..*rows).map(|_| { next_id += 1; row(next_id) }).collect();
                ends.push(buffer.commit_rows(id, &block).unwrap());
            }
            let high_water = *ends.last().unwrap();

            let decoder = MockDecoder::new().restart_at(restart_row, restarts);
            let probe = decoder.probe();
            let recording = RecordingTransport::new(LocalTransport::new(buffer.clone()));
            let log = recording.log();

            let cancel = CancellationToken::new();
            let worker =
                ExportStreamWorker::new(desc, Box::new(recording), Box::new(decoder), settings());
            let metrics = worker.metrics();
            let task = tokio::spawn(worker.run(cancel.clone()));
            let expected_acks = ends.len() as u64;
            wait_until(|| metrics.snapshot().acks_sent == expected_acks).await;
            cancel.cancel();
            let report = task.await.unwrap();

            assert!(matches!(report.exit, WorkerExit::Invalidated));
            assert_eq!(log.acks(), ends);
            assert!(log.acks().windows(2).all(|w| w[0] < w[1]));
            assert!(report.acknowledged <= report.high_water);
            assert_eq!(report.acknowledged, high_water);

            // the last delivery of every row is in commit order
            let mut last_seen: Vec<i64> = probe.seen_ids();
            last_seen.dedup();
            let mut unique = last_seen.clone();
            unique.sort_unstable();
            unique.dedup();
            assert_eq!(unique, (1..=next_id).collect::<Vec<_>>());
        });
    }
}
