//! Counters for export workers and importers
//!
//! Each worker or importer owns one metrics struct behind an `Arc` and bumps
//! its atomics on the hot path. Readers take a [`snapshot`](ExportMetrics::snapshot)
//! for logs, health checks and tests.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for one export stream worker
#[derive(Debug, Default)]
pub struct ExportMetrics {
    pub polls: AtomicU64,
    pub idle_polls: AtomicU64,
    pub blocks_delivered: AtomicU64,
    pub rows_decoded: AtomicU64,
    pub block_restarts: AtomicU64,
    pub acks_sent: AtomicU64,
    pub bytes_acked: AtomicU64,
}

/// Point-in-time copy of [`ExportMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportMetricsSnapshot {
    pub polls: u64,
    pub idle_polls: u64,
    pub blocks_delivered: u64,
    pub rows_decoded: u64,
    pub block_restarts: u64,
    pub acks_sent: u64,
    pub bytes_acked: u64,
}

impl ExportMetrics {
    pub fn record_poll(&self, idle: bool) {
        self.polls.fetch_add(1, Ordering::Relaxed);
        if idle {
            self.idle_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocks_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_row(&self) {
        self.rows_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.block_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self, bytes: u64) {
        self.acks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_acked.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExportMetricsSnapshot {
        ExportMetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            blocks_delivered: self.blocks_delivered.load(Ordering::Relaxed),
            rows_decoded: self.rows_decoded.load(Ordering::Relaxed),
            block_restarts: self.block_restarts.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            bytes_acked: self.bytes_acked.load(Ordering::Relaxed),
        }
    }
}

/// Metrics for one importer
#[derive(Debug, Default)]
pub struct ImportMetrics {
    pub records_read: AtomicU64,
    pub rows_written: AtomicU64,
    pub format_errors: AtomicU64,
    pub records_skipped: AtomicU64,
}

/// Point-in-time copy of [`ImportMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportMetricsSnapshot {
    pub records_read: u64,
    pub rows_written: u64,
    pub format_errors: u64,
    pub records_skipped: u64,
}

impl ImportMetrics {
    pub fn snapshot(&self) -> ImportMetricsSnapshot {
        ImportMetricsSnapshot {
            records_read: self.records_read.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
        }
    }
}
