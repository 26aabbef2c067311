//! Transport between an export worker and its producer
//!
//! The worker only ever has one request in flight per source, so the seam is
//! a single `round_trip`. Two implementations ship with the crate:
//!
//! - [`LocalTransport`] calls the producer directly (same process, tests),
//! - [`ChannelTransport`] serializes every message with the wire codec and
//!   passes the bytes over a tokio channel to [`serve_producer`]. Producer and
//!   decoder side share no memory.

use super::producer::ExportProducer;
use crate::error::{ConnectError, Result};
use async_trait::async_trait;
use spillway_protocol::{ErrorKind, Request, Response};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Request/response channel to a producer
#[async_trait]
pub trait ExportTransport: Send {
    /// Send one request and wait for its response
    async fn round_trip(&mut self, request: Request) -> Result<Response>;
}

#[async_trait]
impl<T: ExportTransport + ?Sized> ExportTransport for Box<T> {
    async fn round_trip(&mut self, request: Request) -> Result<Response> {
        (**self).round_trip(request).await
    }
}

/// In-process transport
#[derive(Clone)]
pub struct LocalTransport {
    producer: Arc<dyn ExportProducer>,
}

impl LocalTransport {
    pub fn new(producer: Arc<dyn ExportProducer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl ExportTransport for LocalTransport {
    async fn round_trip(&mut self, request: Request) -> Result<Response> {
        Ok(self.producer.handle(request))
    }
}

/// A wire-encoded request and the slot for its wire-encoded response
pub type Envelope = (Vec<u8>, oneshot::Sender<Vec<u8>>);

/// Transport passing wire-encoded messages over a channel. Cheap to clone;
/// all clones talk to the same producer task.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Envelope>,
}

impl ChannelTransport {
    /// Spawn a task serving `producer` and return a transport connected to it.
    /// The task ends when every transport clone has been dropped.
    pub fn spawn(producer: Arc<dyn ExportProducer>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(serve_producer(producer, rx));
        (Self { tx }, task)
    }

    /// Wrap the sending half of a channel served elsewhere
    pub fn from_sender(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ExportTransport for ChannelTransport {
    async fn round_trip(&mut self, request: Request) -> Result<Response> {
        let frame = request.to_wire()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send((frame, reply_tx))
            .await
            .map_err(|_| ConnectError::transport("producer channel closed"))?;
        let reply = reply_rx
            .await
            .map_err(|_| ConnectError::transport("producer dropped the request"))?;
        Ok(Response::from_wire(&reply)?)
    }
}

/// Answer wire-encoded requests from `rx` until every sender is gone
pub async fn serve_producer(
    producer: Arc<dyn ExportProducer>,
    mut rx: mpsc::Receiver<Envelope>,
) {
    debug!("Producer service started");
    while let Some((frame, reply)) = rx.recv().await {
        let request = match Request::from_wire(&frame) {
            Ok(request) => request,
            Err(e) => {
                // no source to address an error response to; dropping the
                // reply surfaces as a transport error on the worker side
                warn!(error = %e, "Discarding undecodable request");
                continue;
            }
        };

        let response = producer.handle(request);
        let bytes = match response.to_wire() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(source = %response.source(), error = %e, "Failed to encode response");
                let refusal = Response::error(
                    response.source(),
                    ErrorKind::ProtocolViolation,
                    format!("response not encodable: {}", e),
                );
                match refusal.to_wire() {
                    Ok(bytes) => bytes,
                    Err(_) => continue,
                }
            }
        };
        // the requester may have been cancelled meanwhile
        let _ = reply.send(bytes);
    }
    debug!("Producer service stopped");
}
