// src/cvm/transport.rs
//! Remote transport between deployment targets
//!
//! Length-delimited JSON frames over TCP. One [`RemoteLink`] per peer node
//! multiplexes any number of in-flight calls, so a call parked on a remote
//! tool never holds up other calls on the same link.
//!
//! A caller that stops waiting sends `Cancel{id}`; the served call is then
//! dropped, and so is its parked continuation. Closing a link drops every
//! call still in flight on it.
//!
//! ```text
//!  caller ──► RemoteLink ──Call{id}──►  TransportServer ──► spawn per call
//!             pending[id] ◄─Reply{id}──  (writer task)  ◄──  WireEndpoint
//! ```

use crate::cvm::WeakCvm;
use crate::utils::config::TransportConfig;
use crate::utils::errors::{CvmError, RemoteFailure, Result};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Unit exchanged on a link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Invoke an operation on a published port
    Call {
        id: u64,
        port_uri: String,
        contract: String,
        payload: Value,
    },
    /// Check that a port exists and carries `contract`
    Probe {
        id: u64,
        port_uri: String,
        contract: String,
    },
    Reply { id: u64, outcome: WireOutcome },
    /// The caller of `id` stopped waiting
    Cancel { id: u64 },
}

/// Result of a remote call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireOutcome {
    Completed(Value),
    /// Fire-and-forget operation queued on the target
    Accepted,
    Failed(RemoteFailure),
}

fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

fn encode(frame: &Frame) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(frame)?))
}

/// Accepts links from peer nodes and serves their calls
pub struct TransportServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

impl TransportServer {
    /// Bind `addr` and start accepting connections
    pub async fn bind(addr: SocketAddr, cvm: WeakCvm, config: &TransportConfig) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CvmError::Transport(format!("Failed to bind {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let max_frame_bytes = config.max_frame_bytes;

        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            debug!("Accepted link from {}", peer);
                            let _ = stream.set_nodelay(true);
                            tokio::spawn(serve_connection(
                                stream,
                                cvm.clone(),
                                max_frame_bytes,
                                token.child_token(),
                            ));
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
            debug!("Transport accept loop stopped");
        });

        info!("Transport listening on {}", local_addr);

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and close every served connection
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.accept_task.await;
        info!("Transport on {} stopped", self.local_addr);
    }
}

async fn serve_connection(stream: TcpStream, cvm: WeakCvm, max_frame_bytes: usize, token: CancellationToken) {
    let (mut sink, mut frames) = Framed::new(stream, codec(max_frame_bytes)).split();
    let (replies, mut outgoing) = mpsc::unbounded_channel::<Frame>();
    let in_flight: Arc<DashMap<u64, CancellationToken>> = Arc::new(DashMap::new());

    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = writer_token.cancelled() => break,
                frame = outgoing.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let sent = match encode(&frame) {
                Ok(bytes) => sink.send(bytes).await.map_err(CvmError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                warn!("Failed to write reply: {}", e);
                break;
            }
        }
    });

    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = frames.next() => next,
        };

        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("Link read failed: {}", e);
                break;
            }
            None => break,
        };

        let frame: Frame = match serde_json::from_slice(&bytes) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping link after malformed frame: {}", e);
                break;
            }
        };

        match frame {
            Frame::Call {
                id,
                port_uri,
                contract,
                payload,
            } => {
                let call = token.child_token();
                in_flight.insert(id, call.clone());

                let cvm = cvm.clone();
                let replies = replies.clone();
                let in_flight = Arc::clone(&in_flight);
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        _ = call.cancelled() => {
                            debug!("Call {} on {} dropped, caller left", id, port_uri);
                            return;
                        }
                        outcome = dispatch_call(&cvm, &port_uri, &contract, payload) => outcome,
                    };
                    in_flight.remove(&id);
                    let _ = replies.send(Frame::Reply { id, outcome });
                });
            }
            Frame::Cancel { id } => {
                if let Some((_, call)) = in_flight.remove(&id) {
                    call.cancel();
                }
            }
            Frame::Probe {
                id,
                port_uri,
                contract,
            } => {
                let outcome = match cvm
                    .upgrade()
                    .and_then(|cvm| cvm.remote_endpoint(&port_uri, &contract))
                {
                    Ok(_) => WireOutcome::Completed(Value::Null),
                    Err(e) => WireOutcome::Failed(e.to_remote()),
                };
                let _ = replies.send(Frame::Reply { id, outcome });
            }
            Frame::Reply { id, .. } => {
                warn!("Unexpected reply frame {} on a served link", id);
            }
        }
    }

    // Nobody is left to receive the replies of calls still in flight
    token.cancel();
    drop(replies);
    let _ = writer.await;
    debug!("Served link closed");
}

async fn dispatch_call(cvm: &WeakCvm, port_uri: &str, contract: &str, payload: Value) -> WireOutcome {
    let endpoint = match cvm
        .upgrade()
        .and_then(|cvm| cvm.remote_endpoint(port_uri, contract))
    {
        Ok(endpoint) => endpoint,
        Err(e) => return WireOutcome::Failed(e.to_remote()),
    };

    match endpoint.dispatch_wire(payload).await {
        Ok(Some(value)) => WireOutcome::Completed(value),
        Ok(None) => WireOutcome::Accepted,
        Err(e) => WireOutcome::Failed(e.to_remote()),
    }
}

/// Client side of a link to one peer node
pub struct RemoteLink {
    node: String,
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, oneshot::Sender<WireOutcome>>>,
    outgoing: mpsc::UnboundedSender<Frame>,
    closed: CancellationToken,
}

impl RemoteLink {
    /// Open a link to `node` at `addr`
    pub async fn connect(node: &str, addr: SocketAddr, config: &TransportConfig) -> Result<Arc<Self>> {
        let stream = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| {
                CvmError::Transport(format!("Timed out connecting to {} at {}", node, addr))
            })?
            .map_err(|e| {
                CvmError::Transport(format!("Failed to connect to {} at {}: {}", node, addr, e))
            })?;
        let _ = stream.set_nodelay(true);

        let (mut sink, mut frames) = Framed::new(stream, codec(config.max_frame_bytes)).split();
        let (outgoing, mut queue) = mpsc::unbounded_channel::<Frame>();
        let pending: Arc<DashMap<u64, oneshot::Sender<WireOutcome>>> = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    frame = queue.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                };

                let sent = match encode(&frame) {
                    Ok(bytes) => sink.send(bytes).await.map_err(CvmError::from),
                    Err(e) => Err(e),
                };
                if let Err(e) = sent {
                    warn!("Link write failed: {}", e);
                    break;
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_pending = Arc::clone(&pending);
        let peer = node.to_string();
        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    next = frames.next() => next,
                };

                let frame = match next {
                    Some(Ok(bytes)) => serde_json::from_slice::<Frame>(&bytes),
                    Some(Err(e)) => {
                        warn!("Link to {} failed: {}", peer, e);
                        break;
                    }
                    None => break,
                };

                match frame {
                    Ok(Frame::Reply { id, outcome }) => {
                        if let Some((_, waiter)) = reader_pending.remove(&id) {
                            let _ = waiter.send(outcome);
                        }
                    }
                    Ok(other) => warn!("Unexpected frame from {}: {:?}", peer, other),
                    Err(e) => {
                        warn!("Malformed frame from {}: {}", peer, e);
                        break;
                    }
                }
            }

            reader_closed.cancel();
            let ids: Vec<u64> = reader_pending.iter().map(|entry| *entry.key()).collect();
            for id in ids {
                if let Some((_, waiter)) = reader_pending.remove(&id) {
                    let failure = CvmError::Transport(format!("Link to {} closed", peer));
                    let _ = waiter.send(WireOutcome::Failed(failure.to_remote()));
                }
            }
            info!("Link to {} closed", peer);
        });

        info!("Link to {} at {} established", node, addr);

        Ok(Arc::new(Self {
            node: node.to_string(),
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            closed,
        }))
    }

    /// Peer node at the other end
    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Close the link; calls still waiting fail
    pub fn close(&self) {
        self.closed.cancel();
    }

    fn closed_error(&self) -> CvmError {
        CvmError::Transport(format!("Link to {} is closed", self.node))
    }

    async fn round_trip(&self, build: impl FnOnce(u64) -> Frame) -> Result<WireOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _in_flight = InFlight { link: self, id };

        // Checked after inserting: the reader drains `pending` only after closing
        if self.is_closed() || self.outgoing.send(build(id)).is_err() {
            return Err(self.closed_error());
        }

        rx.await.map_err(|_| self.closed_error())
    }

    /// Number of calls waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    /// Invoke an operation on `port_uri`; `None` for fire-and-forget operations
    pub async fn call(&self, port_uri: &str, contract: &str, payload: Value) -> Result<Option<Value>> {
        let outcome = self
            .round_trip(|id| Frame::Call {
                id,
                port_uri: port_uri.to_string(),
                contract: contract.to_string(),
                payload,
            })
            .await?;

        match outcome {
            WireOutcome::Completed(value) => Ok(Some(value)),
            WireOutcome::Accepted => Ok(None),
            WireOutcome::Failed(failure) => Err(failure.into()),
        }
    }

    /// Check that `port_uri` is published remotely with `contract`
    pub async fn probe(&self, port_uri: &str, contract: &str) -> Result<()> {
        let outcome = self
            .round_trip(|id| Frame::Probe {
                id,
                port_uri: port_uri.to_string(),
                contract: contract.to_string(),
            })
            .await?;

        match outcome {
            WireOutcome::Failed(failure) => Err(failure.into()),
            _ => Ok(()),
        }
    }
}

/// Outstanding call on a link
///
/// Dropped with the caller's future. If no reply has arrived by then the
/// peer is told to drop the call.
struct InFlight<'a> {
    link: &'a RemoteLink,
    id: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.link.pending.remove(&self.id).is_some() {
            let _ = self.link.outgoing.send(Frame::Cancel { id: self.id });
        }
    }
}

impl Drop for RemoteLink {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::errors::FailureKind;
    use std::time::Duration;

    #[test]
    fn test_frame_encoding() {
        let frame = Frame::Call {
            id: 9,
            port_uri: "cvm://a/p".to_string(),
            contract: "demo".to_string(),
            payload: serde_json::json!({"op": "ping"}),
        };

        let bytes = encode(&frame).unwrap();
        let decoded: Frame = serde_json::from_slice(&bytes).unwrap();
        match decoded {
            Frame::Call { id, port_uri, .. } => {
                assert_eq!(id, 9);
                assert_eq!(port_uri, "cvm://a/p");
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_failed_outcome_rebuilds_error() {
        let outcome = WireOutcome::Failed(CvmError::BrokenBarrier("reset".into()).to_remote());
        let json = serde_json::to_string(&Frame::Reply { id: 1, outcome }).unwrap();

        match serde_json::from_str::<Frame>(&json).unwrap() {
            Frame::Reply {
                outcome: WireOutcome::Failed(failure),
                ..
            } => {
                assert_eq!(failure.kind, FailureKind::BrokenBarrier);
                assert_eq!(CvmError::from(failure), CvmError::BrokenBarrier("reset".into()));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_abandoned_call_sends_cancel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = TransportConfig::default();
        let max_frame_bytes = config.max_frame_bytes;

        // A peer that never answers
        let peer = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut frames = Framed::new(stream, codec(max_frame_bytes));
            let mut seen = Vec::new();
            while let Some(Ok(bytes)) = frames.next().await {
                let frame: Frame = serde_json::from_slice(&bytes).unwrap();
                let last = matches!(frame, Frame::Cancel { .. });
                seen.push(frame);
                if last {
                    break;
                }
            }
            seen
        });

        let link = RemoteLink::connect("silent", addr, &config).await.unwrap();
        let call = link.call("cvm://silent/p", "demo", Value::Null);
        assert!(tokio::time::timeout(Duration::from_millis(50), call).await.is_err());
        assert_eq!(link.pending_calls(), 0);

        let seen = peer.await.unwrap();
        match seen.as_slice() {
            [Frame::Call { id: called, .. }, Frame::Cancel { id: cancelled }] => {
                assert_eq!(called, cancelled)
            }
            other => panic!("unexpected frames {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RemoteLink::connect("ghost", addr, &TransportConfig::default()).await;
        assert!(matches!(result, Err(CvmError::Transport(_))));
    }
}
