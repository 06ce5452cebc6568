//! TCP transport speaking the hatunnel wire protocol.
//!
//! One framed connection to the relay carries every logical stream. Each
//! `Open` from the relay gets a fresh connection to the local target with
//! its own reader and writer tasks: the reader pumps local bytes back
//! through a shared outbound queue so the relay socket has a single
//! writer, and the writer drains a bounded per-stream queue so one slow
//! local connection never stalls the rest of the tunnel.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hatunnel_core::{ConnectError, TunnelConfig};
use hatunnel_wire::{
    AuthAck, AuthRequest, ControlPayload, Frame, FrameCodec, FrameKind, Ping, Pong,
    ShutdownNotice, StreamId, WireError,
};

use super::transport::{DisconnectReason, Transport, TunnelSession};

/// Read chunk size for local target connections.
const LOCAL_READ_CHUNK: usize = 16 * 1024;

/// Depth of the queue feeding frames back to the relay.
const OUTBOUND_QUEUE: usize = 128;

/// Depth of each stream's local write queue. A stream that falls this far
/// behind its local connection is closed rather than allowed to stall the
/// pump.
const LOCAL_WRITE_QUEUE: usize = 32;

/// Production transport: a framed TCP connection to the relay.
pub struct TcpTransport {
    client_id: Uuid,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self { client_id: Uuid::new_v4() }
    }

    /// Identity presented to the relay on every handshake.
    pub fn client_id(&self) -> Uuid {
        self.client_id
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Session = TcpSession;

    async fn open(&self, config: &TunnelConfig) -> Result<TcpSession, ConnectError> {
        let endpoint =
            config.remote_endpoint().map_err(|e| ConnectError::Network(e.to_string()))?;

        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| ConnectError::Network(format!("connect {endpoint}: {}", error_chain(&e))))?;
        let _ = stream.set_nodelay(true);
        let mut framed = Framed::new(stream, FrameCodec::new());

        let auth = AuthRequest {
            client_id: self.client_id.to_string(),
            username: config.auth_user.clone(),
            password: config.auth_pass.clone(),
        };
        let frame =
            auth.to_frame().map_err(|e| ConnectError::Network(format!("encode auth: {e}")))?;
        framed.send(frame).await.map_err(|e| ConnectError::Network(format!("send auth: {e}")))?;

        let ack = match framed.next().await {
            Some(Ok(frame)) if frame.kind == FrameKind::AuthAck => AuthAck::decode(&frame.payload)
                .map_err(|e| ConnectError::Network(format!("malformed auth ack: {e}")))?,
            Some(Ok(frame)) => {
                return Err(ConnectError::Network(format!(
                    "unexpected {:?} frame before auth ack",
                    frame.kind
                )));
            }
            Some(Err(e)) => return Err(ConnectError::Network(format!("read auth ack: {e}"))),
            None => {
                return Err(ConnectError::Network("connection closed during handshake".into()));
            }
        };

        if !ack.accepted {
            return Err(ConnectError::Auth(
                ack.reason.unwrap_or_else(|| "credentials rejected".into()),
            ));
        }

        info!(client_id = %self.client_id, remote = %endpoint, "Tunnel established");
        Ok(TcpSession::new(framed, config.local_target.clone(), config.keepalive_interval))
    }
}

/// One established tunnel connection, multiplexing relay streams onto
/// fresh local target connections.
pub struct TcpSession {
    framed: Option<Framed<TcpStream, FrameCodec>>,
    local_target: String,
    keepalive: Duration,
    streams: HashMap<u32, LocalStream>,
    outbound_tx: mpsc::Sender<Frame>,
    outbound_rx: mpsc::Receiver<Frame>,
    ping_seq: u64,
}

struct LocalStream {
    data_tx: mpsc::Sender<Bytes>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

enum Event {
    Inbound(Option<Result<Frame, WireError>>),
    Outbound(Frame),
    PingTick,
    IdleTimeout,
}

enum FrameOutcome {
    Continue,
    /// Answer the relay directly, ahead of anything queued. Pongs and
    /// stream rejections must never be lost to outbound backpressure.
    Reply(Frame),
    End(DisconnectReason),
}

impl TcpSession {
    fn new(
        framed: Framed<TcpStream, FrameCodec>,
        local_target: String,
        keepalive: Duration,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        Self {
            framed: Some(framed),
            local_target,
            keepalive,
            streams: HashMap::new(),
            outbound_tx,
            outbound_rx,
            ping_seq: 0,
        }
    }

    async fn pump(&mut self, framed: &mut Framed<TcpStream, FrameCodec>) -> DisconnectReason {
        let mut ping_timer = tokio::time::interval(self.keepalive);
        ping_timer.tick().await; // first tick fires immediately

        // Any inbound frame counts as liveness; silence for two keepalive
        // intervals means the link is dead.
        let idle_limit = self.keepalive * 2;
        let idle = tokio::time::sleep(idle_limit);
        tokio::pin!(idle);

        loop {
            let event = tokio::select! {
                inbound = framed.next() => Event::Inbound(inbound),
                outbound = self.outbound_rx.recv() => match outbound {
                    Some(frame) => Event::Outbound(frame),
                    // `self.outbound_tx` keeps the channel open.
                    None => continue,
                },
                _ = ping_timer.tick() => Event::PingTick,
                () = &mut idle => Event::IdleTimeout,
            };

            match event {
                Event::Inbound(Some(Ok(frame))) => {
                    idle.as_mut().reset(Instant::now() + idle_limit);
                    match self.handle_frame(frame).await {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Reply(reply) => {
                            if let Err(e) = framed.send(reply).await {
                                return DisconnectReason::Io(e.to_string());
                            }
                        }
                        FrameOutcome::End(reason) => return reason,
                    }
                }
                Event::Inbound(Some(Err(WireError::Io(e)))) => {
                    return DisconnectReason::Io(e.to_string());
                }
                Event::Inbound(Some(Err(e))) => return DisconnectReason::Protocol(e.to_string()),
                Event::Inbound(None) => return DisconnectReason::RemoteClosed,
                Event::Outbound(frame) => {
                    if let Err(e) = framed.send(frame).await {
                        return DisconnectReason::Io(e.to_string());
                    }
                }
                Event::PingTick => {
                    self.ping_seq = self.ping_seq.wrapping_add(1);
                    match (Ping { seq: self.ping_seq }).to_frame() {
                        Ok(frame) => {
                            if let Err(e) = framed.send(frame).await {
                                return DisconnectReason::Io(e.to_string());
                            }
                            debug!(seq = self.ping_seq, "Sent keepalive ping");
                        }
                        Err(e) => return DisconnectReason::Protocol(e.to_string()),
                    }
                }
                Event::IdleTimeout => return DisconnectReason::KeepaliveTimeout,
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> FrameOutcome {
        match frame.kind {
            FrameKind::Open => match self.open_local_stream(frame.stream).await {
                Some(reply) => FrameOutcome::Reply(reply),
                None => FrameOutcome::Continue,
            },
            FrameKind::Data => match self.write_to_local(frame) {
                Some(reply) => FrameOutcome::Reply(reply),
                None => FrameOutcome::Continue,
            },
            FrameKind::Close => {
                self.close_stream(frame.stream.as_u32());
                FrameOutcome::Continue
            }
            FrameKind::Ping => match Ping::decode(&frame.payload) {
                Ok(ping) => match (Pong { seq: ping.seq }).to_frame() {
                    Ok(reply) => FrameOutcome::Reply(reply),
                    Err(e) => FrameOutcome::End(DisconnectReason::Protocol(e.to_string())),
                },
                Err(e) => FrameOutcome::End(DisconnectReason::Protocol(e.to_string())),
            },
            FrameKind::Pong => match Pong::decode(&frame.payload) {
                Ok(pong) => {
                    debug!(seq = pong.seq, "Keepalive pong");
                    FrameOutcome::Continue
                }
                Err(e) => FrameOutcome::End(DisconnectReason::Protocol(e.to_string())),
            },
            FrameKind::Shutdown => {
                let reason = ShutdownNotice::decode(&frame.payload)
                    .map_or_else(|_| "relay shutdown".to_owned(), |notice| notice.reason);
                info!(reason = %reason, "Relay announced shutdown");
                FrameOutcome::End(DisconnectReason::RemoteClosed)
            }
            FrameKind::Auth | FrameKind::AuthAck => FrameOutcome::End(
                DisconnectReason::Protocol(format!(
                    "unexpected {:?} frame after handshake",
                    frame.kind
                )),
            ),
        }
    }

    /// Returns a `Close` reply when the local target cannot be reached.
    async fn open_local_stream(&mut self, stream: StreamId) -> Option<Frame> {
        let id = stream.as_u32();
        if self.streams.contains_key(&id) {
            warn!(stream = id, "Relay reopened an active stream; resetting it");
            self.close_stream(id);
        }

        match TcpStream::connect(&self.local_target).await {
            Ok(local) => {
                let _ = local.set_nodelay(true);
                let (reader, writer) = local.into_split();
                let (data_tx, data_rx) = mpsc::channel(LOCAL_WRITE_QUEUE);
                let reader_task = spawn_local_reader(stream, reader, self.outbound_tx.clone());
                let writer_task =
                    spawn_local_writer(stream, writer, data_rx, self.outbound_tx.clone());
                self.streams.insert(id, LocalStream { data_tx, reader_task, writer_task });
                debug!(stream = id, target = %self.local_target, "Opened local stream");
                None
            }
            Err(e) => {
                // Only this stream is refused; the tunnel stays up.
                warn!(
                    stream = id,
                    target = %self.local_target,
                    error = %e,
                    "Local target refused connection"
                );
                Some(Frame::close(stream))
            }
        }
    }

    /// Hand the payload to the stream's writer task. Returns a `Close`
    /// reply when the stream has fallen too far behind and was dropped.
    fn write_to_local(&mut self, frame: Frame) -> Option<Frame> {
        let id = frame.stream.as_u32();
        let Some(local) = self.streams.get_mut(&id) else {
            debug!(stream = id, "Data for unknown stream");
            return None;
        };
        if let Err(e) = local.data_tx.try_send(frame.payload) {
            warn!(stream = id, error = %e, "Local writer backed up; closing stream");
            self.close_stream(id);
            return Some(Frame::close(frame.stream));
        }
        None
    }

    fn close_stream(&mut self, id: u32) {
        if let Some(local) = self.streams.remove(&id) {
            local.reader_task.abort();
            local.writer_task.abort();
            debug!(stream = id, "Closed local stream");
        }
    }
}

#[async_trait]
impl TunnelSession for TcpSession {
    async fn forward(&mut self) -> DisconnectReason {
        let Some(mut framed) = self.framed.take() else {
            return DisconnectReason::Io("session already closed".into());
        };
        let reason = self.pump(&mut framed).await;
        self.framed = Some(framed);
        reason
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            let _ = framed.get_mut().shutdown().await;
        }
        for (_, local) in self.streams.drain() {
            local.reader_task.abort();
            local.writer_task.abort();
        }
    }
}

/// Walk the `source()` chain of an error and join into a single string.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut chain = vec![err.to_string()];
    let mut current = err.source();
    while let Some(e) = current {
        chain.push(e.to_string());
        current = e.source();
    }
    chain.join(": ")
}

/// Drain one stream's write queue into its local connection. A write
/// failure closes the stream through the shared outbound queue.
fn spawn_local_writer(
    stream: StreamId,
    mut writer: OwnedWriteHalf,
    mut data_rx: mpsc::Receiver<Bytes>,
    tx: mpsc::Sender<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(chunk) = data_rx.recv().await {
            if let Err(e) = writer.write_all(&chunk).await {
                debug!(stream = %stream, error = %e, "Local write failed");
                let _ = tx.send(Frame::close(stream)).await;
                return;
            }
        }
    })
}

/// Pump bytes from a local connection into the outbound queue until EOF.
fn spawn_local_reader(
    stream: StreamId,
    mut reader: OwnedReadHalf,
    tx: mpsc::Sender<Frame>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(LOCAL_READ_CHUNK);
        loop {
            buf.reserve(LOCAL_READ_CHUNK);
            match reader.read_buf(&mut buf).await {
                Ok(0) => {
                    let _ = tx.send(Frame::close(stream)).await;
                    return;
                }
                Ok(_) => {
                    if tx.send(Frame::data(stream, buf.split().freeze())).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(stream = %stream, error = %e, "Local read failed");
                    let _ = tx.send(Frame::close(stream)).await;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_ids_are_unique_per_transport() {
        let a = TcpTransport::new();
        let b = TcpTransport::default();
        assert_ne!(a.client_id(), b.client_id());
    }
}
