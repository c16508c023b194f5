// TCP accept loop and per-connection tasks

use crate::config::READ_BUFFER_SIZE;
use crate::handler::RequestHandler;
use crate::protocol::FrameCodec;
use crate::storage::{ConnectionHandle, Outbound, Store};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// The relay server: accepts connections and runs one task per connection.
///
/// Each connection cycles decode → dispatch → encode until the peer
/// closes, an error ends it, or the session reaper severs it.
pub struct RelayServer {
    codec: Arc<dyn FrameCodec>,
    handler: Arc<RequestHandler>,
}

impl RelayServer {
    pub fn new(store: Arc<dyn Store>, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            codec,
            handler: Arc::new(RequestHandler::new(store)),
        }
    }

    /// Bind the listening socket. The only fatal startup error.
    pub async fn bind(&self, addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        tracing::info!("listening on {}", addr);
        Ok(listener)
    }

    /// Accept connections until the task is dropped. Accept errors are
    /// logged, never fatal.
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!("new connection from {}", peer);
                    let codec = self.codec.clone();
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, codec, handler).await;
                        tracing::info!("{} disconnected", peer);
                    });
                }
                Err(e) => {
                    tracing::error!("accept error: {}", e);
                }
            }
        }
    }
}

/// One connection's lifetime.
///
/// The task owns both socket halves and selects over reads and its
/// outbound channel; responses and pushes travel the same channel, so a
/// frame queued first is written first. Each read's bytes are decoded
/// independently; a truncated trailing record simply yields fewer frames.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    codec: Arc<dyn FrameCodec>,
    handler: Arc<RequestHandler>,
) {
    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(outgoing_tx);

    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => break, // peer closed
                    Ok(n) => {
                        for request in codec.decode(&buf[..n]) {
                            let response = match handler.process(&request, &handle) {
                                Ok(response) => response,
                                Err(e) => {
                                    tracing::error!("dispatch failed for {}: {}", peer, e);
                                    return;
                                }
                            };
                            // Queued rather than written directly so pushes
                            // and responses keep their relative order.
                            handle.deliver(response);
                        }
                    }
                    Err(e) => {
                        tracing::error!("read error from {}: {}", peer, e);
                        break;
                    }
                }
            }
            outbound = outgoing_rx.recv() => {
                match outbound {
                    Some(Outbound::Frame(frame)) => {
                        let bytes = match codec.encode(&frame) {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                tracing::warn!("dropping unencodable frame for {}: {}", peer, e);
                                continue;
                            }
                        };
                        if let Err(e) = writer.write_all(&bytes).await {
                            tracing::error!("write error to {}: {}", peer, e);
                            break;
                        }
                    }
                    Some(Outbound::Shutdown) => {
                        tracing::info!("severing {}: session expired", peer);
                        break;
                    }
                    // Unreachable while this task holds a sender clone.
                    None => break,
                }
            }
        }
    }
}
