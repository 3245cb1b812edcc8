//! WebSocket fan-out of filtered chunks
//!
//! Every connected client receives each [`FilteredChunk`] as a JSON text
//! message `{source, timestamp, fs, window}`. A text `ping` is answered with
//! `pong`. The server and its clients shut down once the chunk stream closes.

use crate::pipeline::FilteredChunk;
use bsp_core::{BspError, BspResult};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

/// Default port for frontend connections
pub const DEFAULT_WS_PORT: u16 = 8765;

fn ws_error(err: tungstenite::Error) -> BspError {
    BspError::Io {
        message: format!("websocket: {}", err),
    }
}

/// Listening WebSocket server bound to a chunk stream
pub struct ChunkServer {
    listener: TcpListener,
    chunks: broadcast::Receiver<FilteredChunk>,
}

impl ChunkServer {
    /// Bind to `addr`; clients get every chunk sent after they connect
    pub async fn bind(
        addr: impl ToSocketAddrs,
        chunks: broadcast::Receiver<FilteredChunk>,
    ) -> BspResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(ChunkServer { listener, chunks })
    }

    /// Address actually bound, useful with port 0
    pub fn local_addr(&self) -> BspResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients until the chunk stream closes
    pub async fn run(mut self) -> BspResult<()> {
        info!(addr = %self.local_addr()?, "websocket server listening");
        let mut clients = 0u64;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            clients += 1;
                            let chunks = self.chunks.resubscribe();
                            tokio::spawn(async move {
                                if let Err(e) = serve_client(stream, peer, chunks).await {
                                    debug!(%peer, error = %e, "websocket client ended with error");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to accept websocket client"),
                    }
                }

                // Only watches for the end of the stream
                chunk = self.chunks.recv() => {
                    if let Err(broadcast::error::RecvError::Closed) = chunk {
                        break;
                    }
                }
            }
        }

        info!(clients, "websocket server stopped");
        Ok(())
    }
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    mut chunks: broadcast::Receiver<FilteredChunk>,
) -> BspResult<()> {
    let ws = tokio_tungstenite::accept_async(stream).await.map_err(ws_error)?;
    let (mut write, mut read) = ws.split();
    info!(%peer, "websocket client connected");

    loop {
        tokio::select! {
            chunk = chunks.recv() => {
                match chunk {
                    Ok(chunk) => {
                        let text = serde_json::to_string(&chunk).map_err(|e| BspError::Io {
                            message: format!("cannot encode chunk: {}", e),
                        })?;
                        write.send(Message::text(text)).await.map_err(ws_error)?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%peer, skipped, "websocket client fell behind, chunks lost");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Peer may already be gone
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) if text.as_str() == "ping" => {
                        write.send(Message::text("pong")).await.map_err(ws_error)?;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ws_error(e)),
                }
            }
        }
    }

    info!(%peer, "websocket client disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::pipeline::start_pipeline;
    use bsp_core::{AcquisitionEvent, Frame};
    use tokio::sync::mpsc;
    use tokio_tungstenite::connect_async;

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return text.as_str().to_string(),
                Message::Close(_) => panic!("closed before a text message"),
                _ => continue,
            }
        }
    }

    #[tokio::test]
    async fn test_client_receives_filtered_chunk() {
        let config = PipelineConfig {
            chunk_size: 16,
            buffer_size: 64,
            ..PipelineConfig::default()
        };
        let (tx, rx) = mpsc::channel(64);
        let handle = start_pipeline(config, rx).unwrap();

        let server = ChunkServer::bind("127.0.0.1:0", handle.chunks.resubscribe())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server_task = tokio::spawn(server.run());

        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        // The reply means the client is subscribed before any chunk is sent
        ws.send(Message::text("ping")).await.unwrap();
        assert_eq!(next_text(&mut ws).await, "pong");

        tx.send(AcquisitionEvent::Started).await.unwrap();
        for seq in 0..16u8 {
            tx.send(AcquisitionEvent::PacketReceived(Frame::new(seq, 8206, 100))).await.unwrap();
        }

        let chunk: FilteredChunk = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(chunk.source, "EMG");
        assert_eq!(chunk.fs, 512.0);
        assert_eq!(chunk.timestamp_ms, 0);
        assert_eq!(chunk.window.len(), 2);
        assert_eq!(chunk.window[0].len(), 16);

        // Ending the pipeline closes the client and stops the server
        drop(tx);
        handle.task.await.unwrap().unwrap();
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
        server_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_stops_with_stream() {
        let (tx, rx) = broadcast::channel::<FilteredChunk>(4);
        let server = ChunkServer::bind("127.0.0.1:0", rx).await.unwrap();
        let task = tokio::spawn(server.run());
        drop(tx);
        task.await.unwrap().unwrap();
    }
}
