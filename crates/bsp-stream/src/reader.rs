//! Frame reader over any async byte source
//!
//! Serial ports, files, stdin and in-memory pipes all look the same here: bytes
//! come in, frames and lifecycle events go out on a channel.

use bsp_core::{AcquisitionEvent, BspResult, FrameDecoder};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const READ_BUFFER_LEN: usize = 4096;

/// Totals for one reader run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderStats {
    pub bytes_read: u64,
    pub frames_decoded: u64,
    pub bytes_discarded: u64,
}

/// Decodes frames from `source` and forwards them as [`AcquisitionEvent`]s
pub struct FrameReader<R> {
    source: R,
    label: String,
    decoder: FrameDecoder,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a byte source; `label` names it in the `Connected` event
    pub fn new(source: R, label: impl Into<String>) -> Self {
        FrameReader {
            source,
            label: label.into(),
            decoder: FrameDecoder::new(),
        }
    }

    /// Read until end of input or until the event receiver goes away
    ///
    /// Emits `Connected` and `Started` first and `Stopped` and `Disconnected`
    /// last, also when the source fails.
    pub async fn run(mut self, events: mpsc::Sender<AcquisitionEvent>) -> BspResult<ReaderStats> {
        let mut stats = ReaderStats::default();

        let opening = [
            AcquisitionEvent::Connected { port: self.label.clone() },
            AcquisitionEvent::Started,
        ];
        for event in opening {
            if events.send(event).await.is_err() {
                return Ok(stats);
            }
        }
        info!(source = %self.label, "acquisition started");

        let result = self.pump(&events, &mut stats).await;

        for event in [AcquisitionEvent::Stopped, AcquisitionEvent::Disconnected] {
            // The receiver may already be gone; nothing left to tell it
            let _ = events.send(event).await;
        }
        info!(
            source = %self.label,
            frames = stats.frames_decoded,
            discarded = stats.bytes_discarded,
            "acquisition stopped"
        );

        result.map(|_| stats)
    }

    async fn pump(
        &mut self,
        events: &mpsc::Sender<AcquisitionEvent>,
        stats: &mut ReaderStats,
    ) -> BspResult<()> {
        let mut buf = vec![0u8; READ_BUFFER_LEN];

        loop {
            let n = match self.source.read(&mut buf).await {
                Ok(0) => {
                    debug!(source = %self.label, "end of input");
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(source = %self.label, error = %e, "read failed");
                    return Err(e.into());
                }
            };
            stats.bytes_read += n as u64;

            let discarded_before = self.decoder.bytes_discarded();
            let frames = self.decoder.push(&buf[..n]);
            let skipped = self.decoder.bytes_discarded() - discarded_before;
            if skipped > 0 {
                debug!(skipped, "resynchronized on frame boundary");
            }
            stats.frames_decoded = self.decoder.frames_decoded();
            stats.bytes_discarded = self.decoder.bytes_discarded();

            for frame in frames {
                if events.send(AcquisitionEvent::PacketReceived(frame)).await.is_err() {
                    debug!("event receiver closed, stopping reader");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bsp_core::{BspError, Frame};
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    async fn collect(bytes: Vec<u8>) -> (ReaderStats, Vec<AcquisitionEvent>) {
        let (tx, mut rx) = mpsc::channel(1024);
        let stats = FrameReader::new(&bytes[..], "memory").run(tx).await.unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (stats, events)
    }

    #[tokio::test]
    async fn test_events_bracket_frames() {
        let mut bytes = Frame::new(0, 8206, 100).encode().to_vec();
        bytes.extend_from_slice(&Frame::new(1, 1, 2).encode());

        let (stats, events) = collect(bytes).await;
        assert_eq!(
            events,
            vec![
                AcquisitionEvent::Connected { port: "memory".into() },
                AcquisitionEvent::Started,
                AcquisitionEvent::PacketReceived(Frame::new(0, 8206, 100)),
                AcquisitionEvent::PacketReceived(Frame::new(1, 1, 2)),
                AcquisitionEvent::Stopped,
                AcquisitionEvent::Disconnected,
            ]
        );
        assert_eq!(stats.bytes_read, 16);
        assert_eq!(stats.frames_decoded, 2);
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let mut bytes = vec![0x00, 0xC7, 0x13];
        bytes.extend_from_slice(&Frame::new(7, 3, 4).encode());

        let (stats, events) = collect(bytes).await;
        let frames: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, AcquisitionEvent::PacketReceived(_)))
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(stats.bytes_discarded, 3);
    }

    struct FailingSource;

    impl AsyncRead for FailingSource {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable unplugged")))
        }
    }

    #[tokio::test]
    async fn test_read_error_still_stops() {
        let (tx, mut rx) = mpsc::channel(16);
        let err = FrameReader::new(FailingSource, "ttyUSB0").run(tx).await.unwrap_err();
        assert!(matches!(err, BspError::Io { .. }));

        let mut last = None;
        while let Some(event) = rx.recv().await {
            last = Some(event);
        }
        assert_eq!(last, Some(AcquisitionEvent::Disconnected));
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_reader() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let bytes = Frame::new(0, 0, 0).encode();
        let stats = FrameReader::new(&bytes[..], "memory").run(tx).await.unwrap();
        assert_eq!(stats.bytes_read, 0);
    }
}
