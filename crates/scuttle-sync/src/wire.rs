//! Running one side of a link over a byte stream.
//!
//! [`connect_io`] moves frames between a [`Duplex`] and anything that is
//! `AsyncRead + AsyncWrite`, encoded with a [`FrameCodec`]. The other side of
//! the stream runs its own `connect_io` with the same codec.
//!
//! A byte stream carries no abort: ending or aborting the source shuts down
//! the write half, and the peer sees end of stream either way. End of stream
//! closes the sink; a side that takes nothing from the peer also stops
//! sending then, since that is the only way the peer can ask it to.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::FrameCodec;
use crate::messages::Frame;
use crate::transport::{Duplex, Link, Pull, Termination};

const READ_CHUNK: usize = 8 * 1024;

/// Drive `duplex` over `io`.
///
/// Must be called within a Tokio runtime. The returned [`Link`] resolves
/// once both halves of the stream have stopped.
pub fn connect_io<D, IO, C>(duplex: &D, io: IO, codec: C) -> Link
where
    D: AsRef<Duplex<Frame>>,
    IO: AsyncRead + AsyncWrite + Send + 'static,
    C: FrameCodec + Clone + Send + 'static,
{
    let duplex = duplex.as_ref().clone();
    duplex.mark_linked();
    tracing::debug!(duplex = %duplex.name(), "connecting duplex to byte stream");
    let (reader, writer) = tokio::io::split(io);
    Link::new(
        tokio::spawn(write_frames(duplex.clone(), writer, codec.clone())),
        tokio::spawn(read_frames(duplex, reader, codec)),
    )
}

async fn write_frames<W, C>(duplex: Duplex<Frame>, mut writer: W, codec: C)
where
    W: AsyncWrite + Unpin,
    C: FrameCodec,
{
    let mut rx = duplex.watch();
    loop {
        rx.borrow_and_update();
        match duplex.pull() {
            Pull::Frame(frame) => {
                let bytes = match codec.encode(&frame) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(duplex = %duplex.name(), error = %e, kind = frame.kind(), "dropping unencodable frame");
                        continue;
                    }
                };
                let written = match writer.write_all(&bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    tracing::warn!(duplex = %duplex.name(), error = %e, "write failed");
                    duplex.abort_with(Termination::Error(e.to_string()));
                }
            }
            Pull::Pending => {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            Pull::End(t) => {
                if let Err(e) = writer.shutdown().await {
                    tracing::debug!(duplex = %duplex.name(), error = %e, "shutdown failed");
                }
                tracing::trace!(duplex = %duplex.name(), termination = %t, "write half closed");
                break;
            }
            Pull::Done => break,
        }
    }
}

async fn read_frames<R, C>(duplex: Duplex<Frame>, mut reader: R, mut codec: C)
where
    R: AsyncRead + Unpin,
    C: FrameCodec,
{
    let mut rx = duplex.watch();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        rx.borrow_and_update();
        match duplex.sink_request() {
            // Graceful: keep reading until the peer's end of stream.
            None | Some(Termination::End) => {}
            Some(t) => {
                duplex.close_sink(t);
                break;
            }
        }
        if duplex.sink_state().is_finished() {
            break;
        }

        let read = tokio::select! {
            r = reader.read(&mut chunk) => r,
            r = rx.changed() => {
                if r.is_err() {
                    break;
                }
                continue;
            }
        };
        let n = match read {
            Ok(0) => {
                duplex.close_sink(Termination::End);
                if !duplex.uses_sink() {
                    duplex.stop_from_downstream(Termination::End);
                }
                break;
            }
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(duplex = %duplex.name(), error = %e, "read failed");
                duplex.close_sink(Termination::Error(e.to_string()));
                break;
            }
        };

        codec.feed(&chunk[..n]);
        loop {
            match codec.next_frame() {
                Ok(Some(frame)) => {
                    if !duplex.accepts_frames() {
                        continue;
                    }
                    if let Some(handler) = duplex.handler() {
                        handler.on_frame(frame).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(duplex = %duplex.name(), error = %e, "dropping undecodable frame");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonLinesCodec;
    use crate::transport::{DuplexOptions, FrameHandler};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Default)]
    struct Collect {
        frames: Mutex<Vec<Frame>>,
        finished: Mutex<Option<Termination>>,
    }

    #[async_trait]
    impl FrameHandler<Frame> for Collect {
        async fn on_frame(&self, frame: Frame) {
            self.frames.lock().unwrap().push(frame);
        }

        fn on_finished(&self, termination: Termination) {
            *self.finished.lock().unwrap() = Some(termination);
        }
    }

    fn attach(duplex: &Duplex<Frame>) -> Arc<Collect> {
        let collect = Arc::new(Collect::default());
        let handler: Arc<dyn FrameHandler<Frame>> = collect.clone();
        duplex.set_handler(Arc::downgrade(&handler));
        collect
    }

    #[tokio::test]
    async fn test_frames_cross_and_end_closes_both_sides() {
        let (left, right) = tokio::io::duplex(64);
        let a = Duplex::new("a", DuplexOptions::default());
        let b = Duplex::new("b", DuplexOptions::default());
        let ca = attach(&a);
        let cb = attach(&b);
        let la = connect_io(&a, left, JsonLinesCodec::new());
        let lb = connect_io(&b, right, JsonLinesCodec::new());

        a.push(Frame::Sync);
        b.push(Frame::Sync);
        a.end();
        tokio::time::timeout(Duration::from_secs(5), async {
            la.closed().await.unwrap();
            lb.closed().await.unwrap();
        })
        .await
        .unwrap();

        assert_eq!(*cb.frames.lock().unwrap(), vec![Frame::Sync]);
        assert!(a.is_finished() && b.is_finished());
        assert_eq!(*ca.finished.lock().unwrap(), Some(Termination::End));
        assert_eq!(*cb.finished.lock().unwrap(), Some(Termination::End));
    }

    #[tokio::test]
    async fn test_garbage_line_is_skipped() {
        let (mut left, right) = tokio::io::duplex(256);
        let b = Duplex::new("b", DuplexOptions::default());
        let cb = attach(&b);
        let lb = connect_io(&b, right, JsonLinesCodec::new());

        left.write_all(b"{broken\n\"SYNC\"\n").await.unwrap();
        left.shutdown().await.unwrap();
        drop(left);
        tokio::time::timeout(Duration::from_secs(5), lb.closed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*cb.frames.lock().unwrap(), vec![Frame::Sync]);
    }
}
