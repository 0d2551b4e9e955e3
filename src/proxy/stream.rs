// src/proxy/stream.rs
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::Body;
use std::time::Duration;

/// How streamed response bodies are flushed downstream (spec §4.7).
#[derive(Debug, Clone, Copy)]
pub enum FlushPolicy {
    /// Forward every upstream chunk as soon as it arrives.
    Immediate,
    /// Buffer the whole body and emit it as a single chunk.
    Never,
    /// Coalesce chunks received within each window into one chunk.
    Periodic(Duration),
}

impl FlushPolicy {
    pub fn from_millis(flush_interval_ms: i64) -> Self {
        match flush_interval_ms {
            ms if ms < 0 => FlushPolicy::Immediate,
            0 => FlushPolicy::Never,
            ms => FlushPolicy::Periodic(Duration::from_millis(ms as u64)),
        }
    }
}

/// Re-wraps `body` according to `policy`. `Immediate` is a no-op: hyper
/// already forwards each upstream chunk as it is polled.
pub fn apply_flush_policy(body: Body, policy: FlushPolicy) -> Body {
    match policy {
        FlushPolicy::Immediate => body,
        FlushPolicy::Never => buffer_entire(body),
        FlushPolicy::Periodic(interval) => coalesce(body, interval),
    }
}

fn buffer_entire(body: Body) -> Body {
    let stream = async_stream::stream! {
        match hyper::body::to_bytes(body).await {
            Ok(bytes) => yield Ok::<Bytes, hyper::Error>(bytes),
            Err(e) => yield Err(e),
        }
    };
    Body::wrap_stream(stream)
}

fn coalesce(body: Body, interval: Duration) -> Body {
    let stream = async_stream::stream! {
        let mut body = body;
        let mut buf = BytesMut::new();
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // the first tick fires immediately; consume it

        loop {
            tokio::select! {
                biased;
                chunk = body.next() => {
                    match chunk {
                        Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                        Some(Err(e)) => {
                            yield Err(e);
                            return;
                        }
                        None => {
                            if !buf.is_empty() {
                                yield Ok::<Bytes, hyper::Error>(buf.split().freeze());
                            }
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !buf.is_empty() {
                        yield Ok::<Bytes, hyper::Error>(buf.split().freeze());
                    }
                }
            }
        }
    };
    Body::wrap_stream(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_interval_is_immediate() {
        assert!(matches!(FlushPolicy::from_millis(-1), FlushPolicy::Immediate));
    }

    #[test]
    fn zero_interval_is_never() {
        assert!(matches!(FlushPolicy::from_millis(0), FlushPolicy::Never));
    }

    #[test]
    fn positive_interval_is_periodic() {
        match FlushPolicy::from_millis(250) {
            FlushPolicy::Periodic(d) => assert_eq!(d, Duration::from_millis(250)),
            other => panic!("expected Periodic, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn never_policy_buffers_whole_body_into_one_chunk() {
        let body = Body::wrap_stream(futures::stream::iter(vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]));
        let rewrapped = apply_flush_policy(body, FlushPolicy::Never);
        let collected = hyper::body::to_bytes(rewrapped).await.unwrap();
        assert_eq!(collected.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn immediate_policy_is_passthrough() {
        let body = Body::from("unchanged");
        let rewrapped = apply_flush_policy(body, FlushPolicy::Immediate);
        let collected = hyper::body::to_bytes(rewrapped).await.unwrap();
        assert_eq!(collected.as_ref(), b"unchanged");
    }
}
