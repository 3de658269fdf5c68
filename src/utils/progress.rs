use std::pin::Pin;
use std::task::{Context, Poll};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;

pin_project! {
    /// Body stream that reports the running byte count after every chunk.
    pub struct ProgressStream<S, F> {
        #[pin]
        inner: S,
        bytes_sent: u64,
        on_progress: F,
    }
}

impl<S, F> ProgressStream<S, F>
where
    F: FnMut(u64),
{
    pub fn new(inner: S, on_progress: F) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            on_progress,
        }
    }
}

impl<S, F> Stream for ProgressStream<S, F>
where
    S: Stream<Item = std::io::Result<Bytes>>,
    F: FnMut(u64),
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    *this.bytes_sent += chunk.len() as u64;
                    (this.on_progress)(*this.bytes_sent);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Percentage of `bytes_expected`, or -1 when the total is unknown.
pub fn percent(bytes_sent: u64, bytes_expected: u64) -> f64 {
    if bytes_expected == 0 {
        return -1.0;
    }
    bytes_sent as f64 / bytes_expected as f64 * 100.0
}
