//! Pull-side response bodies.
//!
//! A [`Body`] is a lazy, fallible stream of byte chunks plus an optional
//! release hook. The hook runs exactly once: on [`Body::close`] or, failing
//! that, on drop. Minimal stream helpers live here to avoid pulling in
//! `futures-util` as a runtime dependency.

use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;

/// A type-erased, single-threaded stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = anyhow::Result<Bytes>>>>;

/// The body returned by an application.
pub struct Body {
    stream: BodyStream,
    on_close: Option<Box<dyn FnOnce()>>,
}

impl Body {
    pub fn from_stream(stream: impl Stream<Item = anyhow::Result<Bytes>> + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            on_close: None,
        }
    }

    /// A body over already-produced chunks.
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
        I::IntoIter: 'static,
    {
        Self::from_stream(IterStream(chunks.into_iter()))
    }

    /// A body whose chunks are produced one at a time by `next`.
    ///
    /// Generator-style applications use this to defer work, including the
    /// call to `start_response`, until the first pull.
    pub fn from_fn<F>(next: F) -> Self
    where
        F: FnMut() -> Option<anyhow::Result<Bytes>> + 'static,
    {
        Self::from_stream(FnStream(next))
    }

    pub fn once(chunk: impl Into<Bytes>) -> Self {
        Self::from_chunks(std::iter::once(chunk.into()))
    }

    pub fn empty() -> Self {
        Self::from_stream(EmptyStream)
    }

    /// Attach a release hook. Hooks compose: earlier hooks run first.
    pub fn on_close(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_close = Some(match self.on_close.take() {
            Some(previous) => Box::new(move || {
                previous();
                hook();
            }),
            None => Box::new(hook),
        });
        self
    }

    /// Transform every chunk, keeping the release hook.
    pub fn map_chunks(mut self, f: impl FnMut(Bytes) -> Bytes + 'static) -> Self {
        let stream = std::mem::replace(&mut self.stream, Box::pin(EmptyStream));
        Self {
            stream: Box::pin(MapStream { inner: stream, f }),
            on_close: self.on_close.take(),
        }
    }

    /// Pull the next chunk.
    pub async fn next_chunk(&mut self) -> Option<anyhow::Result<Bytes>> {
        poll_fn(|cx| self.stream.as_mut().poll_next(cx)).await
    }

    /// Drain the body into one buffer, then release it.
    pub async fn collect(mut self) -> anyhow::Result<Bytes> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        self.close();
        Ok(Bytes::from(buf))
    }

    /// Release the body now.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

impl Stream for Body {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().stream.as_mut().poll_next(cx)
    }
}

impl Drop for Body {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("has_close_hook", &self.on_close.is_some())
            .finish_non_exhaustive()
    }
}

// ── Minimal stream helpers ──────────────────────────────────────────

struct EmptyStream;

impl Stream for EmptyStream {
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(None)
    }
}

struct IterStream<I>(I);

impl<I> Unpin for IterStream<I> {}

impl<I> Stream for IterStream<I>
where
    I: Iterator,
    I::Item: Into<Bytes>,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().0.next().map(|chunk| Ok(chunk.into())))
    }
}

struct FnStream<F>(F);

impl<F> Unpin for FnStream<F> {}

impl<F> Stream for FnStream<F>
where
    F: FnMut() -> Option<anyhow::Result<Bytes>>,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready((self.get_mut().0)())
    }
}

struct MapStream<F> {
    inner: BodyStream,
    f: F,
}

impl<F> Unpin for MapStream<F> {}

impl<F> Stream for MapStream<F>
where
    F: FnMut(Bytes) -> Bytes,
{
    type Item = anyhow::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok((this.f)(chunk)))),
            other => other,
        }
    }
}
