//! Line splitting over an HTTP body byte stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_util::Stream;
use memchr::memchr;
use pin_project_lite::pin_project;

use crate::error::CanonicalError;

pin_project! {
    /// Yields one line per `\n`, without the terminator (a trailing `\r` is
    /// stripped too). A final unterminated line is flushed at end of input.
    ///
    /// Lines are decoded lossily; SSE payloads are JSON so invalid UTF-8 can
    /// only come from a broken upstream and will fail JSON parsing anyway.
    pub struct SseLineStream<S> {
        #[pin]
        inner: S,
        buffer: BytesMut,
        scanned: usize,
        done: bool,
    }
}

impl<S> SseLineStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(4096),
            scanned: 0,
            done: false,
        }
    }
}

fn take_line(buffer: &mut BytesMut, end: usize) -> String {
    let raw = buffer.split_to(end + 1);
    let mut line = &raw[..end];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }
    String::from_utf8_lossy(line).into_owned()
}

impl<S, B> Stream for SseLineStream<S>
where
    S: Stream<Item = Result<B, CanonicalError>>,
    B: AsRef<[u8]>,
{
    type Item = Result<String, CanonicalError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            if let Some(rel) = memchr(b'\n', &this.buffer[*this.scanned..]) {
                let end = *this.scanned + rel;
                *this.scanned = 0;
                return Poll::Ready(Some(Ok(take_line(this.buffer, end))));
            }
            *this.scanned = this.buffer.len();

            if *this.done {
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = this.buffer.split();
                *this.scanned = 0;
                let mut line = &rest[..];
                if line.last() == Some(&b'\r') {
                    line = &line[..line.len() - 1];
                }
                return Poll::Ready(Some(Ok(String::from_utf8_lossy(line).into_owned())));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(chunk.as_ref()),
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => *this.done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
