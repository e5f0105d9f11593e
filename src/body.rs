//! Definitions for the Request and Response bodies.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use http_body::{Body as HttpBody, Frame, SizeHint};

use crate::async_stream::AsyncStream;

/// Body is returned by the webdav handler, and implements both `Stream`
/// and `http_body::Body`.
pub struct Body {
    pub(crate) inner: BodyType,
}

pub(crate) enum BodyType {
    Bytes(Option<Bytes>),
    AsyncStream(AsyncStream<Bytes, io::Error>),
    Empty,
}

impl Body {
    /// Return an empty body.
    pub fn empty() -> Body {
        Body { inner: BodyType::Empty }
    }
}

impl Stream for Body {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
        match self.inner {
            BodyType::Bytes(ref mut strm) => Poll::Ready(strm.take().map(Ok)),
            BodyType::AsyncStream(ref mut strm) => Pin::new(strm).poll_next(cx),
            BodyType::Empty => Poll::Ready(None),
        }
    }
}

impl HttpBody for Body {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        self.poll_next(cx).map(|opt| opt.map(|res| res.map(Frame::data)))
    }

    fn is_end_stream(&self) -> bool {
        matches!(self.inner, BodyType::Empty)
    }

    fn size_hint(&self) -> SizeHint {
        match self.inner {
            BodyType::Bytes(Some(ref b)) => SizeHint::with_exact(b.len() as u64),
            BodyType::Bytes(None) | BodyType::Empty => SizeHint::with_exact(0),
            BodyType::AsyncStream(_) => SizeHint::default(),
        }
    }
}

impl From<String> for Body {
    fn from(t: String) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t))) }
    }
}

impl From<&str> for Body {
    fn from(t: &str) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t.to_string()))) }
    }
}

impl From<Bytes> for Body {
    fn from(t: Bytes) -> Body {
        Body { inner: BodyType::Bytes(Some(t)) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(t: Vec<u8>) -> Body {
        Body { inner: BodyType::Bytes(Some(Bytes::from(t))) }
    }
}

impl From<AsyncStream<Bytes, io::Error>> for Body {
    fn from(s: AsyncStream<Bytes, io::Error>) -> Body {
        Body { inner: BodyType::AsyncStream(s) }
    }
}
