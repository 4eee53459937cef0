//! Response body relayed to the caller.
//!
//! Frames are passed through untouched while the bytes are counted. When the
//! body is released, whether fully written, failed, or abandoned by the
//! caller, the post-call filters are scheduled exactly once.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};

use crate::filters::{Exchange, FilterChain};

/// Post-call work owed once the body is released.
pub struct CompletionHook {
    chain: Arc<FilterChain>,
    exchange: Exchange,
}

impl CompletionHook {
    pub fn new(chain: Arc<FilterChain>, exchange: Exchange) -> Self {
        Self { chain, exchange }
    }

    fn fire(mut self, bytes_sent: u64, completed: bool) {
        self.exchange.bytes_sent = bytes_sent;
        self.exchange.completed = completed;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    self.chain.run_post_call(&self.exchange).await;
                });
            }
            Err(_) => {
                tracing::debug!(
                    request_id = %self.exchange.request_id,
                    "No runtime available, skipping post-call filters"
                );
            }
        }
    }
}

/// Pass-through body that triggers a [`CompletionHook`] on drop.
pub struct ExchangeBody<B> {
    inner: B,
    bytes_sent: u64,
    completed: bool,
    hook: Option<CompletionHook>,
}

impl<B> ExchangeBody<B> {
    pub fn new(inner: B, hook: Option<CompletionHook>) -> Self {
        Self {
            inner,
            bytes_sent: 0,
            completed: false,
            hook,
        }
    }
}

impl<B> Body for ExchangeBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes_sent += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                this.completed = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for ExchangeBody<B> {
    fn drop(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.fire(self.bytes_sent, self.completed);
        }
    }
}
