//! Stream combinators.

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Maps each upstream item to an inner stream, keeping only the most
/// recent one.
///
/// Every poll first drains whatever the upstream has ready, so a burst of
/// triggers collapses into a single inner stream. A new upstream item drops
/// the inner stream in flight. The combined stream ends once the upstream
/// and the current inner stream have both ended.
#[must_use = "streams do nothing unless polled"]
pub struct SwitchMap<T, U, F> {
    upstream: Option<BoxStream<'static, T>>,
    inner: Option<BoxStream<'static, U>>,
    f: F,
}

impl<T, U, F> SwitchMap<T, U, F>
where
    F: FnMut(T) -> BoxStream<'static, U>,
{
    /// Creates the combinator.
    pub fn new(upstream: BoxStream<'static, T>, f: F) -> Self {
        Self {
            upstream: Some(upstream),
            inner: None,
            f,
        }
    }
}

impl<T, U, F> Stream for SwitchMap<T, U, F>
where
    F: FnMut(T) -> BoxStream<'static, U> + Unpin,
{
    type Item = U;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<U>> {
        let this = self.get_mut();

        while let Some(upstream) = this.upstream.as_mut() {
            match upstream.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => this.inner = Some((this.f)(item)),
                Poll::Ready(None) => this.upstream = None,
                Poll::Pending => break,
            }
        }

        if let Some(inner) = this.inner.as_mut() {
            match inner.poll_next_unpin(cx) {
                Poll::Ready(Some(item)) => return Poll::Ready(Some(item)),
                Poll::Ready(None) => this.inner = None,
                Poll::Pending => return Poll::Pending,
            }
        }

        if this.upstream.is_none() && this.inner.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

/// Adds [`switch_map`](SwitchMapExt::switch_map) to streams.
pub trait SwitchMapExt: Stream + Sized + Send + 'static {
    /// See [`SwitchMap`].
    fn switch_map<U, F>(self, f: F) -> SwitchMap<Self::Item, U, F>
    where
        F: FnMut(Self::Item) -> BoxStream<'static, U> + Unpin,
    {
        SwitchMap::new(self.boxed(), f)
    }
}

impl<S> SwitchMapExt for S where S: Stream + Sized + Send + 'static {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::stream;

    #[test]
    fn inner_streams_are_flattened() {
        let out: Vec<u32> = block_on(
            stream::iter(vec![1u32, 2])
                .switch_map(|n| stream::iter(vec![n * 10, n * 10 + 1]).boxed())
                .collect(),
        );
        // Both upstream items are ready at once, so the first inner stream
        // is replaced before it yields.
        assert_eq!(out, vec![20, 21]);
    }

    #[test]
    fn newer_item_supersedes_pending_inner() {
        let (tx, rx) = mpsc::unbounded::<u32>();
        let (inner_tx, inner_rx) = mpsc::unbounded::<u32>();
        let mut inner_rx = Some(inner_rx);

        let mut switched = rx.switch_map(move |n| match inner_rx.take() {
            Some(first) => first.map(move |v| v + n).boxed(),
            None => stream::iter(vec![n]).boxed(),
        });

        block_on(async {
            tx.unbounded_send(100).unwrap();
            assert!(futures::poll!(switched.next()).is_pending());

            tx.unbounded_send(7).unwrap();
            assert_eq!(switched.next().await, Some(7));

            // The superseded inner stream was dropped with its receiver.
            assert!(inner_tx.unbounded_send(1).is_err());
            drop(tx);
            assert_eq!(switched.next().await, None);
        });
    }

    #[test]
    fn ends_after_upstream_and_inner() {
        let (tx, rx) = mpsc::unbounded::<u32>();
        let mut rx = Some(rx);
        let mut switched = stream::iter(vec![()]).switch_map(move |()| match rx.take() {
            Some(rx) => rx.boxed(),
            None => stream::empty().boxed(),
        });

        block_on(async {
            assert!(futures::poll!(switched.next()).is_pending());
            tx.unbounded_send(5).unwrap();
            assert_eq!(switched.next().await, Some(5));
            drop(tx);
            assert_eq!(switched.next().await, None);
        });
    }
}
