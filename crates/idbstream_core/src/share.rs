//! Multicast stream with replay of the latest item.

use futures::stream::BoxStream;
use futures::task::{waker, ArcWake};
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Wakers of every clone waiting on the upstream.
#[derive(Default)]
struct Notifier {
    wakers: Mutex<HashMap<usize, Waker>>,
}

impl Notifier {
    fn register(&self, id: usize, waker: &Waker) {
        let mut wakers = self.wakers.lock();
        match wakers.get(&id) {
            Some(existing) if existing.will_wake(waker) => {}
            _ => {
                wakers.insert(id, waker.clone());
            }
        }
    }

    fn wake_all(&self) {
        let wakers: Vec<Waker> = self.wakers.lock().drain().map(|(_, w)| w).collect();
        for waker in wakers {
            waker.wake();
        }
    }
}

impl ArcWake for Notifier {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.wake_all();
    }
}

struct State<T> {
    upstream: Option<BoxStream<'static, T>>,
    latest: Option<T>,
    /// Number of items taken from the upstream so far.
    produced: u64,
    next_id: usize,
}

/// A clonable stream sharing one upstream among all its clones.
///
/// Whichever clone polls drives the upstream; every item is recorded as the
/// latest value and every other clone is woken to observe it. A clone that
/// falls behind sees only the most recent item. A new clone, including one
/// created after the upstream ended, first receives the latest item.
pub struct ReplayShared<T> {
    state: Arc<Mutex<State<T>>>,
    notifier: Arc<Notifier>,
    id: usize,
    seen: u64,
}

impl<T: Clone + Send + 'static> ReplayShared<T> {
    /// Wraps `upstream`. Nothing is polled until a clone is polled.
    pub fn new(upstream: impl Stream<Item = T> + Send + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                upstream: Some(upstream.boxed()),
                latest: None,
                produced: 0,
                next_id: 1,
            })),
            notifier: Arc::new(Notifier::default()),
            id: 0,
            seen: 0,
        }
    }

    /// Returns the most recent item, if any.
    pub fn latest(&self) -> Option<T> {
        self.state.lock().latest.clone()
    }

    /// Returns true once the upstream has ended.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().upstream.is_none()
    }
}

impl<T> Clone for ReplayShared<T> {
    fn clone(&self) -> Self {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            id
        };
        Self {
            state: Arc::clone(&self.state),
            notifier: Arc::clone(&self.notifier),
            id,
            seen: 0,
        }
    }
}

impl<T: Clone> Stream for ReplayShared<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        let mut state = this.state.lock();

        if state.produced > this.seen {
            if let Some(latest) = state.latest.clone() {
                this.seen = state.produced;
                return Poll::Ready(Some(latest));
            }
        }

        let Some(upstream) = state.upstream.as_mut() else {
            return Poll::Ready(None);
        };

        this.notifier.register(this.id, cx.waker());
        let shared_waker = waker(Arc::clone(&this.notifier));
        let mut shared_cx = Context::from_waker(&shared_waker);

        match upstream.poll_next_unpin(&mut shared_cx) {
            Poll::Ready(Some(item)) => {
                state.produced += 1;
                state.latest = Some(item.clone());
                this.seen = state.produced;
                drop(state);
                this.notifier.wake_all();
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                state.upstream = None;
                drop(state);
                this.notifier.wake_all();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for ReplayShared<T> {
    fn drop(&mut self) {
        self.notifier.wakers.lock().remove(&self.id);
    }
}

impl<T> fmt::Debug for ReplayShared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReplayShared")
            .field("id", &self.id)
            .field("seen", &self.seen)
            .field("produced", &state.produced)
            .field("terminated", &state.upstream.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::executor::block_on;
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn upstream_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let shared = ReplayShared::new(stream::once(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            42
        }));
        let mut a = shared.clone();
        let mut b = shared;

        block_on(async {
            assert_eq!(a.next().await, Some(42));
            assert_eq!(b.next().await, Some(42));
            assert_eq!(a.next().await, None);
            assert_eq!(b.next().await, None);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn late_clone_replays_latest() {
        let shared = ReplayShared::new(stream::iter(vec![1, 2, 3]));
        let mut first = shared.clone();
        block_on(async {
            assert_eq!(first.next().await, Some(1));
            assert_eq!(first.next().await, Some(2));
        });

        let mut late = first.clone();
        block_on(async {
            assert_eq!(late.next().await, Some(2));
            assert_eq!(late.next().await, Some(3));
            assert_eq!(first.next().await, Some(3));
        });
        assert_eq!(shared.latest(), Some(3));
    }

    #[test]
    fn clone_after_completion_replays_then_ends() {
        let shared = ReplayShared::new(stream::iter(vec!["x"]));
        let mut first = shared.clone();
        block_on(async { while first.next().await.is_some() {} });
        assert!(shared.is_terminated());

        let mut late = shared.clone();
        block_on(async {
            assert_eq!(late.next().await, Some("x"));
            assert_eq!(late.next().await, None);
        });
    }

    #[tokio::test]
    async fn waiting_clones_are_woken() {
        let (tx, rx) = mpsc::unbounded::<u32>();
        let shared = ReplayShared::new(rx);
        let mut a = shared.clone();
        let mut b = shared.clone();

        let waiter = tokio::spawn(async move { b.next().await });
        tokio::task::yield_now().await;
        assert!(futures::poll!(a.next()).is_pending());

        tx.unbounded_send(9).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(9));
        assert_eq!(a.next().await, Some(9));
    }
}
