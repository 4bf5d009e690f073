//! Stream assertions.
//!
//! Reactive pipelines never complete on their own, so every assertion is
//! bounded by a timeout.

use futures::{Stream, StreamExt};
use std::fmt::Debug;
use std::time::Duration;
use tokio::time::timeout;

/// How long to wait for an expected item.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stream must stay quiet to count as silent.
pub const SILENCE_WINDOW: Duration = Duration::from_millis(50);

/// Returns the next item, panicking if the stream ends or stalls.
pub async fn expect_next<S>(stream: &mut S) -> S::Item
where
    S: Stream + Unpin,
{
    match timeout(STREAM_TIMEOUT, stream.next()).await {
        Ok(Some(item)) => item,
        Ok(None) => panic!("stream ended while an item was expected"),
        Err(_) => panic!("no item within {STREAM_TIMEOUT:?}"),
    }
}

/// Skips items until one satisfies `predicate` and returns it.
pub async fn expect_matching<S, F>(stream: &mut S, mut predicate: F) -> S::Item
where
    S: Stream + Unpin,
    S::Item: Debug,
    F: FnMut(&S::Item) -> bool,
{
    let wait = async {
        while let Some(item) = stream.next().await {
            if predicate(&item) {
                return item;
            }
            tracing::trace!(?item, "skipped");
        }
        panic!("stream ended before a matching item");
    };
    timeout(STREAM_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("no matching item within {STREAM_TIMEOUT:?}"))
}

/// Panics unless the stream ends within the timeout.
pub async fn expect_end<S>(stream: &mut S)
where
    S: Stream + Unpin,
    S::Item: Debug,
{
    match timeout(STREAM_TIMEOUT, stream.next()).await {
        Ok(None) => {}
        Ok(Some(item)) => panic!("expected end of stream, got {item:?}"),
        Err(_) => panic!("stream still open after {STREAM_TIMEOUT:?}"),
    }
}

/// Panics if the stream yields or ends within [`SILENCE_WINDOW`].
pub async fn expect_silence<S>(stream: &mut S)
where
    S: Stream + Unpin,
    S::Item: Debug,
{
    if let Ok(next) = timeout(SILENCE_WINDOW, stream.next()).await {
        panic!("expected silence, got {next:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn next_and_end() {
        let mut s = stream::iter(vec![1, 2]);
        assert_eq!(expect_next(&mut s).await, 1);
        assert_eq!(expect_matching(&mut s, |n| *n == 2).await, 2);
        expect_end(&mut s).await;
    }

    #[tokio::test]
    async fn pending_stream_is_silent() {
        let mut s = stream::pending::<u32>();
        expect_silence(&mut s).await;
    }

    #[tokio::test]
    #[should_panic(expected = "expected silence")]
    async fn ready_stream_is_not_silent() {
        let mut s = stream::iter(vec![1]);
        expect_silence(&mut s).await;
    }
}
