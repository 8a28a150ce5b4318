//! The write seam: a sink persists one batch of field updates.
//!
//! The queue owns a sink and hands it one snapshot of pending updates at
//! a time, never overlapping calls. A multi-path write either applies as
//! a whole or fails as a whole, mirroring the atomic update semantics of
//! realtime-database backends.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

/// Destination for batched field updates.
pub trait UpdateSink: Send + Sync + 'static {
    /// Field key addressed by one update.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;
    /// Value written at a key.
    type Value: Clone + PartialEq + Send + Sync + 'static;
    /// Transport-level failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Persist one batch as a single atomic write.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the write did not take effect;
    /// the caller keeps the batch and retries.
    fn apply(
        &self,
        batch: HashMap<Self::Key, Self::Value>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

impl<S: UpdateSink> UpdateSink for Arc<S> {
    type Key = S::Key;
    type Value = S::Value;
    type Error = S::Error;

    fn apply(
        &self,
        batch: HashMap<Self::Key, Self::Value>,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        self.as_ref().apply(batch)
    }
}

/// Sink built from a plain async function. See [`sink_fn`].
pub struct FnSink<K, V, E, F> {
    apply: F,
    _marker: PhantomData<fn(K, V) -> E>,
}

impl<K, V, E, F, Fut> UpdateSink for FnSink<K, V, E, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(HashMap<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    type Key = K;
    type Value = V;
    type Error = E;

    fn apply(&self, batch: HashMap<K, V>) -> impl Future<Output = Result<(), E>> + Send {
        (self.apply)(batch)
    }
}

/// Wrap an async function as an [`UpdateSink`].
///
/// Useful for tests and for callers whose client exposes a single
/// `update(map)` entry point.
pub fn sink_fn<K, V, E, F, Fut>(apply: F) -> FnSink<K, V, E, F>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(HashMap<K, V>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
{
    FnSink {
        apply,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn fn_sinks_and_arc_forwarding_share_one_implementation() {
        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let sink = Arc::new(sink_fn(move |batch: HashMap<String, i64>| {
            let record = Arc::clone(&record);
            async move {
                record.lock().push(batch.len());
                Ok::<(), std::io::Error>(())
            }
        }));

        let batch = HashMap::from([("a".to_owned(), 1), ("b".to_owned(), 2)]);
        sink.apply(batch).await.expect("sink accepts the batch");
        assert_eq!(*seen.lock(), vec![2]);
    }
}
