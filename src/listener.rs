//! The regex-keyed listener table and synchronous dispatch.
//!
//! One [`ListenerTable<E>`] exists per event family (Raw, MsgIn, MsgOut,
//! App) rather than a single table keyed by an enum of all event types:
//! Rust's listener callbacks are statically typed per event, so a single
//! table would need to erase that type and downcast on every dispatch.
//! Four tables, one per family, keep the same semantics (regex pattern ->
//! ordered listener list, insertion order preserved) while staying fully
//! typed; see `DESIGN.md` for the tradeoff this resolves.

use std::sync::{Arc, RwLock};

use regex::Regex;

/// One NApp's subscription to a pattern, tagged so it can be removed in
/// bulk on unload.
pub struct Registration<E> {
    pub napp_id: String,
    pub callback: Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>,
}

impl<E> Clone for Registration<E> {
    fn clone(&self) -> Self {
        Self {
            napp_id: self.napp_id.clone(),
            callback: self.callback.clone(),
        }
    }
}

struct Bucket<E> {
    pattern: Regex,
    registrations: Vec<Registration<E>>,
}

/// Ordered-by-insertion collection of (pattern -> listeners) buckets.
pub struct ListenerTable<E> {
    buckets: RwLock<Vec<Bucket<E>>>,
}

impl<E> Default for ListenerTable<E> {
    fn default() -> Self {
        Self {
            buckets: RwLock::new(Vec::new()),
        }
    }
}

impl<E> ListenerTable<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener under `pattern`, matched anchored against an
    /// event's runtime type name. Compiled once, here, not per dispatch.
    pub fn register(
        &self,
        pattern: &str,
        napp_id: impl Into<String>,
        callback: Arc<dyn Fn(&E) -> anyhow::Result<()> + Send + Sync>,
    ) -> Result<(), regex::Error> {
        let anchored = Regex::new(&format!("^(?:{pattern})$"))?;
        let mut buckets = self.buckets.write().unwrap();
        let registration = Registration {
            napp_id: napp_id.into(),
            callback,
        };
        if let Some(bucket) = buckets.iter_mut().find(|b| b.pattern.as_str() == anchored.as_str()) {
            bucket.registrations.push(registration);
        } else {
            buckets.push(Bucket {
                pattern: anchored,
                registrations: vec![registration],
            });
        }
        Ok(())
    }

    /// Remove every registration contributed by `napp_id`.
    pub fn unregister_napp(&self, napp_id: &str) {
        let mut buckets = self.buckets.write().unwrap();
        for bucket in buckets.iter_mut() {
            bucket.registrations.retain(|r| r.napp_id != napp_id);
        }
    }

    /// Snapshot the registrations whose pattern matches `type_name`, in
    /// pattern-insertion order, then registration-insertion order within
    /// each pattern. Snapshotting (cloning `Arc` callbacks) lets dispatch
    /// run without holding the table lock, so a listener that loads or
    /// unloads a NApp cannot deadlock against itself.
    pub fn matching(&self, type_name: &str) -> Vec<Registration<E>> {
        let buckets = self.buckets.read().unwrap();
        buckets
            .iter()
            .filter(|b| b.pattern.is_match(type_name))
            .flat_map(|b| b.registrations.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets
            .read()
            .unwrap()
            .iter()
            .map(|b| b.registrations.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invoke every listener matching `type_name` against `event`, in order.
///
/// A listener that returns `Err` or panics is logged (tagged with its
/// NApp id) and does not prevent the remaining listeners from running.
pub fn dispatch<E>(table: &ListenerTable<E>, type_name: &'static str, event: &E) {
    for registration in table.matching(type_name) {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (registration.callback)(event)
        }));
        let source = match outcome {
            Ok(Ok(())) => continue,
            Ok(Err(source)) => source,
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "listener panicked".to_string());
                anyhow::anyhow!(msg)
            }
        };
        let err = crate::error::Error::ListenerError {
            napp: registration.napp_id.clone(),
            event: type_name,
            source,
        };
        tracing::error!(error = %err, "listener dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispatch_preserves_insertion_order() {
        let table: ListenerTable<u32> = ListenerTable::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for name in ["a", "b", "c"] {
            let order = order.clone();
            table
                .register(
                    "Thing",
                    name,
                    Arc::new(move |_: &u32| {
                        order.lock().unwrap().push(name);
                        Ok(())
                    }),
                )
                .unwrap();
        }

        dispatch(&table, "Thing", &1);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn anchored_pattern_does_not_partially_match() {
        let table: ListenerTable<u32> = ListenerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        table
            .register(
                "MsgIn",
                "napp",
                Arc::new(move |_: &u32| {
                    hits2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        dispatch(&table, "MsgInExtra", &1);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        dispatch(&table, "MsgIn", &1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn a_failing_listener_does_not_block_the_rest() {
        let table: ListenerTable<u32> = ListenerTable::new();
        let ran = Arc::new(AtomicUsize::new(0));
        table
            .register("X", "bad", Arc::new(|_: &u32| anyhow::bail!("boom")))
            .unwrap();
        let ran2 = ran.clone();
        table
            .register(
                "X",
                "good",
                Arc::new(move |_: &u32| {
                    ran2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .unwrap();

        dispatch(&table, "X", &1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unload_removes_only_that_napps_registrations() {
        let table: ListenerTable<u32> = ListenerTable::new();
        table.register("X", "a", Arc::new(|_: &u32| Ok(()))).unwrap();
        table.register("X", "b", Arc::new(|_: &u32| Ok(()))).unwrap();
        assert_eq!(table.len(), 2);

        table.unregister_napp("a");
        assert_eq!(table.len(), 1);
    }
}
