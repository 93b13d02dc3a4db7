//! Write-once caches with single-flight initialisation.

use core::{cell::RefCell, hash::Hash};
use std::{collections::HashMap, rc::Rc};
use tokio::sync::OnceCell;

/// A map whose values are computed at most once.
///
/// A second request for a key whose value is still being computed waits for
/// the first computation instead of starting another one.
#[derive(Debug)]
pub(super) struct SingleFlight<K, V> {
    /// The cells, one per key.
    cells: RefCell<HashMap<K, Rc<OnceCell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            cells: <_>::default(),
        }
    }
}

impl<K: Eq + Hash, V: Clone> SingleFlight<K, V> {
    /// Returns the value for `key`, computing it with `init` if no value
    /// exists and no computation is in flight.
    pub async fn get_or_init<F, Fut>(&self, key: K, init: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let cell = Rc::clone(self.cells.borrow_mut().entry(key).or_default());
        cell.get_or_init(init).await.clone()
    }

    /// The number of keys that have been requested.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cells.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn concurrent_requests_share_one_computation() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        local.block_on(&runtime, async {
            let cache = Rc::new(SingleFlight::<&str, usize>::default());
            let calls = Rc::new(Cell::new(0));

            let make = |cache: Rc<SingleFlight<&'static str, usize>>, calls: Rc<Cell<usize>>| {
                tokio::task::spawn_local(async move {
                    cache
                        .get_or_init("a", || async {
                            calls.set(calls.get() + 1);
                            tokio::task::yield_now().await;
                            42
                        })
                        .await
                })
            };

            let first = make(cache.clone(), calls.clone());
            let second = make(cache.clone(), calls.clone());
            assert_eq!(first.await.unwrap(), 42);
            assert_eq!(second.await.unwrap(), 42);
            assert_eq!(calls.get(), 1);
            assert_eq!(cache.len(), 1);
        });
    }
}
