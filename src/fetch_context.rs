use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;

/// Tracks the one live fetch per resource key.
///
/// [`InflightRegistry::begin`] cancels whatever fetch was previously live for
/// the key. The returned [`FetchContext`] deregisters itself on drop.
#[derive(Debug, Default)]
pub struct InflightRegistry {
    next_generation: AtomicU64,
    live: Mutex<HashMap<String, LiveFetch>>,
}

#[derive(Debug)]
struct LiveFetch {
    generation: u64,
    token: CancellationToken,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, key: &str, parent: &CancellationToken) -> FetchContext<'_> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = parent.child_token();

        let previous = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key.to_owned(),
                LiveFetch {
                    generation,
                    token: token.clone(),
                },
            );
        if let Some(previous) = previous {
            tracing::debug!(key, "superseding in-flight fetch");
            previous.token.cancel();
        }

        FetchContext {
            registry: self,
            key: key.to_owned(),
            generation,
            token,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Debug)]
pub struct FetchContext<'r> {
    registry: &'r InflightRegistry,
    key: String,
    generation: u64,
    token: CancellationToken,
}

impl FetchContext<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for FetchContext<'_> {
    fn drop(&mut self) {
        let mut live = self
            .registry
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if live
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            live.remove(&self.key);
        }
    }
}
