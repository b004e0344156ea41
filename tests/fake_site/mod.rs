#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coursepress::cache::{Cache, MemoryCache};
use coursepress::fetch::{FetchError, Fetcher};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// In-memory [`Fetcher`] serving canned bodies by path.
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Result<String, u16>>>,
    calls: AtomicUsize,
    hold: Mutex<Option<Hold>>,
}

/// Parks the next fetch until released.
#[derive(Clone)]
pub struct Hold {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
    /// Whether the parked fetch notices cancellation itself.
    pub honor_cancel: bool,
}

#[allow(dead_code)]
impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, path: &str, body: &str) {
        self.bodies
            .lock()
            .expect("bodies lock")
            .insert(path.to_owned(), Ok(body.to_owned()));
    }

    pub fn fail(&self, path: &str, status: u16) {
        self.bodies
            .lock()
            .expect("bodies lock")
            .insert(path.to_owned(), Err(status));
    }

    pub fn hold_next(&self, honor_cancel: bool) -> Hold {
        let hold = Hold {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            honor_cancel,
        };
        *self.hold.lock().expect("hold lock") = Some(hold.clone());
        hold
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch_text(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Snapshot the body before parking so a later `serve` only affects
        // later calls.
        let body = self
            .bodies
            .lock()
            .expect("bodies lock")
            .get(path)
            .cloned()
            .unwrap_or(Err(404));

        let hold = self.hold.lock().expect("hold lock").take();
        if let Some(hold) = hold {
            hold.started.notify_one();
            if hold.honor_cancel {
                tokio::select! {
                    () = cancel.cancelled() => return Err(FetchError::Cancelled),
                    () = hold.release.notified() => {}
                }
            } else {
                hold.release.notified().await;
            }
        }

        body.map_err(|status| FetchError::Status { status })
    }
}

/// A [`MemoryCache`] that remembers every key written.
#[derive(Default)]
pub struct RecordingCache {
    inner: MemoryCache,
    writes: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingCache {
    pub fn new(inner: MemoryCache) -> Self {
        Self {
            inner,
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().expect("writes lock").clone()
    }
}

impl Cache for RecordingCache {
    fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) {
        self.writes.lock().expect("writes lock").push(key.to_owned());
        self.inner.set(key, value, ttl);
    }

    fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }
}

pub const MANIFEST_JSON: &str = r#"{
  "course": {
    "title": "Postgres from scratch",
    "tagline": "Learn SQL by doing",
    "description": "A hands-on course.",
    "coverImage": "/images/cover.png"
  },
  "lessons": [
    {"order": 1, "slug": "select", "title": "Selecting rows", "description": "Query rows",
     "sourcePath": "/content/lessons/01-select.md", "estimatedMinutes": 8},
    {"order": 2, "slug": "joins", "title": "Joining tables", "description": "Combine tables",
     "sourcePath": "/content/lessons/02-joins.md", "tags": ["sql", "joins"]}
  ]
}"#;

pub const SELECT_MD: &str = "# Selecting rows\n\
\n\
## Your first query\n\
\n\
```sql\n\
SELECT 1;\n\
## not a heading\n\
```\n\
\n\
### Filtering\n\
\n\
## Next steps\n\
\n\
Read the [manual](https://www.postgresql.org/docs/).\n";
