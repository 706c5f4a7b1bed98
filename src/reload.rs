//! Hot-reloadable classifier.
//!
//! Subnet lists change when their feeds are refreshed. Indexes are never
//! mutated in place; instead a whole new [`Classifier`] is built and swapped
//! in atomically. Calls already in flight finish on the snapshot they
//! loaded.
//!
//! ```text
//! classify() -> ArcSwap::load_full() -> Arc<Classifier>   (lock-free read)
//! reload()   -> ArcSwap::store()     -> old snapshot dropped when unused
//! ```

use arc_swap::{ArcSwap, Guard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::classifier::{Classification, Classifier, Decision};
use crate::context::Context;
use crate::error::Result;

/// A [`Classifier`] that can be replaced while it is being queried.
pub struct ReloadableClassifier {
    current: ArcSwap<Classifier>,
    generation: AtomicU64,
}

impl ReloadableClassifier {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            current: ArcSwap::from_pointee(classifier),
            generation: AtomicU64::new(1),
        }
    }

    /// Current snapshot (lock-free read).
    pub fn load(&self) -> Guard<Arc<Classifier>> {
        self.current.load()
    }

    /// Current snapshot as an owned `Arc`, for holding across awaits.
    pub fn snapshot(&self) -> Arc<Classifier> {
        self.current.load_full()
    }

    /// Swap in a new classifier.
    pub fn reload(&self, classifier: Classifier) {
        self.current.store(Arc::new(classifier));
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(generation, "Reloaded classifier");
    }

    /// Number of classifiers installed so far, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Classify against the snapshot current at call time.
    pub async fn classify(&self, ctx: &Context, address: &str) -> Result<Classification> {
        self.snapshot().classify(ctx, address).await
    }

    pub async fn decide(&self, ctx: &Context, address: &str) -> Decision {
        self.snapshot().decide(ctx, address).await
    }
}

impl std::fmt::Debug for ReloadableClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadableClassifier")
            .field("generation", &self.generation())
            .field("current", &*self.load())
            .finish()
    }
}
