//! Shared, lock-guarded random generator.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Mutex;

/// Seedable random generator shared by every concurrent call to a node.
///
/// Draws from concurrent rows interleave in whatever order the workers
/// reach the lock. A single-threaded run with the same seed reproduces the
/// same sequence of draws.
#[derive(Debug)]
pub struct Shuffler {
    rng: Mutex<StdRng>,
}

impl Shuffler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Run `f` with exclusive access to the generator.
    pub fn with_rng<R>(&self, f: impl FnOnce(&mut StdRng) -> R) -> R {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut rng)
    }

    /// A shuffled copy of `items`.
    pub fn shuffled<T: Clone>(&self, items: &[T]) -> Vec<T> {
        let mut out = items.to_vec();
        self.with_rng(|rng| out.shuffle(rng));
        out
    }
}

impl Default for Shuffler {
    fn default() -> Self {
        Self::seeded(42)
    }
}
