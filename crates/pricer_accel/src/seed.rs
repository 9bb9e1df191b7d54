//! Per-launch seed generation.
//!
//! Every kernel launch receives a fresh 32-bit seed so consecutive runs of
//! the same option draw different paths.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Host-side source of kernel seeds.
///
/// Seeded once (from OS entropy or a fixed value) and then advanced on every
/// call. Drawing a seed is O(1) and never blocks.
///
/// # Examples
///
/// ```rust
/// use pricer_accel::seed::SeedProvider;
///
/// let mut a = SeedProvider::from_seed(7);
/// let mut b = SeedProvider::from_seed(7);
/// assert_eq!(a.next_seed(0, 0), b.next_seed(0, 0));
/// ```
pub struct SeedProvider {
    inner: StdRng,
    drawn: u64,
}

impl SeedProvider {
    /// Provider seeded from operating-system entropy.
    pub fn from_entropy() -> Self {
        Self {
            inner: StdRng::from_entropy(),
            drawn: 0,
        }
    }

    /// Provider with a reproducible sequence.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            inner: StdRng::seed_from_u64(seed),
            drawn: 0,
        }
    }

    /// Draws the seed for `asset_index` running on `slot_index`.
    ///
    /// The indices are only used for tracing; uniqueness comes from the
    /// generator advancing on each call.
    #[inline]
    pub fn next_seed(&mut self, asset_index: usize, slot_index: usize) -> u32 {
        self.drawn += 1;
        let seed = self.inner.gen::<u32>();
        tracing::trace!(asset_index, slot_index, seed, "drew kernel seed");
        seed
    }

    /// Number of seeds drawn so far.
    #[inline]
    pub fn drawn(&self) -> u64 {
        self.drawn
    }
}

impl Default for SeedProvider {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl std::fmt::Debug for SeedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedProvider")
            .field("drawn", &self.drawn)
            .finish_non_exhaustive()
    }
}
