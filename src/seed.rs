//! Explicit random sources
//!
//! A [`SeedSource`] is created once from `Global.seed` before any component is
//! built and handed to every consumer. Each consumer draws from its own
//! stream, so adding draws in one place never shifts the sequence seen by
//! another.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Purpose a random stream is drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStream {
    /// Subsampling label files by `ratio_list`
    DatasetSampling,
    /// Per-epoch shuffle order, identical on every rank
    Shuffle { epoch: usize },
    /// Model parameter initialisation
    WeightInit,
    /// Image augmentation in the backend
    Augmentation,
}

impl RngStream {
    fn tag(self) -> u64 {
        match self {
            Self::DatasetSampling => 0x01,
            Self::WeightInit => 0x02,
            Self::Augmentation => 0x03,
            Self::Shuffle { epoch } => 0x5348_5546_0000_0000 ^ epoch as u64,
        }
    }
}

/// Seed handle threaded through every randomness consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSource {
    seed: u64,
}

impl SeedSource {
    pub fn new(seed: u64) -> Self {
        tracing::debug!(seed, "seeding random streams");
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Fresh generator for `stream`; the same seed and stream always yield the
    /// same sequence.
    pub fn rng(&self, stream: RngStream) -> StdRng {
        StdRng::seed_from_u64(mix(self.seed ^ stream.tag().rotate_left(17)))
    }
}

/// SplitMix64 finaliser.
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
