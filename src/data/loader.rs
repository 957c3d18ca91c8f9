//! Rank-aware batching

use crate::config::LoaderSpec;
use crate::data::{Batch, SimpleDataSet};
use crate::distributed::ProcessGroupInfo;
use crate::seed::{RngStream, SeedSource};
use rand::seq::SliceRandom;

/// Produces the batches one rank sees in one epoch.
///
/// Every rank shuffles with the same per-epoch stream, pads the order to a
/// multiple of the world size and takes every `world_size`-th index starting
/// at its rank, so shards are disjoint and together cover the dataset.
#[derive(Debug, Clone)]
pub struct DataLoader {
    dataset: SimpleDataSet,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    group: ProcessGroupInfo,
    seeds: SeedSource,
}

impl DataLoader {
    pub fn new(
        dataset: SimpleDataSet,
        loader: &LoaderSpec,
        group: ProcessGroupInfo,
        seeds: SeedSource,
    ) -> Self {
        Self {
            dataset,
            batch_size: loader.batch_size_per_card.max(1),
            shuffle: loader.shuffle,
            drop_last: loader.drop_last,
            group,
            seeds,
        }
    }

    /// Number of samples this rank sees per epoch.
    pub fn shard_len(&self) -> usize {
        self.dataset.len().div_ceil(self.group.world_size)
    }

    /// Batches per epoch on this rank.
    pub fn len(&self) -> usize {
        let samples = self.shard_len();
        if self.drop_last {
            samples / self.batch_size
        } else {
            samples.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dataset(&self) -> &SimpleDataSet {
        &self.dataset
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Dataset indices this rank visits in `epoch`, in order.
    pub fn shard_indices(&self, epoch: usize) -> Vec<usize> {
        let n = self.dataset.len();
        if n == 0 {
            return Vec::new();
        }
        let mut order: Vec<usize> = (0..n).collect();
        if self.shuffle {
            order.shuffle(&mut self.seeds.rng(RngStream::Shuffle { epoch }));
        }

        let world = self.group.world_size;
        let padded = n.div_ceil(world) * world;
        for i in 0..padded - n {
            order.push(order[i % n]);
        }

        order.into_iter().skip(self.group.rank).step_by(world).collect()
    }

    /// Index chunks making up the batches of `epoch`.
    pub fn batch_plan(&self, epoch: usize) -> Vec<Vec<usize>> {
        let indices = self.shard_indices(epoch);
        let full = if self.drop_last { indices.len() / self.batch_size } else { usize::MAX };
        indices.chunks(self.batch_size).take(full).map(<[usize]>::to_vec).collect()
    }

    /// Materialise one planned batch.
    pub fn batch(&self, indices: &[usize]) -> Batch {
        Batch { samples: indices.iter().filter_map(|i| self.dataset.get(*i).cloned()).collect() }
    }

    /// Batches for `epoch`.
    pub fn epoch(&self, epoch: usize) -> impl Iterator<Item = Batch> + '_ {
        self.batch_plan(epoch).into_iter().map(move |chunk| self.batch(&chunk))
    }
}
