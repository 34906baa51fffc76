//! Deterministic dataset partitioning: percentage subsets, k-fold splits, and
//! per-run held-out splits.
//!
//! Partitions only ever hold indices into a [`Dataset`]; the same tag over the
//! same dataset always yields the same indices.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::data::Dataset;
use crate::error::PartitionError;

/// Identifies how a partition was derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartitionTag {
    Percentage { percentage: u8, seed: u64 },
    Fold { index: usize, count: usize },
}

/// A deterministic train / held-out split of a dataset, by example index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub tag: PartitionTag,
    /// Ascending indices used for training.
    pub train: Vec<usize>,
    /// Ascending indices not used for training.
    pub held_out: Vec<usize>,
}

impl Partition {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }
}

/// Derive a per-run seed from a base seed.
///
/// Distinct run indices map to unrelated seeds, so every repetition sees a
/// different shuffle while remaining reproducible.
pub fn derive_seed(base_seed: u64, run_index: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(base_seed.to_le_bytes());
    hasher.update((run_index as u64).to_le_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn shuffled_indices(len: usize, seed: u64) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    indices
}

fn complement(len: usize, selected: &[usize]) -> Vec<usize> {
    let mut mask = vec![false; len];
    for &i in selected {
        mask[i] = true;
    }
    (0..len).filter(|&i| !mask[i]).collect()
}

/// Select `round(len * percentage / 100)` examples for training.
///
/// The selection is a prefix of a seeded shuffle, so for a fixed seed a larger
/// percentage always contains every example a smaller one does.
pub fn partition_by_percentage(
    dataset: &Dataset,
    percentage: u8,
    seed: u64,
) -> Result<Partition, PartitionError> {
    if percentage == 0 || percentage > 100 {
        return Err(PartitionError::InvalidPercentage { percentage });
    }
    let len = dataset.len();
    let size = (len as f64 * f64::from(percentage) / 100.0).round() as usize;
    if size == 0 {
        return Err(PartitionError::InsufficientData {
            available: len,
            required: 1,
        });
    }

    let mut train = shuffled_indices(len, seed);
    train.truncate(size);
    train.sort_unstable();
    let held_out = complement(len, &train);

    Ok(Partition {
        tag: PartitionTag::Percentage { percentage, seed },
        train,
        held_out,
    })
}

/// Split the dataset into `k` contiguous folds whose sizes differ by at most one.
pub fn k_fold(dataset: &Dataset, k: usize) -> Result<Vec<Partition>, PartitionError> {
    let order: Vec<usize> = (0..dataset.len()).collect();
    folds_from_order(&order, k)
}

/// Like [`k_fold`], but assigns examples to folds after a seeded shuffle.
pub fn k_fold_shuffled(
    dataset: &Dataset,
    k: usize,
    seed: u64,
) -> Result<Vec<Partition>, PartitionError> {
    folds_from_order(&shuffled_indices(dataset.len(), seed), k)
}

fn folds_from_order(order: &[usize], k: usize) -> Result<Vec<Partition>, PartitionError> {
    if k < 2 {
        return Err(PartitionError::InvalidFoldCount { folds: k });
    }
    let len = order.len();
    if len < k {
        return Err(PartitionError::InsufficientData {
            available: len,
            required: k,
        });
    }

    let base = len / k;
    let extra = len % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for index in 0..k {
        let size = base + usize::from(index < extra);
        let mut held_out = order[start..start + size].to_vec();
        held_out.sort_unstable();
        let train = complement(len, &held_out);
        folds.push(Partition {
            tag: PartitionTag::Fold { index, count: k },
            train,
            held_out,
        });
        start += size;
    }
    Ok(folds)
}

/// Split off a seeded held-out test set of `fraction * len` examples.
///
/// Both sides are guaranteed non-empty.
pub fn split_held_out(
    dataset: &Dataset,
    fraction: f64,
    seed: u64,
) -> Result<(Dataset, Dataset), PartitionError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(PartitionError::InvalidFraction { fraction });
    }
    let len = dataset.len();
    if len < 2 {
        return Err(PartitionError::InsufficientData {
            available: len,
            required: 2,
        });
    }
    let test_size = ((len as f64 * fraction).round() as usize).clamp(1, len - 1);

    let order = shuffled_indices(len, seed);
    let mut test = order[..test_size].to_vec();
    test.sort_unstable();
    let train = complement(len, &test);

    Ok((dataset.subset(&train), dataset.subset(&test)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DatasetKind, Example};
    use std::collections::BTreeSet;

    fn dataset(n: usize) -> Dataset {
        Dataset::new(
            DatasetKind::Nlu,
            (0..n)
                .map(|i| Example::utterance(&format!("text {i}"), &format!("intent_{}", i % 3)))
                .collect(),
        )
    }

    #[test]
    fn test_percentage_size_is_rounded() {
        let ds = dataset(10);
        assert_eq!(partition_by_percentage(&ds, 25, 1).unwrap().train_len(), 3);
        assert_eq!(partition_by_percentage(&ds, 75, 1).unwrap().train_len(), 8);
        assert_eq!(partition_by_percentage(&ds, 100, 1).unwrap().train_len(), 10);
    }

    #[test]
    fn test_percentage_is_deterministic() {
        let ds = dataset(50);
        let a = partition_by_percentage(&ds, 40, 7).unwrap();
        let b = partition_by_percentage(&ds, 40, 7).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_percentage_differs_across_seeds() {
        let ds = dataset(50);
        let a = partition_by_percentage(&ds, 50, derive_seed(42, 1)).unwrap();
        let b = partition_by_percentage(&ds, 50, derive_seed(42, 2)).unwrap();
        assert_ne!(a.train, b.train);
    }

    #[test]
    fn test_percentage_is_prefix_stable() {
        let ds = dataset(40);
        let small: BTreeSet<_> = partition_by_percentage(&ds, 25, 3)
            .unwrap()
            .train
            .into_iter()
            .collect();
        let large: BTreeSet<_> = partition_by_percentage(&ds, 75, 3)
            .unwrap()
            .train
            .into_iter()
            .collect();
        assert!(small.is_subset(&large));
    }

    #[test]
    fn test_percentage_held_out_is_complement() {
        let ds = dataset(20);
        let p = partition_by_percentage(&ds, 30, 9).unwrap();
        assert_eq!(p.train.len() + p.held_out.len(), 20);
        assert!(p.train.iter().all(|i| !p.held_out.contains(i)));
    }

    #[test]
    fn test_percentage_rejects_out_of_range() {
        let ds = dataset(10);
        assert!(matches!(
            partition_by_percentage(&ds, 0, 1),
            Err(PartitionError::InvalidPercentage { percentage: 0 })
        ));
        assert!(matches!(
            partition_by_percentage(&ds, 101, 1),
            Err(PartitionError::InvalidPercentage { percentage: 101 })
        ));
    }

    #[test]
    fn test_percentage_empty_subset_is_insufficient() {
        let ds = dataset(3);
        assert!(matches!(
            partition_by_percentage(&ds, 10, 1),
            Err(PartitionError::InsufficientData { available: 3, .. })
        ));
    }

    #[test]
    fn test_k_fold_sizes_and_coverage() {
        let ds = dataset(11);
        let folds = k_fold(&ds, 3).unwrap();
        let sizes: Vec<_> = folds.iter().map(|f| f.held_out.len()).collect();
        assert_eq!(sizes, vec![4, 4, 3]);

        let union: BTreeSet<_> = folds.iter().flat_map(|f| f.held_out.clone()).collect();
        assert_eq!(union.len(), 11);
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.held_out.len(), 11);
        }
    }

    #[test]
    fn test_k_fold_errors() {
        assert!(matches!(
            k_fold(&dataset(5), 1),
            Err(PartitionError::InvalidFoldCount { folds: 1 })
        ));
        assert!(matches!(
            k_fold(&dataset(2), 3),
            Err(PartitionError::InsufficientData {
                available: 2,
                required: 3
            })
        ));
    }

    #[test]
    fn test_k_fold_shuffled_is_deterministic() {
        let ds = dataset(17);
        assert_eq!(
            k_fold_shuffled(&ds, 4, 5).unwrap(),
            k_fold_shuffled(&ds, 4, 5).unwrap()
        );
    }

    #[test]
    fn test_split_held_out() {
        let ds = dataset(10);
        let (train, test) = split_held_out(&ds, 0.2, 11).unwrap();
        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);

        let (train, test) = split_held_out(&dataset(2), 0.01, 11).unwrap();
        assert_eq!((train.len(), test.len()), (1, 1));

        assert!(split_held_out(&ds, 1.0, 1).is_err());
        assert!(split_held_out(&dataset(1), 0.5, 1).is_err());
    }

    #[test]
    fn test_derive_seed_distinct() {
        assert_ne!(derive_seed(42, 1), derive_seed(42, 2));
        assert_eq!(derive_seed(42, 1), derive_seed(42, 1));
    }
}
