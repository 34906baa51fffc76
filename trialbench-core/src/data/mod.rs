//! Training data: loading labeled datasets and partitioning them.

pub mod dataset;
pub mod partition;

pub use dataset::{Dataset, DatasetKind, Example, Story, StoryStep, Utterance};
pub use partition::{
    Partition, PartitionTag, derive_seed, k_fold, k_fold_shuffled, partition_by_percentage,
    split_held_out,
};
