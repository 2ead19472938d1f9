// pipeline-core/src/dataset/sharding.rs

use std::path::PathBuf;

use crate::error::{PipelineError, Result};

/// Checks that `shard_index` selects one of `num_shards` partitions.
///
/// # Errors
///
/// Returns `ShardIndexOutOfRange` if `shard_index >= num_shards` (which
/// includes `num_shards == 0`).
pub fn validate_shard(num_shards: usize, shard_index: usize) -> Result<()> {
    if shard_index >= num_shards {
        return Err(PipelineError::shard_out_of_range(shard_index, num_shards));
    }
    Ok(())
}

/// Returns true if item `position` belongs to shard `shard_index`.
///
/// Items are dealt round-robin: item `i` goes to shard `i % num_shards`.
pub fn in_shard(position: usize, num_shards: usize, shard_index: usize) -> bool {
    num_shards > 0 && position % num_shards == shard_index
}

/// Selects the files assigned to one shard of an ordered file list.
///
/// Across all `shard_index` values in `0..num_shards` the returned lists are
/// disjoint and together contain every file exactly once. Relative order is
/// preserved.
///
/// # Errors
///
/// Returns `ShardIndexOutOfRange` if `shard_index >= num_shards`.
pub fn shard_files(
    files: &[PathBuf],
    num_shards: usize,
    shard_index: usize,
) -> Result<Vec<PathBuf>> {
    validate_shard(num_shards, shard_index)?;

    Ok(files
        .iter()
        .enumerate()
        .filter(|(i, _)| in_shard(*i, num_shards, shard_index))
        .map(|(_, path)| path.clone())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn files(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("part-{i:02}.csv"))).collect()
    }

    #[test]
    fn test_two_shards_cover_eight_files() {
        let all = files(8);
        let shard0 = shard_files(&all, 2, 0).unwrap();
        let shard1 = shard_files(&all, 2, 1).unwrap();

        assert_eq!(shard0.len(), 4);
        assert_eq!(shard1.len(), 4);

        let set0: HashSet<_> = shard0.iter().collect();
        let set1: HashSet<_> = shard1.iter().collect();
        assert!(set0.is_disjoint(&set1));

        let union: HashSet<_> = set0.union(&set1).copied().collect();
        assert_eq!(union, all.iter().collect());
    }

    #[test]
    fn test_uneven_split_covers_everything_once() {
        let all = files(7);
        let mut seen = Vec::new();
        for index in 0..3 {
            seen.extend(shard_files(&all, 3, index).unwrap());
        }
        seen.sort();
        assert_eq!(seen, all);
    }

    #[test]
    fn test_more_shards_than_files() {
        let all = files(2);
        assert_eq!(shard_files(&all, 4, 1).unwrap(), vec![all[1].clone()]);
        assert!(shard_files(&all, 4, 3).unwrap().is_empty());
    }

    #[test]
    fn test_shard_index_out_of_range() {
        let all = files(4);
        assert!(matches!(
            shard_files(&all, 2, 2),
            Err(PipelineError::ShardIndexOutOfRange {
                shard_index: 2,
                num_shards: 2
            })
        ));
        assert!(shard_files(&all, 0, 0).is_err());
    }
}
