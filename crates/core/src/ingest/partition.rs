/// Maps an event id to one of `partitions` buckets.
///
/// Uses BLAKE3 rather than `DefaultHasher` so routing is identical across
/// processes and builds.
pub fn partition_for(event_id: &str, partitions: usize) -> usize {
    let partitions = partitions.max(1);
    let digest = blake3::hash(event_id.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    (u64::from_le_bytes(prefix) % partitions as u64) as usize
}

/// Splits a batch into per-partition queues, preserving arrival order within
/// each partition.
pub fn distribute<T>(items: Vec<T>, partitions: usize, key: impl Fn(&T) -> &str) -> Vec<Vec<T>> {
    let partitions = partitions.max(1);
    let mut buckets: Vec<Vec<T>> = (0..partitions).map(|_| Vec::new()).collect();
    for item in items {
        let index = partition_for(key(&item), partitions);
        buckets[index].push(item);
    }
    buckets
}
