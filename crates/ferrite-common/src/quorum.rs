//! Pure arithmetic shared by `ferrite-quorum` and `ferrite-object`: quorum
//! sizes and the distribution permutation. Kept dependency-free (no I/O,
//! no async) so it is trivially unit-testable.

/// `read_quorum = data_blocks`; `write_quorum = data_blocks + 1` when
/// `data_blocks == parity_blocks`, else `data_blocks`. Parity is asserted
/// never to exceed data rather than silently trusted.
pub fn compute_quorum(data_blocks: usize, parity_blocks: usize) -> (usize, usize) {
    debug_assert!(
        parity_blocks <= data_blocks,
        "parity_blocks ({parity_blocks}) must not exceed data_blocks ({data_blocks})"
    );
    let read_quorum = data_blocks;
    let write_quorum = if data_blocks == parity_blocks {
        data_blocks + 1
    } else {
        data_blocks
    };
    (read_quorum, write_quorum)
}

/// Clamp `(data_blocks, parity_blocks)` by the number of currently healthy
/// drives, incrementing parity for every offline drive up to `set_size / 2`.
pub fn clamp_for_healthy_drives(
    default_data: usize,
    default_parity: usize,
    set_size: usize,
    healthy_drives: usize,
) -> (usize, usize) {
    let offline = set_size.saturating_sub(healthy_drives);
    let max_parity = set_size / 2;
    let parity_blocks = (default_parity + offline).min(max_parity);
    let data_blocks = (set_size - parity_blocks).min(default_data.max(set_size - max_parity));
    (data_blocks, parity_blocks)
}

/// Deterministic permutation of `[1..=set_size]` seeded by the object name,
/// so the shard-to-drive mapping is stable across writes of the same
/// object.
///
/// Uses a simple seeded Fisher-Yates shuffle driven by a 64-bit FNV-1a hash
/// of the object name: deterministic, dependency-free, and good enough for
/// a placement permutation (no cryptographic property is required here).
pub fn hash_order(object_name: &str, set_size: usize) -> Vec<usize> {
    let mut seed = fnv1a64(object_name.as_bytes());
    let mut order: Vec<usize> = (1..=set_size).collect();

    // Fisher-Yates using `seed` as a simple xorshift-style PRNG.
    for i in (1..order.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let j = (seed as usize) % (i + 1);
        order.swap(i, j);
    }
    order
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    if hash == 0 { 1 } else { hash }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_for_even_data_parity() {
        assert_eq!(compute_quorum(4, 4), (4, 5));
    }

    #[test]
    fn quorum_for_uneven_data_parity() {
        assert_eq!(compute_quorum(6, 2), (6, 6));
    }

    #[test]
    fn hash_order_is_a_permutation() {
        let order = hash_order("my-object", 8);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn hash_order_is_deterministic() {
        assert_eq!(hash_order("same-name", 12), hash_order("same-name", 12));
    }

    #[test]
    fn hash_order_differs_across_names_in_general() {
        assert_ne!(hash_order("object-a", 16), hash_order("object-b", 16));
    }
}
