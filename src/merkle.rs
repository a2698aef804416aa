//! Merkle tree construction with a coinbase-variable first leaf.
//!
//! The coinbase transaction id isn't known until extranonces are spliced
//! in, so the tree is built once against a placeholder first leaf to
//! record the sibling hashes needed to recompute the root (`merkle_branch`),
//! and the real root is derived cheaply per-job by replaying those
//! siblings against the real coinbase hash (`root_with_first`).

use super::*;

fn concat_hash(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(a);
    buf[32..].copy_from_slice(b);
    hash::double_sha256(&buf)
}

/// Records, level by level, the sibling hash paired with the (always
/// index-0) coinbase leaf as the tree collapses to its root. `leaves[0]` is
/// only used to determine tree shape; its value doesn't matter since it's
/// never itself included in the returned branch.
pub fn merkle_branch(leaves: &[[u8; 32]]) -> Vec<[u8; 32]> {
    if leaves.len() <= 1 {
        return Vec::new();
    }

    let mut level = leaves.to_vec();
    let mut branch = Vec::new();

    while level.len() > 1 {
        branch.push(level[1]);

        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        level = level
            .chunks(2)
            .map(|pair| concat_hash(&pair[0], &pair[1]))
            .collect();
    }

    branch
}

/// Replays a recorded branch against the real first leaf (coinbase txid)
/// to produce the merkle root, without rehashing the rest of the tree.
pub fn root_with_first(first: [u8; 32], branch: &[[u8; 32]]) -> [u8; 32] {
    branch.iter().fold(first, |acc, sibling| concat_hash(&acc, sibling))
}

/// Convenience wrapper combining both steps, for callers that already have
/// the full leaf set (tests, and any caller rebuilding from scratch).
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    match leaves.first() {
        None => [0u8; 32],
        Some(&first) => root_with_first(first, &merkle_branch(leaves)),
    }
}
