//! Merkle commitments over ordered sequences of hashable items.
//!
//! Leaves are the items' own hashes and are not hashed again, so a
//! one-item sequence commits to exactly that item's hash. Internal nodes hash
//! the two child hashes sorted ascending, which makes proofs independent of
//! left/right position: a proof is just the list of sibling hashes from leaf
//! to root.
//!
//! The tree is split recursively with the left subtree holding the largest
//! power of two strictly below the item count.

use crate::error::{Result, TypesError};
use crate::hash::{Hash, Hashable};

/// Computes the Merkle root of `items`.
///
/// An empty sequence commits to `hash([])`.
pub fn root<T: Hashable>(items: &[T]) -> Hash {
    let leaves: Vec<Hash> = items.iter().map(Hashable::hash).collect();
    root_of_leaves(&leaves)
}

/// Builds the inclusion proof for `target` within `items`.
///
/// # Errors
///
/// Returns [`TypesError::TargetNotFound`] if no item hashes to `target`.
pub fn proof<T: Hashable>(items: &[T], target: &Hash) -> Result<Vec<Hash>> {
    let leaves: Vec<Hash> = items.iter().map(Hashable::hash).collect();
    let index = leaves
        .iter()
        .position(|leaf| leaf == target)
        .ok_or(TypesError::TargetNotFound(*target))?;

    let mut siblings = Vec::new();
    collect_siblings(&leaves, index, &mut siblings);
    Ok(siblings)
}

/// Checks that `proof` folds `target` into `root`.
pub fn verify(proof: &[Hash], root: &Hash, target: &Hash) -> bool {
    let folded = proof
        .iter()
        .fold(*target, |acc, sibling| combine(&acc, sibling));
    folded == *root
}

/// Hashes two sibling nodes in sorted order.
pub fn combine(a: &Hash, b: &Hash) -> Hash {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    Hash::digest_parts(&[low.as_bytes(), high.as_bytes()])
}

/// Size of the left subtree for `n` leaves: the smallest power of two
/// `>= n`, halved.
fn split_point(n: usize) -> usize {
    debug_assert!(n > 1);
    n.next_power_of_two() / 2
}

fn root_of_leaves(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::digest(&[]),
        1 => leaves[0],
        n => {
            let k = split_point(n);
            combine(&root_of_leaves(&leaves[..k]), &root_of_leaves(&leaves[k..]))
        }
    }
}

// Appends siblings bottom-up; a subtree of one leaf contributes nothing.
fn collect_siblings(leaves: &[Hash], index: usize, out: &mut Vec<Hash>) {
    if leaves.len() <= 1 {
        return;
    }
    let k = split_point(leaves.len());
    if index < k {
        collect_siblings(&leaves[..k], index, out);
        out.push(root_of_leaves(&leaves[k..]));
    } else {
        collect_siblings(&leaves[k..], index - k, out);
        out.push(root_of_leaves(&leaves[..k]));
    }
}
