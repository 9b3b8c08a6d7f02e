//! Transaction digest committed to by the block header.

use crate::hash::{hash_concat, Hash};
use crate::transaction::Transaction;

/// Binary merkle root over transaction ids.
///
/// An odd node at the end of a level is carried up unchanged instead of being
/// paired with itself, so `[a, b, c]` and `[a, b, c, c]` never share a root.
/// The empty list has the zero root.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_concat(&[left.as_ref(), right.as_ref()]),
                [single] => *single,
                _ => unreachable!("chunks(2) yields one or two items"),
            })
            .collect();
    }
    level[0]
}

/// Merkle root of the ids of `transactions`, in order.
pub fn transactions_root(transactions: &[Transaction]) -> Hash {
    let ids: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
    merkle_root(&ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Address;
    use crate::hash::hash;

    fn make_hashes(n: usize) -> Vec<Hash> {
        (0..n).map(|i| hash(&[i as u8])).collect()
    }

    #[test]
    fn test_merkle_root_small_trees() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);

        let hashes = make_hashes(2);
        assert_eq!(merkle_root(&hashes[..1]), hashes[0]);
        assert_eq!(
            merkle_root(&hashes),
            hash_concat(&[hashes[0].as_ref(), hashes[1].as_ref()])
        );
    }

    #[test]
    fn test_odd_leaf_is_promoted() {
        let hashes = make_hashes(3);
        let left = hash_concat(&[hashes[0].as_ref(), hashes[1].as_ref()]);
        let expected = hash_concat(&[left.as_ref(), hashes[2].as_ref()]);
        assert_eq!(merkle_root(&hashes), expected);

        let mut padded = hashes.clone();
        padded.push(hashes[2]);
        assert_ne!(merkle_root(&hashes), merkle_root(&padded));
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let hashes = make_hashes(5);
        let mut reversed = hashes.clone();
        reversed.reverse();
        assert_ne!(merkle_root(&hashes), merkle_root(&reversed));
    }

    #[test]
    fn test_transactions_root() {
        let a = Transaction::coinbase(Address::from_bytes([1; 20]), 50, 1);
        let b = Transaction::coinbase(Address::from_bytes([2; 20]), 50, 1);
        assert_eq!(transactions_root(&[a.clone()]), a.hash());
        assert_ne!(
            transactions_root(&[a.clone(), b.clone()]),
            transactions_root(&[b, a])
        );
    }
}
