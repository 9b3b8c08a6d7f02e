//! Blocks whose parent we do not have yet.
//!
//! A `NewBlock` more than one block ahead of our head cannot be validated on
//! arrival. It is parked here while a sync fetches the gap, then retried.
//! Orphans that stay unconnected for a few sync rounds, or that the chain has
//! already passed, are dropped.

use crate::peer::PeerId;
use qbit_core::{Block, Hash};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Orphan {
    block: Block,
    from: Option<PeerId>,
    attempts: u32,
    received: Instant,
}

/// Bounded pool of orphan blocks, keyed by block hash.
#[derive(Debug)]
pub struct OrphanPool {
    max: usize,
    orphans: HashMap<Hash, Orphan>,
}

impl OrphanPool {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            orphans: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.orphans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.orphans.contains_key(hash)
    }

    /// Park `block`. The oldest orphan makes room when the pool is full.
    /// Returns false if it was already parked.
    pub fn insert(&mut self, block: Block, from: Option<PeerId>) -> bool {
        let hash = block.hash();
        if self.orphans.contains_key(&hash) || self.max == 0 {
            return false;
        }

        if self.orphans.len() >= self.max {
            let oldest = self
                .orphans
                .iter()
                .min_by_key(|(_, o)| o.received)
                .map(|(hash, _)| *hash);
            if let Some(oldest) = oldest {
                self.orphans.remove(&oldest);
            }
        }

        self.orphans.insert(
            hash,
            Orphan {
                block,
                from,
                attempts: 0,
                received: Instant::now(),
            },
        );
        true
    }

    /// Remove and return the orphans whose parent is `parent`.
    pub fn take_children(&mut self, parent: &Hash) -> Vec<(Block, Option<PeerId>)> {
        let children: Vec<Hash> = self
            .orphans
            .iter()
            .filter(|(_, o)| o.block.header.prev_hash == *parent)
            .map(|(hash, _)| *hash)
            .collect();

        let mut blocks: Vec<(Block, Option<PeerId>)> = children
            .into_iter()
            .filter_map(|hash| self.orphans.remove(&hash))
            .map(|o| (o.block, o.from))
            .collect();
        blocks.sort_by_key(|(b, _)| b.hash());
        blocks
    }

    /// Count a sync round that did not connect the remaining orphans.
    ///
    /// Orphans at or below `current_height` can never connect and go first.
    /// The rest are dropped once they reach `max_attempts`. Returns the
    /// `(hash, height)` of every dropped orphan.
    pub fn record_failed_attempt(&mut self, max_attempts: u32, current_height: u64) -> Vec<(Hash, u64)> {
        let mut dropped = Vec::new();
        self.orphans.retain(|hash, orphan| {
            orphan.attempts += 1;
            let keep = orphan.block.height() > current_height && orphan.attempts < max_attempts;
            if !keep {
                dropped.push((*hash, orphan.block.height()));
            }
            keep
        });
        dropped.sort_by_key(|(_, height)| *height);
        dropped
    }

    /// Drop orphans older than `ttl`. Returns how many were dropped.
    pub fn expire(&mut self, ttl: Duration) -> usize {
        let before = self.orphans.len();
        self.orphans.retain(|_, o| o.received.elapsed() < ttl);
        before - self.orphans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_core::{Address, Transaction};

    fn block(height: u64, parent: Hash, tag: u8) -> Block {
        Block::new(
            height,
            parent,
            vec![Transaction::coinbase(Address([tag; 20]), 1, height)],
            0,
        )
    }

    #[test]
    fn test_insert_is_idempotent_and_bounded() {
        let mut pool = OrphanPool::new(2);
        let a = block(5, Hash([1; 32]), 1);
        let b = block(6, Hash([2; 32]), 2);
        let c = block(7, Hash([3; 32]), 3);

        assert!(pool.insert(a.clone(), Some(1)));
        assert!(!pool.insert(a.clone(), Some(2)));
        std::thread::sleep(Duration::from_millis(2));
        assert!(pool.insert(b.clone(), None));
        assert!(pool.insert(c.clone(), None));

        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(&a.hash()));
        assert!(pool.contains(&b.hash()));
        assert!(pool.contains(&c.hash()));
    }

    #[test]
    fn test_take_children_by_parent() {
        let mut pool = OrphanPool::new(8);
        let parent = Hash([9; 32]);
        let x = block(4, parent, 1);
        let y = block(4, parent, 2);
        let other = block(4, Hash([8; 32]), 3);
        pool.insert(x.clone(), Some(3));
        pool.insert(y.clone(), None);
        pool.insert(other.clone(), None);

        let children = pool.take_children(&parent);
        assert_eq!(children.len(), 2);
        assert!(children.iter().any(|(b, from)| b.hash() == x.hash() && *from == Some(3)));
        assert_eq!(pool.len(), 1);
        assert!(pool.take_children(&parent).is_empty());
    }

    #[test]
    fn test_failed_attempts_drop_unresolved() {
        let mut pool = OrphanPool::new(8);
        let low = block(3, Hash([1; 32]), 1);
        let high = block(10, Hash([2; 32]), 2);
        pool.insert(low.clone(), None);
        pool.insert(high.clone(), None);

        // The chain already reached height 3.
        let dropped = pool.record_failed_attempt(3, 3);
        assert_eq!(dropped, vec![(low.hash(), 3)]);

        assert!(pool.record_failed_attempt(3, 3).is_empty());
        let dropped = pool.record_failed_attempt(3, 3);
        assert_eq!(dropped, vec![(high.hash(), 10)]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_expire() {
        let mut pool = OrphanPool::new(8);
        pool.insert(block(3, Hash([1; 32]), 1), None);
        assert_eq!(pool.expire(Duration::from_secs(60)), 0);
        assert_eq!(pool.expire(Duration::ZERO), 1);
        assert!(pool.is_empty());
    }
}
