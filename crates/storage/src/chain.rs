//! Block storage and chain head tracking.

use crate::db::{BatchOp, Result, Storage, StorageError};
use qbit_core::{Block, Hash};
use std::borrow::Borrow;

/// Keys for chain metadata.
const CHAIN_HEAD_KEY: &[u8] = b"chain:head";
const CHAIN_HEIGHT_KEY: &[u8] = b"chain:height";

/// Persists the canonical chain.
///
/// Block bodies are keyed by hash and never rewritten. The height index and
/// head pointer move on append and reorg, always inside a single batch.
#[derive(Clone)]
pub struct ChainStore {
    storage: Storage,
}

impl ChainStore {
    pub fn new(storage: &Storage) -> Self {
        Self {
            storage: storage.clone(),
        }
    }

    // =========================================================================
    // Block Storage
    // =========================================================================

    /// Batch entries that store `block` and point its height at it.
    fn block_ops(block: &Block) -> Result<Vec<BatchOp>> {
        let hash = block.hash();
        Ok(vec![
            BatchOp::put(Storage::block_hash_key(&hash), block)?,
            BatchOp::put(Storage::block_height_key(block.height()), &hash)?,
        ])
    }

    fn head_ops(hash: &Hash, height: u64) -> Result<Vec<BatchOp>> {
        Ok(vec![
            BatchOp::put(CHAIN_HEAD_KEY, hash)?,
            BatchOp::put(CHAIN_HEIGHT_KEY, &height)?,
        ])
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>> {
        self.storage.get(Storage::block_hash_key(hash))
    }

    /// Block on the canonical chain at `height`.
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>> {
        let hash: Option<Hash> = self.storage.get(Storage::block_height_key(height))?;
        match hash {
            Some(h) => self.get_block_by_hash(&h),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Chain Head Tracking
    // =========================================================================

    pub fn get_head(&self) -> Result<Option<Hash>> {
        self.storage.get(CHAIN_HEAD_KEY)
    }

    /// Current chain height, 0 when uninitialized.
    pub fn get_height(&self) -> Result<u64> {
        Ok(self.storage.get::<_, u64>(CHAIN_HEIGHT_KEY)?.unwrap_or(0))
    }

    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.get_head()?.is_some())
    }

    // =========================================================================
    // Chain Mutation
    // =========================================================================

    /// Initialize an empty store with the genesis block.
    pub fn init_genesis(&self, genesis: &Block) -> Result<()> {
        if genesis.height() != 0 {
            return Err(StorageError::InvalidBlock(
                "genesis block must have height 0".into(),
            ));
        }
        if self.is_initialized()? {
            return Err(StorageError::InvalidBlock("chain already initialized".into()));
        }

        let mut ops = Self::block_ops(genesis)?;
        ops.extend(Self::head_ops(&genesis.hash(), 0)?);
        self.storage.batch(ops)
    }

    /// Append a block on top of the current head.
    ///
    /// Only linkage is checked here; consensus validation happens before.
    pub fn append_block(&self, block: &Block) -> Result<()> {
        let head = self
            .get_head()?
            .ok_or_else(|| StorageError::InvalidBlock("chain not initialized".into()))?;
        let height = self.get_height()?;

        if block.height() != height + 1 || block.header.prev_hash != head {
            return Err(StorageError::InvalidBlock(format!(
                "block {} ({}) does not extend head {} ({})",
                block.height(),
                block.header.prev_hash.short(),
                height,
                head.short()
            )));
        }

        let mut ops = Self::block_ops(block)?;
        ops.extend(Self::head_ops(&block.hash(), block.height())?);
        self.storage.batch(ops)
    }

    /// Replace everything above `fork_height` with `blocks`.
    ///
    /// `blocks` must start at `fork_height + 1` and be contiguous. Height
    /// entries of the old chain above the new tip are dropped; old block
    /// bodies stay addressable by hash.
    pub fn replace_suffix<B: Borrow<Block>>(&self, fork_height: u64, blocks: &[B]) -> Result<()> {
        let last: &Block = match blocks.last() {
            Some(entry) => entry.borrow(),
            None => return Err(StorageError::InvalidBlock("empty replacement".into())),
        };
        for (offset, entry) in blocks.iter().enumerate() {
            let block: &Block = entry.borrow();
            if block.height() != fork_height + 1 + offset as u64 {
                return Err(StorageError::InvalidBlock(format!(
                    "replacement block at position {} has height {}",
                    offset,
                    block.height()
                )));
            }
        }

        let old_height = self.get_height()?;
        let new_height = last.height();

        let mut ops = Vec::with_capacity(blocks.len() * 2 + 2);
        for entry in blocks {
            let block: &Block = entry.borrow();
            ops.extend(Self::block_ops(block)?);
        }
        for stale in (new_height + 1)..=old_height {
            ops.push(BatchOp::remove(Storage::block_height_key(stale)));
        }
        ops.extend(Self::head_ops(&last.hash(), new_height)?);
        self.storage.batch(ops)
    }

    /// Drop every block and the head pointer.
    pub fn clear(&self) -> Result<()> {
        let mut ops: Vec<BatchOp> = self
            .storage
            .keys_with_prefix(b"block:")?
            .into_iter()
            .map(BatchOp::remove)
            .collect();
        ops.push(BatchOp::remove(CHAIN_HEAD_KEY));
        ops.push(BatchOp::remove(CHAIN_HEIGHT_KEY));
        self.storage.batch(ops)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Blocks in `[from_height, to_height]`, stopping at the first gap.
    pub fn get_blocks_range(&self, from_height: u64, to_height: u64) -> Result<Vec<Block>> {
        let mut blocks = Vec::new();
        for height in from_height..=to_height {
            match self.get_block_by_height(height)? {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        Ok(blocks)
    }

    /// The last `count` blocks, most recent first.
    pub fn get_recent_blocks(&self, count: u64) -> Result<Vec<Block>> {
        if count == 0 || !self.is_initialized()? {
            return Ok(Vec::new());
        }
        let height = self.get_height()?;
        let from_height = height.saturating_sub(count - 1);
        let mut blocks = self.get_blocks_range(from_height, height)?;
        blocks.reverse();
        Ok(blocks)
    }

    /// The whole canonical chain from genesis to head.
    ///
    /// Missing blocks, undecodable records or a head that disagrees with the
    /// height index are reported as [`StorageError::Corrupted`].
    pub fn load_chain(&self) -> Result<Vec<Block>> {
        let Some(head) = self.get_head()? else {
            return Ok(Vec::new());
        };
        let height = self.get_height()?;

        let mut blocks = Vec::with_capacity(height as usize + 1);
        for h in 0..=height {
            let block = self
                .get_block_by_height(h)
                .map_err(|e| StorageError::Corrupted(format!("block {}: {}", h, e)))?
                .ok_or_else(|| StorageError::Corrupted(format!("block {} missing", h)))?;
            if block.height() != h {
                return Err(StorageError::Corrupted(format!(
                    "block indexed at {} claims height {}",
                    h,
                    block.height()
                )));
            }
            blocks.push(block);
        }

        match blocks.last() {
            Some(tip) if tip.hash() == head => Ok(blocks),
            _ => Err(StorageError::Corrupted(
                "head pointer does not match the height index".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qbit_core::{Address, Transaction};

    fn setup() -> ChainStore {
        ChainStore::new(&Storage::open_temporary().unwrap())
    }

    fn genesis_block() -> Block {
        Block::genesis(1_700_000_000, &[(Address([0xAA; 20]), 100)], 0)
    }

    fn child(parent: &Block, tag: u8) -> Block {
        let height = parent.height() + 1;
        let coinbase = Transaction::coinbase(Address([tag; 20]), 1, height);
        Block::new(height, parent.hash(), vec![coinbase], 0)
    }

    #[test]
    fn test_genesis_init() {
        let chain = setup();
        assert!(!chain.is_initialized().unwrap());

        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        assert!(chain.is_initialized().unwrap());
        assert_eq!(chain.get_height().unwrap(), 0);
        assert_eq!(chain.get_head().unwrap(), Some(genesis.hash()));
        assert!(chain.get_block_by_hash(&genesis.hash()).unwrap().is_some());
    }

    #[test]
    fn test_genesis_double_init_fails() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        let result = chain.init_genesis(&genesis);
        assert!(matches!(result, Err(StorageError::InvalidBlock(_))));
    }

    #[test]
    fn test_append_and_read_back() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        let b1 = child(&genesis, 1);
        let b2 = child(&b1, 1);
        chain.append_block(&b1).unwrap();
        chain.append_block(&b2).unwrap();

        assert_eq!(chain.get_height().unwrap(), 2);
        assert_eq!(chain.get_head().unwrap(), Some(b2.hash()));
        assert_eq!(chain.get_block_by_height(1).unwrap(), Some(b1.clone()));
        assert_eq!(chain.get_block_by_hash(&b2.hash()).unwrap(), Some(b2.clone()));
        assert!(chain.get_block_by_height(3).unwrap().is_none());

        let recent = chain.get_recent_blocks(2).unwrap();
        assert_eq!(recent, vec![b2.clone(), b1.clone()]);

        assert_eq!(chain.load_chain().unwrap(), vec![genesis, b1, b2]);
    }

    #[test]
    fn test_append_not_extending_head_fails() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        let b1 = child(&genesis, 1);
        let b2 = child(&b1, 1);
        assert!(matches!(
            chain.append_block(&b2),
            Err(StorageError::InvalidBlock(_))
        ));

        let mut orphan = child(&genesis, 1);
        orphan.header.prev_hash = Hash([0xFF; 32]);
        assert!(chain.append_block(&orphan).is_err());
    }

    #[test]
    fn test_replace_suffix() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        let a1 = child(&genesis, 1);
        let a2 = child(&a1, 1);
        chain.append_block(&a1).unwrap();
        chain.append_block(&a2).unwrap();

        let b1 = child(&genesis, 2);
        let b2 = child(&b1, 2);
        let b3 = child(&b2, 2);
        chain.replace_suffix(0, &[b1.clone(), b2.clone(), b3.clone()]).unwrap();

        assert_eq!(chain.get_height().unwrap(), 3);
        assert_eq!(chain.get_head().unwrap(), Some(b3.hash()));
        assert_eq!(chain.load_chain().unwrap(), vec![genesis, b1, b2, b3]);
        // The old branch is still retrievable by hash.
        assert!(chain.get_block_by_hash(&a2.hash()).unwrap().is_some());
    }

    #[test]
    fn test_replace_suffix_rejects_gaps() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();

        let b1 = child(&genesis, 2);
        let b2 = child(&b1, 2);
        assert!(chain.replace_suffix(0, &[b2]).is_err());
        assert!(chain.replace_suffix::<Block>(0, &[]).is_err());
    }

    #[test]
    fn test_load_chain_detects_missing_block() {
        let storage = Storage::open_temporary().unwrap();
        let chain = ChainStore::new(&storage);
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();
        let b1 = child(&genesis, 1);
        chain.append_block(&b1).unwrap();

        storage
            .batch(vec![BatchOp::remove(Storage::block_height_key(0))])
            .unwrap();
        assert!(matches!(chain.load_chain(), Err(StorageError::Corrupted(_))));
    }

    #[test]
    fn test_clear() {
        let chain = setup();
        let genesis = genesis_block();
        chain.init_genesis(&genesis).unwrap();
        chain.append_block(&child(&genesis, 1)).unwrap();

        chain.clear().unwrap();
        assert!(!chain.is_initialized().unwrap());
        assert_eq!(chain.get_height().unwrap(), 0);
        assert!(chain.load_chain().unwrap().is_empty());
        chain.init_genesis(&genesis).unwrap();
    }
}
