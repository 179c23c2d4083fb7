//! In-memory board store.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use boardwire_kernel::{BoardId, BoardSnapshot, BoardStore, Receipt, ReceiptQuery, StoreError};

/// Latest snapshot per board. Saving replaces the previous one.
#[derive(Debug, Default)]
pub struct MemoryBoardStore {
    boards: RwLock<BTreeMap<BoardId, BoardSnapshot>>,
}

impl MemoryBoardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boards(&self) -> Vec<BoardId> {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BoardStore for MemoryBoardStore {
    fn save(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        self.boards
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.board().clone(), snapshot.clone());
        Ok(())
    }

    fn load(&self, board: &BoardId) -> Result<Option<BoardSnapshot>, StoreError> {
        Ok(self
            .boards
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(board)
            .cloned())
    }

    fn query_receipts(
        &self,
        board: &BoardId,
        query: &ReceiptQuery,
    ) -> Result<Vec<Receipt>, StoreError> {
        let boards = self.boards.read().unwrap_or_else(PoisonError::into_inner);
        let snapshot = boards
            .get(board)
            .ok_or_else(|| StoreError::BoardNotFound(board.clone()))?;
        Ok(query.select(&snapshot.receipts))
    }
}
