//! Storage boundary.
//!
//! The kernel implements no persistence itself; backends implement
//! [`BoardStore`] and the binder calls it after every receipt.

use serde::{Deserialize, Serialize};

use crate::id::BoardId;
use crate::ir::BoardIr;
use crate::realized::{Receipt, ReceiptStatus};

pub const BOARD_SNAPSHOT_KIND: &str = "boardwire.board_snapshot.v1";
pub const BOARD_SNAPSHOT_SCHEMA: u32 = 1;

/// Everything needed to restore a binder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub schema: u32,
    pub kind: String,
    pub ir: BoardIr,
    pub receipts: Vec<Receipt>,
}

impl BoardSnapshot {
    pub fn new(ir: BoardIr, receipts: Vec<Receipt>) -> Self {
        Self {
            schema: BOARD_SNAPSHOT_SCHEMA,
            kind: BOARD_SNAPSHOT_KIND.to_string(),
            ir,
            receipts,
        }
    }

    pub fn board(&self) -> &BoardId {
        &self.ir.board
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReceiptStatus>,
    /// Only receipts with `seq >= since_seq`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl ReceiptQuery {
    pub fn matches(&self, receipt: &Receipt) -> bool {
        self.status.is_none_or(|status| receipt.status == status)
            && self.since_seq.is_none_or(|seq| receipt.seq >= seq)
    }

    /// Apply the query to receipts already in `seq` order.
    pub fn select<'a>(&self, receipts: impl IntoIterator<Item = &'a Receipt>) -> Vec<Receipt> {
        receipts
            .into_iter()
            .filter(|r| self.matches(r))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("board {0} not found")]
    BoardNotFound(BoardId),
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("parse error at {path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("unsupported snapshot {kind} schema {schema}")]
    UnsupportedSnapshot { kind: String, schema: u32 },
    #[error("serialize error: {0}")]
    Serialize(String),
    #[error("board store lock busy: {path}")]
    LockBusy { path: String },
    #[error("board {board} was saved elsewhere (stored seq {stored}, this snapshot seq {saving})")]
    Stale {
        board: BoardId,
        stored: u64,
        saving: u64,
    },
}

/// Save, load and query board state.
///
/// Methods are synchronous and may block on file I/O. The binder calls
/// `save` on the blocking thread pool, once per receipt, in receipt order.
pub trait BoardStore: Send + Sync {
    fn save(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError>;

    fn load(&self, board: &BoardId) -> Result<Option<BoardSnapshot>, StoreError>;

    fn query_receipts(
        &self,
        board: &BoardId,
        query: &ReceiptQuery,
    ) -> Result<Vec<Receipt>, StoreError>;
}
