//! Storage backends for boardwire boards.
//!
//! - [`MemoryBoardStore`]: snapshots held in process, for tests and
//!   short-lived runs.
//! - [`JsonlBoardStore`]: one directory per board holding the IR as
//!   `snapshot.json` and the receipt history as `receipts.jsonl`. Both files
//!   are replaced atomically on every save.

pub mod jsonl;
pub mod memory;

pub use jsonl::JsonlBoardStore;
pub use memory::MemoryBoardStore;
