use boardwire_kernel::{AspectRegistry, Binder, BoardId, BoardSnapshot, BoardStore};
use boardwire_lattice::LatticeCatalog;
use boardwire_store::JsonlBoardStore;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Read;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "BOARDWIRE_LOG";

/// Exit status for a rejected plan or a run that did not converge.
pub const EXIT_REJECTED: u8 = 2;

pub fn rejected() -> ExitCode {
    ExitCode::from(EXIT_REJECTED)
}

/// Log to stderr, filtered by `BOARDWIRE_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn board_id(raw: &str) -> Result<BoardId, String> {
    BoardId::new(raw).map_err(|e| e.to_string())
}

pub fn open_store(dir: &str) -> Arc<JsonlBoardStore> {
    Arc::new(JsonlBoardStore::new(dir))
}

pub fn load_snapshot(store: &JsonlBoardStore, board: &BoardId) -> Result<BoardSnapshot, String> {
    store
        .load(board)
        .map_err(|e| format!("failed to load board {board}: {e}"))?
        .ok_or_else(|| {
            format!(
                "board {board} has no snapshot under {}",
                store.root().display()
            )
        })
}

fn restore(snapshot: BoardSnapshot) -> Result<Binder, String> {
    Binder::restore(
        snapshot,
        Arc::new(AspectRegistry::with_builtins()),
        Arc::new(LatticeCatalog::with_builtins()),
    )
    .map_err(|e| format!("failed to restore board: {e}"))
}

/// Restore `board` from the store, or start it empty when it has never
/// been saved. The binder saves back to the same store.
pub fn open_binder(store: Arc<JsonlBoardStore>, board: &BoardId) -> Result<Binder, String> {
    let existing = store
        .load(board)
        .map_err(|e| format!("failed to load board {board}: {e}"))?;
    let binder = match existing {
        Some(snapshot) => restore(snapshot)?,
        None => Binder::new(
            board.clone(),
            Arc::new(AspectRegistry::with_builtins()),
            Arc::new(LatticeCatalog::with_builtins()),
        )
        .map_err(|e| format!("failed to create board {board}: {e}"))?,
    };
    Ok(binder.with_store(store))
}

/// Restore a board that must already exist.
pub fn existing_binder(store: &JsonlBoardStore, board: &BoardId) -> Result<Binder, String> {
    restore(load_snapshot(store, board)?)
}

pub fn read_json(path: &str) -> Result<Value, String> {
    let text = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| format!("failed to read stdin: {e}"))?;
        buf
    } else {
        fs::read_to_string(path).map_err(|e| format!("failed to read {path}: {e}"))?
    };
    serde_json::from_str(&text).map_err(|e| format!("failed to parse {path}: {e}"))
}

pub fn print_json(value: &impl Serialize) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| format!("json serialization: {e}"))?;
    println!("{text}");
    Ok(())
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
