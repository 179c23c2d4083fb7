//! JSONL board store.
//!
//! ```text
//! <root>/<board>/snapshot.json    schema, kind, IR
//! <root>/<board>/receipts.jsonl   one receipt per line, seq order
//! <root>/<board>/.lock            present while a save is in progress
//! ```
//!
//! Board ids may contain characters that are not safe in file names; the
//! directory name escapes every byte outside `[A-Za-z0-9_-]` as `%XX`.
//! Receipts are written before the snapshot, so a crash between the two
//! leaves a history that is at least as long as the IR it describes.
//!
//! A save takes the board's lock file with `create_new`; a second writer
//! gets [`StoreError::LockBusy`] instead of waiting. Under the lock the
//! stored history must be a prefix of the one being saved, so a process
//! working from an outdated load gets [`StoreError::Stale`] rather than
//! overwriting newer receipts.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use boardwire_kernel::store::{BOARD_SNAPSHOT_KIND, BOARD_SNAPSHOT_SCHEMA};
use boardwire_kernel::{
    BoardId, BoardIr, BoardSnapshot, BoardStore, Receipt, ReceiptQuery, StoreError,
};

const SNAPSHOT_FILE: &str = "snapshot.json";
const RECEIPTS_FILE: &str = "receipts.jsonl";
const LOCK_FILE: &str = ".lock";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotOut<'a> {
    schema: u32,
    kind: &'a str,
    ir: &'a BoardIr,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotIn {
    schema: u32,
    kind: String,
    ir: BoardIr,
}

#[derive(Debug, Clone)]
pub struct JsonlBoardStore {
    root: PathBuf,
}

impl JsonlBoardStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn board_dir(&self, board: &BoardId) -> PathBuf {
        self.root.join(encode_dir_name(board.as_str()))
    }

    /// Boards with a snapshot on disk, in id order.
    pub fn boards(&self) -> Result<Vec<BoardId>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.root, e)),
        };
        let mut boards = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            if !entry.path().join(SNAPSHOT_FILE).is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(decode_dir_name)
                .and_then(|raw| BoardId::new(raw).ok())
            else {
                tracing::debug!(dir = ?name, "skipping directory that is not a board");
                continue;
            };
            boards.push(id);
        }
        boards.sort();
        Ok(boards)
    }

    fn read_receipts(&self, board: &BoardId) -> Result<Vec<Receipt>, StoreError> {
        let path = self.board_dir(board).join(RECEIPTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = read_checked(&path)?;
        let mut receipts = Vec::new();
        for (line_no, line) in BufReader::new(bytes.as_slice()).lines().enumerate() {
            let line = line.map_err(|e| io_error(&path, e))?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let receipt: Receipt =
                serde_json::from_str(trimmed).map_err(|e| StoreError::Parse {
                    path: path.display().to_string(),
                    line: line_no + 1,
                    message: e.to_string(),
                })?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }
}

impl BoardStore for JsonlBoardStore {
    fn save(&self, snapshot: &BoardSnapshot) -> Result<(), StoreError> {
        let board = snapshot.board();
        let dir = self.board_dir(board);
        fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let _lock = BoardLockGuard::acquire(&dir)?;
        check_not_stale(board, &self.read_receipts(board)?, &snapshot.receipts)?;

        let mut receipts = Vec::new();
        for receipt in &snapshot.receipts {
            let line =
                serde_json::to_vec(receipt).map_err(|e| StoreError::Serialize(e.to_string()))?;
            receipts.extend(line);
            receipts.push(b'\n');
        }
        write_atomic(&dir.join(RECEIPTS_FILE), &receipts)?;

        let head = SnapshotOut {
            schema: snapshot.schema,
            kind: &snapshot.kind,
            ir: &snapshot.ir,
        };
        let mut body =
            serde_json::to_vec_pretty(&head).map_err(|e| StoreError::Serialize(e.to_string()))?;
        body.push(b'\n');
        write_atomic(&dir.join(SNAPSHOT_FILE), &body)?;

        tracing::debug!(
            board = %snapshot.board(),
            revision = snapshot.ir.revision,
            receipts = snapshot.receipts.len(),
            "saved board snapshot"
        );
        Ok(())
    }

    fn load(&self, board: &BoardId) -> Result<Option<BoardSnapshot>, StoreError> {
        let path = self.board_dir(board).join(SNAPSHOT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = read_checked(&path)?;
        let head: SnapshotIn = serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            line: e.line(),
            message: e.to_string(),
        })?;
        if head.kind != BOARD_SNAPSHOT_KIND || head.schema != BOARD_SNAPSHOT_SCHEMA {
            return Err(StoreError::UnsupportedSnapshot {
                kind: head.kind,
                schema: head.schema,
            });
        }
        let receipts = self.read_receipts(board)?;
        Ok(Some(BoardSnapshot {
            schema: head.schema,
            kind: head.kind,
            ir: head.ir,
            receipts,
        }))
    }

    fn query_receipts(
        &self,
        board: &BoardId,
        query: &ReceiptQuery,
    ) -> Result<Vec<Receipt>, StoreError> {
        if !self.board_dir(board).join(SNAPSHOT_FILE).exists() {
            return Err(StoreError::BoardNotFound(board.clone()));
        }
        Ok(query.select(&self.read_receipts(board)?))
    }
}

/// Lock file held for the duration of one save; removed on drop.
struct BoardLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl BoardLockGuard {
    fn acquire(board_dir: &Path) -> Result<Self, StoreError> {
        let lock_path = board_dir.join(LOCK_FILE);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::LockBusy {
                    path: lock_path.display().to_string(),
                })
            }
            Err(err) => Err(io_error(&lock_path, err)),
        }
    }
}

impl Drop for BoardLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// The stored history must be a prefix of the history being saved.
fn check_not_stale(
    board: &BoardId,
    stored: &[Receipt],
    saving: &[Receipt],
) -> Result<(), StoreError> {
    let Some(last) = stored.last() else {
        return Ok(());
    };
    let matches = saving
        .get(stored.len() - 1)
        .is_some_and(|receipt| receipt.id == last.id && receipt.seq == last.seq);
    if matches {
        return Ok(());
    }
    Err(StoreError::Stale {
        board: board.clone(),
        stored: last.seq,
        saving: saving.last().map_or(0, |r| r.seq),
    })
}

fn io_error(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Read a file, refusing NUL bytes and invalid UTF-8.
fn read_checked(path: &Path) -> Result<Vec<u8>, StoreError> {
    let bytes = fs::read(path).map_err(|e| io_error(path, e))?;
    let corrupt = |message: &str| StoreError::Parse {
        path: path.display().to_string(),
        line: 0,
        message: message.to_string(),
    };
    if bytes.contains(&0) {
        return Err(corrupt("contains NUL byte(s)"));
    }
    if std::str::from_utf8(&bytes).is_err() {
        return Err(corrupt("contains non-UTF-8 byte sequence(s)"));
    }
    Ok(bytes)
}

/// Write through a temp file, fsync, rename over `path`, fsync the parent.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp_path = tmp_write_path(path);
    let write_result = (|| -> Result<(), StoreError> {
        let file = File::create(&tmp_path).map_err(|e| io_error(&tmp_path, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(bytes)
            .and_then(|()| writer.flush())
            .map_err(|e| io_error(&tmp_path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| io_error(&tmp_path, e.into_error()))?;
        file.sync_all().map_err(|e| io_error(&tmp_path, e))
    })();

    if let Err(error) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        io_error(path, e)
    })?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = File::open(parent).map_err(|e| io_error(parent, e))?;
        dir.sync_all().map_err(|e| io_error(parent, e))?;
    }
    Ok(())
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}", std::process::id(), unique));
    PathBuf::from(tmp)
}

fn encode_dir_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn decode_dir_name(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
