use crate::support::{board_id, open_binder, open_store, print_json, read_json, rejected, yes_no};
use std::process::ExitCode;

pub async fn run(
    store_dir: &str,
    board: String,
    plan: String,
    json_output: bool,
) -> Result<ExitCode, String> {
    let board = board_id(&board)?;
    let raw = read_json(&plan)?;
    let binder = open_binder(open_store(store_dir), &board)?;
    let receipt = binder.apply_json(raw).await;
    if let Some(err) = binder.last_save_error() {
        return Err(format!(
            "receipt {} (seq {}) was not saved: {err}",
            receipt.id, receipt.seq
        ));
    }

    if json_output {
        print_json(&receipt)?;
    } else {
        println!("boardwire apply {board}");
        println!("  Receipt: {} (seq {})", receipt.id, receipt.seq);
        println!("  Status: {}", if receipt.is_ok() { "ok" } else { "error" });
        println!("  Dry run: {}", yes_no(receipt.dry_run));
        println!("  Diffs: {}", receipt.diffs.len());
        if let Some(failure) = &receipt.reason {
            println!("  Failure: {}: {}", failure.class, failure.message);
        }
    }

    Ok(if receipt.is_ok() {
        ExitCode::SUCCESS
    } else {
        rejected()
    })
}
