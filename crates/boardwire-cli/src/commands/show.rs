use crate::cli::StatusArg;
use crate::support::{board_id, load_snapshot, open_store, print_json};
use boardwire_kernel::{BoardStore, ReceiptQuery, ReceiptStatus};
use serde_json::json;
use std::process::ExitCode;

pub struct Args {
    pub receipts: bool,
    pub status: Option<StatusArg>,
    pub since: Option<u64>,
    pub limit: Option<usize>,
    pub json: bool,
}

pub fn run(store_dir: &str, board: String, args: Args) -> Result<ExitCode, String> {
    let board = board_id(&board)?;
    let store = open_store(store_dir);

    if args.receipts {
        let query = ReceiptQuery {
            status: args.status.map(|s| match s {
                StatusArg::Ok => ReceiptStatus::Ok,
                StatusArg::Error => ReceiptStatus::Error,
            }),
            since_seq: args.since,
            limit: args.limit,
        };
        let receipts = store
            .query_receipts(&board, &query)
            .map_err(|e| format!("failed to query receipts of {board}: {e}"))?;
        if args.json {
            print_json(&receipts)?;
        } else {
            println!("boardwire receipts {board}");
            for receipt in &receipts {
                let outcome = match &receipt.reason {
                    Some(failure) => format!("{}: {}", failure.class, failure.message),
                    None => format!("ok, {} diff(s)", receipt.diffs.len()),
                };
                let dry = if receipt.dry_run { " [dry run]" } else { "" };
                println!(
                    "  #{} {} by {}{dry}: {outcome}",
                    receipt.seq, receipt.id, receipt.provenance.by
                );
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let snapshot = load_snapshot(&store, &board)?;
    let ir = &snapshot.ir;
    if args.json {
        print_json(&json!({
            "board": ir.board,
            "revision": ir.revision,
            "receiptCount": snapshot.receipts.len(),
            "ir": ir,
        }))?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("boardwire board {board}");
    println!("  Revision: {}", ir.revision);
    println!("  Receipts: {}", snapshot.receipts.len());
    println!("  Slots: {}", ir.slots.len());
    for (slot, decl) in &ir.slots {
        let occupants: Vec<&str> = ir.occupants_of(slot).iter().map(|g| g.as_str()).collect();
        println!(
            "    {slot} ({}, capacity {}): {}",
            decl.pinout,
            decl.capacity,
            if occupants.is_empty() {
                "empty".to_string()
            } else {
                occupants.join(", ")
            }
        );
    }
    println!("  Wires: {}", ir.wires.len());
    for (wire, spec) in &ir.wires {
        let aspects: Vec<String> = ir
            .effective_aspects(wire)
            .iter()
            .map(|a| a.id.to_string())
            .collect();
        let suffix = if aspects.is_empty() {
            String::new()
        } else {
            format!(" [{}]", aspects.join(", "))
        };
        println!("    {wire}: {} -> {}{suffix}", spec.from, spec.to);
    }
    if let Some(acl) = &ir.policy.acl {
        println!("  ACL: {} principal(s) may mutate", acl.mutate_board.len());
    }
    Ok(ExitCode::SUCCESS)
}
