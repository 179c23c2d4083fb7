use crate::support::{board_id, existing_binder, open_store, print_json};
use boardwire_kernel::NodeRole;
use std::process::ExitCode;

pub fn run(store_dir: &str, board: String, json_output: bool) -> Result<ExitCode, String> {
    let board = board_id(&board)?;
    let binder = existing_binder(&open_store(store_dir), &board)?;
    let graph = binder.realized();

    if json_output {
        print_json(graph.as_ref())?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("boardwire lower {board}");
    println!("  Revision: {}", graph.revision);
    println!("  Graph hash: {}", graph.graph_hash);
    println!("  Nodes: {}", graph.nodes.len());
    for node in &graph.nodes {
        let role = match &node.role {
            NodeRole::Occupant { slot, .. } => format!("in slot {slot}"),
            NodeRole::Shim { wire, aspect, .. } => format!("{aspect} on wire {wire}"),
        };
        println!("    {} [{}] {role}", node.id, node.kind);
    }
    println!("  Edges: {}", graph.edges.len());
    for edge in &graph.edges {
        println!(
            "    {}: {}.{} -> {}.{}",
            edge.id, edge.from.node, edge.from.pin, edge.to.node, edge.to.pin
        );
    }
    Ok(ExitCode::SUCCESS)
}
