use crate::support::{board_id, existing_binder, open_store, print_json, read_json, rejected};
use boardwire_engine::{EngineConfig, EngineError, GadgetLibrary, Network, TracingSink};
use boardwire_lattice::LatticeCatalog;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Input {
    node: String,
    pin: String,
    value: Value,
}

pub fn run(
    store_dir: &str,
    board: String,
    inputs: String,
    config: Option<String>,
    json_output: bool,
) -> Result<ExitCode, String> {
    let board = board_id(&board)?;
    let config = match &config {
        Some(path) => EngineConfig::load(Path::new(path)).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    let inputs: Vec<Input> = serde_json::from_value(read_json(&inputs)?)
        .map_err(|e| format!("inputs must be an array of {{node, pin, value}}: {e}"))?;

    let binder = existing_binder(&open_store(store_dir), &board)?;
    let graph = binder.realized();
    let catalog = LatticeCatalog::with_builtins();
    let mut network = Network::realize(&graph, &catalog, &GadgetLibrary::with_primitives(), config)
        .map_err(|e| format!("failed to realize board {board}: {e}"))?
        .with_sink(Arc::new(TracingSink));

    let mut seeds = Vec::with_capacity(inputs.len());
    for input in &inputs {
        let contact = network
            .contact(&input.node, &input.pin)
            .map_err(|e| e.to_string())?;
        let value = network
            .contacts()
            .get(&contact)
            .ok_or_else(|| format!("contact {contact} vanished"))?
            .lattice
            .parse_value(&input.value)
            .map_err(|e| format!("input for {contact}: {e}"))?;
        seeds.push((contact, value));
    }

    let report = match network.propagate_all(seeds) {
        Ok(report) => report,
        Err(EngineError::NonConvergence { cap, abandoned }) => {
            if json_output {
                print_json(&json!({
                    "board": board,
                    "converged": false,
                    "iterationCap": cap,
                    "abandoned": abandoned,
                    "contacts": network.contacts().snapshot(),
                }))?;
            } else {
                println!("boardwire run {board}");
                println!("  Converged: no ({abandoned} task(s) abandoned at cap {cap})");
            }
            return Ok(rejected());
        }
        Err(e) => return Err(e.to_string()),
    };

    if json_output {
        print_json(&json!({
            "board": board,
            "revision": network.revision(),
            "graphHash": network.graph_hash(),
            "converged": true,
            "report": report,
            "contacts": network.contacts().snapshot(),
            "fires": network.fire_counts(),
        }))?;
    } else {
        println!("boardwire run {board}");
        println!("  Converged: yes ({} task(s))", report.tasks);
        println!("  Fired: {}", report.fired.len());
        for failure in &report.failures {
            println!("  Gadget failure: {}: {}", failure.node, failure.message);
        }
        println!("  Contacts:");
        for (contact, value) in network.contacts().snapshot() {
            println!("    {contact} = {value}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
