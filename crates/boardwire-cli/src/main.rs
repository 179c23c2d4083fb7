//! Boardwire CLI: the `boardwire` command.

mod cli;
mod commands;
mod support;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    support::init_tracing();

    let result = match cli.command {
        Commands::Apply { board, plan, json } => {
            commands::apply::run(&cli.store, board, plan, json).await
        }

        Commands::Show {
            board,
            receipts,
            status,
            since,
            limit,
            json,
        } => commands::show::run(
            &cli.store,
            board,
            commands::show::Args {
                receipts,
                status,
                since,
                limit,
                json,
            },
        ),

        Commands::Lower { board, json } => commands::lower::run(&cli.store, board, json),

        Commands::Run {
            board,
            inputs,
            config,
            json,
        } => commands::run::run(&cli.store, board, inputs, config, json),
    };

    match result {
        Ok(code) => code,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}
