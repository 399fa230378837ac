//! Inspect command implementation.

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::journal::{replay, JournalReader};
use crate::store::{walk, Mutation, Store};

/// Inspect a replica's on-disk state.
#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(subcommand)]
    pub command: InspectCommand,
}

/// Inspect subcommands.
#[derive(Subcommand, Debug)]
pub enum InspectCommand {
    /// Dump journal mutations in apply order.
    Journal {
        /// Journal file path.
        path: PathBuf,
    },
    /// Replay a journal and dump the resulting tree.
    State {
        /// Journal file path.
        path: PathBuf,
    },
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    match args.command {
        InspectCommand::Journal { path } => {
            let mut reader = JournalReader::open(&path)?;
            let mut seqn = 0u64;
            while let Some(encoded) = reader.next()? {
                seqn += 1;
                match Mutation::decode(&encoded) {
                    Ok(Mutation::Set { path, body, cas }) => {
                        println!("{seqn}\tset\t{path}\t{cas}\t{body:?}")
                    }
                    Ok(Mutation::Del { path, cas }) => println!("{seqn}\tdel\t{path}\t{cas}"),
                    Ok(Mutation::Nop) => println!("{seqn}\tnop"),
                    Err(err) => println!("{seqn}\t?\t{encoded:?}\t({err})"),
                }
            }
            Ok(())
        }
        InspectCommand::State { path } => {
            let store = Store::new();
            let applied = replay(&path, &store)?;
            println!("applied\t{applied}");
            walk(&store.snapshot(), "/", &mut |path, body, cas| {
                println!("{path}\t{cas}\t{body:?}")
            });
            Ok(())
        }
    }
}
