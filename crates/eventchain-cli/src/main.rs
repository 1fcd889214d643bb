//! Eventchain CLI
//!
//! Ops and demo tool for the chain subsystem: load a flat event set from a
//! JSON file into the in-memory store, run attach/chain/reset through the
//! service, and print the outcome. `--write` persists the mutated set back
//! to the same file.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use eventchain_core::{Event, EventId, OwnerId};
use eventchain_service::protocol::ApiResponse;
use eventchain_service::{ChainService, ChainView};
use eventchain_store::MemoryStore;

#[derive(Parser)]
#[command(name = "eventchain")]
#[command(author, version, about = "Event hierarchy chains: attach, inspect, reset")]
struct Cli {
    /// JSON file holding the flat event set.
    #[arg(long, global = true, default_value = "events.json")]
    data: PathBuf,

    /// Act as this owner; defaults to the owner of the named event.
    #[arg(long, global = true)]
    owner: Option<Uuid>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach existing events as children of a target event.
    Attach {
        #[arg(long)]
        target: Uuid,
        /// Comma-separated child event ids.
        #[arg(long, value_delimiter = ',', required = true)]
        children: Vec<Uuid>,
        /// Write the mutated event set back to the data file.
        #[arg(long)]
        write: bool,
    },
    /// Print the chain containing an event.
    Chain { id: Uuid },
    /// Maintenance: clear all parents, chain tags, and chain history.
    Reset {
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let events = load_events(&cli.data)?;
    let store = Arc::new(MemoryStore::with_events(events.clone()));
    let service = ChainService::new(Arc::clone(&store));

    match cli.command {
        Commands::Attach {
            target,
            children,
            write,
        } => {
            let target = EventId::from_uuid(target);
            let children: Vec<EventId> =
                children.into_iter().map(EventId::from_uuid).collect();
            let owner = resolve_owner(&cli.owner, &events, target)?;

            let result = service.attach_children(owner, target, &children).await;
            let response = ApiResponse::from_result(&result);
            if response.status == 200 {
                println!(
                    "{} {} now has {} new child(ren)",
                    "ok".green().bold(),
                    target,
                    children.len()
                );
            } else {
                print_failure(&response);
            }
            if write && response.status == 200 {
                save_events(&cli.data, &store)?;
            }
            if response.status != 200 {
                std::process::exit(1);
            }
        }
        Commands::Chain { id } => {
            let id = EventId::from_uuid(id);
            let owner = resolve_owner(&cli.owner, &events, id)?;
            match service.chain_of(owner, id).await {
                Ok(view) => print_chain(&view),
                Err(err) => {
                    print_failure(&ApiResponse::from_error(&err));
                    std::process::exit(1);
                }
            }
        }
        Commands::Reset { write } => {
            let summary = service.reset_chains().await?;
            println!(
                "{} cleared {} event(s), {} chain(s), {} history entr(ies)",
                "reset".green().bold(),
                summary.events_cleared,
                summary.chains_deleted,
                summary.history_deleted
            );
            if write {
                save_events(&cli.data, &store)?;
            }
        }
    }
    Ok(())
}

fn load_events(path: &PathBuf) -> Result<Vec<Event>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading event set from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("parsing event set in {}", path.display()))
}

fn save_events(path: &PathBuf, store: &MemoryStore) -> Result<()> {
    let events = store.events_snapshot();
    let raw = serde_json::to_string_pretty(&events)?;
    fs::write(path, raw)
        .with_context(|| format!("writing event set to {}", path.display()))?;
    println!("{} wrote {}", "ok".green(), path.display());
    Ok(())
}

fn resolve_owner(flag: &Option<Uuid>, events: &[Event], event: EventId) -> Result<OwnerId> {
    if let Some(owner) = flag {
        return Ok(OwnerId::from_uuid(*owner));
    }
    events
        .iter()
        .find(|e| e.id == event)
        .map(|e| e.owner)
        .ok_or_else(|| anyhow!("event {event} not in the data file; pass --owner"))
}

fn print_failure(response: &ApiResponse) {
    eprintln!("{} status {}", "failed".red().bold(), response.status);
    if let Some(body) = &response.body {
        match serde_json::to_string_pretty(body) {
            Ok(pretty) => eprintln!("{}", pretty.red()),
            Err(_) => eprintln!("{}", body.to_string().red()),
        }
    }
}

/// Indented depth-first rendering, children in id order.
fn print_chain(view: &ChainView) {
    let Some(root) = view.root else {
        println!("(empty chain)");
        return;
    };
    let mut stack = vec![(root, 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let Some(node) = view.nodes.iter().find(|n| n.id == id) else {
            continue;
        };
        println!(
            "{}{} {}",
            "  ".repeat(depth),
            node.id.to_string().cyan(),
            node.title
        );
        // Reverse so the pop order matches id order.
        for &child in node.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
}
