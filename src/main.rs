//! Tangle CLI - dependency and lifecycle graph for tasks and epics.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use tangle::{AgentContext, Config, ItemFilter, NewItem, Status, Store};

mod cli;

use cli::{Cli, Command, DepCommand};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tangle")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tangle.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_store_dir(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn get_config(cli: &Cli) -> Config {
    let config = Config::from_env();
    match cli.max_depth {
        Some(depth) => config.with_max_traversal_depth(depth),
        None => config,
    }
}

fn get_agent(cli: &Cli) -> Option<AgentContext> {
    cli.agent.clone().map(AgentContext::new).or_else(AgentContext::from_env)
}

fn format_status(status: &Status) -> ColoredString {
    match status {
        Status::Open => "open".green(),
        Status::InProgress => "in_progress".yellow(),
        Status::Blocked => "blocked".red(),
        Status::Done => "done".blue(),
        Status::Canceled => "canceled".dimmed(),
    }
}

/// Report (and optionally act on) a parent whose children are now all closed.
fn after_status_change(store: &mut Store, id: &str, auto_close: bool) -> Result<()> {
    let Some(completion) = store.check_parent_epic_completion(id)? else {
        return Ok(());
    };

    println!(
        "{} All {} children of {} {} are closed",
        "→".blue(),
        completion.total_children,
        completion.epic_id.cyan(),
        completion.title
    );
    if let Some(instructions) = &completion.closing_instructions {
        println!("  {}: {}", "Closing instructions".bold(), instructions);
    }
    if let Some(worktree) = &completion.worktree {
        println!(
            "  {}: {}{}",
            "Worktree".bold(),
            worktree.path,
            worktree.branch.as_deref().map(|b| format!(" ({})", b)).unwrap_or_default()
        );
    }

    if auto_close {
        let epic = store
            .auto_complete_epic(&completion.epic_id)
            .context("Failed to auto-complete epic")?;
        println!("{} Closed: {} {}", "✓".green(), epic.id.cyan(), epic.results.unwrap_or_default());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let store_dir = get_store_dir(&cli);
    let config = get_config(&cli);
    let agent = get_agent(&cli);

    match cli.command {
        Command::Init => {
            Store::init_with_config(&store_dir, config).context("Failed to initialize tangle store")?;
            println!("{} Initialized tangle store in {}", "✓".green(), store_dir.display());
        }

        Command::Create {
            title,
            project,
            epic,
            priority,
            parent,
            labels,
            description,
            closing_instructions,
        } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let mut new = NewItem::new(project, title);
            if epic {
                new.item_type = tangle::ItemType::Epic;
            }
            new.priority = priority;
            new.parent_id = parent;
            new.labels = labels.unwrap_or_default();
            new.description = description;
            new.closing_instructions = closing_instructions;

            let item = store.create(new).context("Failed to create item")?;

            println!("{} Created: {} {}", "✓".green(), item.id.cyan(), item.title);
        }

        Command::Get { id, json } => {
            let store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let Some(item) = store.get(&id).context("Failed to get item")? else {
                eprintln!("{} Item not found: {}", "✗".red(), id);
                std::process::exit(1);
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&item)?);
                return Ok(());
            }

            println!("{}: {}", "ID".bold(), item.id.cyan());
            println!("{}: {} ({})", "Title".bold(), item.title, item.item_type);
            println!("{}: {}", "Project".bold(), item.project);
            println!("{}: {}", "Status".bold(), format_status(&item.status));
            println!("{}: P{}", "Priority".bold(), item.priority);
            if let Some(parent) = &item.parent_id {
                println!("{}: {}", "Parent".bold(), parent.cyan());
            }
            if let Some(agent) = &item.agent_id {
                println!("{}: {}", "Claimed by".bold(), agent);
            }
            let labels = store.labels(&item.id)?;
            if !labels.is_empty() {
                println!("{}: {}", "Labels".bold(), labels.join(", "));
            }
            if let Some(desc) = &item.description {
                println!("{}: {}", "Description".bold(), desc);
            }
            if let Some(results) = &item.results {
                println!("{}: {}", "Results".bold(), results);
            }
            for dep in store.get_dependencies(&item.id)? {
                println!("{}: {} {} {}", "Depends on".bold(), dep.id.cyan(), format_status(&dep.status), dep.title);
            }
            for dep in store.get_blocked_by(&item.id)? {
                println!("{}: {} {} {}", "Blocks".bold(), dep.id.cyan(), format_status(&dep.status), dep.title);
            }
            println!("{}: {}", "Created".bold(), item.created_at);
            println!("{}: {}", "Updated".bold(), item.updated_at);
            for entry in store.logs(&item.id)? {
                println!("  {} {}", entry.created_at.format("%Y-%m-%d %H:%M").to_string().dimmed(), entry.message);
            }
        }

        Command::List { project, status, json } => {
            let store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let mut filter = ItemFilter::new();
            if let Some(project) = project {
                filter = filter.project(project);
            }
            if let Some(status) = status {
                filter = filter.status(status.parse::<Status>()?);
            }

            let items = store.list(&filter).context("Failed to list items")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("{}", "No items found".dimmed());
            } else {
                for item in items {
                    println!(
                        "{} {} P{} {} {}",
                        format_status(&item.status),
                        item.id.cyan(),
                        item.priority,
                        item.title,
                        item.project.dimmed()
                    );
                }
            }
        }

        Command::Ready { project, json } => {
            let store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let items = store.ready(&project).context("Failed to get ready items")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if items.is_empty() {
                println!("{}", "No ready items".dimmed());
            } else {
                println!("{} {} item(s) ready to work on:", "→".blue(), items.len());
                for item in items {
                    println!("  {} P{} {}", item.id.cyan(), item.priority, item.title);
                }
            }
        }

        Command::Start { id } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let item = store
                .update_status(&id, Status::InProgress, agent.as_ref(), false)
                .context("Failed to start item")?;

            println!("{} Started: {} {}", "→".blue(), item.id.cyan(), item.title);
        }

        Command::Status {
            id,
            status,
            force,
            auto_close_epic,
        } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let status = status.parse::<Status>()?;
            let item = store
                .update_status(&id, status, agent.as_ref(), force)
                .context("Failed to update status")?;

            println!("{} {} is now {}", "✓".green(), item.id.cyan(), format_status(&item.status));
            after_status_change(&mut store, &item.id, auto_close_epic)?;
        }

        Command::Complete {
            id,
            results,
            auto_close_epic,
        } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let item = store
                .complete_item(&id, &results, agent.as_ref())
                .context("Failed to complete item")?;

            println!("{} Completed: {} {}", "✓".green(), item.id.cyan(), item.title);
            after_status_change(&mut store, &item.id, auto_close_epic)?;
        }

        Command::Delete { id, force, cascade } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let deleted = store
                .delete_item(&id, force, cascade)
                .context("Failed to delete item")?;

            println!("{} Deleted {} item(s)", "✓".green(), deleted.len());
        }

        Command::Dep { command } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            match command {
                DepCommand::Add { item, depends_on } => {
                    let outcome = store
                        .add_dependency(&item, &depends_on)
                        .context("Failed to add dependency")?;
                    println!("{} {} now depends on {}", "✓".green(), item.cyan(), depends_on.cyan());
                    if outcome.reverted {
                        println!("  {} {} moved back to open and released", "!".yellow(), item.cyan());
                    }
                }
                DepCommand::Rm { item, depends_on } => {
                    store
                        .remove_dependency(&item, &depends_on)
                        .context("Failed to remove dependency")?;
                    println!("{} {} no longer depends on {}", "✓".green(), item.cyan(), depends_on.cyan());
                }
                DepCommand::List { id } => {
                    let direct = store.get_dependencies(&id)?;
                    let inherited = store.get_ancestor_dependencies(&id)?;
                    if direct.is_empty() && inherited.is_empty() {
                        println!("{}", "No dependencies".dimmed());
                    }
                    for dep in direct {
                        println!("  {} {} {}", dep.id.cyan(), format_status(&dep.status), dep.title);
                    }
                    for dep in inherited {
                        println!(
                            "  {} {} {} {}",
                            dep.dependency.id.cyan(),
                            format_status(&dep.dependency.status),
                            dep.dependency.title,
                            format!("(via {})", dep.inherited_from).dimmed()
                        );
                    }
                }
            }
        }

        Command::BlockedBy { id } => {
            let store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let dependents = store.get_blocked_by(&id)?;

            if dependents.is_empty() {
                println!("{}", "Nothing depends on this item".dimmed());
            } else {
                println!("{} {} item(s) depend on {}:", "⊘".red(), dependents.len(), id.cyan());
                for dep in dependents {
                    println!("  {} {} {}", dep.id.cyan(), format_status(&dep.status), dep.title);
                }
            }
        }

        Command::Impact { id, json } => {
            let store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let impact = store.get_impact(&id)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&impact)?);
            } else if impact.is_empty() {
                println!("{}", "Completing this item unblocks nothing".dimmed());
            } else {
                println!("{} Completing {} would unblock:", "→".blue(), id.cyan());
                for hit in impact {
                    println!("  {} {} P{} {}", format!("+{}", hit.depth).dimmed(), hit.id.cyan(), hit.priority, hit.title);
                }
            }
        }

        Command::Merge { source, target } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;
            let summary = store.merge_items(&source, &target).context("Failed to merge items")?;

            println!(
                "{} Merged {} into {} ({} deps, {} dependents, {} logs, {} labels)",
                "✓".green(),
                source.cyan(),
                summary.target.id.cyan(),
                summary.dependencies_moved,
                summary.dependents_moved,
                summary.logs_moved,
                summary.labels_copied
            );
        }

        Command::Doctor { fix } => {
            let mut store = Store::open_with_config(&store_dir, config).context("Failed to open store")?;

            let cycles = store.find_circular_deps()?;
            if cycles.is_empty() {
                println!("{} No dependency cycles", "✓".green());
            }
            for cycle in cycles {
                println!("{} Cycle: {}", "✗".red(), cycle.join(" -> "));
            }

            let conflicts = if fix {
                store.fix_all_parent_child_circular_deps()?
            } else {
                store.find_parent_child_circular_deps()?
            };
            if conflicts.is_empty() {
                println!("{} No parent/child conflicts", "✓".green());
            }
            for conflict in conflicts {
                let verb = if fix { "Removed" } else { "Conflict" };
                println!(
                    "{} {}: {} -> {} (parent {} / child {})",
                    "!".yellow(),
                    verb,
                    conflict.item_id.cyan(),
                    conflict.depends_on.cyan(),
                    conflict.parent_id,
                    conflict.child_id
                );
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
