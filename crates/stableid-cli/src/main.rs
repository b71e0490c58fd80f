//! StableId CLI - inspect and maintain a project's identifier registry.
//!
//! A thin wrapper over stableid-core: every command opens the project
//! registry (taking the session lock), does one thing, and exits.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use stableid_core::{PersistentId, RegistryError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "stableid")]
#[command(about = "Persistent identifier registry for scene-based projects")]
#[command(version)]
struct Args {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Summarize the registry
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List registered identifiers
    List {
        /// Only this scope
        #[arg(long)]
        scope: Option<String>,
    },

    /// Allocate a fresh identifier in a scope
    Allocate { scope: String },

    /// Register a specific identifier (decimal or 0x hex)
    Register { scope: String, id: PersistentId },

    /// Give an object a new identifier and retire its old one
    Regenerate {
        /// Object name within the scene
        object: String,
        scope: String,
        /// Identifier the object holds now (read from the scene if omitted)
        #[arg(long)]
        current: Option<PersistentId>,
    },

    /// Stop tracking an identifier
    Unregister { id: PersistentId },

    /// Drop a scope and everything registered in it
    RemoveScope { scope: String },

    /// Move a scope's identifiers to a new scope key
    RenameScope { from: String, to: String },

    /// Give every unassigned or duplicated object in the scenes an identifier
    Assign,

    /// Copy a scene and reissue the copy's identifiers
    DuplicateScene { from: String, to: String },

    /// Compare the registry with the scene files
    Validate {
        #[arg(long)]
        json: bool,
    },

    /// Apply fixes for the findings of a validation run
    Repair {
        /// Unregister identifiers no object holds
        #[arg(long)]
        drop_orphans: bool,
        /// Register identifiers held by objects but missing from the registry
        #[arg(long)]
        register_unregistered: bool,
        /// Move identifiers registered under the wrong scope
        #[arg(long)]
        relocate: bool,
        /// Resolve a duplicate: ID=SCOPE/OBJECT keeps the value, other holders get new ones
        #[arg(long = "keep", value_parser = commands::parse_keep)]
        keep: Vec<(PersistentId, stableid_core::ObjectKey)>,
        /// Actually apply the changes
        #[arg(long)]
        yes: bool,
    },

    /// Follow the scenes directory and keep the registry in step
    Watch,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Logs go to stderr so command output stays parseable
    let log_level = if args.debug { Level::DEBUG } else { Level::WARN };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            let code = e
                .downcast_ref::<RegistryError>()
                .map(RegistryError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(args: Args) -> Result<()> {
    let root = match args.root {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    debug!("Project root: {}", root.display());

    let ctx = commands::Context::open(&root)?;
    match args.command {
        Command::Status { json } => commands::status(ctx, json),
        Command::List { scope } => commands::list(ctx, scope.as_deref()),
        Command::Allocate { scope } => commands::allocate(ctx, &scope),
        Command::Register { scope, id } => commands::register(ctx, &scope, id),
        Command::Regenerate {
            object,
            scope,
            current,
        } => commands::regenerate(ctx, &object, &scope, current),
        Command::Unregister { id } => commands::unregister(ctx, id),
        Command::RemoveScope { scope } => commands::remove_scope(ctx, &scope),
        Command::RenameScope { from, to } => commands::rename_scope(ctx, &from, &to),
        Command::Assign => commands::assign(ctx),
        Command::DuplicateScene { from, to } => commands::duplicate_scene(ctx, &from, &to),
        Command::Validate { json } => commands::validate(ctx, json),
        Command::Repair {
            drop_orphans,
            register_unregistered,
            relocate,
            keep,
            yes,
        } => {
            let plan = stableid_core::RepairPlan {
                drop_orphans,
                register_unregistered,
                relocate_misplaced: relocate,
                keep: keep.into_iter().collect(),
            };
            commands::repair(ctx, &plan, yes)
        }
        Command::Watch => commands::watch(ctx),
    }
}
