use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use notetype_kernel_core::{
    available_ordinals_for_fields, generate_cards, Clock, NoteId, NoteStore, NoteType, NoteTypeId,
    NoteTypeRegistry, SystemClock,
};
use notetype_kernel_store_sqlite::SqliteStore;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "ntk")]
#[command(about = "Note type kernel CLI")]
struct Cli {
    #[arg(long, global = true, default_value = "./notetype_kernel.sqlite3")]
    db: PathBuf,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Notetype {
        #[command(subcommand)]
        command: NotetypeCommand,
    },
    Note {
        #[command(subcommand)]
        command: NoteCommand,
    },
    Card {
        #[command(subcommand)]
        command: CardCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum NotetypeCommand {
    /// Store note types from a JSON file (one object or an array) as they are.
    Import(NotetypeImportArgs),
    List,
    Show(NotetypeIdArgs),
}

#[derive(Debug, Args)]
struct NotetypeImportArgs {
    #[arg(long)]
    file: PathBuf,
}

#[derive(Debug, Args)]
struct NotetypeIdArgs {
    #[arg(long)]
    id: i64,
}

#[derive(Debug, Subcommand)]
enum NoteCommand {
    Add(NoteAddArgs),
    Available(NoteIdArgs),
}

#[derive(Debug, Args)]
struct NoteAddArgs {
    #[arg(long)]
    note_type_id: i64,
    /// Field values in field order; missing trailing fields are left empty.
    #[arg(long = "field")]
    fields: Vec<String>,
}

#[derive(Debug, Args)]
struct NoteIdArgs {
    #[arg(long)]
    note_id: i64,
}

#[derive(Debug, Subcommand)]
enum CardCommand {
    List(NoteIdArgs),
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

/// Log to stderr so stdout stays machine-readable JSON.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|err| anyhow!("failed to initialise logging: {err}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    tracing::debug!(db = %cli.db.display(), "opening note store");

    let mut store = SqliteStore::open(&cli.db)?;
    match cli.command {
        Command::Db { command } => run_db(command, &mut store),
        Command::Notetype { command } => run_notetype(command, &mut store),
        Command::Note { command } => run_note(command, &mut store),
        Command::Card { command } => run_card(&command, &mut store),
    }
}

fn run_db(command: DbCommand, store: &mut SqliteStore) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = store.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => run_db_migrate(&args, store),
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            let report =
                serde_json::to_value(&report).context("failed to serialize integrity report")?;
            emit_json(report)
        }
    }
}

fn run_db_migrate(args: &DbMigrateArgs, store: &mut SqliteStore) -> Result<()> {
    let before = store.schema_status()?;
    if args.dry_run {
        emit_json(serde_json::json!({
            "dry_run": true,
            "current_version": before.current_version,
            "target_version": before.target_version,
            "would_apply_versions": before.pending_versions
        }))?;
        return Ok(());
    }

    store.migrate()?;
    let after = store.schema_status()?;
    emit_json(serde_json::json!({
        "dry_run": false,
        "before_version": before.current_version,
        "applied_versions": before.pending_versions,
        "after_version": after.current_version,
        "target_version": after.target_version,
        "up_to_date": after.pending_versions.is_empty()
    }))
}

fn run_notetype(command: NotetypeCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let mut registry = NoteTypeRegistry::load_from(&*store)?;
    match command {
        NotetypeCommand::Import(args) => {
            let body = fs::read_to_string(&args.file)
                .with_context(|| format!("failed to read note type file {}", args.file.display()))?;
            let parsed: Value = serde_json::from_str(&body)
                .with_context(|| format!("invalid JSON in {}", args.file.display()))?;
            let items = match parsed {
                Value::Array(items) => items,
                other => vec![other],
            };

            let mut imported = Vec::new();
            for item in items {
                let note_type: NoteType =
                    serde_json::from_value(item).context("failed to decode note type")?;
                let id = note_type.id.ok_or_else(|| {
                    anyhow!(
                        "note type {:?} has no id; imported note types keep their ids",
                        note_type.name
                    )
                })?;
                registry.update(note_type)?;
                imported.push(id);
            }
            let written = registry.flush(store)?;
            tracing::info!(count = imported.len(), "imported note types");
            emit_json(serde_json::json!({ "imported": imported, "written": written }))
        }
        NotetypeCommand::List => {
            let current = registry.current().and_then(|note_type| note_type.id);
            let note_types = registry
                .all()
                .map(|note_type| {
                    serde_json::json!({
                        "id": note_type.id,
                        "name": note_type.name,
                        "cloze": note_type.is_cloze(),
                        "fields": note_type.field_names(),
                        "templates": note_type.templates.len(),
                        "current": note_type.id == current,
                    })
                })
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({ "note_types": note_types }))
        }
        NotetypeCommand::Show(args) => {
            let note_type = registry.require(NoteTypeId(args.id))?;
            emit_json(serde_json::json!({
                "note_type": note_type,
                "schema_hash": note_type.schema_hash(),
            }))
        }
    }
}

fn run_note(command: NoteCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    let registry = NoteTypeRegistry::load_from(&*store)?;
    match command {
        NoteCommand::Add(args) => {
            let note_type = registry.require(NoteTypeId(args.note_type_id))?;
            let field_count = note_type.fields.len();
            if args.fields.len() > field_count {
                return Err(anyhow!(
                    "note type {:?} has {field_count} fields but {} values were given",
                    note_type.name,
                    args.fields.len()
                ));
            }
            let mut fields = args.fields;
            fields.resize(field_count, String::new());

            let now = SystemClock.now_secs();
            let note_id = store.add_note(note_type, &fields, now)?;
            let usn = store.usn()?;
            let cards = generate_cards(store, note_type, &[note_id], now, usn)?;
            tracing::info!(note_id = %note_id, cards = cards.len(), "added note");
            emit_json(serde_json::json!({
                "note_id": note_id,
                "note_type_id": note_type.id,
                "cards": store.list_cards(note_id)?,
            }))
        }
        NoteCommand::Available(args) => {
            let note_id = NoteId(args.note_id);
            let note = store.note(note_id)?.ok_or_else(|| anyhow!("note not found: {note_id}"))?;
            let note_type = registry.require(note.note_type_id)?;
            let ordinals = available_ordinals_for_fields(note_type, &note.fields)?;
            let templates = ordinals
                .iter()
                .map(|ordinal| {
                    let name = note_type.templates.get(*ordinal).or(note_type.templates.first());
                    serde_json::json!({
                        "ordinal": ordinal,
                        "template": name.map(|template| template.name.as_str()),
                    })
                })
                .collect::<Vec<_>>();
            emit_json(serde_json::json!({
                "note_id": note_id,
                "note_type_id": note.note_type_id,
                "available_ordinals": ordinals,
                "templates": templates,
            }))
        }
    }
}

fn run_card(command: &CardCommand, store: &mut SqliteStore) -> Result<()> {
    store.migrate()?;
    match command {
        CardCommand::List(args) => {
            let note_id = NoteId(args.note_id);
            let cards = store.list_cards(note_id)?;
            emit_json(serde_json::json!({ "note_id": note_id, "cards": cards }))
        }
    }
}
