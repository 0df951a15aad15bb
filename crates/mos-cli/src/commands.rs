use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use mos_persist::{
    ManagedObjectRecord, ManagedObjectState, ObjectStore, PersistenceContext, PersistorConfig,
};
use mos_store::MemoryKvStore;
use mos_types::{Identifier, Value};
use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let session = Session::open(&cli.db, cli.config.as_deref())?;
    let format = cli.format;
    match cli.command {
        Command::Populate(args) => cmd_populate(&session, &args, format),
        Command::Delete(args) => cmd_delete(&session, &args, format),
        Command::Compact => cmd_compact(&session, format),
        Command::Stats => cmd_stats(&session, format),
        Command::Ids(args) => cmd_ids(&session, &args, format),
        Command::Root(args) => cmd_root(&session, args.action, format),
    }
}

/// An object store over a snapshot file.
struct Session {
    path: PathBuf,
    store: MemoryKvStore,
    objects: ObjectStore,
}

impl Session {
    fn open(path: &Path, config: Option<&Path>) -> anyhow::Result<Self> {
        let config = match config {
            Some(file) => PersistorConfig::from_file(file)?,
            None => PersistorConfig::default(),
        };
        let store = MemoryKvStore::open_or_create(path)
            .with_context(|| format!("opening {}", path.display()))?;
        let objects = ObjectStore::open(
            Arc::new(store.clone()),
            PersistenceContext::default(),
            config,
        )?;
        Ok(Self {
            path: path.to_path_buf(),
            store,
            objects,
        })
    }

    /// Write every table back to the snapshot file.
    fn persist(&self) -> anyhow::Result<()> {
        let entries = self
            .store
            .save_snapshot(&self.path)
            .with_context(|| format!("writing {}", self.path.display()))?;
        debug!(entries, path = %self.path.display(), "snapshot written");
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---- populate ----

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct PopulateSummary {
    first: u64,
    created: u64,
    maps: u64,
    evictable: u64,
}

fn state_for(offset: u64, args: &PopulateArgs, rng: &mut impl Rng) -> ManagedObjectState {
    let every = |n: u64| n > 0 && offset % n == 0;
    let mut state = if every(args.evictable_every) {
        ManagedObjectState::ServerMap {
            cache_name: format!("cache-{offset}"),
            max_tti_secs: 300,
            max_ttl_secs: 3_600,
            target_max_in_memory: 10_000,
            entries: Default::default(),
        }
    } else if every(args.map_every) {
        ManagedObjectState::Map {
            class_name: "HashMap".into(),
            entries: Default::default(),
        }
    } else {
        ManagedObjectState::Physical {
            class_name: "Sample".into(),
            fields: BTreeMap::from([
                ("index".to_string(), Value::Int(offset as i64)),
                ("weight".to_string(), Value::Int(rng.gen_range(0..1_000))),
            ]),
        }
    };
    if let Some(entries) = state.map_entries_mut() {
        for i in 0..args.entries {
            entries.put(Value::from(format!("k{i}")), Value::Int(rng.gen()));
        }
    }
    state
}

fn populate(objects: &ObjectStore, args: &PopulateArgs) -> anyhow::Result<PopulateSummary> {
    if args.count == 0 {
        bail!("populate needs a positive --count");
    }
    let first = objects.next_object_id_batch(args.count)?;
    let mut rng = rand::thread_rng();
    let mut summary = PopulateSummary {
        first: first.as_u64(),
        ..PopulateSummary::default()
    };
    let mut records = Vec::with_capacity(args.count as usize);
    for offset in 0..args.count {
        let record = ManagedObjectRecord::new(
            Identifier::new(first.as_u64() + offset),
            state_for(offset, args, &mut rng),
        );
        if !objects.add_new(&record) {
            bail!("identifier {} is already live", record.id());
        }
        let flags = objects.context().classify(record.state());
        summary.maps += u64::from(flags.is_persistable_collection());
        summary.evictable += u64::from(flags.is_evictable());
        records.push(record);
    }

    let mut tx = objects.new_transaction()?;
    objects.save_all(tx.as_mut(), &mut records)?;
    if let Some(name) = &args.root {
        objects.add_root(tx.as_mut(), name, first)?;
    }
    tx.commit()?;
    summary.created = records.len() as u64;
    Ok(summary)
}

fn cmd_populate(session: &Session, args: &PopulateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let summary = populate(&session.objects, args)?;
    session.persist()?;
    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            println!(
                "{} Created {} objects starting at {}",
                "✓".green().bold(),
                summary.created.to_string().bold(),
                summary.first.to_string().yellow()
            );
            println!("  Map-type: {}", summary.maps);
            println!("  Evictable: {}", summary.evictable);
            if let Some(root) = &args.root {
                println!("  Root: {} -> {}", root.cyan(), summary.first);
            }
            Ok(())
        }
    }
}

// ---- delete ----

fn delete_range(objects: &ObjectStore, from: u64, to: u64) -> anyhow::Result<usize> {
    if from >= to {
        bail!("empty range {from}..{to}");
    }
    let ids: BTreeSet<Identifier> = objects
        .snapshot_all()
        .range(Identifier::new(from)..Identifier::new(to))
        .copied()
        .collect();
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(objects.delete_all(&ids)?)
}

fn cmd_delete(session: &Session, args: &DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let deleted = delete_range(&session.objects, args.from, args.to)?;
    session.persist()?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "deleted": deleted })),
        OutputFormat::Text => {
            println!(
                "{} Deleted {} objects in {}..{}",
                "✓".green().bold(),
                deleted.to_string().bold(),
                args.from,
                args.to
            );
            Ok(())
        }
    }
}

// ---- compact ----

fn cmd_compact(session: &Session, format: OutputFormat) -> anyhow::Result<()> {
    let ledger = session.objects.ledger();
    let before = ledger.pending_records()?;
    session.objects.compact_all()?;
    let after = ledger.pending_records()?;
    session.persist()?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({ "before": before, "after": after })),
        OutputFormat::Text => {
            println!(
                "{} Compacted {} ledger records ({} pending)",
                "✓".green().bold(),
                before.saturating_sub(after).to_string().bold(),
                after
            );
            Ok(())
        }
    }
}

// ---- stats ----

fn cmd_stats(session: &Session, format: OutputFormat) -> anyhow::Result<()> {
    let stats = session.objects.stats()?;
    match format {
        OutputFormat::Json => print_json(&stats),
        OutputFormat::Text => {
            println!("{}", session.path.display().to_string().bold());
            println!("{stats}");
            Ok(())
        }
    }
}

// ---- ids ----

fn list_ids(objects: &ObjectStore, index: IndexKind, limit: Option<usize>) -> Vec<u64> {
    let ids = match index {
        IndexKind::All => objects.snapshot_all(),
        IndexKind::Maps => objects.snapshot_map_type(),
        IndexKind::Evictable => objects.snapshot_evictable(),
    };
    ids.into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|id| id.as_u64())
        .collect()
}

fn cmd_ids(session: &Session, args: &IdsArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ids = list_ids(&session.objects, args.index, args.limit);
    match format {
        OutputFormat::Json => print_json(&ids),
        OutputFormat::Text => {
            if ids.is_empty() {
                println!("No identifiers.");
            }
            for id in ids {
                println!("{id}");
            }
            Ok(())
        }
    }
}

// ---- roots ----

fn cmd_root(session: &Session, action: RootAction, format: OutputFormat) -> anyhow::Result<()> {
    let objects = &session.objects;
    match action {
        RootAction::Set { name, id } => {
            let id = Identifier::new(id);
            let mut tx = objects.new_transaction()?;
            objects.add_root(tx.as_mut(), &name, id)?;
            tx.commit()?;
            session.persist()?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ name: id.as_u64() })),
                OutputFormat::Text => {
                    println!("{} Root {} -> {}", "✓".green().bold(), name.cyan(), id);
                    Ok(())
                }
            }
        }
        RootAction::Get { name } => {
            let id = objects.load_root(&name)?;
            let value = (!id.is_null()).then(|| id.as_u64());
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ name: value })),
                OutputFormat::Text => {
                    match value {
                        Some(id) => println!("{} -> {}", name.cyan(), id),
                        None => println!("{} = (not set)", name.cyan()),
                    }
                    Ok(())
                }
            }
        }
        RootAction::List => {
            let roots: BTreeMap<String, u64> = objects
                .load_root_names_to_ids()?
                .into_iter()
                .map(|(name, id)| (name, id.as_u64()))
                .collect();
            match format {
                OutputFormat::Json => print_json(&roots),
                OutputFormat::Text => {
                    if roots.is_empty() {
                        println!("No roots.");
                    }
                    for (name, id) in roots {
                        println!("{} -> {}", name.cyan(), id);
                    }
                    Ok(())
                }
            }
        }
    }
}
