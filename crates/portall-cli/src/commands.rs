//! Subcommand implementations.

use comfy_table::Table;
use portall_core::engine::{self, Opened};
use portall_core::inspect::SchemaInspector;
use portall_core::migration::MigrationStore;
use portall_core::snapshot::TempTableManager;
use portall_core::upgrade::SafeUpgradeOrchestrator;
use portall_core::{BootstrapConfig, BootstrapController, BootstrapLock, ModelSchema};
use tracing::{info, warn};

use crate::config::Command;
use crate::error::Error;

/// Run `command` against the configured database.
pub fn execute(
    command: &Command,
    config: &BootstrapConfig,
    model: &ModelSchema,
) -> Result<(), Error> {
    let output = match command {
        Command::Bootstrap => return bootstrap(config, model),
        Command::Status => status(config, model)?,
        Command::Revision { message } => revision(config, model, message)?,
        Command::Upgrade => upgrade(config)?,
        Command::Stamp => stamp(config)?,
    };
    println!("{}", output);
    Ok(())
}

fn open(config: &BootstrapConfig) -> Result<Opened, Error> {
    let url = config.validate()?;
    let opened = engine::open(&url)?;
    info!(url = %url, existed = opened.existed, "opened database");
    Ok(opened)
}

fn bootstrap(config: &BootstrapConfig, model: &ModelSchema) -> Result<(), Error> {
    BootstrapController::new(config).run(model)?;
    Ok(())
}

fn status(config: &BootstrapConfig, model: &ModelSchema) -> Result<String, Error> {
    let opened = open(config)?;
    let report = SchemaInspector::classify(opened.database.as_ref(), model)?;

    let mut out = format!("schema: {}\n", report.status);
    for drift in &report.drift {
        out.push_str(&format!("  {}\n", drift));
    }

    let store = MigrationStore::new(&config.migrations_dir);
    if !store.is_initialized() {
        out.push_str(&format!(
            "migration store: not initialized at {}",
            store.root().display()
        ));
        return Ok(out);
    }

    let chain = store.chain()?;
    let applied = store.applied()?;
    let applied_len = applied
        .as_deref()
        .and_then(|id| chain.iter().position(|s| s.id == id))
        .map(|idx| idx + 1)
        .unwrap_or(0);

    let mut table = Table::new();
    table.set_header(vec!["#", "Step", "Parent", "Message", "State"]);
    for (idx, step) in chain.iter().enumerate() {
        let state = if idx < applied_len { "applied" } else { "pending" };
        table.add_row(vec![
            (idx + 1).to_string(),
            step.id.clone(),
            step.parent.clone().unwrap_or_else(|| "-".to_string()),
            step.message.clone(),
            state.to_string(),
        ]);
    }

    out.push_str(&format!(
        "migration store: {} steps, {} applied, {} pending\n",
        chain.len(),
        applied_len,
        chain.len() - applied_len
    ));
    out.push_str(&table.to_string());
    Ok(out)
}

fn revision(config: &BootstrapConfig, model: &ModelSchema, message: &str) -> Result<String, Error> {
    let opened = open(config)?;
    let store = MigrationStore::new(&config.migrations_dir);
    store.initialize()?;

    let pending = store.pending()?.len();
    if pending > 0 {
        return Err(Error::NotUpToDate { pending });
    }

    let live = SchemaInspector::observe(opened.database.as_ref())?;
    match store.generate_revision(&live, model, message)? {
        Some(step) => Ok(format!("generated step {}: {}", step.id, step.summary())),
        None => Ok("no changes detected".to_string()),
    }
}

fn upgrade(config: &BootstrapConfig) -> Result<String, Error> {
    let opened = open(config)?;
    let db = opened.database.as_ref();
    let store = MigrationStore::new(&config.migrations_dir);

    let lock = BootstrapLock::acquire(db, config.lock_stale_after)?;
    let tables = TempTableManager::new(config.shadow_prefix.clone());
    let result = SafeUpgradeOrchestrator::new(&store, tables).run(db);
    if let Err(e) = lock.release(db) {
        warn!(error = %e, "failed to release bootstrap lock");
    }

    let report = result?;
    let mut out = format!(
        "applied {} steps, reconciled {} of {} tables",
        report.apply.applied_count(),
        report.reconcile.copied_count(),
        report.reconcile.tables.len()
    );
    if !report.retained.is_empty() {
        out.push_str(&format!("; kept shadow tables: {}", report.retained.join(", ")));
    }
    Ok(out)
}

fn stamp(config: &BootstrapConfig) -> Result<String, Error> {
    let store = MigrationStore::new(&config.migrations_dir);
    store.initialize()?;
    Ok(match store.stamp()? {
        Some(revision) => format!("stamped revision {}", revision),
        None => "migration chain is empty, marker cleared".to_string(),
    })
}
