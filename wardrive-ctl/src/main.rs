use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};
use wardrive_core::{
    open_store, Config, JsonlStore, ObservationStore, SqliteStore, StoreLock, StoredRow,
};

const DEFAULT_LIST_LIMIT: usize = 20;

#[derive(Parser, Debug)]
#[command(about = "Inspect and maintain a wardrive observation store")]
struct Args {
    /// Client configuration; the store path and kind are taken from it
    #[arg(long, conflicts_with = "store")]
    config: Option<PathBuf>,

    /// Store file, when no configuration is given
    #[arg(long)]
    store: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Kind::Sqlite)]
    kind: Kind,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the number of stored observations
    Count,
    /// Remove every stored observation
    Clear {
        /// Required; clearing cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Print the most recent observations, oldest first
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,

        /// One JSON object per line instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    Sqlite,
    Jsonl,
}

#[derive(Debug, Serialize)]
struct ListedRow {
    location: Value,
    wifi: Value,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let path = store_path(&args)?;
    let _lock = exclusive_lock(&args.command, &path)?;
    let store = open_store_at(&args, &path)?;
    let mut out = io::stdout().lock();
    run(&args.command, store.as_ref(), &mut out)
}

fn store_path(args: &Args) -> anyhow::Result<PathBuf> {
    if let Some(path) = &args.config {
        let cfg = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
        return Ok(cfg.store_path());
    }
    match &args.store {
        Some(path) => Ok(path.clone()),
        None => bail!("either --config or --store is required"),
    }
}

/// Clearing takes the store lock, so it is refused while a client records.
fn exclusive_lock(cmd: &Cmd, path: &Path) -> anyhow::Result<Option<StoreLock>> {
    match cmd {
        Cmd::Clear { .. } => {
            let lock = StoreLock::acquire(path)
                .with_context(|| format!("stop the wardrive client before clearing {}", path.display()))?;
            Ok(Some(lock))
        }
        Cmd::Count | Cmd::List { .. } => Ok(None),
    }
}

fn open_store_at(args: &Args, path: &Path) -> anyhow::Result<Arc<dyn ObservationStore>> {
    if !path.exists() {
        bail!("{} does not exist", path.display());
    }
    if let Some(cfg_path) = &args.config {
        let cfg = Config::load(cfg_path)?;
        return Ok(open_store(&cfg)?);
    }
    let store: Arc<dyn ObservationStore> = match args.kind {
        Kind::Sqlite => Arc::new(SqliteStore::open(path)?),
        Kind::Jsonl => Arc::new(JsonlStore::open(path)?),
    };
    Ok(store)
}

fn run(cmd: &Cmd, store: &dyn ObservationStore, out: &mut impl Write) -> anyhow::Result<()> {
    match cmd {
        Cmd::Count => writeln!(out, "{}", store.count_rows()?)?,
        Cmd::Clear { yes } => {
            if !yes {
                bail!("refusing to clear without --yes");
            }
            let before = store.count_rows()?;
            store.clear_all()?;
            info!(removed = before, "store cleared");
            writeln!(out, "[ok] removed {before} observations")?;
        }
        Cmd::List { limit, json } => {
            for row in store.list(*limit)? {
                if *json {
                    serde_json::to_writer(&mut *out, &listed(&row))?;
                    writeln!(out)?;
                } else {
                    writeln!(out, "{}", table_line(&row))?;
                }
            }
        }
    }
    Ok(())
}

fn listed(row: &StoredRow) -> ListedRow {
    let parse = |s: &str| serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.to_string()));
    ListedRow {
        location: parse(&row.location),
        wifi: parse(&row.wifi),
    }
}

fn table_line(row: &StoredRow) -> String {
    let row = listed(row);
    let field = |v: &Value, key: &str| match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    format!(
        "{:>11} {:>11} {:>6}  {:<17} {:>5} {:>4}  {:<24} {}",
        field(&row.location, "lat"),
        field(&row.location, "lon"),
        field(&row.location, "acc"),
        field(&row.wifi, "bssid"),
        field(&row.wifi, "freq"),
        field(&row.wifi, "level"),
        field(&row.wifi, "ssid"),
        field(&row.location, "add"),
    )
}
