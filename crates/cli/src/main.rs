#![forbid(unsafe_code)]

use serde_json::json;
use sqh_core::{history_table_name, is_history_table_name};
use sqh_storage::{ConfigureOutcome, HistoryStore};
use std::path::PathBuf;

fn usage() -> &'static str {
    "sqh — retrofit change-history tracking onto SQLite tables\n\n\
USAGE:\n\
  sqh <database-path> [table ...]\n\
  sqh <database-path> -A | --all\n\n\
OPTIONS:\n\
  -A, --all     configure every regular table in the database\n\
      --json    emit one JSON object per table outcome instead of text\n\
  -h, --help    show this help\n\n\
NOTES:\n\
  - each table is configured in its own transaction; the first failure\n\
    stops the run, already-configured tables before it stay committed.\n\
  - tables named _X_history are this tool's own output and are never\n\
    configured themselves.\n"
}

#[derive(Debug, PartialEq, Eq)]
struct CliConfig {
    db_path: PathBuf,
    tables: Vec<String>,
    all: bool,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut db_path: Option<PathBuf> = None;
    let mut tables = Vec::new();
    let mut all = false;
    let mut json = false;

    for arg in args {
        match arg.as_str() {
            "-A" | "--all" => all = true,
            "--json" => json = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown flag: {other}\n\n{}", usage()));
            }
            other => {
                if db_path.is_none() {
                    db_path = Some(PathBuf::from(other));
                } else {
                    tables.push(other.to_string());
                }
            }
        }
    }

    let Some(db_path) = db_path else {
        return Err(usage().to_string());
    };
    if tables.is_empty() && !all {
        return Err(
            "No tables provided. Please provide table names or use --all flag.".to_string(),
        );
    }

    Ok(CliConfig {
        db_path,
        tables,
        all,
        json,
    })
}

fn report(cfg: &CliConfig, table: &str, outcome: ConfigureOutcome) {
    if cfg.json {
        let status = match outcome {
            ConfigureOutcome::Configured => "configured",
            ConfigureOutcome::Skipped => "skipped",
        };
        println!("{}", json!({ "table": table, "outcome": status }));
        return;
    }
    match outcome {
        ConfigureOutcome::Configured => {
            println!("Configured history for table: {table}");
        }
        ConfigureOutcome::Skipped => {
            println!(
                "History table {} already exists - skipping.",
                history_table_name(table)
            );
        }
    }
}

fn run(cfg: &CliConfig) -> Result<(), String> {
    if !cfg.db_path.exists() {
        return Err(format!(
            "Database file does not exist: {}",
            cfg.db_path.display()
        ));
    }

    let mut store = HistoryStore::open(&cfg.db_path).map_err(|err| err.to_string())?;
    let regular = store.regular_tables().map_err(|err| err.to_string())?;

    let tables = if cfg.all {
        regular
    } else {
        let missing = cfg
            .tables
            .iter()
            .filter(|table| !regular.contains(*table))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(format!(
                "The following tables do not exist: {}",
                missing.join(", ")
            ));
        }
        cfg.tables.clone()
    };

    for table in &tables {
        if is_history_table_name(table) {
            continue;
        }
        let outcome = store.configure(table).map_err(|err| err.to_string())?;
        report(cfg, table, outcome);
    }
    Ok(())
}

fn main() {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        print!("{}", usage());
        return;
    }

    let cfg = match parse_args(&args) {
        Ok(cfg) => cfg,
        Err(message) => {
            eprintln!("{message}");
            std::process::exit(2);
        }
    };

    if let Err(message) = run(&cfg) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}
