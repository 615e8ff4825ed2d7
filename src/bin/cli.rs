//! Binary entry point for the quadstore administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use quadstore::memory::load_snapshot;
use quadstore::storage::{TripleProperties, PROPERTIES_FILE};
use quadstore::{NativeStore, NativeStoreOptions, QuadPattern, ValueId};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "quadstore",
    version,
    about = "Administrative CLI for quadstore directories and snapshots",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "QUADSTORE_LOCK_TIMEOUT_MS",
        help = "Give up on lock waits after this many milliseconds"
    )]
    lock_timeout_ms: Option<u64>,

    #[arg(long, global = true, help = "Fsync files written by the command")]
    force_sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Summarise a disk store directory")]
    Info {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },

    #[command(about = "Match a quad pattern against a disk store")]
    Query(QueryCmd),

    #[command(about = "Change the index permutations of a disk store")]
    Reindex {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        #[arg(
            long,
            value_name = "SPEC",
            help = "Comma separated permutations, e.g. spoc,posc,opsc"
        )]
        indexes: String,
    },

    #[command(about = "Summarise a memory store snapshot file")]
    SnapshotInfo {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct QueryCmd {
    #[arg(value_name = "DIR")]
    dir: PathBuf,

    #[arg(long, short = 's', help = "Subject id")]
    subject: Option<u32>,

    #[arg(long, short = 'p', help = "Predicate id")]
    predicate: Option<u32>,

    #[arg(long, short = 'o', help = "Object id")]
    object: Option<u32>,

    #[arg(long, short = 'c', help = "Context id (0 is the default graph)")]
    context: Option<u32>,

    #[arg(long, help = "Only explicit (true) or only inferred (false) quads")]
    explicit: Option<bool>,

    #[arg(long, default_value_t = 100, help = "Maximum number of rows printed")]
    limit: usize,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Serialize)]
struct InfoReport {
    dir: String,
    schema_version: Option<u32>,
    indexes: String,
    statements: usize,
    contexts: usize,
    namespaces: Vec<(String, String)>,
}

#[derive(Serialize)]
struct QueryRow {
    subject: u32,
    predicate: u32,
    object: u32,
    context: u32,
    explicit: bool,
    terms: Option<[String; 4]>,
}

#[derive(Serialize)]
struct QueryReport {
    index: String,
    score: usize,
    ranged: bool,
    total: usize,
    rows: Vec<QueryRow>,
}

#[derive(Serialize)]
struct ReindexReport {
    before: Option<String>,
    after: String,
    statements: usize,
}

#[derive(Serialize)]
struct SnapshotReport {
    path: String,
    namespaces: usize,
    explicit: usize,
    inferred: usize,
    contexts: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("QUADSTORE_LOG"))
        .with_writer(std::io::stderr)
        .init();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Info { dir } => {
            let report = info(&dir, &cli.open)?;
            emit(&cli.format, &report, || print_info_text(&report))?;
        }
        Command::Query(cmd) => {
            let report = query(&cmd, &cli.open)?;
            emit(&cli.format, &report, || print_query_text(&report))?;
        }
        Command::Reindex { dir, indexes } => {
            let before = TripleProperties::load(&dir)?.triple_indexes;
            let store = open_existing(&dir, &cli.open, Some(&indexes))?;
            store.verify()?;
            let report = ReindexReport {
                before,
                after: store.index_spec()?,
                statements: store.size()?,
            };
            emit(&cli.format, &report, || {
                println!(
                    "Reindexed {} statements: {} -> {}",
                    report.statements,
                    report.before.as_deref().unwrap_or("(none)"),
                    report.after
                );
            })?;
        }
        Command::SnapshotInfo { path } => {
            if !path.is_file() {
                return Err(format!("{} is not a file", path.display()).into());
            }
            let snapshot = load_snapshot(&path)?;
            let mut contexts: Vec<_> = snapshot
                .statements
                .iter()
                .filter_map(|st| st.context.as_ref())
                .collect();
            contexts.sort();
            contexts.dedup();
            let report = SnapshotReport {
                path: path.display().to_string(),
                namespaces: snapshot.namespaces.len(),
                explicit: snapshot.explicit_count(),
                inferred: snapshot.inferred_count(),
                contexts: contexts.len(),
            };
            emit(&cli.format, &report, || {
                println!(
                    "Snapshot {}: explicit={} inferred={} contexts={} namespaces={}",
                    report.path, report.explicit, report.inferred, report.contexts, report.namespaces
                );
            })?;
        }
    }

    Ok(())
}

fn open_existing(
    dir: &Path,
    args: &OpenArgs,
    indexes: Option<&str>,
) -> Result<NativeStore, Box<dyn Error>> {
    if !dir.join(PROPERTIES_FILE).is_file() {
        return Err(format!("{} is not a quadstore directory", dir.display()).into());
    }
    let stored = TripleProperties::load(dir)?.triple_indexes;
    let mut options = NativeStoreOptions::new().force_sync(args.force_sync);
    if let Some(spec) = indexes.map(str::to_string).or(stored) {
        options = options.index_spec(spec);
    }
    if let Some(ms) = args.lock_timeout_ms {
        options = options.lock_timeout(Duration::from_millis(ms));
    }
    Ok(NativeStore::open(dir, options)?)
}

fn info(dir: &Path, args: &OpenArgs) -> Result<InfoReport, Box<dyn Error>> {
    let store = open_existing(dir, args, None)?;
    Ok(InfoReport {
        dir: dir.display().to_string(),
        schema_version: TripleProperties::load(dir)?.version,
        indexes: store.index_spec()?,
        statements: store.size()?,
        contexts: store.contexts()?.len(),
        namespaces: store
            .namespaces()?
            .into_iter()
            .map(|ns| (ns.prefix, ns.name))
            .collect(),
    })
}

fn query(cmd: &QueryCmd, args: &OpenArgs) -> Result<QueryReport, Box<dyn Error>> {
    let store = open_existing(&cmd.dir, args, None)?;
    let mut pattern = QuadPattern::any();
    if let Some(id) = cmd.subject {
        pattern = pattern.subject(id);
    }
    if let Some(id) = cmd.predicate {
        pattern = pattern.predicate(id);
    }
    if let Some(id) = cmd.object {
        pattern = pattern.object(id);
    }
    if let Some(id) = cmd.context {
        pattern = pattern.context(id);
    }
    if let Some(explicit) = cmd.explicit {
        pattern = pattern.with_explicit(explicit);
    }

    let orders = store.index_spec()?;
    let mut iter = store.query(pattern)?;
    let plan = iter.plan();
    let mut records = Vec::new();
    let mut total = 0;
    for record in iter.by_ref() {
        total += 1;
        if records.len() < cmd.limit {
            records.push(record);
        }
    }
    iter.close();

    let mut rows = Vec::with_capacity(records.len());
    for record in records {
        let quad = record.quad;
        let term = |id: ValueId| -> Result<Option<String>, Box<dyn Error>> {
            if id.is_null() {
                return Ok(Some(String::new()));
            }
            Ok(store.term(id)?.map(|t| t.to_string()))
        };
        let terms = match (
            term(quad.subject)?,
            term(quad.predicate)?,
            term(quad.object)?,
            term(quad.context)?,
        ) {
            (Some(s), Some(p), Some(o), Some(c)) => Some([s, p, o, c]),
            _ => None,
        };
        rows.push(QueryRow {
            subject: quad.subject.0,
            predicate: quad.predicate.0,
            object: quad.object.0,
            context: quad.context.0,
            explicit: record.explicit,
            terms,
        });
    }
    let index = orders
        .split(',')
        .nth(plan.index)
        .unwrap_or_default()
        .to_string();
    Ok(QueryReport {
        index,
        score: plan.score,
        ranged: plan.ranged,
        total,
        rows,
    })
}

fn emit<T, F>(format: &OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_info_text(report: &InfoReport) {
    println!("Store: {}", report.dir);
    println!(
        "  schema_version={} indexes={}",
        report
            .schema_version
            .map_or_else(|| "unknown".to_string(), |v| v.to_string()),
        report.indexes
    );
    println!(
        "  statements={} contexts={}",
        report.statements, report.contexts
    );
    for (prefix, name) in &report.namespaces {
        println!("  @prefix {prefix}: <{name}>");
    }
}

fn print_query_text(report: &QueryReport) {
    println!(
        "Plan: index={} score={} ranged={}",
        report.index, report.score, report.ranged
    );
    for row in &report.rows {
        let flag = if row.explicit { "" } else { " (inferred)" };
        match &row.terms {
            Some([s, p, o, c]) if c.is_empty() => println!("{s} {p} {o} .{flag}"),
            Some([s, p, o, c]) => println!("{s} {p} {o} {c} .{flag}"),
            None => println!(
                "{} {} {} {}{flag}",
                row.subject, row.predicate, row.object, row.context
            ),
        }
    }
    println!("{} matching quads", report.total);
}
