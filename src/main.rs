use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use graphlens::db::{
    introspect, test_connection, ConnectionStore, QueryError, Settings, PASSWORD_ENV,
};
use graphlens::engine::Engine;
use graphlens::export;
use std::io::Read;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// The CLI drives a single session.
const SESSION_ID: &str = "cli";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
    Tsv,
}

/// Run a graph query against Neo4j or PostgreSQL AGE
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Query text. Read from stdin when omitted.
    query: Option<String>,

    /// Connections file (defaults to $GRAPHLENS_CONNECTIONS or the user config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Saved connection to use, by name
    #[arg(long = "connect")]
    connect: Option<String>,

    /// Query timeout in milliseconds (0 uses the configured default)
    #[arg(long, default_value_t = 0)]
    timeout: u64,

    /// Wrap the query in AGE's cypher() call
    #[arg(long)]
    passthrough: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Print labels, relationship types and property keys instead of running a query
    #[arg(long)]
    schema: bool,

    /// Only check that the connection works
    #[arg(long)]
    test: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = cli.config.clone().unwrap_or_else(Settings::get_config_path);
    let mut settings = Settings::load(&path)?;
    let name = pick_connection(&cli, &settings)?;

    let saved = settings
        .connections
        .iter_mut()
        .find(|c| c.name.eq_ignore_ascii_case(&name))
        .with_context(|| format!("no saved connection named {:?}", name))?;
    resolve_password(&mut saved.descriptor)?;
    let descriptor = saved.descriptor.clone();

    let engine = Engine::new(settings.engine.clone());
    let store = ConnectionStore::new(settings.connections);
    let active = store
        .find_by_name(SESSION_ID, &name)
        .context("connection vanished from the store")?;
    store.set_active(SESSION_ID, active.id);

    if cli.test {
        return report(test_connection(&descriptor, engine.config()).await.map(|_| {
            println!("OK: {}", descriptor.display_string());
        }));
    }

    if cli.schema {
        return report(introspect(&descriptor, engine.config()).await.map(|schema| {
            println!(
                "{}",
                serde_json::to_string_pretty(&schema).unwrap_or_default()
            );
        }));
    }

    let query = match cli.query {
        Some(q) => q,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read query from stdin")?;
            buf
        }
    };
    if query.trim().is_empty() {
        bail!("empty query");
    }

    let run = engine.execute_for_session(&store, &query, cli.timeout, SESSION_ID, cli.passthrough);
    tokio::pin!(run);
    let outcome = tokio::select! {
        res = &mut run => res,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Cancelling...");
            if !engine.cancel(SESSION_ID).await {
                eprintln!("Could not issue cancellation");
            }
            run.await
        }
    };

    report(outcome.map(|result| {
        let rendered = match cli.format {
            OutputFormat::Table => export::to_table(&result),
            OutputFormat::Json => export::to_json(&result),
            OutputFormat::Csv => export::to_csv(&result),
            OutputFormat::Tsv => export::to_tsv(&result),
        };
        print!("{}", rendered);
    }))
}

/// The connection named on the command line, or the only one configured.
fn pick_connection(cli: &Cli, settings: &Settings) -> Result<String> {
    if let Some(name) = &cli.connect {
        if settings.find(name).is_none() {
            eprintln!("Saved connections:");
            for c in &settings.connections {
                eprintln!("  - {} ({})", c.name, c.descriptor.kind());
            }
            bail!("no saved connection named {:?}", name);
        }
        return Ok(name.clone());
    }
    match settings.connections.as_slice() {
        [only] => Ok(only.name.clone()),
        [] => bail!("no connections configured"),
        _ => bail!("several connections configured, pick one with --connect"),
    }
}

/// Fill in a password left out of the connections file: environment first,
/// then an interactive prompt.
fn resolve_password(descriptor: &mut graphlens::db::ConnectionDescriptor) -> Result<()> {
    let prompt = format!("Password for {}: ", descriptor.display_string());
    let password = descriptor.password_mut();
    if !password.is_empty() {
        return Ok(());
    }
    *password = match std::env::var(PASSWORD_ENV) {
        Ok(pw) => pw,
        Err(_) => rpassword::read_password_from_tty(Some(&prompt))?,
    };
    Ok(())
}

fn report(outcome: Result<(), QueryError>) -> Result<()> {
    if let Err(e) = outcome {
        eprintln!("Error: {}", e.display_full());
        std::process::exit(1);
    }
    Ok(())
}
