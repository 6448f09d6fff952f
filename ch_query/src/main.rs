use clap::Parser;
use clickhouse_fdw::execute::{ch_execute_inferred, explain};
use clickhouse_fdw::session::SessionOptions;
use common::config::ConnectionParams;
use common::tuple::{Schema, Tuple};
use common::{BridgeError, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wire_client::{AbortHandle, QueryRequest, WireClient};

/// Run one SQL statement against ClickHouse over the native protocol.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// SQL statement to run
    sql: String,

    /// TOML file with connection settings; flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(short, long)]
    database: Option<String>,

    /// Compress data blocks
    #[arg(long)]
    compression: bool,

    /// Read the next block on a background thread
    #[arg(long)]
    prefetch: bool,

    /// Print the server's plan for the statement instead of running it
    #[arg(long)]
    explain: bool,
}

impl Args {
    fn connection_params(&self) -> Result<ConnectionParams> {
        let mut params = match &self.config {
            Some(path) => ConnectionParams::load(path)?,
            None => ConnectionParams::default(),
        };
        if let Some(host) = &self.host {
            params.host = host.clone();
        }
        if let Some(port) = self.port {
            params.port = port;
        }
        if let Some(user) = &self.user {
            params.user = user.clone();
        }
        if let Some(password) = &self.password {
            params.password = password.clone();
        }
        if let Some(database) = &self.database {
            params.database = database.clone();
        }
        if self.compression {
            params.compression = true;
        }
        Ok(params)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let interrupt = Arc::new(Interrupt::default());
    let handler = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || handler.request()) {
        warn!(error = %e, "cannot install Ctrl-C handler");
    }
    match run(&args, &interrupt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let category = e.category();
            eprintln!("ERROR [{} {}]: {}", category.as_str(), category.sqlstate(), e);
            ExitCode::FAILURE
        }
    }
}

/// Ctrl-C state shared with the signal handler. A request also shuts down
/// the connection being read, so a wait for the next block ends at once.
#[derive(Default)]
struct Interrupt {
    requested: AtomicBool,
    connection: Mutex<Option<AbortHandle>>,
}

impl Interrupt {
    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        if let Ok(guard) = self.connection.lock() {
            if let Some(handle) = guard.as_ref() {
                handle.abort();
            }
        }
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn watch(&self, handle: AbortHandle) {
        if let Ok(mut guard) = self.connection.lock() {
            if self.is_requested() {
                handle.abort();
            }
            *guard = Some(handle);
        }
    }

    fn check(&self) -> Result<()> {
        if self.is_requested() {
            return Err(BridgeError::InvalidState("query interrupted".to_string()));
        }
        Ok(())
    }
}

fn run(args: &Args, interrupt: &Interrupt) -> Result<()> {
    let params = args.connection_params()?;
    info!(address = %params.address(), database = %params.database, "connecting");
    let client = WireClient::new(params);

    if args.explain {
        println!("Remote SQL: {}", args.sql);
        println!("Server: {}", client.params().address());
        for line in explain(&client, &args.sql)? {
            println!("{}", line);
        }
        return Ok(());
    }

    let options = SessionOptions {
        prefetch: args.prefetch,
    };
    let mut result = ch_execute_inferred(&client, QueryRequest::new(args.sql.as_str()), options)?;
    match result.abort_handle() {
        Ok(handle) => interrupt.watch(handle),
        Err(e) => debug!(error = %e, "no connection to watch"),
    }
    let schema = result.schema().clone();
    let mut rows = Vec::new();
    loop {
        interrupt.check()?;
        match result.next() {
            Some(Ok(row)) => rows.push(row),
            Some(Err(e)) => {
                // An aborted read surfaces as a stream error.
                interrupt.check()?;
                return Err(e);
            }
            None => break,
        }
    }
    // No result header: the statement ran to completion without rows.
    if schema.is_empty() {
        println!("OK");
    } else {
        print!("{}", render_table(&schema, &rows));
    }
    Ok(())
}

/// Renders rows as an aligned text table followed by a row count.
fn render_table(schema: &Schema, rows: &[Tuple]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.values.iter().map(|v| v.to_string()).collect())
        .collect();
    let mut widths: Vec<usize> = schema.columns.iter().map(|c| c.name.chars().count()).collect();
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |values: Vec<&str>| {
        values
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:<w$} ", v, w = *w))
            .collect::<Vec<_>>()
            .join("|")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(schema.columns.iter().map(|c| c.name.as_str()).collect()));
    out.push('\n');
    out.push_str(
        &widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+"),
    );
    out.push('\n');
    for row in &cells {
        out.push_str(&line(row.iter().map(|s| s.as_str()).collect()));
        out.push('\n');
    }
    let noun = if rows.len() == 1 { "row" } else { "rows" };
    out.push_str(&format!("({} {})\n", rows.len(), noun));
    out
}
