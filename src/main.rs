//! Minimal command-line harness: opens an index and exercises post/query.
//!
//! This is a smoke-test surface, not a full operator CLI — driving the
//! index over a real protocol front-end is out of scope here.

use clap::Parser;
use uds_index::{Config, Request, RequestKind, RecordName, Session};

/// Open a deduplication index and run a single post/query pair against it.
#[derive(Parser, Debug)]
#[command(name = "uds-index", version, about)]
struct Args {
    /// Path to a TOML configuration file. Defaults are used if omitted.
    #[arg(long)]
    config: Option<String>,

    /// Path to the backing volume file, overriding the configuration.
    #[arg(long)]
    data_path: Option<String>,
}

fn main() -> uds_index::Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(path) = args.data_path {
        config.volume.data_path = path.into();
    }

    uds_index::logging::init(&config.logging);

    let mut session = Session::create_session(config)?;
    session.open_index()?;

    let name = RecordName::new(*b"uds-index-smoke!");
    let mut post = Request::new(name, RequestKind::Post).with_metadata([0xAB; 16]);
    session.launch_request(&mut post)?;

    let mut query = Request::new(name, RequestKind::Query);
    session.launch_request(&mut query)?;
    tracing::info!(found = query.found, "smoke test query completed");

    session.close_index()?;
    Ok(())
}
