//! Waymark - replay a page scenario through the map bridge.
//!
//! Builds the page described by a fixture file, injects the bridge and runs
//! it against the fixture's timeline. Outbound bridge messages go to stdout
//! as JSON lines; inbound messages (`DATA_UPDATE`, `BRIDGE_ENABLE`) are read
//! from stdin the same way. Logs go to stderr.

mod driver;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use waymark_core::{BridgeSettings, PageFixture, SiteConfigTable};

use driver::Scenario;

/// Time left after the last scripted action when no duration is given.
const SETTLE_AFTER_LAST_ACTION: Duration = Duration::from_secs(5);

const STDIN_GRACE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(name = "waymark")]
#[command(about = "Replay a page fixture through the waymark map bridge")]
struct Args {
    /// Page fixture (JSON)
    fixture: PathBuf,

    /// Bridge settings (JSON); omitted fields keep their defaults
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Per-site configuration table (JSON)
    #[arg(long)]
    sites: Option<PathBuf>,

    /// How long to run, in milliseconds
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Do not read inbound messages from stdin
    #[arg(long)]
    no_input: bool,

    /// Print a JSON summary of managed instances to stderr on exit
    #[arg(long)]
    summary: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_logging(args: &Args) {
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if args.log_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_scenario(args: &Args) -> Result<Scenario> {
    let fixture = PageFixture::from_json_file(&args.fixture)
        .with_context(|| format!("Failed to load fixture {}", args.fixture.display()))?;
    let settings = match &args.settings {
        Some(path) => BridgeSettings::from_json_file(path)
            .with_context(|| format!("Failed to load settings {}", path.display()))?,
        None => BridgeSettings::default(),
    };
    let sites = match &args.sites {
        Some(path) => SiteConfigTable::from_json_file(path)
            .with_context(|| format!("Failed to load sites {}", path.display()))?,
        None => SiteConfigTable::default(),
    };

    let timeline = fixture.timeline();
    let duration = match args.duration_ms {
        Some(ms) => Duration::from_millis(ms),
        None => {
            let last = timeline.last().map(|step| step.at_ms).unwrap_or(0);
            Duration::from_millis(last) + SETTLE_AFTER_LAST_ACTION
        }
    };

    Ok(Scenario {
        page: fixture.build().context("Failed to build page")?,
        timeline,
        settings,
        sites,
        duration,
    })
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let scenario = load_scenario(&args)?;
    info!(
        "Replaying {} ({} actions over {}ms)",
        args.fixture.display(),
        scenario.timeline.len(),
        scenario.duration.as_millis()
    );

    // The bridge holds `Rc` state, so it stays on one thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;
    let result = runtime.block_on(async {
        let input = (!args.no_input).then(|| BufReader::new(tokio::io::stdin()));
        driver::run(scenario, input, tokio::io::stdout()).await
    });
    // A pending stdin read would otherwise hold shutdown open.
    runtime.shutdown_timeout(STDIN_GRACE);
    let summary = result?;

    info!(
        "Done: {} messages out, {} in, {} actions, {} instances",
        summary.messages,
        summary.inbound,
        summary.actions,
        summary.instances.len()
    );
    if args.summary {
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}
