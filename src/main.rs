use anyhow::Context;
use clap::Parser;
use consent_relay::{
    CdpSdk, DataLayer, FileStore, FixedGeometry, KeyValueStore, MemoryStore, Page, RecordingCdp,
    Relay, RelayConfig, RelayContext, RuntimeClock, Scenario, ScenarioReport, Sinks, scenario,
};
use std::path::PathBuf;
use std::rc::Rc;
use tracing_subscriber::EnvFilter;

const DURABLE_STORE_FILE: &str = "local.json";

/// Replays a scripted visit against a landing page and prints what the
/// analytics relay emitted.
#[derive(Parser, Debug)]
#[command(name = "consent-relay")]
#[command(version)]
#[command(about = "Consent-gated analytics relay replay", long_about = None)]
struct Cli {
    /// HTML page to load
    #[arg(long)]
    page: PathBuf,

    /// TOML scenario of layout rects and user steps
    #[arg(long)]
    scenario: PathBuf,

    /// Directory for the durable store; consent and user id survive runs
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Run without a CDP client (data layer only)
    #[arg(long)]
    no_cdp: bool,

    /// Wait in wall-clock time instead of replaying timers instantly
    #[arg(long)]
    realtime: bool,

    /// TOML relay config; RELAY_* environment variables otherwise
    #[arg(long)]
    config: Option<PathBuf>,

    /// Include the final page HTML in the report
    #[arg(long)]
    print_html: bool,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RelayConfig::from_toml_file(path)?,
        None => RelayConfig::from_env()?,
    };
    if cli.storage_dir.is_some() {
        config.storage_dir = cli.storage_dir.clone();
    }
    if cli.no_cdp {
        config.cdp_enabled = false;
    }

    let html = std::fs::read_to_string(&cli.page)
        .with_context(|| format!("reading page {:?}", cli.page))?;
    let script = Scenario::from_file(&cli.scenario)
        .with_context(|| format!("loading scenario {:?}", cli.scenario))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(!cli.realtime)
        .build()
        .context("failed to build runtime")?;
    let local = tokio::task::LocalSet::new();
    let report = local.block_on(&runtime, replay(config, html, script, cli.print_html))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn replay(
    config: RelayConfig,
    html: String,
    script: Scenario,
    print_html: bool,
) -> anyhow::Result<ScenarioReport> {
    let durable: Rc<dyn KeyValueStore> = match &config.storage_dir {
        Some(dir) => {
            let path = dir.join(DURABLE_STORE_FILE);
            let store = FileStore::open(&path)
                .with_context(|| format!("opening durable store {:?}", path))?;
            tracing::info!(path = %store.path().display(), "using file-backed durable store");
            Rc::new(store)
        }
        None => Rc::new(MemoryStore::new()),
    };
    let cdp = config.cdp_enabled.then(|| Rc::new(RecordingCdp::new()));
    let sinks = Sinks::new(
        DataLayer::new(),
        cdp.clone().map(|c| c as Rc<dyn CdpSdk>),
    );
    let geometry = Rc::new(FixedGeometry::new(config.viewport));

    let relay = Relay::new(RelayContext {
        page: Page::parse(&html),
        geometry: geometry.clone(),
        durable,
        session: Rc::new(MemoryStore::new()),
        sinks,
        clock: Rc::new(RuntimeClock::new()),
        config,
    });

    scenario::run(&relay, &geometry, &script).await?;
    Ok(ScenarioReport::collect(&relay, cdp.as_deref(), print_html))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
