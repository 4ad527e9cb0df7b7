use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pagerunner::chrome::BrowserSession;
use pagerunner::types::{ActionKind, Scenario, MIN_EXTRACT_RESULTS};
use pagerunner::Runner;

/// Run a declarative action scenario against a live Chrome page.
#[derive(Parser)]
#[command(name = "pagerunner", version)]
struct Cli {
    /// Scenario JSON file: { "name", "url", "actions": [...] }
    scenario: PathBuf,

    /// Run with a visible browser window
    #[arg(long)]
    headed: bool,

    /// Directory failure screenshots are written to
    #[arg(long, default_value = ".")]
    screenshot_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let raw = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("reading {}", cli.scenario.display()))?;
    let scenario = Scenario::from_json(&raw)?;
    info!(
        name = %scenario.name,
        url = %scenario.url,
        steps = scenario.actions.len(),
        "loaded scenario"
    );

    let headless = !cli.headed;
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(headless))
        .await
        .map_err(|err| anyhow::anyhow!("browser launch panicked: {err}"))??;

    let runner = Runner::new().screenshot_dir(&cli.screenshot_dir);
    let page = session.page();
    let result = runner.run_scenario(&page, &scenario).await?;

    for text in &result.extracted {
        info!(text = %text, "extracted");
    }
    let wants_extract = scenario
        .actions
        .actions()
        .iter()
        .any(|action| action.kind() == ActionKind::Extract);
    if wants_extract && result.extracted.len() < MIN_EXTRACT_RESULTS {
        warn!(
            count = result.extracted.len(),
            expected = MIN_EXTRACT_RESULTS,
            "fewer results than expected"
        );
    }

    result.into_result()?;
    info!("scenario passed");
    Ok(())
}
