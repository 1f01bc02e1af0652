//! CLI command implementations

use crate::output::{self, RenditionRow, SessionSummary};
use crate::simulate::{self, SimulationOptions};
use anyhow::{bail, Context};
use ladder_core::{
    AbrAlgorithm, AbrContext, EngineConfig, MasterPlaylist, PlayerSession, Rendition,
    Resolution, SessionPhase, VarianceSelector,
};
use serde::Deserialize;
use std::path::Path;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{info, warn};

/// Ladder files list renditions either bare or under a `renditions` key
#[derive(Deserialize)]
#[serde(untagged)]
enum LadderFile {
    Master { renditions: Vec<Rendition> },
    List(Vec<Rendition>),
}

/// Read a rendition ladder from a JSON file
pub fn load_ladder(path: &Path) -> anyhow::Result<MasterPlaylist> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading ladder {}", path.display()))?;
    let renditions = match serde_json::from_str::<LadderFile>(&text)
        .with_context(|| format!("parsing ladder {}", path.display()))?
    {
        LadderFile::Master { renditions } | LadderFile::List(renditions) => renditions,
    };
    if renditions.is_empty() {
        bail!("ladder {} lists no renditions", path.display());
    }
    Ok(MasterPlaylist::new(renditions))
}

/// Parse `WIDTHxHEIGHT`
pub fn parse_surface(s: &str) -> anyhow::Result<Resolution> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .with_context(|| format!("surface '{}' is not WIDTHxHEIGHT", s))?;
    Ok(Resolution::new(
        width.trim().parse().context("surface width")?,
        height.trim().parse().context("surface height")?,
    ))
}

/// Show which rendition the selector picks
pub fn select(
    ladder: &Path,
    bandwidth: f64,
    surface: Option<&str>,
    variance: f64,
    format: &str,
) -> anyhow::Result<()> {
    let master = load_ladder(ladder)?;
    let surface = surface.map(parse_surface).transpose()?;

    let selector = VarianceSelector::new(variance);
    let context = AbrContext {
        bandwidth,
        surface,
        now: Instant::now(),
    };
    let selected = selector
        .select_rendition(&master.renditions, &context)
        .map(|r| r.id.clone());

    info!(
        renditions = master.renditions.len(),
        bandwidth,
        surface = ?surface,
        selected = ?selected,
        "Selection preview"
    );

    let rows = RenditionRow::rows(&master, variance, &context, selected.as_deref());
    output::print_selection(&rows, format)
}

/// Run a streaming session against the simulated network
pub async fn simulate(
    ladder: &Path,
    config: Option<&Path>,
    options: SimulationOptions,
    format: &str,
) -> anyhow::Result<()> {
    let master = load_ladder(ladder)?;
    let config = match config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&text)?
        }
        None => EngineConfig::default(),
    };
    for id in &options.failing {
        if master.get(id).is_none() {
            warn!(rendition = %id, "Failing rendition is not in the ladder");
        }
    }

    let timeout = options.timeout;
    let simulation = simulate::build(master, &options);
    let session = PlayerSession::spawn(config, simulation.collaborators)?;
    let mut events = session.subscribe_events();
    let mut phase = session.subscribe_phase();
    let mut summary = SessionSummary::default();

    info!(
        session_id = %session.id(),
        throughput = options.throughput,
        live = options.live,
        "Starting simulation"
    );
    session.load_master(simulation.master).await?;
    session.play().await?;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(record) => {
                    summary.record(&record.event);
                    output::print_event(&record, format)?;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
                Err(RecvError::Closed) => break,
            },
            changed = phase.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = phase.borrow_and_update().clone();
                if matches!(current, SessionPhase::Ended | SessionPhase::Failed) {
                    break;
                }
            },
            _ = &mut deadline => {
                warn!(timeout_secs = timeout.as_secs(), "Simulation timed out");
                break;
            }
        }
    }

    // Events emitted alongside the final phase change
    while let Ok(record) = events.try_recv() {
        summary.record(&record.event);
        output::print_event(&record, format)?;
    }

    let failed = session.phase() == SessionPhase::Failed;
    session.stop().await?;
    summary.print(format)?;

    if failed {
        bail!("session failed");
    }
    Ok(())
}
