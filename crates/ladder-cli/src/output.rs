//! Output formatting for CLI

use ladder_core::{AbrContext, MasterPlaylist, StreamEvent, StreamEventRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use tabled::{Table, Tabled};

/// Output format options
pub enum OutputFormat {
    Text,
    Json,
    Table,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "table" => OutputFormat::Table,
            _ => OutputFormat::Text,
        }
    }
}

/// One line of the selection preview
#[derive(Debug, Serialize, Tabled)]
pub struct RenditionRow {
    #[tabled(rename = "")]
    #[serde(skip)]
    pub marker: &'static str,
    pub id: String,
    pub bandwidth: String,
    pub resolution: String,
    /// Bitrate after the variance margin
    pub effective: String,
    pub excluded: bool,
    pub selected: bool,
}

impl RenditionRow {
    pub fn rows(
        master: &MasterPlaylist,
        variance: f64,
        context: &AbrContext,
        selected: Option<&str>,
    ) -> Vec<Self> {
        master
            .renditions
            .iter()
            .map(|r| {
                let is_selected = selected == Some(r.id.as_str());
                RenditionRow {
                    marker: if is_selected { "*" } else { "" },
                    id: r.id.clone(),
                    bandwidth: r.bandwidth.map(|b| b.to_string()).unwrap_or_else(|| "-".into()),
                    resolution: r
                        .resolution
                        .map(|res| format!("{} ({})", res, res.quality_name()))
                        .unwrap_or_else(|| "-".into()),
                    effective: r
                        .effective_bitrate(variance)
                        .map(|b| format!("{:.0}", b))
                        .unwrap_or_else(|| "-".into()),
                    excluded: r.is_excluded(context.now),
                    selected: is_selected,
                }
            })
            .collect()
    }
}

/// Print the selection preview
pub fn print_selection(rows: &[RenditionRow], format: &str) -> anyhow::Result<()> {
    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Table | OutputFormat::Text => println!("{}", Table::new(rows)),
    }
    Ok(())
}

/// Print one stream event as it happens
pub fn print_event(record: &StreamEventRecord, format: &str) -> anyhow::Result<()> {
    match OutputFormat::from(format) {
        OutputFormat::Json => println!("{}", serde_json::to_string(record)?),
        OutputFormat::Table | OutputFormat::Text => {
            println!("{:>5}  {}", record.sequence, describe(&record.event))
        }
    }
    Ok(())
}

fn describe(event: &StreamEvent) -> String {
    match event {
        StreamEvent::MetadataLoaded { renditions, is_live, duration } => format!(
            "metadata       {} renditions, live={}, duration={}",
            renditions,
            is_live,
            duration.map(|d| format!("{:.1}s", d)).unwrap_or_else(|| "-".into())
        ),
        StreamEvent::RenditionSwitch { from, to, reason } => format!(
            "switch         {} -> {} ({:?})",
            from.as_deref().unwrap_or("-"),
            to,
            reason
        ),
        StreamEvent::ChunkRequested { rendition, sequence, .. } => {
            format!("request        {} #{}", rendition, sequence)
        }
        StreamEvent::ChunkAppended { rendition, sequence, end } => format!(
            "append         {} #{} end={}",
            rendition,
            sequence,
            end.map(|e| format!("{:.2}", e)).unwrap_or_else(|| "-".into())
        ),
        StreamEvent::BandwidthSample { bits_per_second } => {
            format!("bandwidth      {:.0} bps", bits_per_second)
        }
        StreamEvent::RenditionExcluded { rendition, code, window_ms } => {
            format!("exclude        {} [{}] for {} ms", rendition, code, window_ms)
        }
        StreamEvent::KeyFailed { uri, retries, permanent } => format!(
            "key failed     {} after {} tries{}",
            uri,
            retries,
            if *permanent { " (permanent)" } else { "" }
        ),
        StreamEvent::EndOfStream { reason } => {
            format!("end of stream  {}", reason.as_deref().unwrap_or("complete"))
        }
        StreamEvent::PhaseChange { from, to } => format!("phase          {} -> {}", from, to),
        StreamEvent::Error { code, message, fatal } => format!(
            "{}          [{}] {}",
            if *fatal { "FATAL" } else { "error" },
            code,
            message
        ),
    }
}

/// Per-rendition tally of a simulated session
#[derive(Debug, Default, Serialize, Tabled)]
pub struct RenditionTally {
    pub rendition: String,
    pub requested: usize,
    pub appended: usize,
    pub excluded: usize,
}

/// Accumulates events into per-rendition tallies
#[derive(Debug, Default)]
pub struct SessionSummary {
    tallies: BTreeMap<String, RenditionTally>,
    switches: usize,
    outcome: Option<String>,
}

impl SessionSummary {
    pub fn record(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::ChunkRequested { rendition, .. } => self.tally(rendition).requested += 1,
            StreamEvent::ChunkAppended { rendition, .. } => self.tally(rendition).appended += 1,
            StreamEvent::RenditionExcluded { rendition, .. } => self.tally(rendition).excluded += 1,
            StreamEvent::RenditionSwitch { .. } => self.switches += 1,
            StreamEvent::EndOfStream { reason } => {
                self.outcome = Some(reason.clone().unwrap_or_else(|| "complete".into()))
            }
            _ => {}
        }
    }

    fn tally(&mut self, rendition: &str) -> &mut RenditionTally {
        self.tallies
            .entry(rendition.to_string())
            .or_insert_with(|| RenditionTally {
                rendition: rendition.to_string(),
                ..Default::default()
            })
    }

    pub fn print(&self, format: &str) -> anyhow::Result<()> {
        let tallies: Vec<_> = self.tallies.values().collect();
        match OutputFormat::from(format) {
            OutputFormat::Json => {
                let summary = serde_json::json!({
                    "renditions": tallies,
                    "switches": self.switches,
                    "outcome": self.outcome,
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            OutputFormat::Table | OutputFormat::Text => {
                println!();
                println!("{}", Table::new(tallies));
                println!("Switches: {}", self.switches);
                println!(
                    "Outcome: {}",
                    self.outcome.as_deref().unwrap_or("still streaming")
                );
            }
        }
        Ok(())
    }
}
