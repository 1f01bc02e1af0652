//! Rendition selection
//!
//! The selector is a pure function of the bandwidth estimate, the playback
//! surface and the exclusion state of each rendition. The engine re-runs it
//! after every bandwidth sample and after every exclusion.

use crate::types::{Rendition, Resolution};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Lowest estimate the engine ever holds; set after a chunk timeout
pub const MIN_BANDWIDTH: f64 = 1.0;

/// ABR algorithm trait
pub trait AbrAlgorithm: Send + Sync {
    /// Select the best rendition given current conditions.
    ///
    /// `renditions` must be sorted by ascending declared bandwidth.
    fn select_rendition<'a>(
        &self,
        renditions: &'a [Rendition],
        context: &AbrContext,
    ) -> Option<&'a Rendition>;

    /// Get algorithm name
    fn name(&self) -> &'static str;
}

/// Context for ABR decisions
#[derive(Debug, Clone, Copy)]
pub struct AbrContext {
    /// Current bandwidth estimate in bits per second
    pub bandwidth: f64,
    /// Size of the playback surface, if known
    pub surface: Option<Resolution>,
    /// Reference instant for exclusion checks
    pub now: Instant,
}

/// Most recent throughput sample.
///
/// Samples replace each other rather than being averaged, so one slow chunk
/// moves the next decision immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandwidthEstimate {
    bits_per_second: f64,
}

impl BandwidthEstimate {
    pub fn new(initial: Option<f64>) -> Self {
        Self {
            bits_per_second: initial.unwrap_or(0.0),
        }
    }

    pub fn bits_per_second(&self) -> f64 {
        self.bits_per_second
    }

    /// Replace the estimate with a measured sample
    pub fn record(&mut self, sample: f64) {
        if sample.is_finite() && sample >= 0.0 {
            self.bits_per_second = sample;
        }
    }

    /// Severe congestion signal
    pub fn drop_to_minimum(&mut self) {
        self.bits_per_second = MIN_BANDWIDTH;
    }

    /// Throughput in bits per second for `bytes` transferred over `elapsed`
    pub fn throughput(bytes: usize, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            bytes as f64 * 8.0 / secs
        } else {
            f64::INFINITY
        }
    }
}

/// Bandwidth-first selector with resolution capping.
///
/// A rendition is bandwidth-eligible when its declared bitrate, scaled by the
/// variance margin, is strictly below the estimate. Among the eligible set the
/// playback surface then narrows the choice: an exact pixel match wins, then
/// the smallest rendition larger than the surface, then the largest one that
/// fits inside it.
pub struct VarianceSelector {
    variance: f64,
}

impl VarianceSelector {
    pub fn new(variance: f64) -> Self {
        Self { variance }
    }

    fn pick_by_resolution<'a>(
        eligible: &[&'a Rendition],
        surface: Resolution,
    ) -> Option<&'a Rendition> {
        let mut by_width: Vec<&Rendition> = eligible.to_vec();
        by_width.sort_by_key(|r| {
            (
                r.resolution.map(|res| res.width).unwrap_or(u32::MAX),
                r.bandwidth.unwrap_or(0),
            )
        });

        let mut best_fit: Option<&Rendition> = None;
        let mut plus_one: Option<&Rendition> = None;

        for rendition in by_width.iter().rev().copied() {
            let Some(res) = rendition.resolution else {
                continue;
            };
            if res == surface {
                plus_one = None;
                best_fit = Some(rendition);
                break;
            }
            if res.fits_within(&surface) {
                best_fit = Some(rendition);
                break;
            }
            if res.width <= surface.width || res.height <= surface.height {
                continue;
            }
            let smaller = match plus_one.and_then(|p| p.resolution) {
                Some(current) => res.width < current.width && res.height < current.height,
                None => true,
            };
            if smaller {
                plus_one = Some(rendition);
            }
        }

        plus_one.or(best_fit)
    }
}

impl Default for VarianceSelector {
    fn default() -> Self {
        Self::new(1.2)
    }
}

impl AbrAlgorithm for VarianceSelector {
    #[instrument(skip(self, renditions))]
    fn select_rendition<'a>(
        &self,
        renditions: &'a [Rendition],
        context: &AbrContext,
    ) -> Option<&'a Rendition> {
        let available: Vec<&Rendition> = renditions
            .iter()
            .filter(|r| !r.is_excluded(context.now))
            .collect();
        let lowest = *available.first()?;

        let eligible: Vec<&Rendition> = available
            .iter()
            .copied()
            .filter(|r| {
                r.effective_bitrate(self.variance)
                    .is_some_and(|bitrate| bitrate < context.bandwidth)
            })
            .collect();

        let mut bandwidth_best: Option<&Rendition> = None;
        for rendition in eligible.iter().copied() {
            let higher = match bandwidth_best {
                Some(best) => rendition.bandwidth > best.bandwidth,
                None => true,
            };
            if higher {
                bandwidth_best = Some(rendition);
            }
        }

        let by_resolution = context
            .surface
            .and_then(|surface| Self::pick_by_resolution(&eligible, surface));

        let selected = by_resolution.or(bandwidth_best).unwrap_or(lowest);

        debug!(
            selected_id = %selected.id,
            bandwidth = ?selected.bandwidth,
            resolution = ?selected.resolution,
            eligible = eligible.len(),
            "Rendition selected"
        );

        Some(selected)
    }

    fn name(&self) -> &'static str {
        "variance"
    }
}
