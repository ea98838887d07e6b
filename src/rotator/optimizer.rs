//! Azimuth route planning for rotators with more than a full turn of travel.
//!
//! Raw look angles are always 0–360°. A rotator with 450° of travel can reach
//! most azimuths two ways, and picking the wrong one means a full-speed sweep
//! across the mechanical stop while the satellite is overhead.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use strum_macros::Display;

use super::RotatorLimits;
use crate::predict::{Ephemeris, PredictError};

const PRE_POSITION_TOLERANCE_DEG: f64 = 10.0;
const CHARACTERISTICS_SCAN: Duration = Duration::from_secs(90 * 60);
const CHARACTERISTICS_STEP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AzElSample {
    pub time: DateTime<Utc>,
    pub azimuth_deg: f64,
    pub elevation_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum Strategy {
    /// Start at the first raw azimuth.
    Forward,
    /// Start a full turn ahead of the first raw azimuth.
    Extended,
    /// Start forward, then move the post-crossing half of the pass into the
    /// over-travel region.
    SmartExtended,
}

impl Strategy {
    pub fn is_extended(self) -> bool {
        matches!(self, Strategy::Extended | Strategy::SmartExtended)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyScore {
    pub strategy: Strategy,
    pub start_az: f64,
    pub total_rotation: f64,
    pub total_with_pre_rotation: Option<f64>,
    /// Resolved azimuths, only for strategies that fix them up front.
    #[serde(skip)]
    resolved: Option<Vec<f64>>,
}

impl StrategyScore {
    fn cost(&self) -> f64 {
        self.total_with_pre_rotation.unwrap_or(self.total_rotation)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSegment {
    pub time: DateTime<Utc>,
    pub target_az: f64,
    pub elevation: f64,
    pub rotation_distance: f64,
    pub cumulative_rotation: f64,
}

/// Resolved route for one visible pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassPlan {
    pub strategy: Option<Strategy>,
    pub start_az: Option<f64>,
    pub total_rotation: f64,
    pub crosses_north: bool,
    pub segments: Vec<RouteSegment>,
    pub strategies_tested: Vec<StrategyScore>,
    /// Rotation saved against the worst strategy tested.
    pub savings: f64,
}

impl PassPlan {
    fn empty() -> Self {
        Self {
            strategy: None,
            start_az: None,
            total_rotation: 0.0,
            crosses_north: false,
            segments: Vec::new(),
            strategies_tested: Vec::new(),
            savings: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassCharacteristics {
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub duration_min: f64,
    pub max_elevation_deg: f64,
    pub azimuth_span_deg: f64,
    pub crosses_north: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionParameters {
    pub window: Duration,
    pub interval: Duration,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrePositioning {
    pub should_preposition: bool,
    pub recommended_az: Option<f64>,
    pub reason: String,
}

pub struct RouteOptimizer {
    limits: RotatorLimits,
    min_elevation_deg: f64,
}

impl RouteOptimizer {
    pub fn new(limits: RotatorLimits, min_elevation_deg: f64) -> Self {
        Self {
            limits,
            min_elevation_deg,
        }
    }

    pub fn normalize(azimuth_deg: f64) -> f64 {
        azimuth_deg.rem_euclid(360.0)
    }

    /// Shortest move from `from_az` to any reachable equivalent of `to_az`.
    ///
    /// Returns `(distance, resolved_target)`.
    pub fn rotation_distance(&self, from_az: f64, to_az: f64) -> (f64, f64) {
        let mut best = ((to_az - from_az).abs(), to_az);
        for candidate in [to_az + 360.0, to_az - 360.0] {
            if candidate < self.limits.az_min || candidate > self.limits.az_max {
                continue;
            }
            let distance = (candidate - from_az).abs();
            if distance < best.0 {
                best = (distance, candidate);
            }
        }
        best
    }

    pub fn best_azimuth(&self, current_az: f64, target_az: f64) -> f64 {
        self.rotation_distance(current_az, target_az).1
    }

    pub fn filter_visible(&self, samples: &[AzElSample]) -> Vec<AzElSample> {
        samples
            .iter()
            .filter(|s| s.elevation_deg >= self.min_elevation_deg)
            .copied()
            .collect()
    }

    /// Samples the ephemeris every `interval` over `window` starting at `from`.
    pub fn predict_positions(
        &self,
        ephemeris: &dyn Ephemeris,
        from: DateTime<Utc>,
        window: Duration,
        interval: Duration,
    ) -> Result<Vec<AzElSample>, PredictError> {
        let step = interval.as_millis().max(1) as i64;
        let steps = window.as_millis() as i64 / step;
        (0..steps)
            .map(|i| {
                let time = from + chrono::Duration::milliseconds(i * step);
                ephemeris.look_at(time).map(|look| AzElSample {
                    time,
                    azimuth_deg: look.azimuth_deg,
                    elevation_deg: look.elevation_deg,
                })
            })
            .collect()
    }

    pub fn characteristics(&self, visible: &[AzElSample]) -> Option<PassCharacteristics> {
        let (first, last) = (visible.first()?, visible.last()?);
        let azimuths: Vec<f64> = visible.iter().map(|s| s.azimuth_deg).collect();
        let min_az = azimuths.iter().copied().fold(f64::INFINITY, f64::min);
        let max_az = azimuths.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(PassCharacteristics {
            aos: first.time,
            los: last.time,
            duration_min: (last.time - first.time).num_milliseconds() as f64 / 60_000.0,
            max_elevation_deg: visible
                .iter()
                .map(|s| s.elevation_deg)
                .fold(f64::NEG_INFINITY, f64::max),
            azimuth_span_deg: max_az - min_az,
            crosses_north: !north_crossings(&azimuths).is_empty(),
        })
    }

    /// Coarse 90 minute scan used to size the real prediction window.
    pub fn detect_characteristics(
        &self,
        ephemeris: &dyn Ephemeris,
        from: DateTime<Utc>,
    ) -> Result<Option<PassCharacteristics>, PredictError> {
        let samples =
            self.predict_positions(ephemeris, from, CHARACTERISTICS_SCAN, CHARACTERISTICS_STEP)?;
        Ok(self.characteristics(&self.filter_visible(&samples)))
    }

    pub fn adaptive_parameters(&self, pass: Option<&PassCharacteristics>) -> PredictionParameters {
        let Some(pass) = pass else {
            return PredictionParameters {
                window: Duration::from_secs(20 * 60),
                interval: Duration::from_secs(10),
                reason: "no pass characteristics, using defaults".to_string(),
            };
        };

        let duration = pass.duration_min;
        let (mut window_min, mut interval_s, mut reason) = if duration < 5.0 {
            ((duration + 4.0).max(8.0), 5.0, format!("short pass ({:.1} min)", duration))
        } else if duration < 10.0 {
            (duration + 6.0, 6.0, format!("short pass ({:.1} min)", duration))
        } else if duration < 18.0 {
            (duration + 8.0, 8.0, format!("medium pass ({:.1} min)", duration))
        } else {
            (duration + 10.0, 10.0, format!("long pass ({:.1} min)", duration))
        };

        if pass.max_elevation_deg > 60.0 {
            interval_s = f64::max(3.0, interval_s - 3.0);
            reason.push_str(&format!(", high elevation ({:.1}°)", pass.max_elevation_deg));
        } else if pass.max_elevation_deg < 15.0 {
            interval_s = f64::min(15.0, interval_s + 5.0);
            reason.push_str(&format!(", low elevation ({:.1}°)", pass.max_elevation_deg));
        }
        if pass.crosses_north {
            interval_s = f64::max(5.0, interval_s - 2.0);
            reason.push_str(", north crossing");
        }

        window_min = window_min.clamp(8.0, 45.0);
        interval_s = interval_s.clamp(3.0, 15.0);
        PredictionParameters {
            window: Duration::from_secs_f64(window_min * 60.0),
            interval: Duration::from_secs_f64(interval_s),
            reason,
        }
    }

    fn greedy_total(&self, azimuths: &[f64], start_az: f64) -> f64 {
        let mut current = start_az;
        let mut total = 0.0;
        for &az in azimuths {
            let (distance, resolved) = self.rotation_distance(current, az);
            total += distance;
            current = resolved;
        }
        total
    }

    fn smart_extended(&self, azimuths: &[f64], first_crossing: usize) -> Option<StrategyScore> {
        let mut resolved = azimuths.to_vec();
        for az in resolved.iter_mut().skip(first_crossing) {
            if *az < 180.0 && *az + 360.0 <= self.limits.az_max {
                *az += 360.0;
            }
        }
        if resolved.iter().any(|az| *az > self.limits.az_max) {
            return None;
        }
        let start_az = azimuths[0];
        let total_rotation: f64 = resolved
            .iter()
            .scan(start_az, |prev, az| {
                let step = (az - *prev).abs();
                *prev = *az;
                Some(step)
            })
            .sum();
        Some(StrategyScore {
            strategy: Strategy::SmartExtended,
            start_az,
            total_rotation,
            total_with_pre_rotation: None,
            resolved: Some(resolved),
        })
    }

    /// Chooses a start strategy for the visible part of a pass and resolves
    /// every sample to a rotator azimuth.
    pub fn optimize(&self, visible: &[AzElSample], current_az: Option<f64>) -> PassPlan {
        let azimuths: Vec<f64> = visible.iter().map(|s| s.azimuth_deg).collect();
        let Some(&first_az) = azimuths.first() else {
            return PassPlan::empty();
        };

        let mut scores = vec![StrategyScore {
            strategy: Strategy::Forward,
            start_az: first_az,
            total_rotation: self.greedy_total(&azimuths, first_az),
            total_with_pre_rotation: None,
            resolved: None,
        }];

        let extended_start = first_az + 360.0;
        let extended_available = self.limits.az_max > 360.0 && extended_start <= self.limits.az_max;
        if extended_available {
            scores.push(StrategyScore {
                strategy: Strategy::Extended,
                start_az: extended_start,
                total_rotation: self.greedy_total(&azimuths, extended_start),
                total_with_pre_rotation: None,
                resolved: None,
            });
        }

        let crossings = north_crossings(&azimuths);
        let crosses_north = !crossings.is_empty();
        if crosses_north && !extended_available && self.limits.az_max > 360.0 {
            if let Some(smart) = self.smart_extended(&azimuths, crossings[0]) {
                scores.push(smart);
            }
        }

        if let Some(current) = current_az {
            for score in scores.iter_mut() {
                score.total_with_pre_rotation =
                    Some(score.total_rotation + (score.start_az - current).abs());
            }
        }
        for score in &scores {
            debug!(
                "strategy {}: start {:.1}°, rotation {:.1}°, with pre-rotation {:?}",
                score.strategy, score.start_az, score.total_rotation, score.total_with_pre_rotation
            );
        }

        let cheapest = scores
            .iter()
            .min_by(|a, b| a.cost().total_cmp(&b.cost()))
            .cloned();
        let chosen = if crosses_north {
            scores
                .iter()
                .find(|s| s.strategy == Strategy::Extended)
                .or_else(|| scores.iter().find(|s| s.strategy == Strategy::SmartExtended))
                .cloned()
                .or(cheapest)
        } else {
            cheapest
        };
        let Some(chosen) = chosen else {
            return PassPlan::empty();
        };
        info!(
            "rotator strategy {} from {:.1}° (north crossing: {})",
            chosen.strategy, chosen.start_az, crosses_north
        );

        let worst = scores
            .iter()
            .map(|s| s.total_rotation)
            .fold(f64::NEG_INFINITY, f64::max);
        let savings = if scores.len() > 1 {
            worst - chosen.total_rotation
        } else {
            0.0
        };

        PassPlan {
            strategy: Some(chosen.strategy),
            start_az: Some(chosen.start_az),
            total_rotation: chosen.total_rotation,
            crosses_north,
            segments: self.segments(visible, &chosen),
            strategies_tested: scores,
            savings,
        }
    }

    fn segments(&self, visible: &[AzElSample], strategy: &StrategyScore) -> Vec<RouteSegment> {
        let mut current = strategy.start_az;
        let mut cumulative = 0.0;
        visible
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let (distance, target_az) = match &strategy.resolved {
                    Some(resolved) => ((resolved[i] - current).abs(), resolved[i]),
                    None => self.rotation_distance(current, sample.azimuth_deg),
                };
                cumulative += distance;
                current = target_az;
                RouteSegment {
                    time: sample.time,
                    target_az,
                    elevation: sample.elevation_deg,
                    rotation_distance: distance,
                    cumulative_rotation: cumulative,
                }
            })
            .collect()
    }

    pub fn pre_positioning(&self, visible: &[AzElSample], current_az: Option<f64>) -> PrePositioning {
        let plan = self.optimize(visible, current_az);
        let Some(start) = plan.start_az else {
            return PrePositioning {
                should_preposition: false,
                recommended_az: None,
                reason: "no visible pass predicted".to_string(),
            };
        };
        let (should_preposition, reason) = match current_az {
            Some(current) if (start - current).abs() > PRE_POSITION_TOLERANCE_DEG => (
                true,
                format!("pre-positioning saves {:.1}° of rotation", plan.savings),
            ),
            Some(_) => (false, "rotator already at the optimal start".to_string()),
            None => (true, "rotator position unknown".to_string()),
        };
        PrePositioning {
            should_preposition,
            recommended_az: Some(start),
            reason,
        }
    }
}

/// Indices where consecutive raw azimuths jump across north.
fn north_crossings(azimuths: &[f64]) -> Vec<usize> {
    azimuths
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| {
            (RouteOptimizer::normalize(pair[1]) - RouteOptimizer::normalize(pair[0])).abs() > 180.0
        })
        .map(|(i, _)| i + 1)
        .collect()
}
