//! Staleness monitor
//!
//! Two-state machine (`live` / `stale`) gating the sample feed. Every
//! accepted sample re-arms a timeout identified by a generation number; a
//! timeout only counts if its generation is still current.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::Sample;

/// Values below this snap to zero while decaying
const DECAY_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Live,
    Stale,
}

#[derive(Debug)]
pub struct StalenessMonitor {
    state: FeedState,
    generation: u64,
}

impl StalenessMonitor {
    pub fn new() -> Self {
        Self {
            state: FeedState::Live,
            generation: 0,
        }
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn is_stale(&self) -> bool {
        self.state == FeedState::Stale
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record an accepted sample; returns the generation the next
    /// timeout must carry to count.
    pub fn accept(&mut self) -> u64 {
        self.generation += 1;
        if self.state == FeedState::Stale {
            info!(generation = self.generation, "Sensor feed recovered");
        }
        self.state = FeedState::Live;
        self.generation
    }

    /// Apply a fired timeout. Returns `true` only on the live → stale edge.
    pub fn timeout(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            debug!(
                fired = generation,
                current = self.generation,
                "Discarding superseded staleness timeout"
            );
            return false;
        }
        if self.state == FeedState::Stale {
            return false;
        }
        info!(generation, "Sensor feed went stale");
        self.state = FeedState::Stale;
        true
    }
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn decay_channel(value: Option<f64>, factor: f64) -> Option<f64> {
    value.map(|v| {
        let next = v * factor;
        if next.abs() < DECAY_FLOOR {
            0.0
        } else {
            next
        }
    })
}

/// One decay step of the synthetic display sample shown while stale.
pub fn decay(sample: &Sample, factor: f64, captured_at: chrono::DateTime<chrono::Utc>) -> Sample {
    Sample {
        bpm: decay_channel(sample.bpm, factor),
        spo2: decay_channel(sample.spo2, factor),
        temperature: decay_channel(sample.temperature, factor),
        ppg: decay_channel(sample.ppg, factor),
        captured_at,
    }
}
