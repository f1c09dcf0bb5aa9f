//! Simulated wearable
//!
//! Generates wire messages shaped like the real device's
//! (`{"BPM":..,"SpO2":..,"TempC":..,"IR":..}`) and feeds them into one
//! user's monitor session, for development without hardware.
//!
//! The generated stream includes the things the monitor must cope with:
//! - activity phases that move the heart rate between bands
//! - per-channel dropouts reported as the `-999` sentinel
//! - occasional silences long enough to make the feed stale

use rand::Rng;
use rand_distr::{Distribution, Normal, NormalError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::normalizer::{RawReading, SENTINEL};
use crate::session::Ingest;
use crate::state::AppState;

/// Chance per channel per message of a dropout
const DROPOUT_PROBABILITY: f64 = 0.03;

/// Chance per message of the device going silent
const SILENCE_PROBABILITY: f64 = 0.005;

/// Chance per message of switching activity
const ACTIVITY_CHANGE_PROBABILITY: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Activity {
    Sleep,
    Resting,
    Light,
    Vigorous,
}

impl Activity {
    fn base_bpm(self) -> f64 {
        match self {
            Activity::Sleep => 55.0,
            Activity::Resting => 72.0,
            Activity::Light => 108.0,
            Activity::Vigorous => 140.0,
        }
    }

    fn base_spo2(self) -> f64 {
        match self {
            Activity::Vigorous => 95.0,
            _ => 97.5,
        }
    }

    fn random<R: Rng>(rng: &mut R) -> Self {
        match rng.gen_range(0..4) {
            0 => Activity::Sleep,
            1 => Activity::Resting,
            2 => Activity::Light,
            _ => Activity::Vigorous,
        }
    }
}

/// Simulated wearable feeding a single user's session
pub struct FakeWearable {
    user_id: String,
    /// Interval between messages in milliseconds
    interval_ms: u64,
    activity: Activity,
    /// Heart rate follows the activity's base rate gradually
    bpm: f64,
    base_temperature: f64,
    silent_ticks: u32,
    bpm_noise: Normal<f64>,
    spo2_noise: Normal<f64>,
    temp_noise: Normal<f64>,
    ir_noise: Normal<f64>,
}

impl FakeWearable {
    pub fn new(user_id: &str, interval_ms: u64) -> Result<Self, NormalError> {
        info!(user_id = %user_id, interval_ms, "Initializing simulated wearable");

        Ok(Self {
            user_id: user_id.to_string(),
            interval_ms,
            activity: Activity::Resting,
            bpm: Activity::Resting.base_bpm(),
            base_temperature: 26.5,
            silent_ticks: 0,
            bpm_noise: Normal::new(0.0, 2.0)?,
            spo2_noise: Normal::new(0.0, 0.6)?,
            temp_noise: Normal::new(0.0, 0.15)?,
            ir_noise: Normal::new(0.0, 800.0)?,
        })
    }

    /// Produce the next message, or `None` while the device is silent.
    fn next_reading<R: Rng>(&mut self, rng: &mut R) -> Option<RawReading> {
        if self.silent_ticks > 0 {
            self.silent_ticks -= 1;
            return None;
        }
        if rng.gen::<f64>() < SILENCE_PROBABILITY {
            self.silent_ticks = rng.gen_range(4..10);
            info!(user_id = %self.user_id, ticks = self.silent_ticks, "Simulated wearable going silent");
            return None;
        }

        if rng.gen::<f64>() < ACTIVITY_CHANGE_PROBABILITY {
            self.activity = Activity::random(rng);
            info!(user_id = %self.user_id, activity = ?self.activity, "Simulated activity change");
        }

        // Approach the activity's base rate rather than jumping to it
        self.bpm += (self.activity.base_bpm() - self.bpm) * 0.2;
        let bpm = (self.bpm + self.bpm_noise.sample(rng)).clamp(35.0, 200.0).round();
        let spo2 = (self.activity.base_spo2() + self.spo2_noise.sample(rng))
            .clamp(85.0, 100.0)
            .round();
        let temperature = (self.base_temperature + self.temp_noise.sample(rng)).clamp(20.0, 40.0);
        let temperature = (temperature * 10.0).round() / 10.0;
        let ir = (50_000.0 + self.ir_noise.sample(rng)).max(0.0).round();

        let mut dropout = |value: f64| {
            if rng.gen::<f64>() < DROPOUT_PROBABILITY {
                SENTINEL
            } else {
                value
            }
        };

        Some(RawReading::new(
            dropout(bpm),
            dropout(spo2),
            dropout(temperature),
            dropout(ir),
        ))
    }

    /// Run the simulated wearable continuously.
    ///
    /// Starts the user's session if needed. Messages for a session that
    /// has since been stopped are dropped.
    pub async fn run(mut self, state: Arc<RwLock<AppState>>) {
        info!(user_id = %self.user_id, "Starting simulated wearable loop");

        state.write().await.start_session(&self.user_id);

        let mut tick_interval = interval(Duration::from_millis(self.interval_ms));
        let mut tick_count: u64 = 0;

        loop {
            tick_interval.tick().await;
            tick_count += 1;

            // ThreadRng is not Send; keep it out of the await points
            let reading = {
                let mut rng = rand::thread_rng();
                self.next_reading(&mut rng)
            };
            let Some(reading) = reading else {
                continue;
            };

            let body = match serde_json::to_vec(&reading) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "Failed to encode simulated reading");
                    continue;
                }
            };

            let Some(session) = state.read().await.session(&self.user_id) else {
                debug!(user_id = %self.user_id, "No session for simulated reading");
                continue;
            };

            debug!(
                tick = tick_count,
                bpm = reading.bpm,
                spo2 = reading.spo2,
                temperature = reading.temperature,
                "Generated simulated reading"
            );

            match session.send(Ingest(body)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Simulated reading rejected"),
                Err(e) => warn!(error = %e, "Monitor session unavailable"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorSettings;
    use crate::profiles::ThresholdTable;
    use crate::session::GetSnapshot;
    use crate::store::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generator_creation() {
        let wearable = FakeWearable::new("demo-patient", 1000).unwrap();
        assert_eq!(wearable.interval_ms, 1000);
        assert_eq!(wearable.activity, Activity::Resting);
    }

    #[test]
    fn test_readings_pass_schema_check() {
        let mut wearable = FakeWearable::new("demo-patient", 1000).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let mut produced = 0;
        for _ in 0..500 {
            if let Some(reading) = wearable.next_reading(&mut rng) {
                reading.validate().unwrap();
                let body = serde_json::to_vec(&reading).unwrap();
                assert_eq!(RawReading::parse(&body).unwrap(), reading);
                produced += 1;
            }
        }
        assert!(produced > 400);
    }

    #[test]
    fn test_silence_suppresses_messages() {
        let mut wearable = FakeWearable::new("demo-patient", 1000).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        wearable.silent_ticks = 3;

        for _ in 0..3 {
            assert!(wearable.next_reading(&mut rng).is_none());
        }
    }

    #[actix_rt::test]
    async fn test_wearable_feeds_session() {
        use tokio::time::timeout;

        let state = Arc::new(RwLock::new(AppState::new(
            Arc::new(ThresholdTable::default()),
            MonitorSettings::default(),
            Arc::new(MemoryStore::new()),
        )));
        let wearable = FakeWearable::new("demo-patient", 50).unwrap();

        let state_clone = state.clone();
        let handle = actix_rt::spawn(async move {
            wearable.run(state_clone).await;
        });

        timeout(Duration::from_secs(2), async {
            loop {
                let session = state.read().await.session("demo-patient");
                if let Some(session) = session {
                    if session.send(GetSnapshot).await.unwrap().history_len > 0 {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("Timeout waiting for simulated reading");

        handle.abort();
    }
}
