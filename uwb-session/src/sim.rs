//! Simulated ranging engine for hosts without a UWB radio

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::Rng;
use uwb_proto::Role;

use crate::{EngineError, RangingEngine, RangingParams, RangingResult, RangingStream, UwbAddress};

/// Produces a slow random walk of distance and azimuth readings.
///
/// Each ranging round yields a distance followed by an azimuth, as separate
/// results. `close()` ends every stream opened so far.
pub struct SimulatedEngine {
    acquire_delay: Duration,
    epoch: Arc<AtomicU64>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl SimulatedEngine {
    pub fn new(acquire_delay: Duration) -> Self {
        Self {
            acquire_delay,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }
}

struct Walk {
    distance: f32,
    azimuth: f32,
    azimuth_next: bool,
}

impl Walk {
    fn step(&mut self) -> RangingResult {
        let mut rng = rand::thread_rng();
        let result = if self.azimuth_next {
            self.azimuth = (self.azimuth + rng.gen_range(-3.0..3.0)).clamp(-60.0, 60.0);
            RangingResult::Azimuth(self.azimuth)
        } else {
            self.distance = (self.distance + rng.gen_range(-0.05..0.05)).clamp(0.1, 10.0);
            RangingResult::Distance(self.distance)
        };
        self.azimuth_next = !self.azimuth_next;
        result
    }
}

#[async_trait]
impl RangingEngine for SimulatedEngine {
    async fn acquire_session(&self, role: Role) -> Result<UwbAddress, EngineError> {
        if !role.is_supported() {
            return Err(EngineError::Unavailable(format!("no session scope for {role:?}")));
        }
        tokio::time::sleep(self.acquire_delay).await;
        Ok(UwbAddress(rand::random::<u16>().to_be_bytes()))
    }

    fn open_ranging_session(&self, params: RangingParams) -> Result<RangingStream, EngineError> {
        if params.session_key.is_empty() {
            return Err(EngineError::InvalidParameters("empty session key".to_string()));
        }

        let epoch = self.epoch.load(Ordering::SeqCst);
        let current = Arc::clone(&self.epoch);
        let interval = params.update_rate.interval();
        let walk = Walk {
            distance: 1.5,
            azimuth: 0.0,
            azimuth_next: false,
        };

        let results = futures::stream::unfold(walk, move |mut walk| {
            let current = Arc::clone(&current);
            async move {
                // Half the round interval per result, distance then azimuth
                tokio::time::sleep(interval / 2).await;
                if current.load(Ordering::SeqCst) != epoch {
                    return None;
                }
                let result = walk.step();
                Some((result, walk))
            }
        });

        Ok(results.boxed())
    }

    fn close(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }
}
