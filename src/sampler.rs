//! Adaptive frame sampling.
//!
//! Only every `base_skip_rate`-th frame goes to the detector. When an
//! inference overruns the latency budget, extra frames are dropped before the
//! next sample so the loop catches up with the live stream instead of
//! falling behind it. Dropped frames are never buffered.

use std::time::Duration;

/// Absolute ceiling on boost-skipped frames per burst.
pub const MAX_BOOST_SKIP: u32 = 8;

/// Boost size as a multiple of the base skip rate.
const BOOST_MULTIPLIER: u32 = 2;

/// How a latency boost behaves under sustained overload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoostPolicy {
    /// Each slow inference schedules one burst; fast inferences schedule none.
    #[default]
    OneShot,
    /// A slow inference raises a persistent level to the cap. Every processed
    /// frame schedules the current level; each fast inference halves it.
    Decay,
}

impl std::str::FromStr for BoostPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "one_shot" | "oneshot" | "one-shot" => Ok(Self::OneShot),
            "decay" => Ok(Self::Decay),
            other => Err(anyhow::anyhow!(
                "unknown boost policy '{}'; expected one_shot or decay",
                other
            )),
        }
    }
}

/// What to do with the next incoming frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// Drop it via the transport's cheap discard path.
    Skip,
    /// Decode it and run detection.
    Process,
}

#[derive(Clone, Debug)]
pub struct AdaptiveSampler {
    base_skip_rate: u32,
    latency_budget: Duration,
    policy: BoostPolicy,
    counter: u64,
    pending_skips: u32,
    boost_level: u32,
}

impl AdaptiveSampler {
    pub fn new(base_skip_rate: u32, latency_budget: Duration, policy: BoostPolicy) -> Self {
        Self {
            base_skip_rate: base_skip_rate.max(1),
            latency_budget,
            policy,
            counter: 0,
            pending_skips: 0,
            boost_level: 0,
        }
    }

    /// Boost burst size for this sampler.
    pub fn boost_cap(&self) -> u32 {
        self.base_skip_rate
            .saturating_mul(BOOST_MULTIPLIER)
            .min(MAX_BOOST_SKIP)
    }

    /// Frames still scheduled to be dropped for latency.
    pub fn pending_skips(&self) -> u32 {
        self.pending_skips
    }

    /// Decide the fate of the next incoming frame.
    ///
    /// Boost skips are consumed first and do not advance the sampling counter.
    pub fn next_action(&mut self) -> FrameAction {
        if self.pending_skips > 0 {
            self.pending_skips -= 1;
            return FrameAction::Skip;
        }
        self.counter += 1;
        if self.counter.is_multiple_of(self.base_skip_rate as u64) {
            FrameAction::Process
        } else {
            FrameAction::Skip
        }
    }

    /// Record how long the detector took on the last processed frame.
    pub fn record_inference(&mut self, elapsed: Duration) {
        let slow = elapsed > self.latency_budget;
        match self.policy {
            BoostPolicy::OneShot => {
                if slow {
                    self.pending_skips = self.boost_cap();
                }
            }
            BoostPolicy::Decay => {
                if slow {
                    self.boost_level = self.boost_cap();
                } else {
                    self.boost_level /= 2;
                }
                self.pending_skips = self.boost_level;
            }
        }
    }

    /// Forget counters after a reconnect; the new stream starts fresh.
    pub fn reset(&mut self) {
        self.counter = 0;
        self.pending_skips = 0;
        self.boost_level = 0;
    }
}
