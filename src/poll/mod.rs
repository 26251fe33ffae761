//! The loop that mirrors playback into the profile biography.
//!
//! Each cycle fetches the playback, compares the resulting biography with the last one
//! written, waits for a changed value to settle, and only then writes it. Every request
//! to either service is charged against a [`RateBudget`] first, and the loop sleeps instead
//! of overrunning it. Failures never end the loop: transient failures back off briefly,
//! a profile refusing writes (anti-automation throttling, a revoked login) backs off for a
//! long time.

use std::time::Duration;

use tokio::time::{sleep, Instant};

pub use budget::RateBudget;

use crate::config::Settings;
use crate::error::{Error, ErrorKind, Result};
use crate::playback::{biography, MusicSource};
use crate::profile::{fit_biography, ProfileSink, WriteOutcome};

mod budget;

/// Requests made by a commit: the read before the write and the write itself
const COMMIT_COST: u32 = 2;

/// Timing and budget knobs for [`PollLoop`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    pub quota: u32,
    pub window: Duration,
    pub requests_per_cycle: u32,
    /// Wait before re-checking a changed candidate
    pub settle_delay: Duration,
    /// Pause after the profile refuses a write
    pub cooldown: Duration,
    /// Pause after a transient failure
    pub error_backoff: Duration,
    /// Pause between cycles
    pub cycle_delay: Duration,
}

impl From<&Settings> for PollConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            quota: settings.quota,
            window: settings.window(),
            requests_per_cycle: settings.requests_per_cycle,
            settle_delay: settings.settle_delay(),
            cooldown: settings.cooldown(),
            error_backoff: settings.error_backoff(),
            cycle_delay: settings.cycle_delay(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig::from(&Settings::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    /// Sleeping until the budget has room again
    RateLimited,
    /// Sleeping off a failed write
    Cooldown,
}

/// What a single [`PollLoop::cycle`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Candidate equals the last written biography
    Unchanged,
    /// Candidate changed, then changed back during the settle delay
    Settled,
    Committed(WriteOutcome),
    /// The profile refused the candidate before any write
    Rejected,
    /// The write failed and the loop cooled down
    CooledDown,
    /// A request failed transiently and the loop backed off
    BackedOff,
}

pub struct PollLoop<M, P> {
    source: M,
    sink: P,
    config: PollConfig,
    budget: RateBudget,
    last_written: Option<String>,
    state: LoopState,
}

impl<M: MusicSource, P: ProfileSink> PollLoop<M, P> {
    pub fn new(source: M, sink: P, config: PollConfig) -> Self {
        Self {
            budget: RateBudget::new(config.quota, config.window),
            source,
            sink,
            config,
            last_written: None,
            state: LoopState::Running,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Biography last committed to the profile
    pub fn last_written(&self) -> Option<&str> {
        self.last_written.as_deref()
    }

    pub fn source(&self) -> &M {
        &self.source
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Poll forever
    pub async fn run(&mut self) {
        log::info!(
            "Polling with a budget of {} requests per {}s",
            self.config.quota,
            self.config.window.as_secs()
        );
        loop {
            self.cycle().await;
        }
    }

    pub async fn cycle(&mut self) -> CycleOutcome {
        self.reserve().await;

        match self.step().await {
            Ok(outcome) => {
                sleep(self.config.cycle_delay).await;
                outcome
            }
            Err(err) => {
                self.back_off(&err).await;
                CycleOutcome::BackedOff
            }
        }
    }

    async fn step(&mut self) -> Result<CycleOutcome> {
        let candidate = self.fetch_candidate().await?;
        if self.last_written.as_deref() == Some(candidate.as_str()) {
            log::debug!("No change: {candidate}");
            return Ok(CycleOutcome::Unchanged);
        }

        log::info!(
            "New candidate `{candidate}`, re-checking in {}s",
            self.config.settle_delay.as_secs()
        );
        sleep(self.config.settle_delay).await;

        let candidate = self.fetch_candidate().await?;
        if self.last_written.as_deref() == Some(candidate.as_str()) {
            log::info!("Playback went back to `{candidate}`, nothing to write");
            return Ok(CycleOutcome::Settled);
        }

        Ok(self.commit(candidate).await)
    }

    async fn fetch_candidate(&mut self) -> Result<String> {
        self.acquire(1).await;
        let playback = self.source.current_playback().await;
        self.budget.restamp(1, Instant::now());

        let text = biography(playback?.as_ref());
        Ok(match self.sink.max_biography_len() {
            Some(max) => fit_biography(&text, max),
            None => text,
        })
    }

    async fn commit(&mut self, candidate: String) -> CycleOutcome {
        self.acquire(COMMIT_COST).await;
        let written = self.sink.write_biography(&candidate).await;
        self.budget.restamp(COMMIT_COST, Instant::now());

        let err = match written {
            Ok(outcome) => {
                log::info!("Biography is now `{candidate}`");
                self.last_written = Some(candidate);
                return CycleOutcome::Committed(outcome);
            }
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::Validation => {
                log::warn!("Skipping `{candidate}`: {err}");
                CycleOutcome::Rejected
            }
            ErrorKind::Transient => {
                self.back_off(&err).await;
                CycleOutcome::BackedOff
            }
            ErrorKind::Throttled | ErrorKind::Auth | ErrorKind::Config => {
                log::error!(
                    "Couldn't update biography: {err}. Cooling down for {}h",
                    self.config.cooldown.as_secs_f64() / 3600.0
                );
                self.state = LoopState::Cooldown;
                sleep(self.config.cooldown).await;
                self.state = LoopState::Running;
                CycleOutcome::CooledDown
            }
        }
    }

    /// Sleep `error_backoff`, or longer when the service asked for it
    async fn back_off(&mut self, err: &Error) {
        let wait = err
            .retry_after()
            .map_or(self.config.error_backoff, |after| after.max(self.config.error_backoff));
        log::error!("An error occurred: {err}. Retrying in {:.2}s", wait.as_secs_f64());
        sleep(wait).await;
    }

    /// Block until a whole cycle fits in the budget
    async fn reserve(&mut self) {
        let wait = self.budget.wait_for(self.config.requests_per_cycle, Instant::now());
        if !wait.is_zero() {
            self.rate_limited(wait).await;
        }
    }

    /// Block until `cost` requests fit in the budget, then charge them
    async fn acquire(&mut self, cost: u32) {
        loop {
            let wait = self.budget.wait_for(cost, Instant::now());
            if wait.is_zero() {
                break;
            }
            self.rate_limited(wait).await;
        }
        self.budget.charge(cost, Instant::now());
    }

    async fn rate_limited(&mut self, wait: Duration) {
        log::info!("Rate limit reached. Sleeping for {:.2} seconds", wait.as_secs_f64());
        self.state = LoopState::RateLimited;
        sleep(wait).await;
        self.state = LoopState::Running;
    }
}

#[cfg(test)]
mod test;
