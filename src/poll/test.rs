use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use super::*;
use crate::error::Error;
use crate::playback::{PlaybackState, NOTHING_PLAYING};

/// Replays a script of poll results, then repeats `fallback` forever
#[derive(Default)]
struct ScriptedSource {
    script: VecDeque<Result<Option<PlaybackState>>>,
    fallback: Option<PlaybackState>,
    calls: Vec<Instant>,
}

impl ScriptedSource {
    fn repeating(state: PlaybackState) -> Self {
        Self {
            fallback: Some(state),
            ..Self::default()
        }
    }

    fn then(mut self, result: Result<Option<PlaybackState>>) -> Self {
        self.script.push_back(result);
        self
    }
}

impl MusicSource for ScriptedSource {
    async fn current_playback(&mut self) -> Result<Option<PlaybackState>> {
        self.calls.push(Instant::now());
        self.script
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[derive(Default)]
struct FakeProfile {
    biography: String,
    calls: Vec<Instant>,
    writes: Vec<String>,
    /// Fail every write with an error of this kind
    write_error: Option<ErrorKind>,
    max_len: Option<usize>,
    /// Time each request spends before it reaches the service
    delay: Duration,
}

impl ProfileSink for FakeProfile {
    fn max_biography_len(&self) -> Option<usize> {
        self.max_len
    }

    async fn read_biography(&mut self) -> Result<String> {
        sleep(self.delay).await;
        self.calls.push(Instant::now());
        Ok(self.biography.clone())
    }

    async fn set_biography(&mut self, text: &str) -> Result<()> {
        sleep(self.delay).await;
        self.calls.push(Instant::now());
        match self.write_error {
            Some(ErrorKind::Throttled) => Err(Error::Throttled("feedback_required".to_string())),
            Some(ErrorKind::Auth) => Err(Error::auth("login_required")),
            Some(ErrorKind::Validation) => Err(Error::Validation("biography is too long".to_string())),
            Some(ErrorKind::Transient) => Err(Error::Request {
                code: 502,
                message: "Bad gateway".to_string(),
            }),
            Some(ErrorKind::Config) => Err(Error::config("unreachable")),
            None => {
                self.writes.push(text.to_string());
                self.biography = text.to_string();
                Ok(())
            }
        }
    }
}

fn playing(track: &str) -> PlaybackState {
    PlaybackState::playing(track, "Artist")
}

fn bio(track: &str) -> String {
    format!("Currently listening to: {track} by Artist")
}

/// Every call either side made, in order
fn all_calls(poll: &PollLoop<ScriptedSource, FakeProfile>) -> Vec<Instant> {
    let mut calls: Vec<Instant> = poll.source().calls.clone();
    calls.extend(poll.sink().calls.iter().copied());
    calls.sort();
    calls
}

/// Most calls that landed in any rolling `window`
fn busiest_window(calls: &[Instant], window: Duration) -> usize {
    calls
        .iter()
        .enumerate()
        .map(|(i, end)| calls[..=i].iter().filter(|t| **t + window > *end).count())
        .max()
        .unwrap_or(0)
}

#[tokio::test(start_paused = true)]
async fn first_cycle_always_commits() {
    let source = ScriptedSource::repeating(playing("A"));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    let outcome = poll.cycle().await;

    assert_eq!(outcome, CycleOutcome::Committed(WriteOutcome::Written));
    assert_eq!(poll.last_written(), Some(bio("A").as_str()));
    assert_eq!(poll.sink().writes, vec![bio("A")]);
}

#[tokio::test(start_paused = true)]
async fn first_cycle_adopts_matching_remote_without_writing() {
    let source = ScriptedSource::repeating(playing("A"));
    let sink = FakeProfile {
        biography: bio("A"),
        ..FakeProfile::default()
    };
    let mut poll = PollLoop::new(source, sink, PollConfig::default());

    assert_eq!(poll.cycle().await, CycleOutcome::Committed(WriteOutcome::Unchanged));
    assert_eq!(poll.last_written(), Some(bio("A").as_str()));
    assert!(poll.sink().writes.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unchanged_playback_writes_once() {
    let source = ScriptedSource::repeating(playing("A"));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    poll.cycle().await;
    let second = poll.cycle().await;

    assert_eq!(second, CycleOutcome::Unchanged);
    assert_eq!(poll.sink().writes.len(), 1);
    // The unchanged cycle never touches the profile: one read, one write
    assert_eq!(poll.sink().calls.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn changed_candidate_waits_for_settle_delay() {
    let source = ScriptedSource::repeating(playing("A"));
    let config = PollConfig::default();
    let settle = config.settle_delay;
    let mut poll = PollLoop::new(source, FakeProfile::default(), config);

    poll.cycle().await;

    let calls = &poll.source().calls;
    assert_eq!(calls.len(), 2);
    assert!(calls[1] - calls[0] >= settle);
}

#[tokio::test(start_paused = true)]
async fn flapping_track_is_not_written() {
    let source = ScriptedSource::repeating(playing("A"))
        .then(Ok(Some(playing("A"))))
        .then(Ok(Some(playing("A"))))
        // Skip forward, then back before the settle delay is over
        .then(Ok(Some(playing("B"))))
        .then(Ok(Some(playing("A"))));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    poll.cycle().await;
    let outcome = poll.cycle().await;

    assert_eq!(outcome, CycleOutcome::Settled);
    assert_eq!(poll.sink().writes, vec![bio("A")]);
    assert_eq!(poll.last_written(), Some(bio("A").as_str()));
}

#[tokio::test(start_paused = true)]
async fn settled_change_commits_rechecked_value() {
    let source = ScriptedSource::repeating(playing("C"))
        .then(Ok(Some(playing("A"))))
        .then(Ok(Some(playing("A"))))
        // Changed twice during the settle delay; the re-checked value wins
        .then(Ok(Some(playing("B"))))
        .then(Ok(Some(playing("C"))));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    poll.cycle().await;
    poll.cycle().await;

    assert_eq!(poll.sink().writes, vec![bio("A"), bio("C")]);
}

#[tokio::test(start_paused = true)]
async fn paused_playback_writes_sentinel() {
    let source = ScriptedSource::repeating(PlaybackState::paused("A", "Artist"));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    poll.cycle().await;

    assert_eq!(poll.sink().writes, vec![NOTHING_PLAYING.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn throttled_write_cools_down() {
    let source = ScriptedSource::repeating(playing("A"));
    let sink = FakeProfile {
        write_error: Some(ErrorKind::Throttled),
        ..FakeProfile::default()
    };
    let config = PollConfig::default();
    let cooldown = config.cooldown;
    let mut poll = PollLoop::new(source, sink, config);

    assert_eq!(poll.cycle().await, CycleOutcome::CooledDown);
    assert_eq!(poll.state(), LoopState::Running);
    assert_eq!(poll.last_written(), None);
    let failed_write = *poll.sink().calls.last().unwrap();

    poll.cycle().await;

    let calls = &poll.source().calls;
    assert!(calls[2] - failed_write >= cooldown);
    assert!(cooldown >= Duration::from_secs(24 * 60 * 60));
}

#[tokio::test(start_paused = true)]
async fn revoked_login_cools_down() {
    let source = ScriptedSource::repeating(playing("A"));
    let sink = FakeProfile {
        write_error: Some(ErrorKind::Auth),
        ..FakeProfile::default()
    };
    let mut poll = PollLoop::new(source, sink, PollConfig::default());

    assert_eq!(poll.cycle().await, CycleOutcome::CooledDown);
}

#[tokio::test(start_paused = true)]
async fn transient_write_failure_backs_off() {
    let source = ScriptedSource::repeating(playing("A"));
    let sink = FakeProfile {
        write_error: Some(ErrorKind::Transient),
        ..FakeProfile::default()
    };
    let config = PollConfig::default();
    let (backoff, cooldown) = (config.error_backoff, config.cooldown);
    let mut poll = PollLoop::new(source, sink, config);

    assert_eq!(poll.cycle().await, CycleOutcome::BackedOff);
    assert_eq!(poll.state(), LoopState::Running);
    let failed_write = *poll.sink().calls.last().unwrap();

    poll.cycle().await;

    let next_fetch = poll.source().calls[2];
    assert!(next_fetch - failed_write >= backoff);
    assert!(next_fetch - failed_write < cooldown);
}

#[tokio::test(start_paused = true)]
async fn fetch_failure_backs_off_and_recovers() {
    let source = ScriptedSource::repeating(playing("A")).then(Err(Error::Request {
        code: 503,
        message: "Service unavailable".to_string(),
    }));
    let config = PollConfig::default();
    let backoff = config.error_backoff;
    let mut poll = PollLoop::new(source, FakeProfile::default(), config);

    assert_eq!(poll.cycle().await, CycleOutcome::BackedOff);
    assert_eq!(poll.cycle().await, CycleOutcome::Committed(WriteOutcome::Written));

    let calls = &poll.source().calls;
    assert!(calls[1] - calls[0] >= backoff);
}

#[tokio::test(start_paused = true)]
async fn retry_after_longer_than_backoff_is_honored() {
    let source = ScriptedSource::repeating(playing("A")).then(Err(Error::RateLimited {
        retry_after: Some(Duration::from_secs(120)),
    }));
    let mut poll = PollLoop::new(source, FakeProfile::default(), PollConfig::default());

    poll.cycle().await;
    poll.cycle().await;

    let calls = &poll.source().calls;
    assert!(calls[1] - calls[0] >= Duration::from_secs(120));
}

#[tokio::test(start_paused = true)]
async fn rejected_candidate_skips_cooldown() {
    let source = ScriptedSource::repeating(playing("A"));
    let sink = FakeProfile {
        write_error: Some(ErrorKind::Validation),
        ..FakeProfile::default()
    };
    let config = PollConfig::default();
    let backoff = config.error_backoff;
    let mut poll = PollLoop::new(source, sink, config);

    assert_eq!(poll.cycle().await, CycleOutcome::Rejected);
    let rejected_write = *poll.sink().calls.last().unwrap();
    poll.cycle().await;

    // Next cycle starts right after pacing
    assert!(poll.source().calls[2] - rejected_write < backoff);
}

#[tokio::test(start_paused = true)]
async fn long_biography_is_fitted_to_profile_limit() {
    let source = ScriptedSource::repeating(playing("A very long track title"));
    let sink = FakeProfile {
        max_len: Some(30),
        ..FakeProfile::default()
    };
    let mut poll = PollLoop::new(source, sink, PollConfig::default());

    assert_eq!(poll.cycle().await, CycleOutcome::Committed(WriteOutcome::Written));
    assert_eq!(poll.cycle().await, CycleOutcome::Unchanged);

    let writes = &poll.sink().writes;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].chars().count(), 30);
    assert!(writes[0].ends_with('…'));
}

#[tokio::test(start_paused = true)]
async fn budget_holds_for_every_rolling_window() {
    // Every other fetch changes the track so most cycles commit
    let mut source = ScriptedSource::default();
    for track in 0..150 {
        let state = playing(&format!("Track {track}"));
        source = source.then(Ok(Some(state.clone()))).then(Ok(Some(state)));
    }
    let config = PollConfig {
        settle_delay: Duration::ZERO,
        cycle_delay: Duration::ZERO,
        ..PollConfig::default()
    };
    let (quota, window) = (config.quota as usize, config.window);
    let start = Instant::now();
    let mut poll = PollLoop::new(source, FakeProfile::default(), config);

    for _ in 0..200 {
        poll.cycle().await;
    }

    let calls = all_calls(&poll);

    // The budget had to kick in
    assert!(calls.len() > quota);
    assert!(Instant::now() - start >= window);
    let busiest = busiest_window(&calls, window);
    assert!(busiest <= quota, "{busiest} requests in one window");
}

#[tokio::test(start_paused = true)]
async fn budget_counts_slow_profile_requests_when_they_happen() {
    // Long runs of the same track, so most cycles are single fetches packed around the commits
    let mut source = ScriptedSource::default();
    for track in 0..6 {
        for _ in 0..80 {
            source = source.then(Ok(Some(playing(&format!("Track {track}")))));
        }
    }
    let sink = FakeProfile {
        delay: Duration::from_secs(1),
        ..FakeProfile::default()
    };
    let config = PollConfig {
        settle_delay: Duration::ZERO,
        cycle_delay: Duration::ZERO,
        ..PollConfig::default()
    };
    let (quota, window) = (config.quota as usize, config.window);
    let mut poll = PollLoop::new(source, sink, config);

    for _ in 0..600 {
        poll.cycle().await;
    }

    assert!(poll.sink().writes.len() >= 6);
    let busiest = busiest_window(&all_calls(&poll), window);
    assert!(busiest <= quota, "{busiest} requests in one window");
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_sleeps_until_room() {
    let source = ScriptedSource::repeating(playing("A"));
    let config = PollConfig {
        quota: 4,
        requests_per_cycle: 2,
        settle_delay: Duration::ZERO,
        cycle_delay: Duration::ZERO,
        ..PollConfig::default()
    };
    let window = config.window;
    let mut poll = PollLoop::new(source, FakeProfile::default(), config);

    // fetch + re-check + read + write uses the whole quota
    poll.cycle().await;
    poll.cycle().await;

    let calls = &poll.source().calls;
    assert_eq!(calls.len(), 3);
    assert!(calls[2] - calls[0] >= window);
}
