use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Client side request budget: at most `quota` requests in any rolling `window`.
///
/// Every charge is remembered until it falls out of the window, so a burst at the end of one
/// window can't be followed by a second burst at the start of the next.
#[derive(Debug, Clone)]
pub struct RateBudget {
    quota: u32,
    window: Duration,
    charges: VecDeque<Instant>,
}

impl RateBudget {
    pub fn new(quota: u32, window: Duration) -> Self {
        Self {
            quota,
            window,
            charges: VecDeque::with_capacity(quota as usize),
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.charges.front() {
            if *oldest + self.window > now {
                break;
            }
            self.charges.pop_front();
        }
    }

    /// Requests charged within the window ending at `now`
    pub fn requests_used(&mut self, now: Instant) -> u32 {
        self.expire(now);
        self.charges.len() as u32
    }

    /// How long to wait until `cost` more requests fit in the budget. Zero if they already do.
    pub fn wait_for(&mut self, cost: u32, now: Instant) -> Duration {
        let cost = cost.min(self.quota) as usize;
        let used = self.requests_used(now) as usize;
        let quota = self.quota as usize;

        if used + cost <= quota {
            return Duration::ZERO;
        }

        // The charge that has to expire before enough room frees up
        let blocking = self.charges[used + cost - quota - 1];
        (blocking + self.window).saturating_duration_since(now)
    }

    pub fn charge(&mut self, cost: u32, now: Instant) {
        self.expire(now);
        for _ in 0..cost {
            self.charges.push_back(now);
        }
    }

    /// Move the latest `cost` charges to `now`, once the requests they paid for have finished.
    ///
    /// A request may start well after it was charged, so it is only counted from the moment
    /// it's known to be done.
    pub fn restamp(&mut self, cost: u32, now: Instant) {
        let cost = (cost as usize).min(self.charges.len());
        self.charges.truncate(self.charges.len() - cost);
        for _ in 0..cost {
            self.charges.push_back(now);
        }
    }
}
