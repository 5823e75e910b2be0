//! Round-robin scheduling of destination check cycles.
//!
//! Every tick looks at exactly one destination and then moves the cursor
//! on. A destination is checked when its interval has passed since its last
//! check (or it was never checked); otherwise the tick is a no-op for it.

pub mod cycle;

use std::future::Future;
use std::time::{Duration, Instant};

use crate::domain::Destination;

pub use cycle::{CheckCycle, CycleReport, CycleSettings, SourceOutcome, SourceReport, DEFAULT_WORKERS};

pub const DEFAULT_TICK: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum TickOutcome {
    /// No destinations configured.
    Idle,
    /// The destination under the cursor was not due yet.
    Skipped { destination: usize },
    Checked(CycleReport),
}

pub struct Scheduler {
    destinations: Vec<Destination>,
    last_checked: Vec<Option<Instant>>,
    cursor: usize,
    cycle: CheckCycle,
}

impl Scheduler {
    pub fn new(destinations: Vec<Destination>, cycle: CheckCycle) -> Self {
        let last_checked = vec![None; destinations.len()];
        Self {
            destinations,
            last_checked,
            cursor: 0,
            cycle,
        }
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Index of the destination the next tick examines.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_checked(&self, destination: usize) -> Option<Instant> {
        self.last_checked.get(destination).copied().flatten()
    }

    fn is_due(&self, index: usize, now: Instant) -> bool {
        match self.last_checked[index] {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.destinations[index].interval,
        }
    }

    pub async fn tick(&mut self, now: Instant) -> TickOutcome {
        self.tick_until(now, std::future::pending()).await
    }

    /// One tick whose check cycle, if any, stops early when `cancel`
    /// resolves; see [`CheckCycle::run_until`].
    pub async fn tick_until(&mut self, now: Instant, cancel: impl Future<Output = ()>) -> TickOutcome {
        if self.destinations.is_empty() {
            return TickOutcome::Idle;
        }

        let index = self.cursor;
        self.cursor = (self.cursor + 1) % self.destinations.len();

        if !self.is_due(index, now) {
            tracing::trace!(destination = index, "Not due yet");
            return TickOutcome::Skipped { destination: index };
        }

        TickOutcome::Checked(self.check_until(index, now, cancel).await)
    }

    /// Check one destination now, regardless of its interval.
    pub async fn check(&mut self, index: usize, now: Instant) -> CycleReport {
        self.check_until(index, now, std::future::pending()).await
    }

    async fn check_until(&mut self, index: usize, now: Instant, cancel: impl Future<Output = ()>) -> CycleReport {
        self.last_checked[index] = Some(now);
        let destination = &self.destinations[index];
        tracing::info!(
            destination = %destination.display_name(),
            sources = destination.sources.len(),
            "Checking destination"
        );
        self.cycle.run_until(destination, cancel).await
    }

    /// Check every destination once, in order.
    pub async fn check_all(&mut self, now: Instant) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(self.destinations.len());
        for index in 0..self.destinations.len() {
            reports.push(self.check(index, now).await);
        }
        reports
    }
}
