//! Periodic background jobs.
//!
//! A [`JobRunner`] owns a set of [`Job`]s and fires all of them on a fixed
//! interval. Each job is single-flight: a tick that arrives while the
//! previous run is still going is skipped, never queued.

pub mod runner;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use std::time::Duration;

pub use runner::{JobRunner, JobRunnerHandle};

use crate::config::ScheduleConfig;

#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run once. The returned string is a one-line summary for the log.
    async fn run(&self) -> Result<String>;
}

/// Lifecycle of one job slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { summary: String, elapsed: Duration },
    Failed { error: String },
    /// The job was already running; this trigger did nothing.
    Skipped,
}

impl RunOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, RunOutcome::Failed { .. })
    }
}

/// Hours of the day during which scheduled ticks run jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start_hour: u8,
    end_hour: u8,
}

impl ActiveWindow {
    pub fn new(start_hour: u8, end_hour: u8) -> Self {
        Self {
            start_hour: start_hour.min(23),
            end_hour: end_hour.min(23),
        }
    }

    /// `None` unless both ends are configured, meaning "always active".
    pub fn from_config(schedule: &ScheduleConfig) -> Option<Self> {
        match (schedule.hours_start, schedule.hours_end) {
            (Some(start), Some(end)) => Some(Self::new(start, end)),
            _ => None,
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let hour = time.hour() as u8;
        if self.start_hour <= self.end_hour {
            // Normal range: 9-17
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // Overnight range: 22-6
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}
