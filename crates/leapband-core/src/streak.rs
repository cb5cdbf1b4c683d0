//! Daily streak tracking.
//!
//! A streak counts consecutive calendar days with at least one completed
//! activity. The day gap is measured between the user's last recorded
//! activity date and the current activity, both in UTC. A gap of exactly
//! three days bridging Friday to Monday continues the streak when weekend
//! recovery is enabled.
//!
//! [`StreakTracker::advance`] reads `last_activity_date` but never writes
//! it; the caller stamps the new activity time after the streak has been
//! advanced against the prior date.

use chrono::{DateTime, Datelike, Utc, Weekday};
use tracing::{debug, info};

use crate::config::StreakConfig;
use crate::error::Result;
use crate::model::{NewStreakEvent, StreakEventKind, User};
use crate::store::EngagementStore;

/// Streak milestones surfaced in [`StreakStatus`].
pub const MILESTONES: [u32; 5] = [7, 14, 30, 60, 100];

/// Outcome of advancing a user's streak for one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakOutcome {
    /// First tracked activity, streak starts at 1.
    Started,
    /// Another activity on an already-counted day; nothing changes.
    SameDay,
    /// Activity on the next calendar day.
    Continued { streak: u32 },
    /// A Friday-to-Monday gap bridged by weekend recovery.
    Recovered { streak: u32 },
    /// The gap was too long; the old streak ended and a new one started.
    Broken { previous: u32, streak: u32 },
}

/// Read-only streak summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakStatus {
    pub current: u32,
    pub longest: u32,
    /// Whole calendar days since the last activity, `None` before the first.
    pub days_since_last: Option<i64>,
    /// True when the streak will break unless the user is active today.
    pub at_risk: bool,
    /// The next milestone the current streak has not reached yet.
    pub next_milestone: Option<u32>,
}

/// Advances per-user streak counters and appends streak ledger events.
pub struct StreakTracker<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a StreakConfig,
}

impl<'a, S: EngagementStore> StreakTracker<'a, S> {
    pub fn new(store: &'a S, config: &'a StreakConfig) -> Self {
        Self { store, config }
    }

    /// Advance the streak for an activity completed at `now`.
    ///
    /// Persists the updated counters and ledger events for every outcome
    /// except [`StreakOutcome::SameDay`]. Does not modify
    /// `last_activity_date`.
    ///
    /// # Errors
    /// Returns an error when the store rejects a write.
    pub fn advance(&self, user: &mut User, now: DateTime<Utc>) -> Result<StreakOutcome> {
        let outcome = match user.last_activity_date {
            None => {
                user.current_streak = 1;
                self.store.append_streak_event(NewStreakEvent {
                    user_id: user.id,
                    kind: StreakEventKind::Started,
                    streak_count: 1,
                    occurred_at: now,
                })?;
                info!(user_id = user.id, "streak started");
                StreakOutcome::Started
            }
            Some(last) => {
                let gap = (now.date_naive() - last.date_naive()).num_days();
                match gap {
                    i64::MIN..=0 => {
                        debug!(user_id = user.id, "same-day activity, streak unchanged");
                        return Ok(StreakOutcome::SameDay);
                    }
                    1 => {
                        user.current_streak += 1;
                        debug!(
                            user_id = user.id,
                            streak = user.current_streak,
                            "streak continued"
                        );
                        StreakOutcome::Continued {
                            streak: user.current_streak,
                        }
                    }
                    3 if self.is_weekend_recovery(last, now) => {
                        user.current_streak += 1;
                        self.store.append_streak_event(NewStreakEvent {
                            user_id: user.id,
                            kind: StreakEventKind::Recovered,
                            streak_count: user.current_streak,
                            occurred_at: now,
                        })?;
                        info!(
                            user_id = user.id,
                            streak = user.current_streak,
                            "weekend recovery bridged the gap"
                        );
                        StreakOutcome::Recovered {
                            streak: user.current_streak,
                        }
                    }
                    _ => {
                        let previous = user.current_streak;
                        user.current_streak = 1;
                        self.store.append_streak_event(NewStreakEvent {
                            user_id: user.id,
                            kind: StreakEventKind::Broken,
                            streak_count: previous,
                            occurred_at: now,
                        })?;
                        self.store.append_streak_event(NewStreakEvent {
                            user_id: user.id,
                            kind: StreakEventKind::Started,
                            streak_count: 1,
                            occurred_at: now,
                        })?;
                        info!(
                            user_id = user.id,
                            previous, gap, "streak broken, restarting at 1"
                        );
                        StreakOutcome::Broken {
                            previous,
                            streak: 1,
                        }
                    }
                }
            }
        };
        if user.current_streak > user.longest_streak {
            user.longest_streak = user.current_streak;
        }
        self.store.save_user(user)?;
        Ok(outcome)
    }

    /// Summarize the user's streak relative to `now` without mutating it.
    pub fn status(&self, user: &User, now: DateTime<Utc>) -> StreakStatus {
        let days_since_last = user
            .last_activity_date
            .map(|last| (now.date_naive() - last.date_naive()).num_days());
        StreakStatus {
            current: user.current_streak,
            longest: user.longest_streak,
            days_since_last,
            at_risk: user.current_streak > 0 && days_since_last == Some(1),
            next_milestone: MILESTONES
                .iter()
                .copied()
                .find(|m| *m > user.current_streak),
        }
    }

    fn is_weekend_recovery(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.config.weekend_recovery_enabled
            && last.weekday() == Weekday::Fri
            && now.weekday() == Weekday::Mon
    }
}
