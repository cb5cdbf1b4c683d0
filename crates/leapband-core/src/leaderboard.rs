//! Leaderboard compilation.
//!
//! A scheduled batch job over the full population. Users are bucketed into
//! cohorts by target-score band and preparation timeline, scored by a
//! composite consistency metric, and ranked descending. Each cohort's rows
//! are replaced atomically so readers never observe a half-written board.
//! A failing cohort is logged and skipped; the run continues. Cancellation
//! is cooperative and checked between cohorts, which are self-contained.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::config::LeaderboardConfig;
use crate::error::Result;
use crate::model::{NewLeaderboardEntry, Timeline, User};
use crate::store::EngagementStore;

/// Fixed target-score buckets. A user belongs to group `G` when their
/// target score lies in `(G - 0.5, G]`.
pub const SCORE_GROUPS: [f64; 8] = [5.0, 6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0];

/// Half-open band width below each score group.
const GROUP_BAND: f64 = 0.5;

/// Result of one compilation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileReport {
    /// Leaderboard entries written across all cohorts.
    pub entries_written: usize,
    /// Cohorts that were compiled and replaced.
    pub cohorts_compiled: usize,
    /// Cohorts skipped because the store failed for them.
    pub cohorts_failed: usize,
    /// True when the run stopped early on a cancellation request.
    pub cancelled: bool,
}

/// Compiles cohort leaderboards from engagement metrics.
pub struct LeaderboardCompiler<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a LeaderboardConfig,
}

impl<'a, S: EngagementStore> LeaderboardCompiler<'a, S> {
    pub fn new(store: &'a S, config: &'a LeaderboardConfig) -> Self {
        Self { store, config }
    }

    /// Compile every cohort. Per-cohort failures, including the user
    /// listing, are logged and counted in the report rather than returned;
    /// the run itself always completes.
    ///
    /// # Errors
    /// Reserved for future run-level failures; the current implementation
    /// always returns `Ok`.
    pub fn compile(&self, now: DateTime<Utc>) -> Result<CompileReport> {
        self.compile_with_cancel(now, &AtomicBool::new(false))
    }

    /// Compile every cohort, checking `cancel` between cohorts. Completed
    /// cohorts stay replaced when the run stops early.
    pub fn compile_with_cancel(
        &self,
        now: DateTime<Utc>,
        cancel: &AtomicBool,
    ) -> Result<CompileReport> {
        let mut report = CompileReport {
            entries_written: 0,
            cohorts_compiled: 0,
            cohorts_failed: 0,
            cancelled: false,
        };
        for group in SCORE_GROUPS {
            for timeline in Timeline::ALL {
                if cancel.load(Ordering::Relaxed) {
                    report.cancelled = true;
                    info!(
                        cohorts = report.cohorts_compiled,
                        "leaderboard compilation cancelled"
                    );
                    return Ok(report);
                }
                match self.compile_cohort(group, timeline, now) {
                    Ok(written) => {
                        report.entries_written += written;
                        report.cohorts_compiled += 1;
                    }
                    Err(err) => {
                        warn!(
                            score_group = group,
                            timeline = timeline.as_str(),
                            error = %err,
                            "cohort compilation failed, continuing"
                        );
                        report.cohorts_failed += 1;
                    }
                }
            }
        }
        info!(
            entries = report.entries_written,
            cohorts = report.cohorts_compiled,
            failed = report.cohorts_failed,
            "leaderboard compilation finished"
        );
        Ok(report)
    }

    /// Compile a single cohort and atomically replace its entries.
    ///
    /// Users with a consistency score of zero are left off the board. Ranks
    /// from the cohort's previous compilation are carried into
    /// `previous_rank` before the replace.
    ///
    /// # Errors
    /// Returns an error when a store query or the replace fails.
    pub fn compile_cohort(
        &self,
        score_group: f64,
        timeline: Timeline,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let members: Vec<User> = self
            .store
            .users_in_score_band(score_group - GROUP_BAND, score_group)?
            .into_iter()
            .filter(|u| u.timeline == timeline)
            .collect();
        if members.is_empty() {
            debug!(
                score_group,
                timeline = timeline.as_str(),
                "empty cohort skipped"
            );
            return Ok(0);
        }

        let previous: Vec<(i64, u32)> = self
            .store
            .leaderboard(score_group, timeline)?
            .iter()
            .map(|entry| (entry.user_id, entry.rank))
            .collect();

        let period_start = now - Duration::days(i64::from(self.config.period_days));
        let mut scored = Vec::with_capacity(members.len());
        for user in &members {
            let active_days = self.store.active_days(user.id, period_start)?;
            let completion_rate = self
                .store
                .goal_completion_rate(user.id, period_start.date_naive())?;
            let score = self.consistency_score(active_days, user.current_streak, completion_rate);
            if score > 0.0 {
                scored.push((user, score, active_days, completion_rate));
            }
        }
        // Stable sort keeps insertion order among ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let entries: Vec<NewLeaderboardEntry> = scored
            .iter()
            .enumerate()
            .map(|(i, (user, score, active_days, completion_rate))| NewLeaderboardEntry {
                user_id: user.id,
                score_group,
                timeline,
                rank: i as u32 + 1,
                previous_rank: previous
                    .iter()
                    .find(|(id, _)| *id == user.id)
                    .map(|(_, rank)| *rank),
                consistency_score: *score,
                active_days: *active_days,
                current_streak: user.current_streak,
                goal_completion_rate: *completion_rate,
                period_days: self.config.period_days,
                calculated_at: now,
            })
            .collect();

        let written = self
            .store
            .replace_leaderboard(score_group, timeline, &entries)?;
        debug!(
            score_group,
            timeline = timeline.as_str(),
            written,
            "cohort replaced"
        );
        Ok(written)
    }

    /// Composite 0-100 consistency metric, rounded to one decimal place.
    pub fn consistency_score(
        &self,
        active_days: u32,
        current_streak: u32,
        goal_completion_rate: f64,
    ) -> f64 {
        let period = f64::from(self.config.period_days);
        let active_ratio = (f64::from(active_days) / period).min(1.0);
        let streak_ratio = (f64::from(current_streak) / period).min(1.0);
        let raw = 100.0
            * (self.config.active_days_weight * active_ratio
                + self.config.streak_weight * streak_ratio
                + self.config.completion_weight * goal_completion_rate);
        (raw * 10.0).round() / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCompletion, NewUser, Skill};
    use crate::store::{EngagementStore, MemoryStore};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn add_member(store: &MemoryStore, name: &str, target: f64, streak: u32) -> User {
        let mut user = store
            .create_user(NewUser::new(name, target, Timeline::Medium).unwrap())
            .unwrap();
        user.current_streak = streak;
        store.save_user(&user).unwrap();
        user
    }

    fn practice(store: &MemoryStore, user: &User, days: u32, now: DateTime<Utc>) {
        for i in 0..days {
            store
                .insert_completion(NewCompletion {
                    user_id: user.id,
                    activity_id: 1,
                    skill: Skill::Reading,
                    score: 80.0,
                    points_earned: 8,
                    completed_at: now - Duration::days(i64::from(i)),
                })
                .unwrap();
        }
    }

    #[test]
    fn consistency_score_matches_the_weighted_formula() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        // 15/30 active days, streak 15/30, half the goals done:
        // 100 * (0.4*0.5 + 0.3*0.5 + 0.3*0.5) = 50.0
        assert_eq!(compiler.consistency_score(15, 15, 0.5), 50.0);
        // Streak saturates at the period length.
        assert_eq!(compiler.consistency_score(30, 90, 1.0), 100.0);
        assert_eq!(compiler.consistency_score(0, 0, 0.0), 0.0);
        // One-decimal rounding: 100 * 0.4 * (7/30) = 9.333...
        assert_eq!(compiler.consistency_score(7, 0, 0.0), 9.3);
    }

    #[test]
    fn inactive_users_stay_off_the_board() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let now = at(2025, 3, 4);
        let active = add_member(&store, "active", 7.0, 5);
        add_member(&store, "idle", 7.0, 0);
        practice(&store, &active, 5, now);

        let written = compiler.compile_cohort(7.0, Timeline::Medium, now).unwrap();
        assert_eq!(written, 1);
        let board = store.leaderboard(7.0, Timeline::Medium).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, active.id);
        assert_eq!(board[0].rank, 1);
    }

    #[test]
    fn ranking_orders_by_consistency_descending() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let now = at(2025, 3, 4);
        let casual = add_member(&store, "casual", 7.0, 2);
        let steady = add_member(&store, "steady", 7.0, 20);
        practice(&store, &casual, 2, now);
        practice(&store, &steady, 20, now);

        compiler.compile_cohort(7.0, Timeline::Medium, now).unwrap();
        let board = store.leaderboard(7.0, Timeline::Medium).unwrap();
        assert_eq!(board[0].user_id, steady.id);
        assert_eq!(board[1].user_id, casual.id);
        assert!(board[0].consistency_score > board[1].consistency_score);
    }

    #[test]
    fn band_membership_is_half_open() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let now = at(2025, 3, 4);
        // 6.4 is in (6.0, 6.5], 6.5 exactly is too, 6.6 is not.
        let inside = add_member(&store, "inside", 6.4, 5);
        let boundary = add_member(&store, "boundary", 6.5, 5);
        let outside = add_member(&store, "outside", 6.6, 5);
        for user in [&inside, &boundary, &outside] {
            practice(&store, user, 5, now);
        }

        compiler.compile_cohort(6.5, Timeline::Medium, now).unwrap();
        let ids: Vec<_> = store
            .leaderboard(6.5, Timeline::Medium)
            .unwrap()
            .iter()
            .map(|e| e.user_id)
            .collect();
        assert!(ids.contains(&inside.id));
        assert!(ids.contains(&boundary.id));
        assert!(!ids.contains(&outside.id));
    }

    #[test]
    fn recompilation_replaces_and_carries_previous_rank() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let now = at(2025, 3, 4);
        // alice: 100*(0.4*5/30 + 0.3*5/30) = 11.7; bobby: 9.3.
        let mut alice = add_member(&store, "alice", 7.0, 5);
        let bob = add_member(&store, "bobby", 7.0, 4);
        practice(&store, &alice, 5, now);
        practice(&store, &bob, 4, now);

        compiler.compile_cohort(7.0, Timeline::Medium, now).unwrap();
        let board = store.leaderboard(7.0, Timeline::Medium).unwrap();
        assert_eq!(board[0].previous_rank, None);

        // Alice loses her streak (11.7 drops to 6.7); the next cycle flips
        // the order.
        alice.current_streak = 0;
        store.save_user(&alice).unwrap();
        let later = now + Duration::days(1);
        compiler
            .compile_cohort(7.0, Timeline::Medium, later)
            .unwrap();
        let board = store.leaderboard(7.0, Timeline::Medium).unwrap();
        assert_eq!(board[0].user_id, bob.id);
        assert_eq!(board[0].previous_rank, Some(2));
        assert_eq!(board[1].user_id, alice.id);
        assert_eq!(board[1].previous_rank, Some(1));
    }

    #[test]
    fn full_run_covers_all_cohorts() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let now = at(2025, 3, 4);
        let member = add_member(&store, "amara", 7.0, 5);
        practice(&store, &member, 5, now);

        let report = compiler.compile(now).unwrap();
        assert_eq!(report.entries_written, 1);
        assert_eq!(
            report.cohorts_compiled,
            SCORE_GROUPS.len() * Timeline::ALL.len()
        );
        assert_eq!(report.cohorts_failed, 0);
        assert!(!report.cancelled);
    }

    #[test]
    fn cancellation_stops_before_any_work() {
        let store = MemoryStore::new();
        let config = LeaderboardConfig::default();
        let compiler = LeaderboardCompiler::new(&store, &config);
        let cancel = AtomicBool::new(true);
        let report = compiler
            .compile_with_cancel(at(2025, 3, 4), &cancel)
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.cohorts_compiled, 0);
    }
}
