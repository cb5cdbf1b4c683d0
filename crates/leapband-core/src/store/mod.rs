//! Record store interfaces and implementations.
//!
//! The engine talks to durable storage through the narrow
//! [`EngagementStore`] trait and is otherwise storage-agnostic. Two
//! implementations ship with the crate: [`SqliteStore`] for durable storage
//! and [`MemoryStore`] for algorithm tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::model::{
    Activity, ActivityId, Completion, DailyGoal, IncentiveKind, IncentiveUnlock,
    LeaderboardEntry, NewActivity, NewCompletion, NewGoal, NewLeaderboardEntry,
    NewSkillProgress, NewStreakEvent, NewUser, Skill, SkillProgress, StreakEvent, Timeline,
    User, UserId,
};

/// Narrow read/write interface to the record store.
///
/// Query methods that filter by time take explicit cutoffs computed by the
/// caller; the store never consults the wall clock. Implementations must
/// honor the documented atomicity contracts: the goal insert is an upsert
/// keyed by (user, day), the unlock insert is unique per (user, kind),
/// the skill update writes user and snapshot together, and the leaderboard
/// replace is a single transaction per cohort.
pub trait EngagementStore {
    // --- users ---

    fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    fn save_user(&self, user: &User) -> Result<(), StoreError>;

    /// Users whose target score lies in `(min_exclusive, max_inclusive]`.
    fn users_in_score_band(
        &self,
        min_exclusive: f64,
        max_inclusive: f64,
    ) -> Result<Vec<User>, StoreError>;

    // --- activity catalog ---

    fn create_activity(&self, new: NewActivity) -> Result<Activity, StoreError>;

    fn activity(&self, id: ActivityId) -> Result<Option<Activity>, StoreError>;

    /// Activities of `skill` with duration inside `[min_minutes, max_minutes]`.
    fn activities_by_skill_and_duration(
        &self,
        skill: Skill,
        min_minutes: u32,
        max_minutes: u32,
    ) -> Result<Vec<Activity>, StoreError>;

    // --- completions ---

    fn insert_completion(&self, new: NewCompletion) -> Result<Completion, StoreError>;

    /// Completions at or after `since`, newest first, capped at `limit`.
    fn recent_completions(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError>;

    /// Completions for one skill, newest first, capped at `limit`.
    fn completions_by_skill(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError>;

    fn skill_completion_count(&self, user_id: UserId, skill: Skill) -> Result<u64, StoreError>;

    /// Distinct calendar days with at least one completion at or after `since`.
    fn active_days(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u32, StoreError>;

    // --- daily goals ---

    fn goal_for_day(&self, user_id: UserId, day: NaiveDate) -> Result<Option<DailyGoal>, StoreError>;

    /// Insert a goal, keyed by (user, day). If a goal for that day already
    /// exists the existing row is returned unchanged, making concurrent
    /// check-then-create races safe.
    fn insert_goal(&self, new: NewGoal) -> Result<DailyGoal, StoreError>;

    /// Goals assigned on days in `[start, end]`, inclusive.
    fn goals_in_range(
        &self,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyGoal>, StoreError>;

    /// Fraction of goals assigned on or after `since` that were completed.
    /// Zero when no goals were assigned in the window.
    fn goal_completion_rate(&self, user_id: UserId, since: NaiveDate) -> Result<f64, StoreError>;

    /// Mark a goal completed. Re-completing is a no-op.
    fn complete_goal(&self, goal_id: i64, score: f64, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    // --- streak ledger ---

    fn append_streak_event(&self, event: NewStreakEvent) -> Result<(), StoreError>;

    fn streak_events(&self, user_id: UserId) -> Result<Vec<StreakEvent>, StoreError>;

    // --- skill progress ---

    /// Persist the user's updated skill levels and the progress snapshot
    /// atomically: either both writes land or neither is visible.
    fn record_skill_update(
        &self,
        user: &User,
        progress: NewSkillProgress,
    ) -> Result<SkillProgress, StoreError>;

    fn skill_progress(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<SkillProgress>, StoreError>;

    // --- leaderboard ---

    /// Entries for one cohort, ordered by rank.
    fn leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
    ) -> Result<Vec<LeaderboardEntry>, StoreError>;

    /// Atomically delete the cohort's previous entries and insert the fresh
    /// set. Returns the number of entries written.
    fn replace_leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
        entries: &[NewLeaderboardEntry],
    ) -> Result<usize, StoreError>;

    // --- incentives ---

    fn unlocks_for_user(&self, user_id: UserId) -> Result<Vec<IncentiveUnlock>, StoreError>;

    /// Create an unlock unless one exists for (user, kind). The boolean is
    /// true when this call created the row.
    fn get_or_create_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        criteria: &str,
        at: DateTime<Utc>,
    ) -> Result<(IncentiveUnlock, bool), StoreError>;

    /// Set `claimed_at` once; re-claiming leaves the original timestamp.
    /// Returns `None` when no unlock exists for (user, kind).
    fn claim_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        at: DateTime<Utc>,
    ) -> Result<Option<IncentiveUnlock>, StoreError>;
}
