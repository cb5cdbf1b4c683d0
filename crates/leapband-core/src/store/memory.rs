//! In-memory record store.
//!
//! Backs the algorithm unit tests and small embedded deployments. All
//! collections live behind one mutex, which also serializes the compound
//! operations (goal upsert, unlock get-or-create, skill update, cohort
//! replace) that the SQLite store serializes with transactions.

use std::collections::BTreeSet;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;
use crate::model::{
    Activity, ActivityId, Completion, DailyGoal, IncentiveKind, IncentiveUnlock,
    LeaderboardEntry, NewActivity, NewCompletion, NewGoal, NewLeaderboardEntry,
    NewSkillProgress, NewStreakEvent, NewUser, Skill, SkillProgress, StreakEvent, Timeline,
    User, UserId,
};

use super::EngagementStore;

#[derive(Default)]
struct Inner {
    users: Vec<User>,
    activities: Vec<Activity>,
    completions: Vec<Completion>,
    goals: Vec<DailyGoal>,
    streak_events: Vec<StreakEvent>,
    skill_progress: Vec<SkillProgress>,
    leaderboard: Vec<LeaderboardEntry>,
    unlocks: Vec<IncentiveUnlock>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Mutex-guarded in-memory implementation of [`EngagementStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Locked)
    }
}

impl EngagementStore for MemoryStore {
    fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let user = User {
            id,
            name: new.name,
            target_score: new.target_score,
            timeline: new.timeline,
            reading_level: 0.0,
            writing_level: 0.0,
            listening_level: 0.0,
            speaking_level: 0.0,
            total_points: 0,
            total_activities: 0,
            current_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            created_at: Utc::now(),
        };
        inner.users.push(user.clone());
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.users.iter_mut().find(|u| u.id == user.id) {
            Some(slot) => {
                *slot = user.clone();
                Ok(())
            }
            None => Err(StoreError::QueryFailed(format!(
                "user {} does not exist",
                user.id
            ))),
        }
    }

    fn users_in_score_band(
        &self,
        min_exclusive: f64,
        max_inclusive: f64,
    ) -> Result<Vec<User>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .users
            .iter()
            .filter(|u| u.target_score > min_exclusive && u.target_score <= max_inclusive)
            .cloned()
            .collect())
    }

    fn create_activity(&self, new: NewActivity) -> Result<Activity, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let activity = Activity {
            id,
            title: new.title,
            skill: new.skill,
            difficulty: new.difficulty,
            duration_minutes: new.duration_minutes,
            points_reward: new.points_reward,
            created_at: Utc::now(),
        };
        inner.activities.push(activity.clone());
        Ok(activity)
    }

    fn activity(&self, id: ActivityId) -> Result<Option<Activity>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.activities.iter().find(|a| a.id == id).cloned())
    }

    fn activities_by_skill_and_duration(
        &self,
        skill: Skill,
        min_minutes: u32,
        max_minutes: u32,
    ) -> Result<Vec<Activity>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .activities
            .iter()
            .filter(|a| {
                a.skill == skill
                    && a.duration_minutes >= min_minutes
                    && a.duration_minutes <= max_minutes
            })
            .cloned()
            .collect())
    }

    fn insert_completion(&self, new: NewCompletion) -> Result<Completion, StoreError> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        let completion = Completion {
            id,
            user_id: new.user_id,
            activity_id: new.activity_id,
            skill: new.skill,
            score: new.score,
            points_earned: new.points_earned,
            completed_at: new.completed_at,
        };
        inner.completions.push(completion.clone());
        Ok(completion)
    }

    fn recent_completions(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError> {
        let inner = self.lock()?;
        let mut rows: Vec<Completion> = inner
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.completed_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn completions_by_skill(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError> {
        let inner = self.lock()?;
        let mut rows: Vec<Completion> = inner
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.skill == skill)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn skill_completion_count(&self, user_id: UserId, skill: Skill) -> Result<u64, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.skill == skill)
            .count() as u64)
    }

    fn active_days(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u32, StoreError> {
        let inner = self.lock()?;
        let days: BTreeSet<NaiveDate> = inner
            .completions
            .iter()
            .filter(|c| c.user_id == user_id && c.completed_at >= since)
            .map(|c| c.completed_at.date_naive())
            .collect();
        Ok(days.len() as u32)
    }

    fn goal_for_day(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> Result<Option<DailyGoal>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .goals
            .iter()
            .find(|g| g.user_id == user_id && g.assigned_on == day)
            .cloned())
    }

    fn insert_goal(&self, new: NewGoal) -> Result<DailyGoal, StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .goals
            .iter()
            .find(|g| g.user_id == new.user_id && g.assigned_on == new.assigned_on)
        {
            return Ok(existing.clone());
        }
        let id = inner.next_id();
        let goal = DailyGoal {
            id,
            user_id: new.user_id,
            activity_id: new.activity_id,
            assigned_on: new.assigned_on,
            target_skill: new.target_skill,
            skill_gap: new.skill_gap,
            priority_score: new.priority_score,
            completed: false,
            completed_at: None,
            completion_score: None,
        };
        inner.goals.push(goal.clone());
        Ok(goal)
    }

    fn goals_in_range(
        &self,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyGoal>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .goals
            .iter()
            .filter(|g| g.user_id == user_id && g.assigned_on >= start && g.assigned_on <= end)
            .cloned()
            .collect())
    }

    fn goal_completion_rate(&self, user_id: UserId, since: NaiveDate) -> Result<f64, StoreError> {
        let inner = self.lock()?;
        let in_window: Vec<&DailyGoal> = inner
            .goals
            .iter()
            .filter(|g| g.user_id == user_id && g.assigned_on >= since)
            .collect();
        if in_window.is_empty() {
            return Ok(0.0);
        }
        let completed = in_window.iter().filter(|g| g.completed).count();
        Ok(completed as f64 / in_window.len() as f64)
    }

    fn complete_goal(
        &self,
        goal_id: i64,
        score: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let goal = inner
            .goals
            .iter_mut()
            .find(|g| g.id == goal_id)
            .ok_or_else(|| StoreError::QueryFailed(format!("goal {goal_id} does not exist")))?;
        if !goal.completed {
            goal.completed = true;
            goal.completed_at = Some(at);
            goal.completion_score = Some(score);
        }
        Ok(())
    }

    fn append_streak_event(&self, event: NewStreakEvent) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        inner.streak_events.push(StreakEvent {
            id,
            user_id: event.user_id,
            kind: event.kind,
            streak_count: event.streak_count,
            occurred_at: event.occurred_at,
        });
        Ok(())
    }

    fn streak_events(&self, user_id: UserId) -> Result<Vec<StreakEvent>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .streak_events
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }

    fn record_skill_update(
        &self,
        user: &User,
        progress: NewSkillProgress,
    ) -> Result<SkillProgress, StoreError> {
        let mut inner = self.lock()?;
        // Both writes happen under the same lock, mirroring the SQLite
        // transaction.
        match inner.users.iter_mut().find(|u| u.id == user.id) {
            Some(slot) => *slot = user.clone(),
            None => {
                return Err(StoreError::QueryFailed(format!(
                    "user {} does not exist",
                    user.id
                )))
            }
        }
        let id = inner.next_id();
        let snapshot = SkillProgress {
            id,
            user_id: progress.user_id,
            skill: progress.skill,
            previous_level: progress.previous_level,
            new_level: progress.new_level,
            adjustment: progress.adjustment,
            trigger_count: progress.trigger_count,
            recent_scores: progress.recent_scores,
            recorded_at: progress.recorded_at,
        };
        inner.skill_progress.push(snapshot.clone());
        Ok(snapshot)
    }

    fn skill_progress(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<SkillProgress>, StoreError> {
        let inner = self.lock()?;
        let mut rows: Vec<SkillProgress> = inner
            .skill_progress
            .iter()
            .filter(|p| p.user_id == user_id && p.skill == skill)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let inner = self.lock()?;
        let mut rows: Vec<LeaderboardEntry> = inner
            .leaderboard
            .iter()
            .filter(|e| e.score_group == score_group && e.timeline == timeline)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.rank);
        Ok(rows)
    }

    fn replace_leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
        entries: &[NewLeaderboardEntry],
    ) -> Result<usize, StoreError> {
        let mut inner = self.lock()?;
        inner
            .leaderboard
            .retain(|e| !(e.score_group == score_group && e.timeline == timeline));
        for entry in entries {
            let id = inner.next_id();
            inner.leaderboard.push(LeaderboardEntry {
                id,
                user_id: entry.user_id,
                score_group: entry.score_group,
                timeline: entry.timeline,
                rank: entry.rank,
                previous_rank: entry.previous_rank,
                consistency_score: entry.consistency_score,
                active_days: entry.active_days,
                current_streak: entry.current_streak,
                goal_completion_rate: entry.goal_completion_rate,
                period_days: entry.period_days,
                calculated_at: entry.calculated_at,
            });
        }
        Ok(entries.len())
    }

    fn unlocks_for_user(&self, user_id: UserId) -> Result<Vec<IncentiveUnlock>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .unlocks
            .iter()
            .filter(|u| u.user_id == user_id)
            .cloned()
            .collect())
    }

    fn get_or_create_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        criteria: &str,
        at: DateTime<Utc>,
    ) -> Result<(IncentiveUnlock, bool), StoreError> {
        let mut inner = self.lock()?;
        if let Some(existing) = inner
            .unlocks
            .iter()
            .find(|u| u.user_id == user_id && u.kind == kind)
        {
            return Ok((existing.clone(), false));
        }
        let id = inner.next_id();
        let unlock = IncentiveUnlock {
            id,
            user_id,
            kind,
            criteria: criteria.to_string(),
            unlocked_at: at,
            claimed_at: None,
        };
        inner.unlocks.push(unlock.clone());
        Ok((unlock, true))
    }

    fn claim_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        at: DateTime<Utc>,
    ) -> Result<Option<IncentiveUnlock>, StoreError> {
        let mut inner = self.lock()?;
        let unlock = inner
            .unlocks
            .iter_mut()
            .find(|u| u.user_id == user_id && u.kind == kind);
        Ok(unlock.map(|u| {
            if u.claimed_at.is_none() {
                u.claimed_at = Some(at);
            }
            u.clone()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Difficulty;

    #[test]
    fn goal_insert_is_idempotent_per_day() {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser::new("amara", 7.0, Timeline::Medium).unwrap())
            .unwrap();
        let day = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let new = NewGoal {
            user_id: user.id,
            activity_id: 99,
            assigned_on: day,
            target_skill: Skill::Writing,
            skill_gap: 2.0,
            priority_score: 4.0,
        };
        let first = store.insert_goal(new.clone()).unwrap();
        let second = store.insert_goal(new).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.goals_in_range(user.id, day, day).unwrap().len(), 1);
    }

    #[test]
    fn unlock_is_unique_per_kind() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let (first, created) = store
            .get_or_create_unlock(1, IncentiveKind::CounselingTier1, "streak 7", now)
            .unwrap();
        assert!(created);
        let (second, created) = store
            .get_or_create_unlock(1, IncentiveKind::CounselingTier1, "points 500", now)
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.criteria, "streak 7");
    }

    #[test]
    fn claim_sets_timestamp_once() {
        let store = MemoryStore::new();
        let first_at = Utc::now();
        store
            .get_or_create_unlock(1, IncentiveKind::PremiumContent, "streak 14", first_at)
            .unwrap();
        let claimed = store
            .claim_unlock(1, IncentiveKind::PremiumContent, first_at)
            .unwrap()
            .unwrap();
        assert_eq!(claimed.claimed_at, Some(first_at));
        let later = first_at + chrono::Duration::hours(1);
        let reclaimed = store
            .claim_unlock(1, IncentiveKind::PremiumContent, later)
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.claimed_at, Some(first_at));
    }

    #[test]
    fn active_days_counts_distinct_dates() {
        let store = MemoryStore::new();
        let base = Utc::now();
        for hours in [0, 2, 26] {
            store
                .insert_completion(NewCompletion {
                    user_id: 1,
                    activity_id: 1,
                    skill: Skill::Reading,
                    score: 80.0,
                    points_earned: 8,
                    completed_at: base + chrono::Duration::hours(hours),
                })
                .unwrap();
        }
        let days = store
            .active_days(1, base - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(days, 2);
    }

    #[test]
    fn replace_leaderboard_drops_stale_rows() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let entry = |user_id, rank| NewLeaderboardEntry {
            user_id,
            score_group: 7.0,
            timeline: Timeline::Medium,
            rank,
            previous_rank: None,
            consistency_score: 50.0,
            active_days: 10,
            current_streak: 3,
            goal_completion_rate: 0.5,
            period_days: 30,
            calculated_at: now,
        };
        store
            .replace_leaderboard(7.0, Timeline::Medium, &[entry(1, 1), entry(2, 2)])
            .unwrap();
        store
            .replace_leaderboard(7.0, Timeline::Medium, &[entry(2, 1)])
            .unwrap();
        let rows = store.leaderboard(7.0, Timeline::Medium).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, 2);
    }

    #[test]
    fn catalog_filter_honors_duration_window() {
        let store = MemoryStore::new();
        for minutes in [5, 10, 20] {
            store
                .create_activity(
                    NewActivity::new(
                        &format!("Drill {minutes}"),
                        Skill::Listening,
                        Difficulty::Beginner,
                        minutes,
                        10,
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        let eligible = store
            .activities_by_skill_and_duration(Skill::Listening, 5, 15)
            .unwrap();
        assert_eq!(eligible.len(), 2);
    }
}
