//! SQLite-backed record store.
//!
//! Timestamps are stored as RFC 3339 text and calendar days as `YYYY-MM-DD`
//! text, so lexicographic comparison matches chronological order. Unique
//! indexes enforce the (user, day) goal key and the (user, incentive)
//! unlock key; the compound updates run inside transactions.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::model::{
    Activity, ActivityId, Completion, DailyGoal, IncentiveKind, IncentiveUnlock,
    LeaderboardEntry, NewActivity, NewCompletion, NewGoal, NewLeaderboardEntry,
    NewSkillProgress, NewStreakEvent, NewUser, Skill, SkillProgress, StreakEvent, StreakEventKind,
    Timeline, User, UserId,
};

use super::EngagementStore;

/// SQLite implementation of [`EngagementStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (and migrate) a store at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(StoreError::from)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for tests).
    pub fn open_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                    name               TEXT NOT NULL,
                    target_score       REAL NOT NULL,
                    timeline           TEXT NOT NULL,
                    reading_level      REAL NOT NULL DEFAULT 0,
                    writing_level      REAL NOT NULL DEFAULT 0,
                    listening_level    REAL NOT NULL DEFAULT 0,
                    speaking_level     REAL NOT NULL DEFAULT 0,
                    total_points       INTEGER NOT NULL DEFAULT 0,
                    total_activities   INTEGER NOT NULL DEFAULT 0,
                    current_streak     INTEGER NOT NULL DEFAULT 0,
                    longest_streak     INTEGER NOT NULL DEFAULT 0,
                    last_activity_date TEXT,
                    created_at         TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS activities (
                    id               INTEGER PRIMARY KEY AUTOINCREMENT,
                    title            TEXT NOT NULL,
                    skill            TEXT NOT NULL,
                    difficulty       TEXT NOT NULL,
                    duration_minutes INTEGER NOT NULL,
                    points_reward    INTEGER NOT NULL,
                    created_at       TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS completions (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id       INTEGER NOT NULL,
                    activity_id   INTEGER NOT NULL,
                    skill         TEXT NOT NULL,
                    score         REAL NOT NULL,
                    points_earned INTEGER NOT NULL,
                    completed_at  TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS daily_goals (
                    id               INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id          INTEGER NOT NULL,
                    activity_id      INTEGER NOT NULL,
                    assigned_on      TEXT NOT NULL,
                    target_skill     TEXT NOT NULL,
                    skill_gap        REAL NOT NULL,
                    priority_score   REAL NOT NULL,
                    completed        INTEGER NOT NULL DEFAULT 0,
                    completed_at     TEXT,
                    completion_score REAL,
                    UNIQUE(user_id, assigned_on)
                );

                CREATE TABLE IF NOT EXISTS streak_events (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id      INTEGER NOT NULL,
                    kind         TEXT NOT NULL,
                    streak_count INTEGER NOT NULL,
                    occurred_at  TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS skill_progress (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id        INTEGER NOT NULL,
                    skill          TEXT NOT NULL,
                    previous_level REAL NOT NULL,
                    new_level      REAL NOT NULL,
                    adjustment     REAL NOT NULL,
                    trigger_count  INTEGER NOT NULL,
                    recent_scores  TEXT NOT NULL,
                    recorded_at    TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS leaderboard_entries (
                    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id              INTEGER NOT NULL,
                    score_group          REAL NOT NULL,
                    timeline             TEXT NOT NULL,
                    rank                 INTEGER NOT NULL,
                    previous_rank        INTEGER,
                    consistency_score    REAL NOT NULL,
                    active_days          INTEGER NOT NULL,
                    current_streak       INTEGER NOT NULL,
                    goal_completion_rate REAL NOT NULL,
                    period_days          INTEGER NOT NULL,
                    calculated_at        TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS incentive_unlocks (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id     INTEGER NOT NULL,
                    kind        TEXT NOT NULL,
                    criteria    TEXT NOT NULL,
                    unlocked_at TEXT NOT NULL,
                    claimed_at  TEXT,
                    UNIQUE(user_id, kind)
                );

                CREATE INDEX IF NOT EXISTS idx_users_target_timeline
                    ON users(target_score, timeline);
                CREATE INDEX IF NOT EXISTS idx_completions_user_date
                    ON completions(user_id, completed_at);
                CREATE INDEX IF NOT EXISTS idx_completions_user_skill
                    ON completions(user_id, skill, completed_at);
                CREATE INDEX IF NOT EXISTS idx_activities_skill_duration
                    ON activities(skill, duration_minutes);
                CREATE INDEX IF NOT EXISTS idx_goals_user_date
                    ON daily_goals(user_id, assigned_on);
                CREATE INDEX IF NOT EXISTS idx_leaderboard_cohort_rank
                    ON leaderboard_entries(score_group, timeline, rank);",
            )
            .map_err(StoreError::from)
    }
}

const USER_COLUMNS: &str = "id, name, target_score, timeline, reading_level, writing_level, \
     listening_level, speaking_level, total_points, total_activities, current_streak, \
     longest_streak, last_activity_date, created_at";

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_day(idx: usize, s: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn bad_variant(idx: usize, s: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unknown variant '{s}'").into(),
    )
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let timeline: String = row.get(3)?;
    let last_activity: Option<String> = row.get(12)?;
    let created: String = row.get(13)?;
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        target_score: row.get(2)?,
        timeline: Timeline::parse(&timeline).ok_or_else(|| bad_variant(3, &timeline))?,
        reading_level: row.get(4)?,
        writing_level: row.get(5)?,
        listening_level: row.get(6)?,
        speaking_level: row.get(7)?,
        total_points: row.get(8)?,
        total_activities: row.get(9)?,
        current_streak: row.get::<_, i64>(10)? as u32,
        longest_streak: row.get::<_, i64>(11)? as u32,
        last_activity_date: last_activity.as_deref().map(|s| parse_ts(12, s)).transpose()?,
        created_at: parse_ts(13, &created)?,
    })
}

fn map_activity(row: &Row<'_>) -> rusqlite::Result<Activity> {
    let skill: String = row.get(2)?;
    let difficulty: String = row.get(3)?;
    let created: String = row.get(6)?;
    Ok(Activity {
        id: row.get(0)?,
        title: row.get(1)?,
        skill: Skill::parse(&skill).ok_or_else(|| bad_variant(2, &skill))?,
        difficulty: crate::model::Difficulty::parse(&difficulty)
            .ok_or_else(|| bad_variant(3, &difficulty))?,
        duration_minutes: row.get::<_, i64>(4)? as u32,
        points_reward: row.get::<_, i64>(5)? as u32,
        created_at: parse_ts(6, &created)?,
    })
}

fn map_completion(row: &Row<'_>) -> rusqlite::Result<Completion> {
    let skill: String = row.get(3)?;
    let completed: String = row.get(6)?;
    Ok(Completion {
        id: row.get(0)?,
        user_id: row.get(1)?,
        activity_id: row.get(2)?,
        skill: Skill::parse(&skill).ok_or_else(|| bad_variant(3, &skill))?,
        score: row.get(4)?,
        points_earned: row.get(5)?,
        completed_at: parse_ts(6, &completed)?,
    })
}

fn map_goal(row: &Row<'_>) -> rusqlite::Result<DailyGoal> {
    let assigned: String = row.get(3)?;
    let skill: String = row.get(4)?;
    let completed_at: Option<String> = row.get(8)?;
    Ok(DailyGoal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        activity_id: row.get(2)?,
        assigned_on: parse_day(3, &assigned)?,
        target_skill: Skill::parse(&skill).ok_or_else(|| bad_variant(4, &skill))?,
        skill_gap: row.get(5)?,
        priority_score: row.get(6)?,
        completed: row.get(7)?,
        completed_at: completed_at.as_deref().map(|s| parse_ts(8, s)).transpose()?,
        completion_score: row.get(9)?,
    })
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<LeaderboardEntry> {
    let timeline: String = row.get(3)?;
    let calculated: String = row.get(11)?;
    Ok(LeaderboardEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        score_group: row.get(2)?,
        timeline: Timeline::parse(&timeline).ok_or_else(|| bad_variant(3, &timeline))?,
        rank: row.get::<_, i64>(4)? as u32,
        previous_rank: row.get::<_, Option<i64>>(5)?.map(|r| r as u32),
        consistency_score: row.get(6)?,
        active_days: row.get::<_, i64>(7)? as u32,
        current_streak: row.get::<_, i64>(8)? as u32,
        goal_completion_rate: row.get(9)?,
        period_days: row.get::<_, i64>(10)? as u32,
        calculated_at: parse_ts(11, &calculated)?,
    })
}

fn map_unlock(row: &Row<'_>) -> rusqlite::Result<IncentiveUnlock> {
    let kind: String = row.get(2)?;
    let unlocked: String = row.get(4)?;
    let claimed: Option<String> = row.get(5)?;
    Ok(IncentiveUnlock {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: IncentiveKind::parse(&kind).ok_or_else(|| bad_variant(2, &kind))?,
        criteria: row.get(3)?,
        unlocked_at: parse_ts(4, &unlocked)?,
        claimed_at: claimed.as_deref().map(|s| parse_ts(5, s)).transpose()?,
    })
}

impl EngagementStore for SqliteStore {
    fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO users (name, target_score, timeline, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.name,
                new.target_score,
                new.timeline.as_str(),
                created_at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.user(id)?
            .ok_or_else(|| StoreError::QueryFailed("inserted user not found".into()))
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
        Ok(self
            .conn
            .query_row(&sql, params![id], map_user)
            .optional()?)
    }

    fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE users SET
                name = ?2, target_score = ?3, timeline = ?4,
                reading_level = ?5, writing_level = ?6,
                listening_level = ?7, speaking_level = ?8,
                total_points = ?9, total_activities = ?10,
                current_streak = ?11, longest_streak = ?12,
                last_activity_date = ?13
             WHERE id = ?1",
            params![
                user.id,
                user.name,
                user.target_score,
                user.timeline.as_str(),
                user.reading_level,
                user.writing_level,
                user.listening_level,
                user.speaking_level,
                user.total_points,
                user.total_activities,
                user.current_streak,
                user.longest_streak,
                user.last_activity_date.map(|d| d.to_rfc3339()),
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::QueryFailed(format!(
                "user {} does not exist",
                user.id
            )));
        }
        Ok(())
    }

    fn users_in_score_band(
        &self,
        min_exclusive: f64,
        max_inclusive: f64,
    ) -> Result<Vec<User>, StoreError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE target_score > ?1 AND target_score <= ?2
             ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![min_exclusive, max_inclusive], map_user)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_activity(&self, new: NewActivity) -> Result<Activity, StoreError> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO activities (title, skill, difficulty, duration_minutes, points_reward, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.title,
                new.skill.as_str(),
                new.difficulty.as_str(),
                new.duration_minutes,
                new.points_reward,
                created_at.to_rfc3339(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.activity(id)?
            .ok_or_else(|| StoreError::QueryFailed("inserted activity not found".into()))
    }

    fn activity(&self, id: ActivityId) -> Result<Option<Activity>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, title, skill, difficulty, duration_minutes, points_reward, created_at
                 FROM activities WHERE id = ?1",
                params![id],
                map_activity,
            )
            .optional()?)
    }

    fn activities_by_skill_and_duration(
        &self,
        skill: Skill,
        min_minutes: u32,
        max_minutes: u32,
    ) -> Result<Vec<Activity>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, skill, difficulty, duration_minutes, points_reward, created_at
             FROM activities
             WHERE skill = ?1 AND duration_minutes BETWEEN ?2 AND ?3
             ORDER BY id",
        )?;
        let rows = stmt.query_map(params![skill.as_str(), min_minutes, max_minutes], map_activity)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn insert_completion(&self, new: NewCompletion) -> Result<Completion, StoreError> {
        self.conn.execute(
            "INSERT INTO completions (user_id, activity_id, skill, score, points_earned, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.user_id,
                new.activity_id,
                new.skill.as_str(),
                new.score,
                new.points_earned,
                new.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(Completion {
            id: self.conn.last_insert_rowid(),
            user_id: new.user_id,
            activity_id: new.activity_id,
            skill: new.skill,
            score: new.score,
            points_earned: new.points_earned,
            completed_at: new.completed_at,
        })
    }

    fn recent_completions(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, activity_id, skill, score, points_earned, completed_at
             FROM completions
             WHERE user_id = ?1 AND completed_at >= ?2
             ORDER BY completed_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, since.to_rfc3339(), limit as i64],
            map_completion,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn completions_by_skill(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<Completion>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, activity_id, skill, score, points_earned, completed_at
             FROM completions
             WHERE user_id = ?1 AND skill = ?2
             ORDER BY completed_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![user_id, skill.as_str(), limit as i64],
            map_completion,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn skill_completion_count(&self, user_id: UserId, skill: Skill) -> Result<u64, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM completions WHERE user_id = ?1 AND skill = ?2",
            params![user_id, skill.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn active_days(&self, user_id: UserId, since: DateTime<Utc>) -> Result<u32, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT substr(completed_at, 1, 10))
             FROM completions
             WHERE user_id = ?1 AND completed_at >= ?2",
            params![user_id, since.to_rfc3339()],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn goal_for_day(
        &self,
        user_id: UserId,
        day: NaiveDate,
    ) -> Result<Option<DailyGoal>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, activity_id, assigned_on, target_skill, skill_gap,
                        priority_score, completed, completed_at, completion_score
                 FROM daily_goals WHERE user_id = ?1 AND assigned_on = ?2",
                params![user_id, day.format("%Y-%m-%d").to_string()],
                map_goal,
            )
            .optional()?)
    }

    fn insert_goal(&self, new: NewGoal) -> Result<DailyGoal, StoreError> {
        // Upsert keyed by (user, day): a concurrent insert loses the race
        // and reads back the winner's row.
        self.conn.execute(
            "INSERT INTO daily_goals
                (user_id, activity_id, assigned_on, target_skill, skill_gap, priority_score)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(user_id, assigned_on) DO NOTHING",
            params![
                new.user_id,
                new.activity_id,
                new.assigned_on.format("%Y-%m-%d").to_string(),
                new.target_skill.as_str(),
                new.skill_gap,
                new.priority_score,
            ],
        )?;
        self.goal_for_day(new.user_id, new.assigned_on)?
            .ok_or_else(|| StoreError::QueryFailed("upserted goal not found".into()))
    }

    fn goals_in_range(
        &self,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyGoal>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, activity_id, assigned_on, target_skill, skill_gap,
                    priority_score, completed, completed_at, completion_score
             FROM daily_goals
             WHERE user_id = ?1 AND assigned_on BETWEEN ?2 AND ?3
             ORDER BY assigned_on DESC",
        )?;
        let rows = stmt.query_map(
            params![
                user_id,
                start.format("%Y-%m-%d").to_string(),
                end.format("%Y-%m-%d").to_string(),
            ],
            map_goal,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn goal_completion_rate(&self, user_id: UserId, since: NaiveDate) -> Result<f64, StoreError> {
        let since = since.format("%Y-%m-%d").to_string();
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM daily_goals WHERE user_id = ?1 AND assigned_on >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )?;
        if total == 0 {
            return Ok(0.0);
        }
        let completed: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM daily_goals
             WHERE user_id = ?1 AND assigned_on >= ?2 AND completed = 1",
            params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(completed as f64 / total as f64)
    }

    fn complete_goal(
        &self,
        goal_id: i64,
        score: f64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = self.conn.execute(
            "UPDATE daily_goals
             SET completed = 1, completed_at = ?2, completion_score = ?3
             WHERE id = ?1 AND completed = 0",
            params![goal_id, at.to_rfc3339(), score],
        )?;
        if updated == 0 {
            let exists: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM daily_goals WHERE id = ?1",
                params![goal_id],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::QueryFailed(format!(
                    "goal {goal_id} does not exist"
                )));
            }
        }
        Ok(())
    }

    fn append_streak_event(&self, event: NewStreakEvent) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO streak_events (user_id, kind, streak_count, occurred_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.user_id,
                event.kind.as_str(),
                event.streak_count,
                event.occurred_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn streak_events(&self, user_id: UserId) -> Result<Vec<StreakEvent>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, streak_count, occurred_at
             FROM streak_events WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], |row| {
            let kind: String = row.get(2)?;
            let occurred: String = row.get(4)?;
            Ok(StreakEvent {
                id: row.get(0)?,
                user_id: row.get(1)?,
                kind: StreakEventKind::parse(&kind).ok_or_else(|| bad_variant(2, &kind))?,
                streak_count: row.get::<_, i64>(3)? as u32,
                occurred_at: parse_ts(4, &occurred)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn record_skill_update(
        &self,
        user: &User,
        progress: NewSkillProgress,
    ) -> Result<SkillProgress, StoreError> {
        let scores_json = serde_json::to_string(&progress.recent_scores)
            .map_err(|e| StoreError::QueryFailed(e.to_string()))?;
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE users SET
                reading_level = ?2, writing_level = ?3,
                listening_level = ?4, speaking_level = ?5
             WHERE id = ?1",
            params![
                user.id,
                user.reading_level,
                user.writing_level,
                user.listening_level,
                user.speaking_level,
            ],
        )?;
        tx.execute(
            "INSERT INTO skill_progress
                (user_id, skill, previous_level, new_level, adjustment,
                 trigger_count, recent_scores, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                progress.user_id,
                progress.skill.as_str(),
                progress.previous_level,
                progress.new_level,
                progress.adjustment,
                progress.trigger_count,
                scores_json,
                progress.recorded_at.to_rfc3339(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(SkillProgress {
            id,
            user_id: progress.user_id,
            skill: progress.skill,
            previous_level: progress.previous_level,
            new_level: progress.new_level,
            adjustment: progress.adjustment,
            trigger_count: progress.trigger_count,
            recent_scores: progress.recent_scores,
            recorded_at: progress.recorded_at,
        })
    }

    fn skill_progress(
        &self,
        user_id: UserId,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<SkillProgress>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, skill, previous_level, new_level, adjustment,
                    trigger_count, recent_scores, recorded_at
             FROM skill_progress
             WHERE user_id = ?1 AND skill = ?2
             ORDER BY recorded_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![user_id, skill.as_str(), limit as i64], |row| {
            let skill: String = row.get(2)?;
            let scores_json: String = row.get(7)?;
            let recorded: String = row.get(8)?;
            let recent_scores: Vec<f64> = serde_json::from_str(&scores_json).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
            })?;
            Ok(SkillProgress {
                id: row.get(0)?,
                user_id: row.get(1)?,
                skill: Skill::parse(&skill).ok_or_else(|| bad_variant(2, &skill))?,
                previous_level: row.get(3)?,
                new_level: row.get(4)?,
                adjustment: row.get(5)?,
                trigger_count: row.get::<_, i64>(6)? as u32,
                recent_scores,
                recorded_at: parse_ts(8, &recorded)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
    ) -> Result<Vec<LeaderboardEntry>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, score_group, timeline, rank, previous_rank,
                    consistency_score, active_days, current_streak,
                    goal_completion_rate, period_days, calculated_at
             FROM leaderboard_entries
             WHERE score_group = ?1 AND timeline = ?2
             ORDER BY rank",
        )?;
        let rows = stmt.query_map(params![score_group, timeline.as_str()], map_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn replace_leaderboard(
        &self,
        score_group: f64,
        timeline: Timeline,
        entries: &[NewLeaderboardEntry],
    ) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM leaderboard_entries WHERE score_group = ?1 AND timeline = ?2",
            params![score_group, timeline.as_str()],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO leaderboard_entries
                    (user_id, score_group, timeline, rank, previous_rank, consistency_score,
                     active_days, current_streak, goal_completion_rate, period_days, calculated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for entry in entries {
                stmt.execute(params![
                    entry.user_id,
                    entry.score_group,
                    entry.timeline.as_str(),
                    entry.rank,
                    entry.previous_rank,
                    entry.consistency_score,
                    entry.active_days,
                    entry.current_streak,
                    entry.goal_completion_rate,
                    entry.period_days,
                    entry.calculated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(entries.len())
    }

    fn unlocks_for_user(&self, user_id: UserId) -> Result<Vec<IncentiveUnlock>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, user_id, kind, criteria, unlocked_at, claimed_at
             FROM incentive_unlocks WHERE user_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id], map_unlock)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_or_create_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        criteria: &str,
        at: DateTime<Utc>,
    ) -> Result<(IncentiveUnlock, bool), StoreError> {
        let inserted = self.conn.execute(
            "INSERT INTO incentive_unlocks (user_id, kind, criteria, unlocked_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, kind) DO NOTHING",
            params![user_id, kind.as_str(), criteria, at.to_rfc3339()],
        )?;
        let unlock = self
            .conn
            .query_row(
                "SELECT id, user_id, kind, criteria, unlocked_at, claimed_at
                 FROM incentive_unlocks WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind.as_str()],
                map_unlock,
            )?;
        Ok((unlock, inserted > 0))
    }

    fn claim_unlock(
        &self,
        user_id: UserId,
        kind: IncentiveKind,
        at: DateTime<Utc>,
    ) -> Result<Option<IncentiveUnlock>, StoreError> {
        self.conn.execute(
            "UPDATE incentive_unlocks SET claimed_at = ?3
             WHERE user_id = ?1 AND kind = ?2 AND claimed_at IS NULL",
            params![user_id, kind.as_str(), at.to_rfc3339()],
        )?;
        Ok(self
            .conn
            .query_row(
                "SELECT id, user_id, kind, criteria, unlocked_at, claimed_at
                 FROM incentive_unlocks WHERE user_id = ?1 AND kind = ?2",
                params![user_id, kind.as_str()],
                map_unlock,
            )
            .optional()?)
    }
}
