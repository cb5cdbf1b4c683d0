//! Domain model for the engagement engine.
//!
//! These types mirror what the record store persists: user profiles with
//! engagement counters, the activity catalog, append-only completion and
//! history ledgers, daily goal assignments, leaderboard rows and incentive
//! unlocks. They carry no behavior beyond skill-keyed access and input
//! validation; all decision logic lives in the algorithm modules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type UserId = i64;
pub type ActivityId = i64;

/// Minimum and maximum band score.
pub const MIN_BAND_SCORE: f64 = 0.0;
pub const MAX_BAND_SCORE: f64 = 9.0;

/// The four practiced skills.
///
/// The variant order is the canonical skill order. Goal allocation resolves
/// priority ties to the skill that appears first here, which keeps skill
/// selection deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Skill {
    Reading,
    Writing,
    Listening,
    Speaking,
}

impl Skill {
    /// All skills in canonical order.
    pub const ALL: [Skill; 4] = [
        Skill::Reading,
        Skill::Writing,
        Skill::Listening,
        Skill::Speaking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Skill::Reading => "reading",
            Skill::Writing => "writing",
            Skill::Listening => "listening",
            Skill::Speaking => "speaking",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reading" => Some(Skill::Reading),
            "writing" => Some(Skill::Writing),
            "listening" => Some(Skill::Listening),
            "speaking" => Some(Skill::Speaking),
            _ => None,
        }
    }
}

/// Preparation timeline buckets used for leaderboard cohorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeline {
    Short,
    Medium,
    Long,
}

impl Timeline {
    pub const ALL: [Timeline; 3] = [Timeline::Short, Timeline::Medium, Timeline::Long];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeline::Short => "short",
            Timeline::Medium => "medium",
            Timeline::Long => "long",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "short" => Some(Timeline::Short),
            "medium" => Some(Timeline::Medium),
            "long" => Some(Timeline::Long),
            _ => None,
        }
    }
}

/// Activity difficulty levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }
}

/// One-time unlockable rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncentiveKind {
    CounselingTier1,
    CounselingTier2,
    PremiumContent,
}

impl IncentiveKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncentiveKind::CounselingTier1 => "counseling_tier_1",
            IncentiveKind::CounselingTier2 => "counseling_tier_2",
            IncentiveKind::PremiumContent => "premium_content",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "counseling_tier_1" => Some(IncentiveKind::CounselingTier1),
            "counseling_tier_2" => Some(IncentiveKind::CounselingTier2),
            "premium_content" => Some(IncentiveKind::PremiumContent),
            _ => None,
        }
    }
}

/// User profile and engagement counters.
///
/// Mutated only through engine update operations; `longest_streak` never
/// drops below `current_streak` and skill levels stay within band range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Target band score (0.0-9.0)
    pub target_score: f64,
    pub timeline: Timeline,
    pub reading_level: f64,
    pub writing_level: f64,
    pub listening_level: f64,
    pub speaking_level: f64,
    pub total_points: i64,
    pub total_activities: i64,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_activity_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Get the current level for a skill.
    pub fn skill_level(&self, skill: Skill) -> f64 {
        match skill {
            Skill::Reading => self.reading_level,
            Skill::Writing => self.writing_level,
            Skill::Listening => self.listening_level,
            Skill::Speaking => self.speaking_level,
        }
    }

    /// Set a skill level, clamped to the band range.
    pub fn set_skill_level(&mut self, skill: Skill, level: f64) {
        let clamped = level.clamp(MIN_BAND_SCORE, MAX_BAND_SCORE);
        match skill {
            Skill::Reading => self.reading_level = clamped,
            Skill::Writing => self.writing_level = clamped,
            Skill::Listening => self.listening_level = clamped,
            Skill::Speaking => self.speaking_level = clamped,
        }
    }

    /// Gap between target score and current level, floored at zero.
    pub fn skill_gap(&self, skill: Skill) -> f64 {
        (self.target_score - self.skill_level(skill)).max(0.0)
    }
}

/// Parameters for registering a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub target_score: f64,
    pub timeline: Timeline,
}

impl NewUser {
    /// Validate registration input.
    ///
    /// # Errors
    /// Returns a validation error for an empty name or a target score
    /// outside the band range.
    pub fn new(name: &str, target_score: f64, timeline: Timeline) -> Result<Self, ValidationError> {
        if name.trim().len() < 3 {
            return Err(ValidationError::InvalidValue {
                field: "name",
                message: "must be at least 3 characters".into(),
            });
        }
        if !(MIN_BAND_SCORE..=MAX_BAND_SCORE).contains(&target_score) {
            return Err(ValidationError::OutOfRange {
                field: "target_score",
                value: target_score,
                min: MIN_BAND_SCORE,
                max: MAX_BAND_SCORE,
            });
        }
        Ok(Self {
            name: name.trim().to_string(),
            target_score,
            timeline,
        })
    }
}

/// Catalog entry for a practice activity. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub title: String,
    pub skill: Skill,
    pub difficulty: Difficulty,
    /// Duration in minutes (5-60)
    pub duration_minutes: u32,
    /// Points awarded at a perfect score (1-100)
    pub points_reward: u32,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a catalog activity.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub title: String,
    pub skill: Skill,
    pub difficulty: Difficulty,
    pub duration_minutes: u32,
    pub points_reward: u32,
}

impl NewActivity {
    /// Validate catalog input.
    ///
    /// # Errors
    /// Returns a validation error if the title is too short, the duration is
    /// outside 5-60 minutes or the reward is outside 1-100 points.
    pub fn new(
        title: &str,
        skill: Skill,
        difficulty: Difficulty,
        duration_minutes: u32,
        points_reward: u32,
    ) -> Result<Self, ValidationError> {
        if title.trim().len() < 3 {
            return Err(ValidationError::InvalidValue {
                field: "title",
                message: "must be at least 3 characters".into(),
            });
        }
        if !(5..=60).contains(&duration_minutes) {
            return Err(ValidationError::OutOfRange {
                field: "duration_minutes",
                value: duration_minutes as f64,
                min: 5.0,
                max: 60.0,
            });
        }
        if !(1..=100).contains(&points_reward) {
            return Err(ValidationError::OutOfRange {
                field: "points_reward",
                value: points_reward as f64,
                min: 1.0,
                max: 100.0,
            });
        }
        Ok(Self {
            title: title.trim().to_string(),
            skill,
            difficulty,
            duration_minutes,
            points_reward,
        })
    }
}

/// Append-only record of a finished activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: i64,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    /// Skill of the completed activity, denormalized for by-skill queries.
    pub skill: Skill,
    /// Score achieved (0-100)
    pub score: f64,
    /// `floor(points_reward * score / 100)`
    pub points_earned: i64,
    pub completed_at: DateTime<Utc>,
}

/// Insert parameters for a completion record.
#[derive(Debug, Clone)]
pub struct NewCompletion {
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub skill: Skill,
    pub score: f64,
    pub points_earned: i64,
    pub completed_at: DateTime<Utc>,
}

/// One goal assignment per user per calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyGoal {
    pub id: i64,
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub assigned_on: NaiveDate,
    pub target_skill: Skill,
    /// Skill gap at assignment time, before rotation adjustment.
    pub skill_gap: f64,
    /// Priority score after rotation adjustment.
    pub priority_score: f64,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_score: Option<f64>,
}

/// Insert parameters for a daily goal.
#[derive(Debug, Clone)]
pub struct NewGoal {
    pub user_id: UserId,
    pub activity_id: ActivityId,
    pub assigned_on: NaiveDate,
    pub target_skill: Skill,
    pub skill_gap: f64,
    pub priority_score: f64,
}

/// Kinds of streak ledger events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakEventKind {
    /// A fresh streak began (first activity or post-break restart).
    Started,
    /// A streak ended after a gap of more than one day.
    Broken,
    /// A Friday-to-Monday gap was bridged by weekend recovery.
    Recovered,
}

impl StreakEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreakEventKind::Started => "started",
            StreakEventKind::Broken => "broken",
            StreakEventKind::Recovered => "recovered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(StreakEventKind::Started),
            "broken" => Some(StreakEventKind::Broken),
            "recovered" => Some(StreakEventKind::Recovered),
            _ => None,
        }
    }
}

/// Append-only streak ledger entry for audit and analytics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakEvent {
    pub id: i64,
    pub user_id: UserId,
    pub kind: StreakEventKind,
    /// Streak length at the time of the event. For `Broken` this is the
    /// length of the streak that ended.
    pub streak_count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Insert parameters for a streak ledger entry.
#[derive(Debug, Clone)]
pub struct NewStreakEvent {
    pub user_id: UserId,
    pub kind: StreakEventKind,
    pub streak_count: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only snapshot of a skill-level reassessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillProgress {
    pub id: i64,
    pub user_id: UserId,
    pub skill: Skill,
    pub previous_level: f64,
    pub new_level: f64,
    /// The discrete adjustment the mean score mapped to.
    pub adjustment: f64,
    /// Completions counted for this skill when the reassessment ran.
    pub trigger_count: u32,
    /// The scores that fed the reassessment, newest first.
    pub recent_scores: Vec<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Insert parameters for a skill progress snapshot.
#[derive(Debug, Clone)]
pub struct NewSkillProgress {
    pub user_id: UserId,
    pub skill: Skill,
    pub previous_level: f64,
    pub new_level: f64,
    pub adjustment: f64,
    pub trigger_count: u32,
    pub recent_scores: Vec<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// One leaderboard row per (user, cohort) per compilation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub id: i64,
    pub user_id: UserId,
    pub score_group: f64,
    pub timeline: Timeline,
    pub rank: u32,
    /// Rank from the previous compilation cycle, carried over explicitly.
    pub previous_rank: Option<u32>,
    pub consistency_score: f64,
    pub active_days: u32,
    pub current_streak: u32,
    pub goal_completion_rate: f64,
    pub period_days: u32,
    pub calculated_at: DateTime<Utc>,
}

/// Insert parameters for a leaderboard row.
#[derive(Debug, Clone)]
pub struct NewLeaderboardEntry {
    pub user_id: UserId,
    pub score_group: f64,
    pub timeline: Timeline,
    pub rank: u32,
    pub previous_rank: Option<u32>,
    pub consistency_score: f64,
    pub active_days: u32,
    pub current_streak: u32,
    pub goal_completion_rate: f64,
    pub period_days: u32,
    pub calculated_at: DateTime<Utc>,
}

/// At most one unlock per (user, incentive kind); a one-way transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveUnlock {
    pub id: i64,
    pub user_id: UserId,
    pub kind: IncentiveKind,
    /// Human-readable description of the criterion that fired.
    pub criteria: String,
    pub unlocked_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}
