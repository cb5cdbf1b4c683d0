//! Engine configuration.
//!
//! One sub-struct per engine component, with serde defaults so a partial
//! TOML document fills in the tuned values. The engine never reads
//! configuration from ambient state; callers construct an [`EngineConfig`]
//! (or parse one from TOML) and hand it to each component.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Streak tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreakConfig {
    /// Allow a Friday-to-Monday gap to continue a streak.
    #[serde(default = "default_true")]
    pub weekend_recovery_enabled: bool,
}

impl Default for StreakConfig {
    fn default() -> Self {
        Self {
            weekend_recovery_enabled: true,
        }
    }
}

/// One row of the score-to-adjustment table.
///
/// A mean score matches the first row whose `min_score` it reaches, so rows
/// are ordered by descending `min_score` and the last row must start at 0
/// for the table to partition [0, 100].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub min_score: f64,
    pub delta: f64,
}

/// Skill estimation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillConfig {
    /// Completions required before a reassessment runs.
    #[serde(default = "default_trigger_count")]
    pub trigger_count: u32,
    /// How many of the most recent scores feed the mean.
    #[serde(default = "default_score_window")]
    pub score_window: usize,
    /// Exponential moving average weight for the adjustment target.
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Absolute cap on a single-step level change.
    #[serde(default = "default_max_change")]
    pub max_change: f64,
    /// Ordered score-to-adjustment table.
    #[serde(default = "default_adjustments")]
    pub adjustments: Vec<ScoreAdjustment>,
}

impl Default for SkillConfig {
    fn default() -> Self {
        Self {
            trigger_count: default_trigger_count(),
            score_window: default_score_window(),
            alpha: default_alpha(),
            max_change: default_max_change(),
            adjustments: default_adjustments(),
        }
    }
}

impl SkillConfig {
    /// Map a mean score to its discrete adjustment.
    ///
    /// Returns `None` when no row matches, which a validated table makes
    /// impossible for scores in [0, 100].
    pub fn adjustment_for(&self, score: f64) -> Option<f64> {
        self.adjustments
            .iter()
            .find(|row| score >= row.min_score)
            .map(|row| row.delta)
    }
}

/// Goal allocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalConfig {
    /// Multiplier applied to the skill gap in priority scoring.
    #[serde(default = "default_gap_weight")]
    pub gap_weight: f64,
    /// Per-day weight of the recency penalty.
    #[serde(default = "default_recency_penalty")]
    pub recency_penalty_per_day: f64,
    /// Days of staleness assumed when a skill has no recent completions.
    #[serde(default = "default_stale_days")]
    pub stale_days: u32,
    /// Lookback window for recency scoring, in days.
    #[serde(default = "default_stale_days")]
    pub recency_window_days: u32,
    /// Factor applied to a skill targeted by yesterday's goal.
    #[serde(default = "default_rotation_factor")]
    pub rotation_factor: f64,
    /// Minimum eligible activity duration, in minutes.
    #[serde(default = "default_goal_duration_min")]
    pub duration_min: u32,
    /// Maximum eligible activity duration, in minutes.
    #[serde(default = "default_goal_duration_max")]
    pub duration_max: u32,
    /// Window in which a completed activity counts as recently attempted.
    #[serde(default = "default_repeat_window")]
    pub repeat_window_days: u32,
    /// Draw weight for recently attempted activities.
    #[serde(default = "default_recent_weight")]
    pub recent_weight: u32,
    /// Draw weight for everything else.
    #[serde(default = "default_fresh_weight")]
    pub fresh_weight: u32,
    /// Seed for the selection RNG (None = nondeterministic).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for GoalConfig {
    fn default() -> Self {
        Self {
            gap_weight: default_gap_weight(),
            recency_penalty_per_day: default_recency_penalty(),
            stale_days: default_stale_days(),
            recency_window_days: default_stale_days(),
            rotation_factor: default_rotation_factor(),
            duration_min: default_goal_duration_min(),
            duration_max: default_goal_duration_max(),
            repeat_window_days: default_repeat_window(),
            recent_weight: default_recent_weight(),
            fresh_weight: default_fresh_weight(),
            seed: None,
        }
    }
}

/// Incentive threshold configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncentiveConfig {
    #[serde(default = "default_tier1_streak")]
    pub tier1_streak: u32,
    #[serde(default = "default_tier1_activities")]
    pub tier1_activities: i64,
    #[serde(default = "default_tier1_points")]
    pub tier1_points: i64,
    #[serde(default = "default_tier2_streak")]
    pub tier2_streak: u32,
    #[serde(default = "default_tier2_activities")]
    pub tier2_activities: i64,
    #[serde(default = "default_tier2_points")]
    pub tier2_points: i64,
    #[serde(default = "default_premium_streak")]
    pub premium_streak: u32,
    /// Minimum completions required in every skill for the premium rule.
    #[serde(default = "default_premium_attempts")]
    pub premium_skill_attempts: u64,
}

impl Default for IncentiveConfig {
    fn default() -> Self {
        Self {
            tier1_streak: default_tier1_streak(),
            tier1_activities: default_tier1_activities(),
            tier1_points: default_tier1_points(),
            tier2_streak: default_tier2_streak(),
            tier2_activities: default_tier2_activities(),
            tier2_points: default_tier2_points(),
            premium_streak: default_premium_streak(),
            premium_skill_attempts: default_premium_attempts(),
        }
    }
}

/// Leaderboard compilation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Observation period for active-day and completion-rate metrics.
    #[serde(default = "default_period_days")]
    pub period_days: u32,
    #[serde(default = "default_active_days_weight")]
    pub active_days_weight: f64,
    #[serde(default = "default_streak_weight")]
    pub streak_weight: f64,
    #[serde(default = "default_completion_weight")]
    pub completion_weight: f64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            period_days: default_period_days(),
            active_days_weight: default_active_days_weight(),
            streak_weight: default_streak_weight(),
            completion_weight: default_completion_weight(),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub streak: StreakConfig,
    #[serde(default)]
    pub skill: SkillConfig,
    #[serde(default)]
    pub goal: GoalConfig,
    #[serde(default)]
    pub incentive: IncentiveConfig,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
}

impl EngineConfig {
    /// Parse a configuration from a TOML document and validate it.
    ///
    /// # Errors
    /// Returns an error if the document does not parse or fails validation.
    pub fn from_toml_str(doc: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(doc).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML document.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Check cross-field invariants the algorithms depend on.
    ///
    /// # Errors
    /// Returns the first violated invariant: leaderboard weights must sum to
    /// 1.0, the EMA weight must be in (0, 1], the step cap must be positive,
    /// the goal duration window must be ordered and the adjustment table
    /// must partition [0, 100] in descending order.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weight_sum = self.leaderboard.active_days_weight
            + self.leaderboard.streak_weight
            + self.leaderboard.completion_weight;
        if (weight_sum - 1.0).abs() > 1e-9 {
            return Err(ConfigError::InvalidValue {
                key: "leaderboard".into(),
                message: format!("weights must sum to 1.0, got {weight_sum}"),
            });
        }
        if !(self.skill.alpha > 0.0 && self.skill.alpha <= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "skill.alpha".into(),
                message: "must be in (0, 1]".into(),
            });
        }
        if self.skill.max_change <= 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "skill.max_change".into(),
                message: "must be positive".into(),
            });
        }
        if self.skill.score_window == 0 {
            return Err(ConfigError::InvalidValue {
                key: "skill.score_window".into(),
                message: "must be positive".into(),
            });
        }
        if self.goal.duration_min > self.goal.duration_max {
            return Err(ConfigError::InvalidValue {
                key: "goal.duration_min".into(),
                message: "must not exceed goal.duration_max".into(),
            });
        }
        self.validate_adjustments()
    }

    fn validate_adjustments(&self) -> Result<(), ConfigError> {
        let rows = &self.skill.adjustments;
        if rows.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "skill.adjustments".into(),
                message: "table must not be empty".into(),
            });
        }
        for pair in rows.windows(2) {
            if pair[1].min_score >= pair[0].min_score {
                return Err(ConfigError::InvalidValue {
                    key: "skill.adjustments".into(),
                    message: "rows must be ordered by strictly descending min_score".into(),
                });
            }
        }
        let last = rows[rows.len() - 1];
        if last.min_score != 0.0 {
            return Err(ConfigError::InvalidValue {
                key: "skill.adjustments".into(),
                message: "last row must start at 0 to cover the full score range".into(),
            });
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_trigger_count() -> u32 {
    5
}

fn default_score_window() -> usize {
    10
}

fn default_alpha() -> f64 {
    0.3
}

fn default_max_change() -> f64 {
    0.5
}

fn default_adjustments() -> Vec<ScoreAdjustment> {
    vec![
        ScoreAdjustment { min_score: 90.0, delta: 0.3 },
        ScoreAdjustment { min_score: 80.0, delta: 0.2 },
        ScoreAdjustment { min_score: 70.0, delta: 0.1 },
        ScoreAdjustment { min_score: 60.0, delta: 0.0 },
        ScoreAdjustment { min_score: 50.0, delta: -0.1 },
        ScoreAdjustment { min_score: 0.0, delta: -0.2 },
    ]
}

fn default_gap_weight() -> f64 {
    2.0
}

fn default_recency_penalty() -> f64 {
    0.1
}

fn default_stale_days() -> u32 {
    30
}

fn default_rotation_factor() -> f64 {
    0.5
}

fn default_goal_duration_min() -> u32 {
    5
}

fn default_goal_duration_max() -> u32 {
    15
}

fn default_repeat_window() -> u32 {
    7
}

fn default_recent_weight() -> u32 {
    1
}

fn default_fresh_weight() -> u32 {
    3
}

fn default_tier1_streak() -> u32 {
    7
}

fn default_tier1_activities() -> i64 {
    30
}

fn default_tier1_points() -> i64 {
    500
}

fn default_tier2_streak() -> u32 {
    30
}

fn default_tier2_activities() -> i64 {
    100
}

fn default_tier2_points() -> i64 {
    2000
}

fn default_premium_streak() -> u32 {
    14
}

fn default_premium_attempts() -> u64 {
    5
}

fn default_period_days() -> u32 {
    30
}

fn default_active_days_weight() -> f64 {
    0.4
}

fn default_streak_weight() -> f64 {
    0.3
}

fn default_completion_weight() -> f64 {
    0.3
}
