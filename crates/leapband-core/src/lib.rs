//! # leapband-core
//!
//! Engagement and progression engine for a language-practice platform.
//!
//! The crate is a library with no I/O surface of its own: a thin request
//! layer maps user actions onto these operations and owns the surrounding
//! transaction. All state lives behind the [`store::EngagementStore`]
//! trait, with SQLite and in-memory implementations included.
//!
//! ## Components
//!
//! - [`progress::ProgressTracker`]: the completion-event chain (counters,
//!   streak, conditional skill reassessment, incentive unlocks).
//! - [`streak::StreakTracker`]: consecutive-day streak state machine with
//!   Friday-to-Monday weekend recovery.
//! - [`skill::SkillEstimator`]: smoothed, bounded per-skill level updates
//!   driven by recent completion scores.
//! - [`goal::GoalAllocator`]: one activity per user per day, balancing
//!   skill gap, neglect and variety.
//! - [`incentive::IncentiveEvaluator`]: threshold rules unlocking one-time
//!   rewards.
//! - [`leaderboard::LeaderboardCompiler`]: scheduled batch ranking cohorts
//!   by a composite consistency score.
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use leapband_core::config::EngineConfig;
//! use leapband_core::model::{Difficulty, NewActivity, NewUser, Skill, Timeline};
//! use leapband_core::progress::ProgressTracker;
//! use leapband_core::store::{EngagementStore, MemoryStore};
//!
//! # fn main() -> leapband_core::error::Result<()> {
//! let store = MemoryStore::new();
//! let config = EngineConfig::default();
//! let user = store.create_user(NewUser::new("amara", 7.0, Timeline::Medium)?)?;
//! let activity = store.create_activity(NewActivity::new(
//!     "Skim drill",
//!     Skill::Reading,
//!     Difficulty::Beginner,
//!     10,
//!     20,
//! )?)?;
//!
//! let tracker = ProgressTracker::new(&store, &config);
//! let report = tracker.record_completion(user.id, activity.id, 85.0, Utc::now())?;
//! assert_eq!(report.completion.points_earned, 17);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod goal;
pub mod incentive;
pub mod leaderboard;
pub mod model;
pub mod progress;
pub mod skill;
pub mod store;
pub mod streak;

pub use config::EngineConfig;
pub use error::{CoreError, Result};
pub use goal::{GoalAllocator, GoalDecision};
pub use incentive::IncentiveEvaluator;
pub use leaderboard::{CompileReport, LeaderboardCompiler, SCORE_GROUPS};
pub use model::{Activity, Completion, DailyGoal, IncentiveUnlock, Skill, Timeline, User};
pub use progress::{CompletionReport, ProgressTracker};
pub use skill::{SkillEstimator, SkillSummary};
pub use store::{EngagementStore, MemoryStore, SqliteStore};
pub use streak::{StreakOutcome, StreakTracker};
