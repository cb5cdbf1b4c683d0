//! Completion processing pipeline.
//!
//! Recording a completed activity drives the whole per-user engagement
//! chain: validate the score, persist the completion, bump the raw
//! counters, advance the streak against the previous activity date, stamp
//! the new activity time, reassess the practiced skill when its completion
//! count crosses the configured multiple, and evaluate incentive unlocks.
//! The chain is logically serial per user; callers must not process two
//! completions for the same user concurrently.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{CoreError, Result, ValidationError};
use crate::goal::{GoalAllocator, GoalDecision};
use crate::incentive::IncentiveEvaluator;
use crate::model::{
    ActivityId, Completion, DailyGoal, IncentiveUnlock, NewCompletion, Skill, SkillProgress,
    User, UserId,
};
use crate::skill::SkillEstimator;
use crate::store::EngagementStore;
use crate::streak::{StreakOutcome, StreakTracker};

/// Everything that happened while recording one completion.
#[derive(Debug, Clone)]
pub struct CompletionReport {
    pub completion: Completion,
    pub streak: StreakOutcome,
    /// Present when this completion triggered a skill reassessment.
    pub skill_update: Option<SkillProgress>,
    /// Incentives newly unlocked by this completion.
    pub unlocked: Vec<IncentiveUnlock>,
    /// The user as persisted after the chain ran.
    pub user: User,
}

/// Orchestrates the completion-event chain.
pub struct ProgressTracker<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a EngineConfig,
}

impl<'a, S: EngagementStore> ProgressTracker<'a, S> {
    pub fn new(store: &'a S, config: &'a EngineConfig) -> Self {
        Self { store, config }
    }

    /// Record that `user_id` completed `activity_id` with `score` at `now`.
    ///
    /// # Errors
    /// Rejects scores outside 0-100 before any state changes, surfaces
    /// missing users or activities, and propagates store failures for the
    /// caller to retry.
    pub fn record_completion(
        &self,
        user_id: UserId,
        activity_id: ActivityId,
        score: f64,
        now: DateTime<Utc>,
    ) -> Result<CompletionReport> {
        if !(0.0..=100.0).contains(&score) {
            return Err(ValidationError::OutOfRange {
                field: "score",
                value: score,
                min: 0.0,
                max: 100.0,
            }
            .into());
        }
        let mut user = self
            .store
            .user(user_id)?
            .ok_or(CoreError::UserNotFound { id: user_id })?;
        let activity = self
            .store
            .activity(activity_id)?
            .ok_or(CoreError::ActivityNotFound { id: activity_id })?;

        let points_earned = (f64::from(activity.points_reward) * score / 100.0).floor() as i64;
        let completion = self.store.insert_completion(NewCompletion {
            user_id,
            activity_id,
            skill: activity.skill,
            score,
            points_earned,
            completed_at: now,
        })?;
        user.total_points += points_earned;
        user.total_activities += 1;

        // The streak advances against the previous activity date; only then
        // is the new one stamped.
        let streak = StreakTracker::new(self.store, &self.config.streak).advance(&mut user, now)?;
        user.last_activity_date = Some(now);
        self.store.save_user(&user)?;

        let skill_update = self.maybe_reassess(&mut user, activity.skill, now)?;
        let unlocked = IncentiveEvaluator::new(self.store, &self.config.incentive)
            .evaluate(&user, now)?;

        info!(
            user_id,
            activity_id,
            score,
            points_earned,
            ?streak,
            reassessed = skill_update.is_some(),
            unlocked = unlocked.len(),
            "completion recorded"
        );
        Ok(CompletionReport {
            completion,
            streak,
            skill_update,
            unlocked,
            user,
        })
    }

    /// Assign (or return) the user's daily goal for the day of `now`.
    ///
    /// # Errors
    /// Surfaces a missing user and propagates store failures.
    pub fn assign_daily_goal(&self, user_id: UserId, now: DateTime<Utc>) -> Result<GoalDecision> {
        let user = self
            .store
            .user(user_id)?
            .ok_or(CoreError::UserNotFound { id: user_id })?;
        GoalAllocator::new(self.store, &self.config.goal).assign_daily_goal(&user, now)
    }

    /// Mark a goal completed with the achieved score. Re-completing keeps
    /// the original completion fields.
    ///
    /// # Errors
    /// Rejects scores outside 0-100 and propagates store failures.
    pub fn complete_goal(&self, goal_id: i64, score: f64, now: DateTime<Utc>) -> Result<()> {
        if !(0.0..=100.0).contains(&score) {
            return Err(ValidationError::OutOfRange {
                field: "score",
                value: score,
                min: 0.0,
                max: 100.0,
            }
            .into());
        }
        Ok(self.store.complete_goal(goal_id, score, now)?)
    }

    /// The user's goal for the day of `now`, if one was assigned.
    pub fn goal_for_day(&self, user_id: UserId, now: DateTime<Utc>) -> Result<Option<DailyGoal>> {
        Ok(self.store.goal_for_day(user_id, now.date_naive())?)
    }

    /// Run a skill reassessment when this skill's completion count has
    /// reached a multiple of the trigger count.
    fn maybe_reassess(
        &self,
        user: &mut User,
        skill: Skill,
        now: DateTime<Utc>,
    ) -> Result<Option<SkillProgress>> {
        let count = self.store.skill_completion_count(user.id, skill)?;
        let trigger = u64::from(self.config.skill.trigger_count);
        if trigger == 0 || count == 0 || count % trigger != 0 {
            debug!(
                user_id = user.id,
                skill = skill.as_str(),
                count,
                "reassessment not due"
            );
            return Ok(None);
        }
        let scores: Vec<f64> = self
            .store
            .completions_by_skill(user.id, skill, 100)?
            .iter()
            .map(|c| c.score)
            .collect();
        SkillEstimator::new(self.store, &self.config.skill).reassess(user, skill, &scores, now)
    }
}
