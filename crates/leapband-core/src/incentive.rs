//! Threshold-based incentive unlocks.
//!
//! Each rule tests the user's engagement counters against configured
//! thresholds. Tier rewards unlock on any one of streak, activity count or
//! points; premium content requires the streak threshold and a minimum
//! number of completions in every skill. Unlocks are unique per (user,
//! kind), so re-evaluating after the thresholds stay satisfied creates
//! nothing new.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::IncentiveConfig;
use crate::error::Result;
use crate::model::{IncentiveKind, IncentiveUnlock, Skill, User};
use crate::store::EngagementStore;

/// Evaluates unlock rules and records new unlocks.
pub struct IncentiveEvaluator<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a IncentiveConfig,
}

impl<'a, S: EngagementStore> IncentiveEvaluator<'a, S> {
    pub fn new(store: &'a S, config: &'a IncentiveConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate all rules for `user` and return only the unlocks this call
    /// created. Already-unlocked incentives are skipped silently.
    ///
    /// # Errors
    /// Returns an error when a store query or insert fails.
    pub fn evaluate(&self, user: &User, now: DateTime<Utc>) -> Result<Vec<IncentiveUnlock>> {
        let mut unlocked = Vec::new();

        if let Some(criteria) = self.tier_criteria(
            user,
            self.config.tier1_streak,
            self.config.tier1_activities,
            self.config.tier1_points,
        ) {
            self.unlock(user, IncentiveKind::CounselingTier1, &criteria, now, &mut unlocked)?;
        }
        if let Some(criteria) = self.tier_criteria(
            user,
            self.config.tier2_streak,
            self.config.tier2_activities,
            self.config.tier2_points,
        ) {
            self.unlock(user, IncentiveKind::CounselingTier2, &criteria, now, &mut unlocked)?;
        }
        if let Some(criteria) = self.premium_criteria(user)? {
            self.unlock(user, IncentiveKind::PremiumContent, &criteria, now, &mut unlocked)?;
        }

        Ok(unlocked)
    }

    /// Mark an unlock claimed. Returns the unlock with `claimed_at` set, or
    /// `None` when nothing is unlocked for (user, kind). Re-claiming keeps
    /// the original timestamp.
    ///
    /// # Errors
    /// Returns an error when the store update fails.
    pub fn claim(
        &self,
        user_id: i64,
        kind: IncentiveKind,
        now: DateTime<Utc>,
    ) -> Result<Option<IncentiveUnlock>> {
        Ok(self.store.claim_unlock(user_id, kind, now)?)
    }

    /// First satisfied criterion of the OR-of-thresholds tier rule.
    fn tier_criteria(
        &self,
        user: &User,
        streak: u32,
        activities: i64,
        points: i64,
    ) -> Option<String> {
        if user.current_streak >= streak {
            Some(format!("streak of {} days (threshold {streak})", user.current_streak))
        } else if user.total_activities >= activities {
            Some(format!(
                "{} activities completed (threshold {activities})",
                user.total_activities
            ))
        } else if user.total_points >= points {
            Some(format!("{} points earned (threshold {points})", user.total_points))
        } else {
            None
        }
    }

    /// The premium rule requires the streak threshold and breadth across
    /// all four skills.
    fn premium_criteria(&self, user: &User) -> Result<Option<String>> {
        if user.current_streak < self.config.premium_streak {
            return Ok(None);
        }
        for skill in Skill::ALL {
            let count = self.store.skill_completion_count(user.id, skill)?;
            if count < self.config.premium_skill_attempts {
                debug!(
                    user_id = user.id,
                    skill = skill.as_str(),
                    count,
                    "premium rule not met"
                );
                return Ok(None);
            }
        }
        Ok(Some(format!(
            "streak of {} days with {}+ completions in every skill",
            user.current_streak, self.config.premium_skill_attempts
        )))
    }

    fn unlock(
        &self,
        user: &User,
        kind: IncentiveKind,
        criteria: &str,
        now: DateTime<Utc>,
        unlocked: &mut Vec<IncentiveUnlock>,
    ) -> Result<()> {
        let (record, created) = self
            .store
            .get_or_create_unlock(user.id, kind, criteria, now)?;
        if created {
            info!(
                user_id = user.id,
                kind = kind.as_str(),
                criteria,
                "incentive unlocked"
            );
            unlocked.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewCompletion, NewUser, Timeline};
    use crate::store::MemoryStore;

    fn setup() -> (MemoryStore, User, IncentiveConfig) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser::new("amara", 7.0, Timeline::Medium).unwrap())
            .unwrap();
        (store, user, IncentiveConfig::default())
    }

    #[test]
    fn below_all_thresholds_unlocks_nothing() {
        let (store, user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        assert!(evaluator.evaluate(&user, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn streak_alone_unlocks_tier1() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.current_streak = 7;
        let unlocked = evaluator.evaluate(&user, Utc::now()).unwrap();
        assert_eq!(unlocked.len(), 1);
        assert_eq!(unlocked[0].kind, IncentiveKind::CounselingTier1);
        assert!(unlocked[0].criteria.contains("streak"));
    }

    #[test]
    fn points_alone_unlocks_tier1() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.total_points = 500;
        let unlocked = evaluator.evaluate(&user, Utc::now()).unwrap();
        assert_eq!(unlocked.len(), 1);
        assert!(unlocked[0].criteria.contains("points"));
    }

    #[test]
    fn second_evaluation_is_empty() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.current_streak = 7;
        assert_eq!(evaluator.evaluate(&user, Utc::now()).unwrap().len(), 1);
        assert!(evaluator.evaluate(&user, Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn tier2_needs_the_higher_thresholds() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.total_activities = 100;
        let unlocked = evaluator.evaluate(&user, Utc::now()).unwrap();
        let kinds: Vec<_> = unlocked.iter().map(|u| u.kind).collect();
        assert!(kinds.contains(&IncentiveKind::CounselingTier1));
        assert!(kinds.contains(&IncentiveKind::CounselingTier2));
    }

    #[test]
    fn premium_needs_breadth_across_all_skills() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.current_streak = 14;
        let now = Utc::now();
        // Five completions each in only three skills.
        for skill in [Skill::Reading, Skill::Writing, Skill::Listening] {
            for _ in 0..5 {
                store
                    .insert_completion(NewCompletion {
                        user_id: user.id,
                        activity_id: 1,
                        skill,
                        score: 80.0,
                        points_earned: 8,
                        completed_at: now,
                    })
                    .unwrap();
            }
        }
        let kinds: Vec<_> = evaluator
            .evaluate(&user, now)
            .unwrap()
            .iter()
            .map(|u| u.kind)
            .collect();
        assert!(!kinds.contains(&IncentiveKind::PremiumContent));

        for _ in 0..5 {
            store
                .insert_completion(NewCompletion {
                    user_id: user.id,
                    activity_id: 1,
                    skill: Skill::Speaking,
                    score: 80.0,
                    points_earned: 8,
                    completed_at: now,
                })
                .unwrap();
        }
        let kinds: Vec<_> = evaluator
            .evaluate(&user, now)
            .unwrap()
            .iter()
            .map(|u| u.kind)
            .collect();
        assert!(kinds.contains(&IncentiveKind::PremiumContent));
    }

    #[test]
    fn claim_is_idempotent() {
        let (store, mut user, config) = setup();
        let evaluator = IncentiveEvaluator::new(&store, &config);
        user.current_streak = 7;
        evaluator.evaluate(&user, Utc::now()).unwrap();
        let first = evaluator
            .claim(user.id, IncentiveKind::CounselingTier1, Utc::now())
            .unwrap()
            .unwrap();
        let again = evaluator
            .claim(user.id, IncentiveKind::CounselingTier1, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(first.claimed_at, again.claimed_at);
        assert!(evaluator
            .claim(user.id, IncentiveKind::PremiumContent, Utc::now())
            .unwrap()
            .is_none());
    }
}
