//! Skill level estimation.
//!
//! Levels move by exponential smoothing: the mean of the newest scores maps
//! through the configured adjustment table to a discrete value, and that
//! value is blended directly as the smoothing target. The blend pulls
//! toward the small adjustment value itself, so the per-step change is
//! capped before the result is clamped to the band range; the cap keeps
//! updates gradual.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::SkillConfig;
use crate::error::{CoreError, Result};
use crate::model::{NewSkillProgress, Skill, SkillProgress, User, MAX_BAND_SCORE, MIN_BAND_SCORE};
use crate::store::EngagementStore;

/// Point-in-time progress overview for one skill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillSummary {
    pub skill: Skill,
    /// Current level, rounded to one decimal.
    pub current_level: f64,
    pub target_score: f64,
    /// Distance to target, rounded to one decimal; negative above target.
    pub gap: f64,
    /// Recorded reassessments, counted among the newest five.
    pub recent_updates: usize,
}

/// Reassesses per-skill levels from recent completion scores.
pub struct SkillEstimator<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a SkillConfig,
}

impl<'a, S: EngagementStore> SkillEstimator<'a, S> {
    pub fn new(store: &'a S, config: &'a SkillConfig) -> Self {
        Self { store, config }
    }

    /// Reassess one skill from `recent_scores` (newest first).
    ///
    /// Returns `Ok(None)` without touching anything when fewer than
    /// `trigger_count` scores are available. Otherwise updates the user's
    /// level in place, persists the user together with a progress snapshot,
    /// and returns the snapshot.
    ///
    /// # Errors
    /// Returns [`CoreError::AdjustmentTableGap`] when the mean score matches
    /// no table row, or a store error when persistence fails.
    pub fn reassess(
        &self,
        user: &mut User,
        skill: Skill,
        recent_scores: &[f64],
        now: DateTime<Utc>,
    ) -> Result<Option<SkillProgress>> {
        if recent_scores.len() < self.config.trigger_count as usize {
            debug!(
                user_id = user.id,
                skill = skill.as_str(),
                available = recent_scores.len(),
                "not enough scores to reassess"
            );
            return Ok(None);
        }
        let window: Vec<f64> = recent_scores
            .iter()
            .take(self.config.score_window)
            .copied()
            .collect();
        let mean = window.iter().sum::<f64>() / window.len() as f64;
        let adjustment = self
            .config
            .adjustment_for(mean)
            .ok_or(CoreError::AdjustmentTableGap { score: mean })?;

        let previous = user.skill_level(skill);
        let new_level = self.blend(previous, adjustment);
        user.set_skill_level(skill, new_level);

        let snapshot = self.store.record_skill_update(
            user,
            NewSkillProgress {
                user_id: user.id,
                skill,
                previous_level: previous,
                new_level,
                adjustment,
                trigger_count: recent_scores.len() as u32,
                recent_scores: window,
                recorded_at: now,
            },
        )?;
        info!(
            user_id = user.id,
            skill = skill.as_str(),
            previous,
            new_level,
            mean,
            "skill level reassessed"
        );
        Ok(Some(snapshot))
    }

    /// Summarize every skill for display: current level, distance to the
    /// target and recent reassessment activity.
    ///
    /// # Errors
    /// Returns an error when a store query fails.
    pub fn summary(&self, user: &User) -> Result<[SkillSummary; 4]> {
        let mut out = [SkillSummary {
            skill: Skill::Reading,
            current_level: 0.0,
            target_score: user.target_score,
            gap: 0.0,
            recent_updates: 0,
        }; 4];
        for (slot, skill) in out.iter_mut().zip(Skill::ALL) {
            let current = user.skill_level(skill);
            let recent = self.store.skill_progress(user.id, skill, 5)?;
            *slot = SkillSummary {
                skill,
                current_level: round1(current),
                target_score: user.target_score,
                gap: round1(user.target_score - current),
                recent_updates: recent.len(),
            };
        }
        Ok(out)
    }

    /// Recent reassessment history for one skill, newest first.
    pub fn history(
        &self,
        user_id: i64,
        skill: Skill,
        limit: usize,
    ) -> Result<Vec<SkillProgress>> {
        Ok(self.store.skill_progress(user_id, skill, limit)?)
    }

    /// Blend the adjustment in as the smoothing target, cap the step, clamp
    /// to the band range. Order matters: blend, then cap, then clamp.
    fn blend(&self, current: f64, adjustment: f64) -> f64 {
        let blended = current * (1.0 - self.config.alpha) + adjustment * self.config.alpha;
        let step = (blended - current).clamp(-self.config.max_change, self.config.max_change);
        (current + step).clamp(MIN_BAND_SCORE, MAX_BAND_SCORE)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewUser, Timeline};
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    fn setup() -> (MemoryStore, User, SkillConfig) {
        let store = MemoryStore::new();
        let user = store
            .create_user(NewUser::new("amara", 7.0, Timeline::Medium).unwrap())
            .unwrap();
        (store, user, SkillConfig::default())
    }

    #[test]
    fn too_few_scores_is_not_an_update() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        let result = estimator
            .reassess(&mut user, Skill::Reading, &[88.0, 91.0], Utc::now())
            .unwrap();
        assert!(result.is_none());
        assert!(store.skill_progress(user.id, Skill::Reading, 10).unwrap().is_empty());
    }

    #[test]
    fn blend_caps_the_step_at_max_change() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        user.set_skill_level(Skill::Writing, 6.0);
        // Mean 92 maps to +0.3; raw blend 6.0*0.7 + 0.3*0.3 = 4.29, a step
        // of -1.71 that the cap limits to -0.5.
        let scores = [92.0, 92.0, 92.0, 92.0, 92.0];
        let snapshot = estimator
            .reassess(&mut user, Skill::Writing, &scores, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.previous_level, 6.0);
        assert_eq!(snapshot.adjustment, 0.3);
        assert!((snapshot.new_level - 5.5).abs() < 1e-9);
        assert!((user.writing_level - 5.5).abs() < 1e-9);
    }

    #[test]
    fn high_scores_pull_a_low_level_up() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        // Level 0.0 blends toward +0.3: 0.0*0.7 + 0.3*0.3 = 0.09.
        let scores = [92.0, 95.0, 91.0, 90.0, 94.0];
        let snapshot = estimator
            .reassess(&mut user, Skill::Writing, &scores, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.adjustment, 0.3);
        assert!((snapshot.new_level - 0.09).abs() < 1e-9);
    }

    #[test]
    fn low_scores_nudge_the_level_down() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        user.set_skill_level(Skill::Listening, 5.0);
        let scores = [40.0, 35.0, 45.0, 42.0, 38.0];
        let snapshot = estimator
            .reassess(&mut user, Skill::Listening, &scores, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.adjustment, -0.2);
        assert!((snapshot.new_level - 4.5).abs() < 1e-9);
    }

    #[test]
    fn level_never_drops_below_zero() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        let scores = [10.0, 5.0, 0.0, 12.0, 8.0];
        let snapshot = estimator
            .reassess(&mut user, Skill::Speaking, &scores, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.new_level, 0.0);
    }

    #[test]
    fn mean_uses_only_the_score_window() {
        let (store, mut user, _) = setup();
        let config = SkillConfig {
            score_window: 3,
            ..SkillConfig::default()
        };
        let estimator = SkillEstimator::new(&store, &config);
        user.set_skill_level(Skill::Reading, 5.0);
        // Window mean is 95 (+0.3); the trailing low scores must not count.
        let scores = [95.0, 95.0, 95.0, 10.0, 10.0, 10.0];
        let snapshot = estimator
            .reassess(&mut user, Skill::Reading, &scores, Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.adjustment, 0.3);
        assert_eq!(snapshot.recent_scores, vec![95.0, 95.0, 95.0]);
    }

    #[test]
    fn snapshot_and_user_persist_together() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        user.set_skill_level(Skill::Reading, 4.0);
        let scores = [85.0, 82.0, 88.0, 90.0, 79.0];
        estimator
            .reassess(&mut user, Skill::Reading, &scores, Utc::now())
            .unwrap()
            .unwrap();
        let stored = store.user(user.id).unwrap().unwrap();
        assert_eq!(stored.reading_level, user.reading_level);
        let history = store.skill_progress(user.id, Skill::Reading, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger_count, 5);
    }

    #[test]
    fn summary_reports_levels_gaps_and_update_counts() {
        let (store, mut user, config) = setup();
        let estimator = SkillEstimator::new(&store, &config);
        user.set_skill_level(Skill::Writing, 5.0);
        user.set_skill_level(Skill::Listening, 7.5);
        store.save_user(&user).unwrap();
        let scores = [85.0, 82.0, 88.0, 90.0, 79.0];
        estimator
            .reassess(&mut user, Skill::Writing, &scores, Utc::now())
            .unwrap()
            .unwrap();

        let summary = estimator.summary(&user).unwrap();
        assert_eq!(summary[0].skill, Skill::Reading);
        assert_eq!(summary[0].gap, 7.0);
        assert_eq!(summary[0].recent_updates, 0);

        // Writing moved from 5.0 toward the +0.2 adjustment, capped at -0.5.
        assert_eq!(summary[1].skill, Skill::Writing);
        assert_eq!(summary[1].current_level, 4.5);
        assert_eq!(summary[1].gap, 2.5);
        assert_eq!(summary[1].recent_updates, 1);

        // Above-target skill reports a negative gap.
        assert_eq!(summary[2].skill, Skill::Listening);
        assert_eq!(summary[2].gap, -0.5);
        assert_eq!(summary[2].target_score, 7.0);
    }

    proptest! {
        #[test]
        fn step_never_exceeds_max_change(
            level in 0.0f64..=9.0,
            scores in prop::collection::vec(0.0f64..=100.0, 5..20),
        ) {
            let (store, mut user, config) = setup();
            let estimator = SkillEstimator::new(&store, &config);
            user.set_skill_level(Skill::Writing, level);
            let before = user.writing_level;
            let snapshot = estimator
                .reassess(&mut user, Skill::Writing, &scores, Utc::now())
                .unwrap()
                .unwrap();
            prop_assert!((snapshot.new_level - before).abs() <= config.max_change + 1e-9);
            prop_assert!((0.0..=9.0).contains(&snapshot.new_level));
        }
    }
}
