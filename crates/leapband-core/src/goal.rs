//! Daily goal allocation.
//!
//! One goal per user per calendar day. The allocator scores each skill by
//! gap and neglect, halves the score of the skill targeted yesterday, picks
//! the highest-priority skill, and draws one eligible activity with a
//! categorical anti-repetition bias: activities the user completed within
//! the repeat window draw at a lower weight than fresh ones.
//!
//! Randomness is confined to the activity draw and is seedable through
//! [`GoalConfig::seed`](crate::config::GoalConfig) for deterministic tests.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Mcg128Xsl64;
use tracing::{debug, info};

use crate::config::GoalConfig;
use crate::error::Result;
use crate::model::{Activity, DailyGoal, NewGoal, Skill, User};
use crate::store::EngagementStore;

/// Outcome of a daily goal assignment.
#[derive(Debug, Clone)]
pub enum GoalDecision {
    /// A fresh goal was created for today.
    Assigned(DailyGoal),
    /// Today's goal already existed and is returned unchanged.
    Existing(DailyGoal),
    /// Every skill priority was zero; nothing to assign.
    NoSkillGap,
    /// The chosen skill has no activity in the duration window.
    NoEligibleActivity { skill: Skill },
}

/// Per-skill priority breakdown, exposed for inspection and tests.
#[derive(Debug, Clone, Copy)]
pub struct SkillPriority {
    pub skill: Skill,
    pub gap: f64,
    pub recency_penalty: f64,
    /// Priority after the rotation adjustment.
    pub priority: f64,
}

/// Assigns one activity per user per day.
pub struct GoalAllocator<'a, S: EngagementStore> {
    store: &'a S,
    config: &'a GoalConfig,
}

impl<'a, S: EngagementStore> GoalAllocator<'a, S> {
    pub fn new(store: &'a S, config: &'a GoalConfig) -> Self {
        Self { store, config }
    }

    /// Assign (or return) the user's goal for the calendar day of `now`.
    ///
    /// Idempotent per (user, day): a second call the same day returns the
    /// existing goal unchanged. The no-gap and no-activity outcomes are
    /// values, not errors; the caller decides whether to skip or report.
    ///
    /// # Errors
    /// Returns an error when a store query or the goal insert fails.
    pub fn assign_daily_goal(&self, user: &User, now: DateTime<Utc>) -> Result<GoalDecision> {
        let today = now.date_naive();
        if let Some(existing) = self.store.goal_for_day(user.id, today)? {
            debug!(user_id = user.id, %today, "goal already assigned");
            return Ok(GoalDecision::Existing(existing));
        }

        let priorities = self.skill_priorities(user, now)?;
        let Some(best) = pick_skill(&priorities) else {
            debug!(user_id = user.id, "no skill gap, skipping goal");
            return Ok(GoalDecision::NoSkillGap);
        };

        let candidates = self.store.activities_by_skill_and_duration(
            best.skill,
            self.config.duration_min,
            self.config.duration_max,
        )?;
        if candidates.is_empty() {
            debug!(
                user_id = user.id,
                skill = best.skill.as_str(),
                "no activity in the duration window"
            );
            return Ok(GoalDecision::NoEligibleActivity { skill: best.skill });
        }

        let activity = self.draw_activity(user, &candidates, now)?;
        let goal = self.store.insert_goal(NewGoal {
            user_id: user.id,
            activity_id: activity.id,
            assigned_on: today,
            target_skill: best.skill,
            skill_gap: best.gap,
            priority_score: best.priority,
        })?;
        info!(
            user_id = user.id,
            skill = best.skill.as_str(),
            activity_id = activity.id,
            priority = best.priority,
            "daily goal assigned"
        );
        // The upsert may return a goal another caller created concurrently.
        if goal.activity_id == activity.id && goal.target_skill == best.skill {
            Ok(GoalDecision::Assigned(goal))
        } else {
            Ok(GoalDecision::Existing(goal))
        }
    }

    /// Compute the post-rotation priority of each skill at `now`.
    ///
    /// # Errors
    /// Returns an error when a store query fails.
    pub fn skill_priorities(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<[SkillPriority; 4]> {
        let window = i64::from(self.config.recency_window_days);
        let today = now.date_naive();
        let yesterday = today - Duration::days(1);
        let yesterdays_skill = self
            .store
            .goals_in_range(user.id, yesterday, yesterday)?
            .first()
            .map(|goal| goal.target_skill);

        let mut priorities = [SkillPriority {
            skill: Skill::Reading,
            gap: 0.0,
            recency_penalty: 0.0,
            priority: 0.0,
        }; 4];
        for (slot, skill) in priorities.iter_mut().zip(Skill::ALL) {
            let gap = user.skill_gap(skill);
            // Days since the newest completion in this skill; a skill with
            // none inside the window counts as maximally stale.
            let stale_days = self
                .store
                .completions_by_skill(user.id, skill, 1)?
                .first()
                .map(|c| (today - c.completed_at.date_naive()).num_days().max(0))
                .filter(|days| *days <= window)
                .unwrap_or(i64::from(self.config.stale_days));
            let recency_penalty = stale_days as f64 * self.config.recency_penalty_per_day;
            let mut priority = gap * self.config.gap_weight + recency_penalty;
            if yesterdays_skill == Some(skill) {
                priority *= self.config.rotation_factor;
            }
            *slot = SkillPriority {
                skill,
                gap,
                recency_penalty,
                priority,
            };
        }
        Ok(priorities)
    }

    fn draw_activity(
        &self,
        user: &User,
        candidates: &[Activity],
        now: DateTime<Utc>,
    ) -> Result<Activity> {
        let repeat_start = now - Duration::days(i64::from(self.config.repeat_window_days));
        // The draw bias is a soft preference; the row cap bounds the scan
        // and at worst marks an activity fresh for users past it.
        let recently_done: Vec<i64> = self
            .store
            .recent_completions(user.id, repeat_start, 100)?
            .iter()
            .map(|c| c.activity_id)
            .collect();

        let weights: Vec<u32> = candidates
            .iter()
            .map(|a| {
                if recently_done.contains(&a.id) {
                    self.config.recent_weight
                } else {
                    self.config.fresh_weight
                }
            })
            .collect();
        let total: u32 = weights.iter().sum();

        let mut rng = match self.config.seed {
            Some(seed) => Mcg128Xsl64::seed_from_u64(seed),
            None => Mcg128Xsl64::from_entropy(),
        };
        let index = if total == 0 {
            rng.gen_range(0..candidates.len())
        } else {
            let mut roll = rng.gen_range(0..total);
            let mut chosen = candidates.len() - 1;
            for (i, weight) in weights.iter().enumerate() {
                if roll < *weight {
                    chosen = i;
                    break;
                }
                roll -= weight;
            }
            chosen
        };
        Ok(candidates[index].clone())
    }
}

/// Highest-priority skill with priority strictly above zero. Ties resolve
/// to the skill listed first in [`Skill::ALL`].
fn pick_skill(priorities: &[SkillPriority; 4]) -> Option<SkillPriority> {
    let mut best: Option<SkillPriority> = None;
    for candidate in priorities {
        if candidate.priority <= 0.0 {
            continue;
        }
        match best {
            Some(current) if candidate.priority <= current.priority => {}
            _ => best = Some(*candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Difficulty, NewActivity, NewCompletion, NewUser, Timeline};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn store_with_catalog() -> MemoryStore {
        let store = MemoryStore::new();
        for skill in Skill::ALL {
            for (i, minutes) in [5u32, 10, 15].iter().enumerate() {
                store
                    .create_activity(
                        NewActivity::new(
                            &format!("{} drill {}", skill.as_str(), i + 1),
                            skill,
                            Difficulty::Intermediate,
                            *minutes,
                            10,
                        )
                        .unwrap(),
                    )
                    .unwrap();
            }
        }
        store
    }

    fn user_with_levels(store: &MemoryStore, levels: [f64; 4]) -> User {
        let mut user = store
            .create_user(NewUser::new("amara", 7.0, Timeline::Medium).unwrap())
            .unwrap();
        for (skill, level) in Skill::ALL.into_iter().zip(levels) {
            user.set_skill_level(skill, level);
        }
        store.save_user(&user).unwrap();
        user
    }

    fn zero_recency_config() -> GoalConfig {
        GoalConfig {
            recency_penalty_per_day: 0.0,
            seed: Some(7),
            ..GoalConfig::default()
        }
    }

    #[test]
    fn largest_gap_wins() {
        let store = store_with_catalog();
        // Gaps vs target 7.0: reading 1.0, writing 2.0, listening 0.5,
        // speaking 0.8.
        let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        let decision = allocator.assign_daily_goal(&user, at(2025, 3, 4)).unwrap();
        match decision {
            GoalDecision::Assigned(goal) => {
                assert_eq!(goal.target_skill, Skill::Writing);
                assert_eq!(goal.skill_gap, 2.0);
                assert_eq!(goal.priority_score, 4.0);
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn second_call_returns_the_same_goal() {
        let store = store_with_catalog();
        let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        let now = at(2025, 3, 4);
        let first = match allocator.assign_daily_goal(&user, now).unwrap() {
            GoalDecision::Assigned(goal) => goal,
            other => panic!("expected assignment, got {other:?}"),
        };
        match allocator.assign_daily_goal(&user, now).unwrap() {
            GoalDecision::Existing(goal) => assert_eq!(goal.id, first.id),
            other => panic!("expected existing goal, got {other:?}"),
        }
    }

    #[test]
    fn rotation_exactly_halves_yesterdays_skill() {
        let store = store_with_catalog();
        let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        let unadjusted = allocator.skill_priorities(&user, at(2025, 3, 4)).unwrap();
        let writing_before = unadjusted[1].priority;

        allocator.assign_daily_goal(&user, at(2025, 3, 4)).unwrap();
        let adjusted = allocator.skill_priorities(&user, at(2025, 3, 5)).unwrap();
        assert_eq!(adjusted[1].skill, Skill::Writing);
        assert_eq!(adjusted[1].priority, writing_before * 0.5);
    }

    #[test]
    fn all_zero_priorities_is_no_skill_gap() {
        let store = store_with_catalog();
        // Every level at or above target, and no recency pressure.
        let user = user_with_levels(&store, [7.0, 7.5, 8.0, 7.0]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        match allocator.assign_daily_goal(&user, at(2025, 3, 4)).unwrap() {
            GoalDecision::NoSkillGap => {}
            other => panic!("expected no skill gap, got {other:?}"),
        }
    }

    #[test]
    fn empty_catalog_is_no_eligible_activity() {
        let store = MemoryStore::new();
        let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        match allocator.assign_daily_goal(&user, at(2025, 3, 4)).unwrap() {
            GoalDecision::NoEligibleActivity { skill } => assert_eq!(skill, Skill::Writing),
            other => panic!("expected no eligible activity, got {other:?}"),
        }
    }

    #[test]
    fn duration_window_excludes_long_activities() {
        let store = MemoryStore::new();
        store
            .create_activity(
                NewActivity::new("Long essay", Skill::Writing, Difficulty::Advanced, 45, 30)
                    .unwrap(),
            )
            .unwrap();
        let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
        let config = zero_recency_config();
        let allocator = GoalAllocator::new(&store, &config);
        match allocator.assign_daily_goal(&user, at(2025, 3, 4)).unwrap() {
            GoalDecision::NoEligibleActivity { .. } => {}
            other => panic!("expected no eligible activity, got {other:?}"),
        }
    }

    #[test]
    fn stale_skill_gets_the_full_penalty() {
        let store = store_with_catalog();
        let user = user_with_levels(&store, [5.0, 5.0, 5.0, 5.0]);
        let now = at(2025, 3, 4);
        // Reading practiced two days ago; the rest untouched.
        store
            .insert_completion(NewCompletion {
                user_id: user.id,
                activity_id: 1,
                skill: Skill::Reading,
                score: 80.0,
                points_earned: 8,
                completed_at: now - Duration::days(2),
            })
            .unwrap();
        let config = GoalConfig {
            seed: Some(7),
            ..GoalConfig::default()
        };
        let allocator = GoalAllocator::new(&store, &config);
        let priorities = allocator.skill_priorities(&user, now).unwrap();
        assert_eq!(priorities[0].recency_penalty, 0.2);
        assert_eq!(priorities[1].recency_penalty, 3.0);
        assert_eq!(priorities[3].recency_penalty, 3.0);
    }

    #[test]
    fn recency_survives_a_flood_of_other_skills() {
        let store = store_with_catalog();
        let user = user_with_levels(&store, [5.0, 5.0, 5.0, 5.0]);
        let now = at(2025, 3, 14);
        // One writing completion ten days back, then far more than a
        // hundred reading completions on top of it.
        store
            .insert_completion(NewCompletion {
                user_id: user.id,
                activity_id: 4,
                skill: Skill::Writing,
                score: 80.0,
                points_earned: 8,
                completed_at: now - Duration::days(10),
            })
            .unwrap();
        for i in 0..150 {
            store
                .insert_completion(NewCompletion {
                    user_id: user.id,
                    activity_id: 1,
                    skill: Skill::Reading,
                    score: 80.0,
                    points_earned: 8,
                    completed_at: now - Duration::hours(i),
                })
                .unwrap();
        }
        let config = GoalConfig {
            seed: Some(7),
            ..GoalConfig::default()
        };
        let allocator = GoalAllocator::new(&store, &config);
        let priorities = allocator.skill_priorities(&user, now).unwrap();
        // Writing was practiced 10 days ago, not never.
        assert_eq!(priorities[1].recency_penalty, 1.0);
        assert_eq!(priorities[0].recency_penalty, 0.0);
    }

    #[test]
    fn seeded_draw_is_deterministic() {
        let now = at(2025, 3, 4);
        let pick = || {
            let store = store_with_catalog();
            let user = user_with_levels(&store, [6.0, 5.0, 6.5, 6.2]);
            let config = zero_recency_config();
            let allocator = GoalAllocator::new(&store, &config);
            match allocator.assign_daily_goal(&user, now).unwrap() {
                GoalDecision::Assigned(goal) => goal.activity_id,
                other => panic!("expected assignment, got {other:?}"),
            }
        };
        assert_eq!(pick(), pick());
    }

    #[test]
    fn tie_breaks_to_canonical_skill_order() {
        let priorities = [
            SkillPriority { skill: Skill::Reading, gap: 1.0, recency_penalty: 0.0, priority: 2.0 },
            SkillPriority { skill: Skill::Writing, gap: 1.0, recency_penalty: 0.0, priority: 2.0 },
            SkillPriority { skill: Skill::Listening, gap: 0.5, recency_penalty: 0.0, priority: 1.0 },
            SkillPriority { skill: Skill::Speaking, gap: 0.0, recency_penalty: 0.0, priority: 0.0 },
        ];
        assert_eq!(pick_skill(&priorities).unwrap().skill, Skill::Reading);
    }
}
