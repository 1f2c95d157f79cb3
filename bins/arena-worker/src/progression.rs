/// Progression Updater
///
/// XP and solved-state bookkeeping, applied only after an all-passed verdict.
/// Every award is idempotent: crediting the same (user, problem) or
/// (user, contest, milestone) twice is a no-op that reports `false`.

use anyhow::{Context, Result};
use arena_common::redis as store;
use arena_common::types::{ContestMilestone, UserProgress};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

#[async_trait]
pub trait ProgressionUpdater: Send + Sync {
    /// Returns whether XP was credited.
    async fn award_problem_solved(&self, user_id: &str, problem_id: &str, xp: u32) -> Result<bool>;

    /// Returns whether XP was credited.
    async fn award_contest_milestone(
        &self,
        user_id: &str,
        contest_id: &str,
        milestone: &ContestMilestone,
        xp: u32,
    ) -> Result<bool>;

    async fn is_participating(&self, user_id: &str, contest_id: &str) -> Result<bool>;

    async fn contest_solved_problems(&self, user_id: &str, contest_id: &str) -> Result<Vec<String>>;

    async fn progress(&self, user_id: &str) -> Result<UserProgress>;
}

/// One async mutex per user. Holding the guard serializes check-then-award
/// sequences for that user inside this process.
#[derive(Default)]
pub struct UserLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Progression stored in Redis. Each award is one Lua script, atomic across workers.
#[derive(Clone)]
pub struct RedisProgression {
    conn: ConnectionManager,
}

impl RedisProgression {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProgressionUpdater for RedisProgression {
    async fn award_problem_solved(&self, user_id: &str, problem_id: &str, xp: u32) -> Result<bool> {
        let mut conn = self.conn.clone();
        store::award_problem_solved(&mut conn, user_id, problem_id, xp)
            .await
            .with_context(|| format!("Failed to award problem {} to {}", problem_id, user_id))
    }

    async fn award_contest_milestone(
        &self,
        user_id: &str,
        contest_id: &str,
        milestone: &ContestMilestone,
        xp: u32,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        store::award_contest_milestone(&mut conn, user_id, contest_id, milestone, xp)
            .await
            .with_context(|| format!("Failed to award {:?} in contest {} to {}", milestone, contest_id, user_id))
    }

    async fn is_participating(&self, user_id: &str, contest_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        store::is_participating(&mut conn, user_id, contest_id)
            .await
            .context("Failed to check contest participation")
    }

    async fn contest_solved_problems(&self, user_id: &str, contest_id: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        store::contest_solved_problems(&mut conn, user_id, contest_id)
            .await
            .context("Failed to load contest progress")
    }

    async fn progress(&self, user_id: &str) -> Result<UserProgress> {
        let mut conn = self.conn.clone();
        store::get_progress(&mut conn, user_id)
            .await
            .context("Failed to load user progress")
    }
}

#[derive(Debug, Default)]
struct UserState {
    progress: UserProgress,
    solved: HashSet<String>,
    joined: HashSet<String>,
    completed: HashSet<String>,
    contest_solved: HashMap<String, HashSet<String>>,
}

/// Process-local progression, for tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryProgression {
    users: Mutex<HashMap<String, UserState>>,
}

impl InMemoryProgression {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_user<T>(&self, user_id: &str, f: impl FnOnce(&mut UserState) -> T) -> T {
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        f(users.entry(user_id.to_string()).or_default())
    }
}

#[async_trait]
impl ProgressionUpdater for InMemoryProgression {
    async fn award_problem_solved(&self, user_id: &str, problem_id: &str, xp: u32) -> Result<bool> {
        Ok(self.with_user(user_id, |user| {
            if !user.solved.insert(problem_id.to_string()) {
                return false;
            }
            user.progress.total_xp += i64::from(xp);
            user.progress.problems_solved_xp += i64::from(xp);
            user.progress.solved_questions += 1;
            true
        }))
    }

    async fn award_contest_milestone(
        &self,
        user_id: &str,
        contest_id: &str,
        milestone: &ContestMilestone,
        xp: u32,
    ) -> Result<bool> {
        Ok(self.with_user(user_id, |user| {
            let inserted = match milestone {
                ContestMilestone::Joined => user.joined.insert(contest_id.to_string()),
                ContestMilestone::Solved { problem_id } => user
                    .contest_solved
                    .entry(contest_id.to_string())
                    .or_default()
                    .insert(problem_id.clone()),
                ContestMilestone::Completed => user.completed.insert(contest_id.to_string()),
            };
            if !inserted {
                return false;
            }

            user.progress.total_xp += i64::from(xp);
            user.progress.contests_xp += i64::from(xp);
            match milestone {
                ContestMilestone::Joined => user.progress.contests_participated += 1,
                ContestMilestone::Completed => user.progress.contests_finished += 1,
                ContestMilestone::Solved { .. } => {}
            }
            true
        }))
    }

    async fn is_participating(&self, user_id: &str, contest_id: &str) -> Result<bool> {
        Ok(self.with_user(user_id, |user| user.joined.contains(contest_id)))
    }

    async fn contest_solved_problems(&self, user_id: &str, contest_id: &str) -> Result<Vec<String>> {
        Ok(self.with_user(user_id, |user| {
            user.contest_solved
                .get(contest_id)
                .map(|solved| solved.iter().cloned().collect())
                .unwrap_or_default()
        }))
    }

    async fn progress(&self, user_id: &str) -> Result<UserProgress> {
        Ok(self.with_user(user_id, |user| user.progress.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_common::types::{
        CONTEST_COMPLETE_XP, CONTEST_JOIN_XP, CONTEST_SOLVE_XP, PROBLEM_SOLVED_XP,
    };
    use std::time::Duration;

    #[tokio::test]
    async fn test_problem_award_is_idempotent() {
        let progression = InMemoryProgression::new();

        assert!(progression.award_problem_solved("u1", "sum", PROBLEM_SOLVED_XP).await.unwrap());
        assert!(!progression.award_problem_solved("u1", "sum", PROBLEM_SOLVED_XP).await.unwrap());
        assert!(progression.award_problem_solved("u2", "sum", PROBLEM_SOLVED_XP).await.unwrap());

        let progress = progression.progress("u1").await.unwrap();
        assert_eq!(progress.total_xp, 50);
        assert_eq!(progress.problems_solved_xp, 50);
        assert_eq!(progress.solved_questions, 1);
    }

    #[tokio::test]
    async fn test_contest_milestones() {
        let progression = InMemoryProgression::new();
        let solved = ContestMilestone::Solved {
            problem_id: "sum".to_string(),
        };

        assert!(!progression.is_participating("u1", "c1").await.unwrap());
        assert!(progression
            .award_contest_milestone("u1", "c1", &ContestMilestone::Joined, CONTEST_JOIN_XP)
            .await
            .unwrap());
        assert!(progression.is_participating("u1", "c1").await.unwrap());

        assert!(progression.award_contest_milestone("u1", "c1", &solved, CONTEST_SOLVE_XP).await.unwrap());
        assert!(!progression.award_contest_milestone("u1", "c1", &solved, CONTEST_SOLVE_XP).await.unwrap());
        assert_eq!(progression.contest_solved_problems("u1", "c1").await.unwrap(), vec!["sum"]);

        assert!(progression
            .award_contest_milestone("u1", "c1", &ContestMilestone::Completed, CONTEST_COMPLETE_XP)
            .await
            .unwrap());

        let progress = progression.progress("u1").await.unwrap();
        assert_eq!(progress.total_xp, 260);
        assert_eq!(progress.contests_xp, 260);
        assert_eq!(progress.contests_participated, 1);
        assert_eq!(progress.contests_finished, 1);
        assert_eq!(progress.solved_questions, 0);
    }

    #[tokio::test]
    async fn test_user_locks_serialize_same_user() {
        let locks = Arc::new(UserLocks::new());
        let guard = locks.lock("u1").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("u1").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        // A different user is not blocked.
        let other = tokio::time::timeout(Duration::from_millis(200), locks.lock("u2")).await;
        assert!(other.is_ok());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }
}
