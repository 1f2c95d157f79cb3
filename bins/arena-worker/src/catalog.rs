// Problem catalog: read-only access to problems and contests
use anyhow::{Context, Result};
use arena_common::redis as store;
use arena_common::types::{Contest, Problem};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::collections::HashMap;

#[async_trait]
pub trait ProblemCatalog: Send + Sync {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>>;

    async fn get_contest(&self, contest_id: &str) -> Result<Option<Contest>>;
}

/// Problems and contests stored as JSON documents in Redis.
#[derive(Clone)]
pub struct RedisCatalog {
    conn: ConnectionManager,
}

impl RedisCatalog {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ProblemCatalog for RedisCatalog {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>> {
        let mut conn = self.conn.clone();
        store::get_problem(&mut conn, problem_id)
            .await
            .with_context(|| format!("Failed to load problem {}", problem_id))
    }

    async fn get_contest(&self, contest_id: &str) -> Result<Option<Contest>> {
        let mut conn = self.conn.clone();
        store::get_contest(&mut conn, contest_id)
            .await
            .with_context(|| format!("Failed to load contest {}", contest_id))
    }
}

/// Fixed catalog, for tests and local runs.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    problems: HashMap<String, Problem>,
    contests: HashMap<String, Contest>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_problem(mut self, problem: Problem) -> Self {
        self.problems.insert(problem.id.clone(), problem);
        self
    }

    pub fn with_contest(mut self, contest: Contest) -> Self {
        self.contests.insert(contest.id.clone(), contest);
        self
    }
}

#[async_trait]
impl ProblemCatalog for InMemoryCatalog {
    async fn get_problem(&self, problem_id: &str) -> Result<Option<Problem>> {
        Ok(self.problems.get(problem_id).cloned())
    }

    async fn get_contest(&self, contest_id: &str) -> Result<Option<Contest>> {
        Ok(self.contests.get(contest_id).cloned())
    }
}
