//! Read storm against a simulated users store.
//!
//! Fires many identical reads at once through [`Caches`], then a write and a
//! re-read, and reports how many physical executions the store saw.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::{debug, info, instrument};

use crate::cache::{Caches, EntityType, ExecutionError, Query, Statement};
use crate::config::StormSettings;

pub const USERS_TABLE: &str = "users";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: String,
    pub roles: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

/// In-memory users table with a fixed per-call latency.
#[derive(Debug)]
pub struct UserStore {
    rows: RwLock<BTreeMap<u64, User>>,
    latency: Duration,
    executions: AtomicUsize,
}

impl UserStore {
    pub fn new(latency: Duration) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            latency,
            executions: AtomicUsize::new(0),
        }
    }

    /// Store pre-populated with a handful of users.
    pub fn seeded(latency: Duration) -> Self {
        let rows = [
            (1, "ada", &["admin", "author"][..]),
            (2, "grace", &["author"][..]),
            (3, "linus", &[][..]),
        ]
        .into_iter()
        .map(|(id, name, roles)| {
            let user = User {
                id,
                name: name.to_string(),
                roles: roles.iter().map(|role| role.to_string()).collect(),
                attributes: BTreeMap::from([("locale".to_string(), "en".to_string())]),
            };
            (id, user)
        })
        .collect();

        Self {
            rows: RwLock::new(rows),
            latency,
            executions: AtomicUsize::new(0),
        }
    }

    /// Physical reads and writes performed so far.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub async fn find(&self, id: u64) -> Result<Query<Vec<User>>, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;

        let found: Vec<User> = self.rows.read().await.get(&id).cloned().into_iter().collect();
        let rows = found.len() as u64;
        Ok(Query::with_rows(found, rows))
    }

    pub async fn rename(&self, id: u64, name: &str) -> Result<u64, ExecutionError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        sleep(self.latency).await;

        match self.rows.write().await.get_mut(&id) {
            Some(user) => {
                user.name = name.to_string();
                Ok(1)
            }
            None => Err(ExecutionError::message(format!("user {id} not found"))),
        }
    }
}

pub fn find_statement(id: u64) -> Statement {
    Statement::new(USERS_TABLE, EntityType::of::<User>())
        .sql("SELECT * FROM users WHERE id = $1")
        .bind(id)
}

pub fn rename_statement(id: u64, name: &str) -> Statement {
    Statement::new(USERS_TABLE, EntityType::of::<User>())
        .sql("UPDATE users SET name = $1 WHERE id = $2")
        .bind(name)
        .bind(id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StormReport {
    pub callers: usize,
    /// Store executions caused by the concurrent burst.
    pub storm_executions: usize,
    /// Store executions caused by one follow-up read after the burst.
    pub follow_up_executions: usize,
    /// Name observed by the read issued after the rename.
    pub renamed_to: Option<String>,
    /// Cache-layer failures recorded across every call.
    pub cache_errors: usize,
}

/// Run a burst of identical reads, one follow-up read, a rename and a re-read.
#[instrument(skip_all, fields(callers = settings.callers.get(), user_id = settings.user_id))]
pub async fn run(
    caches: &Caches,
    store: &UserStore,
    settings: &StormSettings,
) -> Result<StormReport, ExecutionError> {
    let user_id = settings.user_id;
    let callers = settings.callers.get();
    let statement = find_statement(user_id);
    let mut cache_errors = 0;

    let before = store.executions();
    let burst = (0..callers).map(|_| caches.query(&statement, || store.find(user_id)));
    for outcome in join_all(burst).await {
        cache_errors += outcome.cache_errors.len();
        outcome.into_result()?;
    }
    let storm_executions = store.executions() - before;
    debug!(storm_executions, "burst complete");

    let before = store.executions();
    let follow_up = caches.query(&statement, || store.find(user_id)).await;
    cache_errors += follow_up.cache_errors.len();
    follow_up.into_result()?;
    let follow_up_executions = store.executions() - before;

    let renamed = format!("user-{user_id}-renamed");
    let update = caches
        .update(&rename_statement(user_id, &renamed), || {
            store.rename(user_id, &renamed)
        })
        .await;
    cache_errors += update.cache_errors.len();
    update.into_result()?;

    let reread = caches.query(&statement, || store.find(user_id)).await;
    cache_errors += reread.cache_errors.len();
    let renamed_to = reread
        .into_result()?
        .dest
        .and_then(|users| users.into_iter().next())
        .map(|user| user.name);

    let report = StormReport {
        callers,
        storm_executions,
        follow_up_executions,
        renamed_to,
        cache_errors,
    };
    info!(
        storm_executions = report.storm_executions,
        follow_up_executions = report.follow_up_executions,
        cache_errors = report.cache_errors,
        "storm finished"
    );
    Ok(report)
}
