//! Post-complete hooks: extension points run after a purchase has been credited.
//!
//! Hooks run in ascending priority, ties in registration order. Each hook gets its own
//! savepoint inside the completion transaction; a failing hook is rolled back and logged
//! while the purchase and the remaining hooks carry on.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};

use crate::models::{PurchaseRequest, WalletHistory};

/// Default priority when none is given.
pub const DEFAULT_HOOK_PRIORITY: i32 = 0;

/// What a hook is told about the completed purchase.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseCompleted<'a> {
    pub request: &'a PurchaseRequest,
    pub history: &'a WalletHistory,
}

#[async_trait]
pub trait PostCompleteHook: Send + Sync {
    async fn on_purchase_completed(
        &self,
        conn: &mut PgConnection,
        event: &PurchaseCompleted<'_>,
    ) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct HookRegistration {
    pub key: String,
    pub priority: i32,
    pub handler: Arc<dyn PostCompleteHook>,
}

impl HookRegistration {
    pub fn new(key: impl Into<String>, handler: Arc<dyn PostCompleteHook>) -> Self {
        Self {
            key: key.into(),
            priority: DEFAULT_HOOK_PRIORITY,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl std::fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistration")
            .field("key", &self.key)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Result of running one hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookRun {
    pub key: String,
    pub error: Option<String>,
}

impl HookRun {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Default, Clone)]
pub struct HookRegistry {
    registrations: Vec<HookRegistration>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook. A duplicate key replaces the earlier hook but keeps its position.
    pub fn register(&mut self, registration: HookRegistration) {
        match self
            .registrations
            .iter_mut()
            .find(|existing| existing.key == registration.key)
        {
            Some(existing) => {
                tracing::warn!(
                    hook = %registration.key,
                    "Post-complete hook registered twice, replacing the previous hook"
                );
                *existing = registration;
            }
            None => self.registrations.push(registration),
        }
    }

    /// Hooks in execution order.
    pub fn hooks(&self) -> Vec<HookRegistration> {
        let mut hooks = self.registrations.clone();
        hooks.sort_by_key(|registration| registration.priority);
        hooks
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Runs every hook in its own savepoint on `conn`.
    ///
    /// Only a failure to open or close a savepoint is returned as an error; hook failures
    /// are reported in the returned runs.
    pub async fn run_all(
        &self,
        conn: &mut PgConnection,
        event: &PurchaseCompleted<'_>,
    ) -> Result<Vec<HookRun>, sqlx::Error> {
        let mut runs = Vec::with_capacity(self.registrations.len());

        for hook in self.hooks() {
            let mut savepoint = conn.begin().await?;
            let result = hook
                .handler
                .on_purchase_completed(&mut *savepoint, event)
                .await;

            match result {
                Ok(()) => {
                    savepoint.commit().await?;
                    runs.push(HookRun {
                        key: hook.key,
                        error: None,
                    });
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    let message = format!("{:#}", e);
                    tracing::warn!(
                        hook = %hook.key,
                        request_id = %event.request.id,
                        error = %message,
                        "Post-complete hook failed, rolled back its savepoint"
                    );
                    runs.push(HookRun {
                        key: hook.key,
                        error: Some(message),
                    });
                }
            }
        }

        Ok(runs)
    }
}

/// Built-in hook keeping `user_purchase_stats` current.
#[derive(Debug, Default, Clone, Copy)]
pub struct PurchaseStatsHook;

impl PurchaseStatsHook {
    pub const KEY: &'static str = "purchase_stats";
    pub const PRIORITY: i32 = 100;

    pub fn registration() -> HookRegistration {
        HookRegistration::new(Self::KEY, Arc::new(Self)).with_priority(Self::PRIORITY)
    }
}

#[async_trait]
impl PostCompleteHook for PurchaseStatsHook {
    async fn on_purchase_completed(
        &self,
        conn: &mut PgConnection,
        event: &PurchaseCompleted<'_>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_purchase_stats (user_id, completed_purchases, total_amount, last_purchase_at)
            VALUES ($1, 1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE
            SET completed_purchases = user_purchase_stats.completed_purchases + 1,
                total_amount = user_purchase_stats.total_amount + EXCLUDED.total_amount,
                last_purchase_at = EXCLUDED.last_purchase_at
            "#,
        )
        .bind(event.request.user_id)
        .bind(&event.request.payment_amount)
        .bind(event.request.completed_at)
        .execute(conn)
        .await?;
        Ok(())
    }
}
