//! Purchase request state machine.
//!
//! `pending` → `processing` (optional) → `completed` | `failed` | `expired`. Terminal states are
//! never left. Completion runs as one transaction: the request row is locked, the coupon is
//! re-validated, the wallet is credited through the ledger and the row is marked completed;
//! post-complete hooks, coupon redemption, referral rewards and milestone evaluation then
//! run in savepoints of the same transaction and can fail without undoing the purchase.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::bootstrap::Extensions;
use crate::config::Config;
use crate::coupons::{self, CouponPreview, CouponStage};
use crate::error::{is_unique_violation, AppError};
use crate::hooks::{HookRun, PurchaseCompleted};
use crate::ledger::{BalanceChange, Ledger};
use crate::milestones::{MilestoneEvaluator, TRIGGER_PURCHASE_COMPLETED as MILESTONE_PURCHASE_COMPLETED};
use crate::models::purchase_request::PURCHASE_REQUEST_COLUMNS;
use crate::models::wallet_history::{CHANGE_PAYMENT, SOURCE_PURCHASE};
use crate::models::{Coupon, NewPurchaseRequest, PurchaseRequest, PurchaseStatus, Wallet, WalletHistory};
use crate::payment_providers::{PaymentError, PaymentProvider, SessionParams};
use crate::referrals;
use crate::rewards::{trigger_rewards, TRIGGER_PURCHASE_COMPLETED};

/// Error code stored when the provider could not create a checkout session.
pub const ERROR_SESSION_CREATION_FAILED: &str = "session_creation_failed";
/// Error code stored by the expiry sweep.
pub const ERROR_EXPIRED: &str = "expired";
/// Error code stored when a paid request's coupon fails re-validation.
pub const ERROR_COUPON_REJECTED: &str = "coupon_rejected";

const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;
const AMOUNT_SCALE: i64 = 2;

/// Settings the service reads from configuration.
#[derive(Debug, Clone)]
pub struct PurchaseSettings {
    pub ttl: Duration,
    pub success_url: String,
    pub cancel_url: String,
}

impl PurchaseSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.purchase_ttl(),
            success_url: config.success_url.clone(),
            cancel_url: config.cancel_url.clone(),
        }
    }
}

/// Client input for a new purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePurchase {
    pub user_id: Uuid,
    pub wallet_type: String,
    /// Currency units to credit.
    pub amount: BigDecimal,
    /// Amount to charge before discounts.
    pub payment_amount: BigDecimal,
    pub payment_method: String,
    pub idempotency_key: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// Passed to the provider untouched.
    #[serde(default)]
    pub provider_options: Option<serde_json::Value>,
}

/// Fields covered by the idempotency fingerprint. Amounts are normalized so that `1000` and
/// `1000.00` are the same payload.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintPayload<'a> {
    user_id: Uuid,
    wallet_type: &'a str,
    amount: String,
    payment_amount: String,
    payment_method: &'a str,
    coupon_code: Option<&'a str>,
}

fn is_positive_money(value: &BigDecimal) -> bool {
    value > &BigDecimal::from(0) && value.with_scale(AMOUNT_SCALE) == *value
}

impl InitiatePurchase {
    pub fn validate(&self) -> Result<(), AppError> {
        let key = self.idempotency_key.trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::Validation(format!(
                "Idempotency key must be between 1 and {} characters",
                MAX_IDEMPOTENCY_KEY_LEN
            )));
        }
        if self.wallet_type.trim().is_empty() {
            return Err(AppError::Validation("Wallet type is required".to_string()));
        }
        if self.payment_method.trim().is_empty() {
            return Err(AppError::Validation(
                "Payment method is required".to_string(),
            ));
        }
        if !is_positive_money(&self.amount) {
            return Err(AppError::Validation(
                "Amount must be positive with at most 2 decimal places".to_string(),
            ));
        }
        if !is_positive_money(&self.payment_amount) {
            return Err(AppError::Validation(
                "Payment amount must be positive with at most 2 decimal places".to_string(),
            ));
        }
        Ok(())
    }

    fn coupon_code(&self) -> Option<&str> {
        self.coupon_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }

    /// SHA-256 of the canonical client payload.
    pub fn fingerprint(&self) -> Result<String, AppError> {
        let payload = FingerprintPayload {
            user_id: self.user_id,
            wallet_type: &self.wallet_type,
            amount: self.amount.normalized().to_string(),
            payment_amount: self.payment_amount.normalized().to_string(),
            payment_method: &self.payment_method,
            coupon_code: self.coupon_code(),
        };
        coinvault_crypto::payload_fingerprint(&payload)
            .map_err(|e| AppError::Internal(format!("Failed to fingerprint purchase: {}", e)))
    }
}

/// Result of [`PurchaseService::initiate_purchase`].
#[derive(Debug, Clone)]
pub struct PurchaseInitiation {
    pub request: PurchaseRequest,
    /// True when an identical earlier submission was returned.
    pub replayed: bool,
}

/// How a caller identifies a purchase request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseRef {
    Id(Uuid),
    Session(String),
}

impl std::fmt::Display for PurchaseRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PurchaseRef::Id(id) => write!(f, "request {}", id),
            PurchaseRef::Session(session_id) => write!(f, "session {}", session_id),
        }
    }
}

/// Result of [`PurchaseService::complete_purchase`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseCompletion {
    pub request: PurchaseRequest,
    pub history: WalletHistory,
    /// True when the request had already been completed.
    pub replayed: bool,
    #[serde(skip)]
    pub hook_runs: Vec<HookRun>,
}

/// Purchase engine entry points. Cheap to clone.
#[derive(Clone)]
pub struct PurchaseService {
    pool: PgPool,
    extensions: Arc<Extensions>,
    provider: Arc<dyn PaymentProvider>,
    milestones: Arc<dyn MilestoneEvaluator>,
    settings: PurchaseSettings,
}

async fn lock_request(
    conn: &mut PgConnection,
    reference: &PurchaseRef,
) -> Result<PurchaseRequest, AppError> {
    let request: Option<PurchaseRequest> = match reference {
        PurchaseRef::Id(id) => {
            sqlx::query_as(&format!(
                "SELECT {PURCHASE_REQUEST_COLUMNS} FROM purchase_requests WHERE id = $1 FOR UPDATE"
            ))
            .bind(*id)
            .fetch_optional(&mut *conn)
            .await?
        }
        PurchaseRef::Session(session_id) => {
            sqlx::query_as(&format!(
                "SELECT {PURCHASE_REQUEST_COLUMNS} FROM purchase_requests \
                 WHERE payment_session_id = $1 FOR UPDATE"
            ))
            .bind(session_id.as_str())
            .fetch_optional(&mut *conn)
            .await?
        }
    };

    request.ok_or_else(|| AppError::NotFound(format!("Purchase request not found for {}", reference)))
}

async fn find_by_idempotency_key(
    conn: &mut PgConnection,
    idempotency_key: &str,
) -> Result<Option<PurchaseRequest>, AppError> {
    let request = sqlx::query_as(&format!(
        "SELECT {PURCHASE_REQUEST_COLUMNS} FROM purchase_requests WHERE idempotency_key = $1"
    ))
    .bind(idempotency_key)
    .fetch_optional(conn)
    .await?;
    Ok(request)
}

/// Returns the existing request for an identical payload, `Conflict` otherwise.
fn replay_or_conflict(
    existing: PurchaseRequest,
    fingerprint: &str,
) -> Result<PurchaseInitiation, AppError> {
    if existing.request_fingerprint != fingerprint {
        return Err(AppError::Conflict(format!(
            "Idempotency key {} was already used with a different payload",
            existing.idempotency_key
        )));
    }
    Ok(PurchaseInitiation {
        request: existing,
        replayed: true,
    })
}

async fn insert_request(
    conn: &mut PgConnection,
    new: &NewPurchaseRequest,
) -> Result<Option<PurchaseRequest>, AppError> {
    let request = sqlx::query_as(&format!(
        r#"
        INSERT INTO purchase_requests
            (idempotency_key, request_fingerprint, user_id, wallet_type, amount, payment_amount,
             original_payment_amount, discount_amount, coupon_code, payment_provider,
             payment_method, status, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (idempotency_key) DO NOTHING
        RETURNING {PURCHASE_REQUEST_COLUMNS}
        "#
    ))
    .bind(&new.idempotency_key)
    .bind(&new.request_fingerprint)
    .bind(new.user_id)
    .bind(&new.wallet_type)
    .bind(&new.amount)
    .bind(&new.payment_amount)
    .bind(&new.original_payment_amount)
    .bind(&new.discount_amount)
    .bind(&new.coupon_code)
    .bind(&new.payment_provider)
    .bind(&new.payment_method)
    .bind(PurchaseStatus::Pending)
    .bind(new.expires_at)
    .fetch_optional(conn)
    .await?;
    Ok(request)
}

/// Merges caller-supplied metadata under the engine's own keys.
fn ledger_meta(
    request: &PurchaseRequest,
    transaction_id: &str,
    extra: &serde_json::Value,
) -> serde_json::Value {
    let mut meta = json!({
        "transactionId": transaction_id,
        "paymentProvider": request.payment_provider,
        "paymentMethod": request.payment_method,
        "paymentAmount": request.payment_amount.to_string(),
        "discountAmount": request.discount_amount.to_string(),
    });
    if let Some(code) = &request.coupon_code {
        meta["couponCode"] = json!(code);
    }
    if let (Some(target), Some(source)) = (meta.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    meta
}

impl PurchaseService {
    pub fn new(
        pool: PgPool,
        extensions: Arc<Extensions>,
        provider: Arc<dyn PaymentProvider>,
        milestones: Arc<dyn MilestoneEvaluator>,
        settings: PurchaseSettings,
    ) -> Self {
        Self {
            pool,
            extensions,
            provider,
            milestones,
            settings,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn provider(&self) -> &dyn PaymentProvider {
        self.provider.as_ref()
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Creates a pending purchase request and its checkout session.
    ///
    /// Re-submitting the same payload under the same idempotency key returns the stored
    /// request; a different payload fails with `Conflict`.
    pub async fn initiate_purchase(
        &self,
        input: InitiatePurchase,
    ) -> Result<PurchaseInitiation, AppError> {
        input.validate()?;
        let fingerprint = input.fingerprint()?;
        let idempotency_key = input.idempotency_key.trim().to_string();

        let mut tx = self.pool.begin().await?;

        if let Some(existing) = find_by_idempotency_key(&mut tx, &idempotency_key).await? {
            return replay_or_conflict(existing, &fingerprint);
        }

        let coupon_code = input.coupon_code().map(str::to_string);
        let (payment_amount, discount_amount) = match &coupon_code {
            Some(code) => {
                let coupon = coupons::require_coupon(&mut tx, code).await?;
                let effect = self
                    .extensions
                    .coupons
                    .apply(
                        &mut tx,
                        &coupon,
                        input.user_id,
                        &input.payment_amount,
                        CouponStage::Quote,
                    )
                    .await?;
                (
                    effect.final_payment_amount(&input.payment_amount),
                    effect.discount_amount(),
                )
            }
            None => (input.payment_amount.clone(), BigDecimal::from(0)),
        };

        let new = NewPurchaseRequest {
            idempotency_key: idempotency_key.clone(),
            request_fingerprint: fingerprint.clone(),
            user_id: input.user_id,
            wallet_type: input.wallet_type.trim().to_string(),
            amount: input.amount.clone(),
            payment_amount,
            original_payment_amount: input.payment_amount.clone(),
            discount_amount,
            coupon_code,
            payment_provider: self.provider.name().to_string(),
            payment_method: input.payment_method.trim().to_string(),
            expires_at: Utc::now() + self.settings.ttl,
        };

        let request = match insert_request(&mut tx, &new).await? {
            Some(request) => request,
            None => {
                // Lost the race for the key; the winner has committed by now.
                tx.rollback().await?;
                let mut conn = self.pool.acquire().await?;
                let existing = find_by_idempotency_key(&mut conn, &idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(format!(
                            "Idempotency key {} conflicted but no request was found",
                            idempotency_key
                        ))
                    })?;
                return replay_or_conflict(existing, &fingerprint);
            }
        };
        tx.commit().await?;

        tracing::info!(
            request_id = %request.id,
            user_id = %request.user_id,
            wallet_type = %request.wallet_type,
            amount = %request.amount,
            payment_amount = %request.payment_amount,
            "Purchase request created"
        );

        let request = self
            .open_session(request, input.provider_options.unwrap_or_else(|| json!({})))
            .await?;

        Ok(PurchaseInitiation {
            request,
            replayed: false,
        })
    }

    /// Runs the session enricher and asks the provider for a checkout session.
    async fn open_session(
        &self,
        request: PurchaseRequest,
        provider_options: serde_json::Value,
    ) -> Result<PurchaseRequest, AppError> {
        let params = SessionParams {
            purchase_request_id: request.id,
            amount: request.payment_amount.clone(),
            success_url: self.settings.success_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            provider_options,
        };

        let params = match self.extensions.session_enricher() {
            Some(enricher) => {
                match enricher
                    .enrich(request.user_id, &request.wallet_type, params)
                    .await
                {
                    Ok(params) => params,
                    Err(e) => {
                        let err = AppError::Internal(format!("Session enricher failed: {:#}", e));
                        self.record_session_failure(request.id, &err).await;
                        return Err(err);
                    }
                }
            }
            None => params,
        };

        let session = match self.provider.create_session(&params).await {
            Ok(session) => session,
            Err(e) => {
                let err = AppError::from(e);
                self.record_session_failure(request.id, &err).await;
                return Err(err);
            }
        };

        let updated: Result<Option<PurchaseRequest>, sqlx::Error> = sqlx::query_as(&format!(
            r#"
            UPDATE purchase_requests
            SET payment_session_id = $2,
                redirect_url = $3,
                expires_at = LEAST(expires_at, COALESCE($4, expires_at)),
                updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {PURCHASE_REQUEST_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(&session.session_id)
        .bind(&session.redirect_url)
        .bind(session.expires_at)
        .fetch_optional(&self.pool)
        .await;

        match updated {
            Ok(Some(request)) => {
                tracing::info!(
                    request_id = %request.id,
                    session_id = %session.session_id,
                    provider = %self.provider.name(),
                    "Checkout session attached"
                );
                Ok(request)
            }
            Ok(None) => Err(AppError::InvalidState(format!(
                "Purchase request {} left pending before its session was attached",
                request.id
            ))),
            Err(e) if is_unique_violation(&e, "purchase_requests_session_id_idx") => {
                let err = AppError::from(PaymentError::ProviderApi(format!(
                    "Provider returned a session id already in use: {}",
                    session.session_id
                )));
                self.record_session_failure(request.id, &err).await;
                Err(err)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Marks a request failed after session creation went wrong. Logged, never propagated.
    async fn record_session_failure(&self, request_id: Uuid, err: &AppError) {
        tracing::warn!(
            request_id = %request_id,
            error = %err,
            "Checkout session creation failed"
        );
        let result = sqlx::query(
            r#"
            UPDATE purchase_requests
            SET status = 'failed', error_code = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(request_id)
        .bind(ERROR_SESSION_CREATION_FAILED)
        .bind(err.to_string())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                request_id = %request_id,
                error = %e,
                "Failed to record session creation failure"
            );
        }
    }

    /// Completes a paid purchase exactly once.
    ///
    /// A request that is already completed returns its stored result with `replayed = true`.
    /// The amounts stored at initiation are the ones credited and recorded. A coupon that no
    /// longer validates fails the request with `coupon_rejected`.
    pub async fn complete_purchase(
        &self,
        reference: PurchaseRef,
        transaction_id: &str,
        signature: Option<&str>,
        meta: serde_json::Value,
    ) -> Result<PurchaseCompletion, AppError> {
        if transaction_id.trim().is_empty() {
            return Err(AppError::Validation(
                "Provider transaction id is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let request = lock_request(&mut tx, &reference).await?;

        if request.is_completed() {
            let history = Ledger::new(&mut tx)
                .find_by_batch(request.id, SOURCE_PURCHASE)
                .await?
                .ok_or_else(|| {
                    AppError::Internal(format!(
                        "Completed request {} has no ledger entry",
                        request.id
                    ))
                })?;
            tx.commit().await?;
            tracing::info!(
                request_id = %request.id,
                transaction_id = %transaction_id,
                "Purchase already completed, returning stored result"
            );
            return Ok(PurchaseCompletion {
                request,
                history,
                replayed: true,
                hook_runs: Vec::new(),
            });
        }

        if !request.status.is_open() {
            return Err(AppError::InvalidState(format!(
                "Purchase request {} is {} and cannot be completed",
                request.id, request.status
            )));
        }

        let coupon = match &request.coupon_code {
            Some(code) => match self.recheck_coupon(&mut tx, &request, code).await {
                Ok(coupon) => Some(coupon),
                Err(AppError::Validation(reason)) => {
                    tx.rollback().await?;
                    return Err(self.reject_completion(&request, reason).await);
                }
                Err(e) => return Err(e),
            },
            None => None,
        };

        if request.is_past_deadline(Utc::now()) {
            tracing::info!(
                request_id = %request.id,
                expires_at = %request.expires_at,
                "Completing purchase past its deadline, the sweep has not expired it"
            );
        }

        let change = BalanceChange::new(
            request.user_id,
            request.wallet_type.clone(),
            request.amount.clone(),
            CHANGE_PAYMENT,
            SOURCE_PURCHASE,
        )
        .with_batch(request.id)
        .with_reason("purchase")
        .with_meta(ledger_meta(&request, transaction_id, &meta));
        let entry = Ledger::new(&mut tx).adjust_balance(&change).await?;

        let now = Utc::now();
        let request: PurchaseRequest = sqlx::query_as(&format!(
            r#"
            UPDATE purchase_requests
            SET status = 'completed',
                transaction_id = $2,
                webhook_signature = $3,
                paid_at = COALESCE(paid_at, $4),
                completed_at = $4,
                error_code = NULL,
                error_message = NULL,
                updated_at = $4
            WHERE id = $1
            RETURNING {PURCHASE_REQUEST_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(transaction_id)
        .bind(signature)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tracing::info!(
            request_id = %request.id,
            user_id = %request.user_id,
            wallet_type = %request.wallet_type,
            amount = %request.amount,
            balance_after = %entry.wallet.balance,
            transaction_id = %transaction_id,
            "Purchase completed"
        );

        let event = PurchaseCompleted {
            request: &request,
            history: &entry.history,
        };
        let hook_runs = self.extensions.hooks.run_all(&mut tx, &event).await?;

        if let Some(coupon) = &coupon {
            self.redeem_coupon(&mut tx, coupon, &request).await?;
        }
        self.reward_referrer(&mut tx, &request).await?;
        self.evaluate_milestones(&mut tx, &request).await?;

        tx.commit().await?;

        Ok(PurchaseCompletion {
            request,
            history: entry.history,
            replayed: false,
            hook_runs,
        })
    }

    /// Re-validates the request's coupon against the amount it was priced on.
    ///
    /// The stored amounts are what the provider charged and are never re-priced here; a
    /// discount that changed since initiation is only logged.
    async fn recheck_coupon(
        &self,
        conn: &mut PgConnection,
        request: &PurchaseRequest,
        code: &str,
    ) -> Result<Coupon, AppError> {
        let coupon = coupons::require_coupon(conn, code).await?;
        let effect = self
            .extensions
            .coupons
            .apply(
                conn,
                &coupon,
                request.user_id,
                &request.original_payment_amount,
                CouponStage::Completion,
            )
            .await?;

        let discount_amount = effect.discount_amount();
        if discount_amount != request.discount_amount {
            tracing::warn!(
                request_id = %request.id,
                coupon = %coupon.code,
                charged_discount = %request.discount_amount,
                current_discount = %discount_amount,
                "Coupon discount changed since initiation, keeping the charged amounts"
            );
        }
        Ok(coupon)
    }

    /// Moves a request whose coupon no longer validates to `failed` so it is not left open
    /// after payment. Returns the error to report to the caller.
    async fn reject_completion(&self, request: &PurchaseRequest, reason: String) -> AppError {
        tracing::warn!(
            request_id = %request.id,
            coupon = ?request.coupon_code,
            reason = %reason,
            "Coupon rejected at completion, failing the paid request"
        );
        match self
            .fail_purchase(
                PurchaseRef::Id(request.id),
                ERROR_COUPON_REJECTED,
                Some(&reason),
            )
            .await
        {
            Ok(_) => AppError::Validation(reason),
            Err(e) => e,
        }
    }

    async fn redeem_coupon(
        &self,
        conn: &mut PgConnection,
        coupon: &Coupon,
        request: &PurchaseRequest,
    ) -> Result<(), sqlx::Error> {
        let mut savepoint = conn.begin().await?;
        match self
            .extensions
            .coupons
            .on_redeemed(&mut savepoint, coupon, request.user_id)
            .await
        {
            Ok(()) => savepoint.commit().await,
            Err(e) => {
                savepoint.rollback().await?;
                tracing::warn!(
                    request_id = %request.id,
                    coupon = %coupon.code,
                    category = %coupon.category,
                    error = %format!("{:#}", e),
                    "Coupon redemption side effect failed"
                );
                Ok(())
            }
        }
    }

    /// Fires `purchase_completed` rewards for the buyer's referral, if they were referred.
    async fn reward_referrer(
        &self,
        conn: &mut PgConnection,
        request: &PurchaseRequest,
    ) -> Result<(), sqlx::Error> {
        let mut savepoint = conn.begin().await?;
        let result = async {
            let Some(referral) = referrals::find_by_invitee(&mut savepoint, request.user_id).await?
            else {
                return Ok::<_, AppError>(());
            };
            trigger_rewards(
                &self.extensions.rewards,
                &mut savepoint,
                TRIGGER_PURCHASE_COMPLETED,
                &referral,
                &json!({ "purchaseRequestId": request.id }),
            )
            .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => savepoint.commit().await,
            Err(e) => {
                savepoint.rollback().await?;
                tracing::warn!(
                    request_id = %request.id,
                    user_id = %request.user_id,
                    error = %e,
                    "Referral reward trigger failed"
                );
                Ok(())
            }
        }
    }

    async fn evaluate_milestones(
        &self,
        conn: &mut PgConnection,
        request: &PurchaseRequest,
    ) -> Result<(), sqlx::Error> {
        let mut savepoint = conn.begin().await?;
        match self
            .milestones
            .evaluate(&mut savepoint, MILESTONE_PURCHASE_COMPLETED, request)
            .await
        {
            Ok(()) => savepoint.commit().await,
            Err(e) => {
                savepoint.rollback().await?;
                tracing::warn!(
                    request_id = %request.id,
                    error = %format!("{:#}", e),
                    "Milestone evaluation failed"
                );
                Ok(())
            }
        }
    }

    /// Marks an open request failed. Failing an already failed request is a no-op.
    pub async fn fail_purchase(
        &self,
        reference: PurchaseRef,
        error_code: &str,
        error_message: Option<&str>,
    ) -> Result<PurchaseRequest, AppError> {
        let mut tx = self.pool.begin().await?;
        let request = lock_request(&mut tx, &reference).await?;

        if request.is_failed() {
            tx.commit().await?;
            return Ok(request);
        }
        if !request.status.is_open() {
            return Err(AppError::InvalidState(format!(
                "Purchase request {} is {} and cannot be failed",
                request.id, request.status
            )));
        }

        let request: PurchaseRequest = sqlx::query_as(&format!(
            r#"
            UPDATE purchase_requests
            SET status = 'failed', error_code = $2, error_message = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING {PURCHASE_REQUEST_COLUMNS}
            "#
        ))
        .bind(request.id)
        .bind(error_code)
        .bind(error_message)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::info!(
            request_id = %request.id,
            error_code = %error_code,
            "Purchase failed"
        );
        Ok(request)
    }

    /// Moves a pending request to `processing`. Idempotent on `processing`.
    pub async fn mark_processing(&self, reference: PurchaseRef) -> Result<PurchaseRequest, AppError> {
        let mut tx = self.pool.begin().await?;
        let request = lock_request(&mut tx, &reference).await?;

        match request.status {
            PurchaseStatus::Processing => {
                tx.commit().await?;
                Ok(request)
            }
            PurchaseStatus::Pending => {
                let request: PurchaseRequest = sqlx::query_as(&format!(
                    r#"
                    UPDATE purchase_requests
                    SET status = 'processing', updated_at = NOW()
                    WHERE id = $1
                    RETURNING {PURCHASE_REQUEST_COLUMNS}
                    "#
                ))
                .bind(request.id)
                .fetch_one(&mut *tx)
                .await?;
                tx.commit().await?;
                tracing::debug!(request_id = %request.id, "Purchase processing");
                Ok(request)
            }
            status => Err(AppError::InvalidState(format!(
                "Purchase request {} is {} and cannot move to processing",
                request.id, status
            ))),
        }
    }

    /// Expires open requests whose deadline is before `now`. Returns the expired ids.
    pub async fn expire_pending_requests(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, AppError> {
        let expired: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE purchase_requests
            SET status = 'expired', error_code = $2, updated_at = NOW()
            WHERE status IN ('pending', 'processing') AND expires_at < $1
            RETURNING id
            "#,
        )
        .bind(now)
        .bind(ERROR_EXPIRED)
        .fetch_all(&self.pool)
        .await?;

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired purchase requests");
        }
        Ok(expired)
    }

    pub async fn get_purchase(&self, id: Uuid) -> Result<PurchaseRequest, AppError> {
        sqlx::query_as(&format!(
            "SELECT {PURCHASE_REQUEST_COLUMNS} FROM purchase_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Purchase request not found: {}", id)))
    }

    /// Checks a coupon for a prospective payment without side effects.
    pub async fn preview_coupon(
        &self,
        user_id: Uuid,
        code: &str,
        payment_amount: &BigDecimal,
    ) -> Result<CouponPreview, AppError> {
        let mut conn = self.pool.acquire().await?;
        match coupons::find_coupon_by_code(&mut conn, code.trim()).await? {
            Some(coupon) => {
                self.extensions
                    .coupons
                    .preview(&mut conn, &coupon, user_id, payment_amount)
                    .await
            }
            None => Ok(CouponPreview {
                valid: false,
                reason: Some(format!("Unknown coupon code: {}", code.trim())),
                effect: None,
                description: None,
            }),
        }
    }

    pub async fn get_wallet(&self, user_id: Uuid, wallet_type: &str) -> Result<Wallet, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ledger::new(&mut conn)
            .get_wallet(user_id, wallet_type)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "Wallet {} not found for user {}",
                    wallet_type, user_id
                ))
            })
    }

    pub async fn list_history(
        &self,
        user_id: Uuid,
        wallet_type: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletHistory>, AppError> {
        let mut conn = self.pool.acquire().await?;
        Ledger::new(&mut conn)
            .list_history(user_id, wallet_type, limit, offset)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn input() -> InitiatePurchase {
        InitiatePurchase {
            user_id: Uuid::nil(),
            wallet_type: "regular_coin".to_string(),
            amount: BigDecimal::from(1000),
            payment_amount: BigDecimal::from(1000),
            payment_method: "card".to_string(),
            idempotency_key: "k1".to_string(),
            coupon_code: None,
            provider_options: None,
        }
    }

    #[test]
    fn test_valid_input() {
        assert!(input().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_amounts() {
        let mut bad = input();
        bad.amount = BigDecimal::from(0);
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));

        let mut bad = input();
        bad.payment_amount = BigDecimal::from(-5);
        assert!(matches!(bad.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_rejects_sub_cent_amounts() {
        let mut bad = input();
        bad.payment_amount = BigDecimal::from_str("10.005").unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rejects_blank_key() {
        let mut bad = input();
        bad.idempotency_key = "  ".to_string();
        assert!(bad.validate().is_err());

        let mut bad = input();
        bad.idempotency_key = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_fingerprint_ignores_decimal_formatting() {
        let a = input();
        let mut b = input();
        b.amount = BigDecimal::from_str("1000.00").unwrap();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_ignores_blank_coupon() {
        let a = input();
        let mut b = input();
        b.coupon_code = Some(" ".to_string());
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_fingerprint_changes_with_payload() {
        let a = input();
        let mut b = input();
        b.payment_amount = BigDecimal::from(999);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let mut c = input();
        c.coupon_code = Some("HALF".to_string());
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_purchase_ref_display() {
        assert_eq!(
            PurchaseRef::Session("sess_1".to_string()).to_string(),
            "session sess_1"
        );
    }
}
