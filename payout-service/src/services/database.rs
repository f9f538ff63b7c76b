//! Database service for payout-service.
//!
//! All payment-request lifecycle writes live here. Multi-row sequences
//! (submission, verification, confirmation, revert) run inside Postgres
//! transactions; merge grouping and ungrouping go through the stored
//! procedures so each is atomic as a unit.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::dtos::SubmitItemInput;
use crate::models::attachment::{push_with_eviction, AttachmentDescriptor};
use crate::models::candidate::{
    merge_candidate_sources, missing_group_members, project_group_display, CandidateItem,
    CandidateSource,
};
use crate::models::confirmation::{
    parse_settings_map, ApprovedItemRow, ConfirmationDraft, PaymentConfirmation,
    PaymentConfirmationItem, RemittanceSettings,
};
use crate::models::payment_request::{next_merge_color, VerificationStatus};
use crate::models::quotation::BankInfo;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::remittance::{group_lines, resolve_remittance_name, RemittanceGroup, RemittanceLine};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

/// Fresh candidates as exposed by the `get_available_pending_payments` view.
#[derive(Debug, FromRow)]
struct FreshItemRow {
    quotation_item_id: Uuid,
    kol_id: Option<Uuid>,
    kol_name: Option<String>,
    project_name: String,
    service: String,
    quantity: i32,
    price: i64,
    cost: i64,
}

/// Draft and rejected requests joined with their quotation context.
#[derive(Debug, FromRow)]
struct ExistingRequestRow {
    payment_request_id: Uuid,
    quotation_item_id: Uuid,
    verification_status: String,
    cost_amount: i64,
    invoice_number: Option<String>,
    attachment_file_path: Option<String>,
    merge_group_id: Option<Uuid>,
    is_merge_leader: bool,
    merge_color: Option<String>,
    rejection_reason: Option<String>,
    kol_id: Option<Uuid>,
    kol_name: Option<String>,
    project_name: String,
    service: String,
    quantity: i32,
    price: i64,
}

/// Membership snapshot used by the submission group-atomicity check.
#[derive(Debug, FromRow)]
struct MembershipRow {
    quotation_item_id: Uuid,
    merge_group_id: Option<Uuid>,
    is_merge_leader: bool,
}

/// One confirmed line joined back to its remittance sources.
#[derive(Debug, FromRow)]
struct ConfirmationLineRow {
    confirmation_item_id: Uuid,
    amount_at_confirmation: i64,
    kol_name_at_confirmation: String,
    project_name_at_confirmation: String,
    service_at_confirmation: String,
    remittance_name: Option<String>,
    bank_info: Option<Value>,
    real_name: Option<String>,
    kol_display_name: Option<String>,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "payout-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Candidate Item Discovery
    // -------------------------------------------------------------------------

    /// Surface every quotation item eligible for a payment request: fresh
    /// items from the view, plus draft and rejected requests. The sets are
    /// deduplicated by quotation item, and merge groups are projected so
    /// followers display the leader's shared fields.
    #[instrument(skip(self))]
    pub async fn list_candidates(&self) -> Result<Vec<CandidateItem>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_candidates"])
            .start_timer();

        let fresh_rows = sqlx::query_as::<_, FreshItemRow>(
            r#"
            SELECT quotation_item_id, kol_id, kol_name, project_name, service, quantity, price, cost
            FROM get_available_pending_payments
            ORDER BY quotation_item_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list fresh items: {}", e))
        })?;

        let existing_rows = sqlx::query_as::<_, ExistingRequestRow>(
            r#"
            SELECT pr.payment_request_id, pr.quotation_item_id, pr.verification_status,
                pr.cost_amount, pr.invoice_number, pr.attachment_file_path,
                pr.merge_group_id, pr.is_merge_leader, pr.merge_color, pr.rejection_reason,
                qi.kol_id, k.name AS kol_name, q.project_name, qi.service, qi.quantity, qi.price
            FROM payment_requests pr
            JOIN quotation_items qi ON qi.quotation_item_id = pr.quotation_item_id
            JOIN quotations q ON q.quotation_id = qi.quotation_id
            LEFT JOIN kols k ON k.kol_id = qi.kol_id
            WHERE (pr.verification_status = 'pending' AND pr.request_date IS NULL)
               OR pr.verification_status = 'rejected'
            ORDER BY pr.created_utc
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list existing requests: {}", e))
        })?;

        timer.observe_duration();

        let fresh = fresh_rows
            .into_iter()
            .map(|r| CandidateItem {
                quotation_item_id: r.quotation_item_id,
                payment_request_id: None,
                source: CandidateSource::Fresh,
                kol_id: r.kol_id,
                kol_name: r.kol_name,
                project_name: r.project_name,
                service: r.service,
                quantity: r.quantity,
                price: r.price,
                cost_amount: r.cost * i64::from(r.quantity),
                invoice_number: None,
                attachments: Vec::new(),
                merge_group_id: None,
                is_merge_leader: false,
                merge_color: None,
                rejection_reason: None,
                is_ready: false,
            })
            .collect();

        let existing = existing_rows
            .into_iter()
            .map(|r| CandidateItem {
                quotation_item_id: r.quotation_item_id,
                payment_request_id: Some(r.payment_request_id),
                source: match VerificationStatus::from_string(&r.verification_status) {
                    VerificationStatus::Rejected => CandidateSource::Rejected,
                    _ => CandidateSource::Draft,
                },
                kol_id: r.kol_id,
                kol_name: r.kol_name,
                project_name: r.project_name,
                service: r.service,
                quantity: r.quantity,
                price: r.price,
                cost_amount: r.cost_amount,
                invoice_number: r.invoice_number,
                attachments: AttachmentDescriptor::parse_list(r.attachment_file_path.as_deref()),
                merge_group_id: r.merge_group_id,
                is_merge_leader: r.is_merge_leader,
                merge_color: r.merge_color,
                rejection_reason: r.rejection_reason,
                is_ready: false,
            })
            .collect();

        let mut candidates = merge_candidate_sources(fresh, existing);
        project_group_display(&mut candidates);

        Ok(candidates)
    }

    // -------------------------------------------------------------------------
    // Merge Engine
    // -------------------------------------------------------------------------

    /// Create a merge group over the given quotation items via the grouping
    /// stored procedure, then assign a display color unused by live groups.
    /// All items must share one KOL and none may already be merged.
    #[instrument(skip(self, quotation_item_ids), fields(count = quotation_item_ids.len()))]
    pub async fn create_merge_group(
        &self,
        quotation_item_ids: &[Uuid],
        merge_type: &str,
    ) -> Result<(Uuid, String), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_merge_group"])
            .start_timer();

        if quotation_item_ids.len() < 2 {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A merge group needs at least two items"
            )));
        }
        if merge_type != "account" {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Unsupported merge type '{}'",
                merge_type
            )));
        }

        let kol_ids: Vec<Option<Uuid>> = sqlx::query_scalar(
            r#"
            SELECT kol_id FROM quotation_items WHERE quotation_item_id = ANY($1)
            "#,
        )
        .bind(quotation_item_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load items: {}", e)))?;

        if kol_ids.len() != quotation_item_ids.len() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "One or more quotation items do not exist"
            )));
        }
        let distinct: HashSet<Option<Uuid>> = kol_ids.iter().copied().collect();
        if distinct.len() != 1 || distinct.contains(&None) {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "All merged items must belong to the same KOL"
            )));
        }

        let already_merged: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM payment_requests
            WHERE quotation_item_id = ANY($1) AND merge_group_id IS NOT NULL
            "#,
        )
        .bind(quotation_item_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to check groups: {}", e)))?;
        if already_merged > 0 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "One or more items already belong to a merge group"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let group_id: Uuid =
            sqlx::query_scalar("SELECT create_payment_request_group($1, $2)")
                .bind(quotation_item_ids)
                .bind(merge_type)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(anyhow::anyhow!("Failed to create group: {}", e))
                })?;

        let colors_in_use: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT merge_color FROM payment_requests
            WHERE merge_group_id IS NOT NULL
              AND merge_group_id <> $1
              AND merge_color IS NOT NULL
            "#,
        )
        .bind(group_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load colors: {}", e)))?;

        let color = next_merge_color(&colors_in_use).to_string();
        sqlx::query(
            r#"
            UPDATE payment_requests SET merge_color = $2, updated_utc = NOW()
            WHERE merge_group_id = $1
            "#,
        )
        .bind(group_id)
        .bind(&color)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to assign color: {}", e)))?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit group: {}", e))
        })?;

        timer.observe_duration();

        info!(merge_group_id = %group_id, members = quotation_item_ids.len(), "Merge group created");

        Ok((group_id, color))
    }

    /// Dissolve a merge group through the ungrouping stored procedure. The
    /// procedure clears group fields on every member and wipes the mirrored
    /// invoice/attachment columns on non-leaders only, atomically.
    #[instrument(skip(self), fields(merge_group_id = %group_id))]
    pub async fn ungroup_payment_requests(&self, group_id: Uuid) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ungroup_payment_requests"])
            .start_timer();

        let member_count: i32 = sqlx::query_scalar("SELECT ungroup_payment_requests($1)")
            .bind(group_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to ungroup: {}", e)))?;

        timer.observe_duration();

        if member_count == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Merge group {} not found",
                group_id
            )));
        }

        info!(merge_group_id = %group_id, members = member_count, "Merge group dissolved");

        Ok(i64::from(member_count))
    }

    // -------------------------------------------------------------------------
    // Attachments
    // -------------------------------------------------------------------------

    /// Register an uploaded attachment descriptor. Persisted attachment
    /// writes always target the group leader; the caps evict the oldest
    /// uploads, which are returned for best-effort storage cleanup.
    #[instrument(skip(self, descriptor), fields(payment_request_id = %payment_request_id))]
    pub async fn register_attachment(
        &self,
        payment_request_id: Uuid,
        descriptor: AttachmentDescriptor,
    ) -> Result<(Uuid, Vec<AttachmentDescriptor>, Vec<AttachmentDescriptor>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_attachment"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let row: Option<(Uuid, Option<Uuid>, bool, Option<String>)> = sqlx::query_as(
            r#"
            SELECT payment_request_id, merge_group_id, is_merge_leader, attachment_file_path
            FROM payment_requests
            WHERE payment_request_id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment_request_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load request: {}", e)))?;

        let (mut target_id, group_id, is_leader, mut stored) = match row {
            Some(r) => r,
            None => {
                return Err(AppError::NotFound(anyhow::anyhow!(
                    "Payment request not found"
                )))
            }
        };

        // Redirect follower writes to the leader row.
        if let (Some(group_id), false) = (group_id, is_leader) {
            let leader: Option<(Uuid, Option<String>)> = sqlx::query_as(
                r#"
                SELECT payment_request_id, attachment_file_path
                FROM payment_requests
                WHERE merge_group_id = $1 AND is_merge_leader = TRUE
                FOR UPDATE
                "#,
            )
            .bind(group_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to load leader: {}", e))
            })?;

            match leader {
                Some((leader_id, leader_stored)) => {
                    target_id = leader_id;
                    stored = leader_stored;
                }
                None => {
                    return Err(AppError::Conflict(anyhow::anyhow!(
                        "Merge group {} has no leader",
                        group_id
                    )))
                }
            }
        }

        let mut attachments = AttachmentDescriptor::parse_list(stored.as_deref());
        let evicted = push_with_eviction(&mut attachments, descriptor)
            .map_err(|e| AppError::BadRequest(anyhow::Error::new(e)))?;
        let serialized = AttachmentDescriptor::serialize_list(&attachments)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Bad attachment list: {}", e)))?;

        sqlx::query(
            r#"
            UPDATE payment_requests SET attachment_file_path = $2, updated_utc = NOW()
            WHERE payment_request_id = $1
            "#,
        )
        .bind(target_id)
        .bind(&serialized)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to store attachment: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit attachment: {}", e))
        })?;

        timer.observe_duration();

        if !evicted.is_empty() {
            warn!(
                payment_request_id = %target_id,
                evicted = evicted.len(),
                "Attachment cap exceeded, oldest files evicted"
            );
        }

        Ok((target_id, attachments, evicted))
    }

    // -------------------------------------------------------------------------
    // Submission
    // -------------------------------------------------------------------------

    /// Submit the selected items into the pipeline: upsert each payment
    /// request to pending with today's request date, clearing prior
    /// rejections. Grouped items must be selected as a whole group, and every
    /// member persists the leader's invoice number and attachment list.
    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn submit_payment_requests(&self, items: &[SubmitItemInput]) -> Result<u64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["submit_payment_requests"])
            .start_timer();

        let item_ids: Vec<Uuid> = items.iter().map(|i| i.quotation_item_id).collect();
        let selected: HashSet<Uuid> = item_ids.iter().copied().collect();
        if selected.len() != item_ids.len() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Duplicate quotation items in submission"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        // Membership of every group touched by the selection.
        let memberships = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT quotation_item_id, merge_group_id, is_merge_leader
            FROM payment_requests
            WHERE merge_group_id IN (
                SELECT merge_group_id FROM payment_requests
                WHERE quotation_item_id = ANY($1) AND merge_group_id IS NOT NULL
            )
            FOR UPDATE
            "#,
        )
        .bind(&item_ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load group members: {}", e))
        })?;

        let mut group_members: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        let mut group_leaders: HashMap<Uuid, Uuid> = HashMap::new();
        let mut item_groups: HashMap<Uuid, Uuid> = HashMap::new();
        for m in &memberships {
            if let Some(group_id) = m.merge_group_id {
                group_members
                    .entry(group_id)
                    .or_default()
                    .push(m.quotation_item_id);
                item_groups.insert(m.quotation_item_id, group_id);
                if m.is_merge_leader {
                    group_leaders.insert(group_id, m.quotation_item_id);
                }
            }
        }

        let missing = missing_group_members(&selected, &group_members);
        if !missing.is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "Merge groups must be submitted whole; {} member(s) missing from the selection",
                missing.len()
            )));
        }

        let inputs: HashMap<Uuid, &SubmitItemInput> =
            items.iter().map(|i| (i.quotation_item_id, i)).collect();

        let mut submitted: u64 = 0;
        for item in items {
            // Grouped members persist the leader's shared fields; ungrouped
            // items persist their own.
            let source = match item_groups.get(&item.quotation_item_id) {
                Some(group_id) => {
                    let leader_item = group_leaders.get(group_id).ok_or_else(|| {
                        AppError::Conflict(anyhow::anyhow!("Merge group {} has no leader", group_id))
                    })?;
                    *inputs.get(leader_item).ok_or_else(|| {
                        AppError::BadRequest(anyhow::anyhow!(
                            "Group leader missing from the selection"
                        ))
                    })?
                }
                None => item,
            };

            let attachment_json = match &source.attachments {
                Some(list) => AttachmentDescriptor::serialize_list(list).map_err(|e| {
                    AppError::InternalError(anyhow::anyhow!("Bad attachment list: {}", e))
                })?,
                None => None,
            };

            let result = sqlx::query(
                r#"
                INSERT INTO payment_requests (
                    payment_request_id, quotation_item_id, verification_status, request_date,
                    cost_amount, invoice_number, attachment_file_path
                )
                VALUES ($1, $2, 'pending', CURRENT_DATE, $3, $4, $5)
                ON CONFLICT (quotation_item_id) DO UPDATE
                SET verification_status = 'pending',
                    request_date = CURRENT_DATE,
                    cost_amount = EXCLUDED.cost_amount,
                    invoice_number = EXCLUDED.invoice_number,
                    attachment_file_path = EXCLUDED.attachment_file_path,
                    rejection_reason = NULL,
                    rejected_by = NULL,
                    rejected_at = NULL,
                    updated_utc = NOW()
                WHERE payment_requests.verification_status IN ('pending', 'rejected')
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(item.quotation_item_id)
            .bind(item.cost_amount)
            .bind(&source.invoice_number)
            .bind(&attachment_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to submit item: {}", e))
            })?;

            if result.rows_affected() == 0 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Quotation item {} is already approved or confirmed",
                    item.quotation_item_id
                )));
            }
            submitted += result.rows_affected();
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit submission: {}", e))
        })?;

        timer.observe_duration();

        info!(submitted = submitted, "Payment requests submitted");

        Ok(submitted)
    }

    // -------------------------------------------------------------------------
    // Verification
    // -------------------------------------------------------------------------

    /// Expand a request id to its whole merge group, locking the rows.
    async fn lock_group_ids(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        payment_request_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT payment_request_id FROM payment_requests
            WHERE payment_request_id = $1
               OR merge_group_id IS NOT NULL AND merge_group_id = (
                    SELECT merge_group_id FROM payment_requests WHERE payment_request_id = $1
               )
            FOR UPDATE
            "#,
        )
        .bind(payment_request_id)
        .fetch_all(&mut **tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load group: {}", e)))?;

        if ids.is_empty() {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Payment request not found"
            )));
        }
        Ok(ids)
    }

    /// Approve a pending request. Grouped requests approve as one batch;
    /// stale rejection fields are cleared.
    #[instrument(skip(self), fields(payment_request_id = %payment_request_id, approved_by = approved_by))]
    pub async fn approve_request(
        &self,
        payment_request_id: Uuid,
        approved_by: &str,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["approve_request"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let ids = Self::lock_group_ids(&mut tx, payment_request_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_requests
            SET verification_status = 'approved',
                approved_by = $2,
                approved_at = NOW(),
                rejection_reason = NULL,
                rejected_by = NULL,
                rejected_at = NULL,
                updated_utc = NOW()
            WHERE payment_request_id = ANY($1) AND verification_status = 'pending'
            "#,
        )
        .bind(&ids)
        .bind(approved_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to approve: {}", e)))?;

        if result.rows_affected() != ids.len() as u64 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only pending requests can be approved"
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit approval: {}", e))
        })?;

        timer.observe_duration();

        info!(approved = ids.len(), "Payment request(s) approved");

        Ok(ids)
    }

    /// Reject a pending request with a reason. Grouped requests reject as one
    /// batch and share the reason.
    #[instrument(skip(self, reason), fields(payment_request_id = %payment_request_id, rejected_by = rejected_by))]
    pub async fn reject_request(
        &self,
        payment_request_id: Uuid,
        reason: &str,
        rejected_by: &str,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["reject_request"])
            .start_timer();

        if reason.trim().is_empty() {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "A rejection requires a reason"
            )));
        }

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let ids = Self::lock_group_ids(&mut tx, payment_request_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_requests
            SET verification_status = 'rejected',
                rejection_reason = $2,
                rejected_by = $3,
                rejected_at = NOW(),
                updated_utc = NOW()
            WHERE payment_request_id = ANY($1) AND verification_status = 'pending'
            "#,
        )
        .bind(&ids)
        .bind(reason)
        .bind(rejected_by)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to reject: {}", e)))?;

        if result.rows_affected() != ids.len() as u64 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only pending requests can be rejected"
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit rejection: {}", e))
        })?;

        timer.observe_duration();

        info!(rejected = ids.len(), "Payment request(s) rejected");

        Ok(ids)
    }

    /// Revert an approved request (whole group) back to pending.
    #[instrument(skip(self), fields(payment_request_id = %payment_request_id))]
    pub async fn revert_request(&self, payment_request_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revert_request"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let ids = Self::lock_group_ids(&mut tx, payment_request_id).await?;

        let result = sqlx::query(
            r#"
            UPDATE payment_requests
            SET verification_status = 'pending',
                approved_by = NULL,
                approved_at = NULL,
                rejection_reason = NULL,
                rejected_by = NULL,
                rejected_at = NULL,
                updated_utc = NOW()
            WHERE payment_request_id = ANY($1) AND verification_status = 'approved'
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to revert: {}", e)))?;

        if result.rows_affected() != ids.len() as u64 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Only approved requests can be reverted"
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit revert: {}", e))
        })?;

        timer.observe_duration();

        info!(reverted = ids.len(), "Payment request(s) reverted to pending");

        Ok(ids)
    }

    // -------------------------------------------------------------------------
    // Confirmation
    // -------------------------------------------------------------------------

    /// Confirm every approved request as one batch: insert the confirmation
    /// header, snapshot each item, and flip the requests to confirmed, all in
    /// one transaction.
    #[instrument(skip(self), fields(created_by = created_by))]
    pub async fn confirm_approved(
        &self,
        created_by: &str,
    ) -> Result<(PaymentConfirmation, Vec<PaymentConfirmationItem>), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["confirm_approved"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let rows = sqlx::query_as::<_, ApprovedItemRow>(
            r#"
            SELECT pr.payment_request_id, k.name AS kol_name, q.project_name,
                qi.service, qi.quantity, qi.price
            FROM payment_requests pr
            JOIN quotation_items qi ON qi.quotation_item_id = pr.quotation_item_id
            JOIN quotations q ON q.quotation_id = qi.quotation_id
            LEFT JOIN kols k ON k.kol_id = qi.kol_id
            WHERE pr.verification_status = 'approved'
            ORDER BY pr.created_utc
            FOR UPDATE OF pr
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load approved items: {}", e))
        })?;

        let draft = ConfirmationDraft::from_approved(&rows).map_err(AppError::BadRequest)?;

        let confirmation = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            INSERT INTO payment_confirmations (
                confirmation_id, confirmation_date, total_amount, total_items, created_by
            )
            VALUES ($1, CURRENT_DATE, $2, $3, $4)
            RETURNING confirmation_id, confirmation_date, total_amount, total_items,
                created_by, remittance_settings, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(draft.total_amount)
        .bind(draft.total_items)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to create confirmation: {}", e))
        })?;

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            let inserted = sqlx::query_as::<_, PaymentConfirmationItem>(
                r#"
                INSERT INTO payment_confirmation_items (
                    confirmation_item_id, confirmation_id, payment_request_id,
                    amount_at_confirmation, kol_name_at_confirmation,
                    project_name_at_confirmation, service_at_confirmation
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING confirmation_item_id, confirmation_id, payment_request_id,
                    amount_at_confirmation, kol_name_at_confirmation,
                    project_name_at_confirmation, service_at_confirmation, created_utc
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(confirmation.confirmation_id)
            .bind(item.payment_request_id)
            .bind(item.amount)
            .bind(&item.kol_name)
            .bind(&item.project_name)
            .bind(&item.service)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Failed to snapshot confirmation item: {}",
                    e
                ))
            })?;
            items.push(inserted);
        }

        let request_ids: Vec<Uuid> = draft.items.iter().map(|i| i.payment_request_id).collect();
        let result = sqlx::query(
            r#"
            UPDATE payment_requests
            SET verification_status = 'confirmed', updated_utc = NOW()
            WHERE payment_request_id = ANY($1) AND verification_status = 'approved'
            "#,
        )
        .bind(&request_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to confirm: {}", e)))?;

        if result.rows_affected() != request_ids.len() as u64 {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Approved set changed while confirming"
            )));
        }

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit confirmation: {}", e))
        })?;

        timer.observe_duration();

        info!(
            confirmation_id = %confirmation.confirmation_id,
            total_amount = confirmation.total_amount,
            total_items = confirmation.total_items,
            "Payment confirmation created"
        );

        Ok((confirmation, items))
    }

    /// List confirmations, newest first.
    #[instrument(skip(self))]
    pub async fn list_confirmations(&self) -> Result<Vec<PaymentConfirmation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_confirmations"])
            .start_timer();

        let confirmations = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            SELECT confirmation_id, confirmation_date, total_amount, total_items,
                created_by, remittance_settings, created_utc
            FROM payment_confirmations
            ORDER BY created_utc DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to list confirmations: {}", e))
        })?;

        timer.observe_duration();

        Ok(confirmations)
    }

    /// Get a confirmation with its snapshot items.
    #[instrument(skip(self), fields(confirmation_id = %confirmation_id))]
    pub async fn get_confirmation(
        &self,
        confirmation_id: Uuid,
    ) -> Result<Option<(PaymentConfirmation, Vec<PaymentConfirmationItem>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_confirmation"])
            .start_timer();

        let confirmation = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            SELECT confirmation_id, confirmation_date, total_amount, total_items,
                created_by, remittance_settings, created_utc
            FROM payment_confirmations
            WHERE confirmation_id = $1
            "#,
        )
        .bind(confirmation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get confirmation: {}", e))
        })?;

        let Some(confirmation) = confirmation else {
            timer.observe_duration();
            return Ok(None);
        };

        let items = sqlx::query_as::<_, PaymentConfirmationItem>(
            r#"
            SELECT confirmation_item_id, confirmation_id, payment_request_id,
                amount_at_confirmation, kol_name_at_confirmation,
                project_name_at_confirmation, service_at_confirmation, created_utc
            FROM payment_confirmation_items
            WHERE confirmation_id = $1
            ORDER BY created_utc
            "#,
        )
        .bind(confirmation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get confirmation items: {}", e))
        })?;

        timer.observe_duration();

        Ok(Some((confirmation, items)))
    }

    /// Revert a confirmed batch: delete the snapshot items, delete the
    /// header, and reset every referenced request to pending. Children are
    /// deleted before the parent; the request reset runs last.
    #[instrument(skip(self), fields(confirmation_id = %confirmation_id))]
    pub async fn revert_confirmation(
        &self,
        confirmation_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["revert_confirmation"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let request_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT payment_request_id FROM payment_confirmation_items
            WHERE confirmation_id = $1
            "#,
        )
        .bind(confirmation_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load confirmation items: {}", e))
        })?;

        sqlx::query("DELETE FROM payment_confirmation_items WHERE confirmation_id = $1")
            .bind(confirmation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete items: {}", e))
            })?;

        let deleted = sqlx::query("DELETE FROM payment_confirmations WHERE confirmation_id = $1")
            .bind(confirmation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Failed to delete confirmation: {}", e))
            })?;

        if deleted.rows_affected() == 0 {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Confirmation not found"
            )));
        }

        sqlx::query(
            r#"
            UPDATE payment_requests
            SET verification_status = 'pending', updated_utc = NOW()
            WHERE payment_request_id = ANY($1)
            "#,
        )
        .bind(&request_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to reset requests: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit revert: {}", e))
        })?;

        timer.observe_duration();

        info!(
            confirmation_id = %confirmation_id,
            restored = request_ids.len(),
            "Confirmation reverted"
        );

        Ok(request_ids)
    }

    /// Update the payout toggles for one remittance name on a confirmation.
    #[instrument(skip(self, settings), fields(confirmation_id = %confirmation_id, remittance_name = remittance_name))]
    pub async fn update_remittance_settings(
        &self,
        confirmation_id: Uuid,
        remittance_name: &str,
        settings: RemittanceSettings,
    ) -> Result<PaymentConfirmation, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_remittance_settings"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to begin transaction: {}", e))
        })?;

        let current: Option<Value> = sqlx::query_scalar(
            r#"
            SELECT remittance_settings FROM payment_confirmations
            WHERE confirmation_id = $1
            FOR UPDATE
            "#,
        )
        .bind(confirmation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load settings: {}", e)))?;

        let Some(current) = current else {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Confirmation not found"
            )));
        };

        let mut map = parse_settings_map(&current);
        map.insert(remittance_name.to_string(), settings);
        let updated_value = serde_json::to_value(&map)
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("Bad settings map: {}", e)))?;

        let confirmation = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            UPDATE payment_confirmations
            SET remittance_settings = $2
            WHERE confirmation_id = $1
            RETURNING confirmation_id, confirmation_date, total_amount, total_items,
                created_by, remittance_settings, created_utc
            "#,
        )
        .bind(confirmation_id)
        .bind(&updated_value)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to update settings: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to commit settings: {}", e))
        })?;

        timer.observe_duration();

        Ok(confirmation)
    }

    // -------------------------------------------------------------------------
    // Remittance (read-side)
    // -------------------------------------------------------------------------

    /// Load a confirmation's items grouped by resolved remittance name, with
    /// per-group netting applied from the stored settings map.
    #[instrument(skip(self), fields(confirmation_id = %confirmation_id))]
    pub async fn remittance_groups(
        &self,
        confirmation_id: Uuid,
    ) -> Result<Option<(PaymentConfirmation, Vec<RemittanceGroup>)>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["remittance_groups"])
            .start_timer();

        let confirmation = sqlx::query_as::<_, PaymentConfirmation>(
            r#"
            SELECT confirmation_id, confirmation_date, total_amount, total_items,
                created_by, remittance_settings, created_utc
            FROM payment_confirmations
            WHERE confirmation_id = $1
            "#,
        )
        .bind(confirmation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to get confirmation: {}", e))
        })?;

        let Some(confirmation) = confirmation else {
            timer.observe_duration();
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, ConfirmationLineRow>(
            r#"
            SELECT pci.confirmation_item_id, pci.amount_at_confirmation,
                pci.kol_name_at_confirmation, pci.project_name_at_confirmation,
                pci.service_at_confirmation,
                qi.remittance_name, k.bank_info, k.real_name, k.name AS kol_display_name
            FROM payment_confirmation_items pci
            JOIN payment_requests pr ON pr.payment_request_id = pci.payment_request_id
            JOIN quotation_items qi ON qi.quotation_item_id = pr.quotation_item_id
            LEFT JOIN kols k ON k.kol_id = qi.kol_id
            WHERE pci.confirmation_id = $1
            ORDER BY pci.created_utc
            "#,
        )
        .bind(confirmation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to load remittance lines: {}", e))
        })?;

        timer.observe_duration();

        let lines = rows
            .into_iter()
            .map(|r| {
                let bank_info = BankInfo::from_value(r.bank_info.as_ref());
                let remittance_name = resolve_remittance_name(
                    r.remittance_name.as_deref(),
                    bank_info.as_ref(),
                    r.real_name.as_deref(),
                    r.kol_display_name.as_deref(),
                );
                RemittanceLine {
                    confirmation_item_id: r.confirmation_item_id,
                    kol_name: r.kol_name_at_confirmation,
                    project_name: r.project_name_at_confirmation,
                    service: r.service_at_confirmation,
                    amount: r.amount_at_confirmation,
                    remittance_name,
                    bank_label: bank_info.map(|b| b.bank_label()).unwrap_or_default(),
                }
            })
            .collect();

        let settings_map = parse_settings_map(&confirmation.remittance_settings);
        let groups = group_lines(lines, &settings_map);

        Ok(Some((confirmation, groups)))
    }

    /// Load one payment request by id.
    #[instrument(skip(self), fields(payment_request_id = %payment_request_id))]
    pub async fn get_payment_request(
        &self,
        payment_request_id: Uuid,
    ) -> Result<Option<crate::models::PaymentRequest>, AppError> {
        let request = sqlx::query_as::<_, crate::models::PaymentRequest>(
            r#"
            SELECT payment_request_id, quotation_item_id, verification_status, request_date,
                cost_amount, invoice_number, attachment_file_path, merge_group_id, merge_type,
                is_merge_leader, merge_color, rejection_reason, rejected_by, rejected_at,
                approved_by, approved_at, created_utc, updated_utc
            FROM payment_requests
            WHERE payment_request_id = $1
            "#,
        )
        .bind(payment_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get request: {}", e)))?;

        Ok(request)
    }
}
