//! Payment request submission, verification and attachment handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{
    AttachmentListResponse, RegisterAttachmentRequest, RejectRequest, SubmitItemInput,
    SubmitPaymentsRequest, SubmitPaymentsResponse, VerificationResponse,
};
use crate::middleware::ActorContext;
use crate::models::attachment::AttachmentDescriptor;
use crate::models::{PaymentRequest, VerificationStatus};
use crate::services::metrics::{record_error, REQUEST_ACTIONS_TOTAL};
use crate::utils::format_invoice_number;
use crate::AppState;

/// Submit selected candidate items into the verification pipeline. Invoice
/// numbers are normalized before persisting; merge groups must be submitted
/// whole.
pub async fn submit_payments(
    State(state): State<AppState>,
    Json(payload): Json<SubmitPaymentsRequest>,
) -> Result<(StatusCode, Json<SubmitPaymentsResponse>), AppError> {
    payload.validate()?;

    let items: Vec<SubmitItemInput> = payload
        .items
        .into_iter()
        .map(|mut item| {
            item.invoice_number = item
                .invoice_number
                .as_deref()
                .map(format_invoice_number)
                .filter(|s| !s.is_empty());
            item
        })
        .collect();

    let submitted_count = state
        .db
        .submit_payment_requests(&items)
        .await
        .inspect_err(|_| record_error("submit_error"))?;

    REQUEST_ACTIONS_TOTAL.with_label_values(&["submit"]).inc();

    Ok((
        StatusCode::CREATED,
        Json(SubmitPaymentsResponse { submitted_count }),
    ))
}

/// Get one payment request.
pub async fn get_payment_request(
    State(state): State<AppState>,
    Path(payment_request_id): Path<Uuid>,
) -> Result<Json<PaymentRequest>, AppError> {
    let request = state
        .db
        .get_payment_request(payment_request_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Payment request not found")))?;

    Ok(Json(request))
}

/// Approve a pending request. Grouped requests approve together.
pub async fn approve_request(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(payment_request_id): Path<Uuid>,
) -> Result<Json<VerificationResponse>, AppError> {
    let ids = state
        .db
        .approve_request(payment_request_id, actor.audit_name())
        .await
        .inspect_err(|_| record_error("verification_error"))?;

    REQUEST_ACTIONS_TOTAL.with_label_values(&["approve"]).inc();

    Ok(Json(VerificationResponse {
        payment_request_ids: ids,
        verification_status: VerificationStatus::Approved.as_str().to_string(),
    }))
}

/// Reject a pending request with a reason. Grouped requests reject together.
pub async fn reject_request(
    State(state): State<AppState>,
    actor: ActorContext,
    Path(payment_request_id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<VerificationResponse>, AppError> {
    payload.validate()?;

    let ids = state
        .db
        .reject_request(payment_request_id, &payload.reason, actor.audit_name())
        .await
        .inspect_err(|_| record_error("verification_error"))?;

    REQUEST_ACTIONS_TOTAL.with_label_values(&["reject"]).inc();

    Ok(Json(VerificationResponse {
        payment_request_ids: ids,
        verification_status: VerificationStatus::Rejected.as_str().to_string(),
    }))
}

/// Revert an approved request back to pending.
pub async fn revert_request(
    State(state): State<AppState>,
    Path(payment_request_id): Path<Uuid>,
) -> Result<Json<VerificationResponse>, AppError> {
    let ids = state
        .db
        .revert_request(payment_request_id)
        .await
        .inspect_err(|_| record_error("verification_error"))?;

    REQUEST_ACTIONS_TOTAL.with_label_values(&["revert"]).inc();

    Ok(Json(VerificationResponse {
        payment_request_ids: ids,
        verification_status: VerificationStatus::Pending.as_str().to_string(),
    }))
}

/// Register an uploaded attachment on a request. Grouped requests store
/// attachments on the leader; oldest files are evicted past the caps.
pub async fn register_attachment(
    State(state): State<AppState>,
    Path(payment_request_id): Path<Uuid>,
    Json(payload): Json<RegisterAttachmentRequest>,
) -> Result<(StatusCode, Json<AttachmentListResponse>), AppError> {
    payload.validate()?;

    let descriptor = AttachmentDescriptor {
        name: payload.name,
        url: payload.url,
        path: payload.path.unwrap_or_default(),
        uploaded_at: Utc::now(),
        size: payload.size,
    };

    let (target_id, attachments, evicted) = state
        .db
        .register_attachment(payment_request_id, descriptor)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AttachmentListResponse {
            payment_request_id: target_id,
            attachments,
            evicted,
        }),
    ))
}
