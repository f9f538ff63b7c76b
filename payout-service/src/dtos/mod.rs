//! Request and response DTOs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::attachment::AttachmentDescriptor;
use crate::models::confirmation::{PaymentConfirmation, PaymentConfirmationItem, RemittanceSettings};
use crate::services::remittance::RemittanceGroup;

// -----------------------------------------------------------------------------
// Merge groups
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateMergeGroupRequest {
    #[validate(length(min = 2, message = "A merge group needs at least two items"))]
    pub quotation_item_ids: Vec<Uuid>,
    #[serde(default = "default_merge_type")]
    pub merge_type: String,
}

fn default_merge_type() -> String {
    "account".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeGroupResponse {
    pub merge_group_id: Uuid,
    pub merge_color: String,
    pub member_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UngroupResponse {
    pub merge_group_id: Uuid,
    pub released_count: i64,
}

// -----------------------------------------------------------------------------
// Submission
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitItemInput {
    pub quotation_item_id: Uuid,
    #[validate(range(min = 0, message = "Cost amount cannot be negative"))]
    pub cost_amount: i64,
    pub invoice_number: Option<String>,
    pub attachments: Option<Vec<AttachmentDescriptor>>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentsRequest {
    #[validate(length(min = 1, message = "At least one item is required"))]
    #[validate(nested)]
    pub items: Vec<SubmitItemInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPaymentsResponse {
    pub submitted_count: u64,
}

// -----------------------------------------------------------------------------
// Verification
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RejectRequest {
    #[validate(length(min = 1, message = "A rejection requires a reason"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub payment_request_ids: Vec<Uuid>,
    pub verification_status: String,
}

// -----------------------------------------------------------------------------
// Attachments
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAttachmentRequest {
    #[validate(length(min = 1, message = "Attachment name is required"))]
    pub name: String,
    #[validate(length(min = 1, message = "Attachment URL is required"))]
    pub url: String,
    pub path: Option<String>,
    #[validate(range(min = 1, message = "Attachment size must be positive"))]
    pub size: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentListResponse {
    pub payment_request_id: Uuid,
    pub attachments: Vec<AttachmentDescriptor>,
    pub evicted: Vec<AttachmentDescriptor>,
}

// -----------------------------------------------------------------------------
// Confirmations
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationResponse {
    #[serde(flatten)]
    pub confirmation: PaymentConfirmation,
    pub items: Vec<PaymentConfirmationItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertConfirmationResponse {
    pub confirmation_id: Uuid,
    pub restored_request_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRemittanceSettingsRequest {
    #[validate(length(min = 1, message = "Remittance name is required"))]
    pub remittance_name: String,
    #[serde(default)]
    pub has_tax: bool,
    #[serde(default)]
    pub has_insurance: bool,
    #[serde(default)]
    pub has_remittance_fee: bool,
    #[serde(default)]
    pub remittance_fee_amount: i64,
}

impl UpdateRemittanceSettingsRequest {
    pub fn settings(&self) -> RemittanceSettings {
        RemittanceSettings {
            has_tax: self.has_tax,
            has_insurance: self.has_insurance,
            has_remittance_fee: self.has_remittance_fee,
            remittance_fee_amount: self.remittance_fee_amount,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemittanceGroupsResponse {
    pub confirmation_id: Uuid,
    pub confirmation_date: NaiveDate,
    pub groups: Vec<RemittanceGroup>,
}

// -----------------------------------------------------------------------------
// Health
// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}
