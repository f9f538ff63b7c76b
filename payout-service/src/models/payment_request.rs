//! Payment request model for payout-service.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Verification status of a payment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
    Confirmed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Approved => "approved",
            VerificationStatus::Rejected => "rejected",
            VerificationStatus::Confirmed => "confirmed",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "approved" => VerificationStatus::Approved,
            "rejected" => VerificationStatus::Rejected,
            "confirmed" => VerificationStatus::Confirmed,
            _ => VerificationStatus::Pending,
        }
    }
}

/// One quotation item's row in the payment pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub payment_request_id: Uuid,
    pub quotation_item_id: Uuid,
    pub verification_status: String,
    pub request_date: Option<NaiveDate>,
    pub cost_amount: i64,
    pub invoice_number: Option<String>,
    pub attachment_file_path: Option<String>,
    pub merge_group_id: Option<Uuid>,
    pub merge_type: Option<String>,
    pub is_merge_leader: bool,
    pub merge_color: Option<String>,
    pub rejection_reason: Option<String>,
    pub rejected_by: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Display colors for merge groups.
pub const MERGE_COLOR_PALETTE: [&str; 6] = [
    "#F87171", "#FBBF24", "#34D399", "#60A5FA", "#A78BFA", "#F472B6",
];

/// Pick the color for a new merge group: the first palette entry not used by
/// a live group, falling back round-robin once the palette is exhausted.
pub fn next_merge_color(colors_in_use: &[String]) -> &'static str {
    MERGE_COLOR_PALETTE
        .iter()
        .find(|c| !colors_in_use.iter().any(|u| u == **c))
        .copied()
        .unwrap_or(MERGE_COLOR_PALETTE[colors_in_use.len() % MERGE_COLOR_PALETTE.len()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_string_round_trip() {
        for status in [
            VerificationStatus::Pending,
            VerificationStatus::Approved,
            VerificationStatus::Rejected,
            VerificationStatus::Confirmed,
        ] {
            assert_eq!(VerificationStatus::from_string(status.as_str()), status);
        }
        assert_eq!(
            VerificationStatus::from_string("bogus"),
            VerificationStatus::Pending
        );
    }

    #[test]
    fn merge_colors_stay_distinct_while_palette_lasts() {
        let mut in_use: Vec<String> = Vec::new();
        for _ in 0..MERGE_COLOR_PALETTE.len() {
            let next = next_merge_color(&in_use);
            assert!(!in_use.iter().any(|c| c == next));
            in_use.push(next.to_string());
        }
        // Palette exhausted: still hands out a palette color.
        assert!(MERGE_COLOR_PALETTE.contains(&next_merge_color(&in_use)));
    }
}
