//! Payment confirmation models: the immutable batch header and its
//! denormalized snapshot items.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Per-remittance-name payout toggles, persisted in the confirmation's
/// `remittance_settings` JSONB map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemittanceSettings {
    pub has_tax: bool,
    pub has_insurance: bool,
    pub has_remittance_fee: bool,
    pub remittance_fee_amount: i64,
}

pub type RemittanceSettingsMap = BTreeMap<String, RemittanceSettings>;

/// Parse the JSONB settings column; unreadable maps read as empty.
pub fn parse_settings_map(value: &serde_json::Value) -> RemittanceSettingsMap {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Immutable-once-created batch header.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub confirmation_id: Uuid,
    pub confirmation_date: NaiveDate,
    pub total_amount: i64,
    pub total_items: i32,
    pub created_by: String,
    pub remittance_settings: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

/// Snapshot of one confirmed payment request. Display fields are copied at
/// confirmation time so later KOL/quotation edits never alter history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmationItem {
    pub confirmation_item_id: Uuid,
    pub confirmation_id: Uuid,
    pub payment_request_id: Uuid,
    pub amount_at_confirmation: i64,
    pub kol_name_at_confirmation: String,
    pub project_name_at_confirmation: String,
    pub service_at_confirmation: String,
    pub created_utc: DateTime<Utc>,
}

/// An approved request joined with its display fields, as loaded for
/// confirmation building.
#[derive(Debug, Clone, FromRow)]
pub struct ApprovedItemRow {
    pub payment_request_id: Uuid,
    pub kol_name: Option<String>,
    pub project_name: Option<String>,
    pub service: Option<String>,
    pub quantity: i32,
    pub price: i64,
}

/// Snapshot values for one confirmation item about to be inserted.
#[derive(Debug, Clone)]
pub struct ConfirmationItemDraft {
    pub payment_request_id: Uuid,
    pub amount: i64,
    pub kol_name: String,
    pub project_name: String,
    pub service: String,
}

/// A validated confirmation batch: totals plus per-item snapshots.
#[derive(Debug, Clone)]
pub struct ConfirmationDraft {
    pub total_amount: i64,
    pub total_items: i32,
    pub items: Vec<ConfirmationItemDraft>,
}

impl ConfirmationDraft {
    /// Build the batch from the approved set. Every item must carry a KOL
    /// name, project name and service; amounts are `price × quantity`.
    pub fn from_approved(rows: &[ApprovedItemRow]) -> Result<ConfirmationDraft, anyhow::Error> {
        if rows.is_empty() {
            return Err(anyhow::anyhow!("No approved payment requests to confirm"));
        }

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let missing = [
                row.kol_name.as_deref().unwrap_or("").is_empty().then_some("kol_name"),
                row.project_name
                    .as_deref()
                    .unwrap_or("")
                    .is_empty()
                    .then_some("project_name"),
                row.service.as_deref().unwrap_or("").is_empty().then_some("service"),
            ]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

            if !missing.is_empty() {
                return Err(anyhow::anyhow!(
                    "Payment request {} is missing required fields: {}",
                    row.payment_request_id,
                    missing.join(", ")
                ));
            }

            items.push(ConfirmationItemDraft {
                payment_request_id: row.payment_request_id,
                amount: row.price * i64::from(row.quantity),
                kol_name: row.kol_name.clone().unwrap_or_default(),
                project_name: row.project_name.clone().unwrap_or_default(),
                service: row.service.clone().unwrap_or_default(),
            });
        }

        Ok(ConfirmationDraft {
            total_amount: items.iter().map(|i| i.amount).sum(),
            total_items: items.len() as i32,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(price: i64, quantity: i32) -> ApprovedItemRow {
        ApprovedItemRow {
            payment_request_id: Uuid::new_v4(),
            kol_name: Some("香菜阿姨".to_string()),
            project_name: Some("春季開箱企劃".to_string()),
            service: Some("短影音".to_string()),
            quantity,
            price,
        }
    }

    #[test]
    fn totals_match_item_amounts() {
        let draft =
            ConfirmationDraft::from_approved(&[row(5000, 1), row(3000, 2), row(1200, 1)]).unwrap();
        assert_eq!(draft.total_items, 3);
        assert_eq!(draft.total_amount, 5000 + 6000 + 1200);
        assert_eq!(
            draft.total_amount,
            draft.items.iter().map(|i| i.amount).sum::<i64>()
        );
    }

    #[test]
    fn missing_display_field_aborts_the_batch() {
        let mut bad = row(5000, 1);
        bad.kol_name = None;
        let err = ConfirmationDraft::from_approved(&[row(1000, 1), bad]).unwrap_err();
        assert!(err.to_string().contains("kol_name"));
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(ConfirmationDraft::from_approved(&[]).is_err());
    }

    #[test]
    fn settings_map_round_trips_camel_case() {
        let value = serde_json::json!({
            "香菜阿姨": {
                "hasTax": true,
                "hasInsurance": true,
                "hasRemittanceFee": true,
                "remittanceFeeAmount": 30
            }
        });
        let map = parse_settings_map(&value);
        let settings = map.get("香菜阿姨").unwrap();
        assert!(settings.has_tax && settings.has_insurance && settings.has_remittance_fee);
        assert_eq!(settings.remittance_fee_amount, 30);

        // Names without settings default to everything off.
        assert_eq!(
            map.get("nobody").cloned().unwrap_or_default(),
            RemittanceSettings::default()
        );
    }
}
