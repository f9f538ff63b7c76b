//! Remittance grouping and payout netting for confirmed batches.
//!
//! Read-side only: groups a confirmation's snapshot items by resolved
//! remittance name and applies the per-name payout toggles.

use serde::Serialize;
use uuid::Uuid;

use crate::models::confirmation::{RemittanceSettings, RemittanceSettingsMap};
use crate::models::quotation::BankInfo;

/// Placeholder used when no remittance name can be resolved. Also treated as
/// a sentinel when stored explicitly on a quotation item.
pub const UNKNOWN_REMITTANCE_NAME: &str = "未知匯款戶名";

/// Withholding tax: 10%, expressed in basis points.
pub const WITHHOLDING_TAX_BASIS_POINTS: i64 = 1000;

/// Second-generation national health insurance levy: 2.11%.
pub const NHI_BASIS_POINTS: i64 = 211;

/// Percentage share of an amount, floored to integer currency units.
fn floored_share(amount: i64, basis_points: i64) -> i64 {
    amount * basis_points / 10_000
}

/// Resolve the payee name for one confirmed line.
///
/// Precedence: explicit non-sentinel `remittance_name` on the quotation item,
/// then the KOL bank profile (company account name for company accounts,
/// personal account name or the KOL's real/display name otherwise), then the
/// sentinel placeholder.
pub fn resolve_remittance_name(
    explicit: Option<&str>,
    bank_info: Option<&BankInfo>,
    real_name: Option<&str>,
    display_name: Option<&str>,
) -> String {
    if let Some(name) = explicit {
        if !name.is_empty() && name != UNKNOWN_REMITTANCE_NAME {
            return name.to_string();
        }
    }

    let fallback_name = real_name
        .filter(|s| !s.is_empty())
        .or(display_name.filter(|s| !s.is_empty()));

    match bank_info {
        Some(BankInfo::Company {
            company_account_name,
            ..
        }) if !company_account_name.is_empty() => company_account_name.clone(),
        Some(BankInfo::Personal { account_name, .. }) if !account_name.is_empty() => {
            account_name.clone()
        }
        Some(_) | None => fallback_name
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_REMITTANCE_NAME.to_string()),
    }
}

/// One confirmed line with its payee already resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemittanceLine {
    pub confirmation_item_id: Uuid,
    pub kol_name: String,
    pub project_name: String,
    pub service: String,
    pub amount: i64,
    #[serde(skip)]
    pub remittance_name: String,
    #[serde(skip)]
    pub bank_label: String,
}

/// A payout group: all lines remitted to one payee, with netting applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemittanceGroup {
    pub remittance_name: String,
    pub bank_label: String,
    pub items: Vec<RemittanceLine>,
    pub subtotal: i64,
    pub tax: i64,
    pub insurance: i64,
    pub remittance_fee: i64,
    pub net_total: i64,
    pub settings: RemittanceSettings,
}

/// Group resolved lines by remittance name and compute each group's net
/// payout. Tax and insurance are floored percentage shares of the subtotal;
/// the fee is flat. `net = subtotal − fee − tax − insurance`.
pub fn group_lines(
    lines: Vec<RemittanceLine>,
    settings_map: &RemittanceSettingsMap,
) -> Vec<RemittanceGroup> {
    let mut groups: Vec<RemittanceGroup> = Vec::new();

    for line in lines {
        match groups
            .iter_mut()
            .find(|g| g.remittance_name == line.remittance_name)
        {
            Some(group) => {
                if group.bank_label.is_empty() {
                    group.bank_label = line.bank_label.clone();
                }
                group.items.push(line);
            }
            None => groups.push(RemittanceGroup {
                remittance_name: line.remittance_name.clone(),
                bank_label: line.bank_label.clone(),
                items: vec![line],
                subtotal: 0,
                tax: 0,
                insurance: 0,
                remittance_fee: 0,
                net_total: 0,
                settings: RemittanceSettings::default(),
            }),
        }
    }

    for group in &mut groups {
        let settings = settings_map
            .get(&group.remittance_name)
            .cloned()
            .unwrap_or_default();

        group.subtotal = group.items.iter().map(|i| i.amount).sum();
        group.tax = if settings.has_tax {
            floored_share(group.subtotal, WITHHOLDING_TAX_BASIS_POINTS)
        } else {
            0
        };
        group.insurance = if settings.has_insurance {
            floored_share(group.subtotal, NHI_BASIS_POINTS)
        } else {
            0
        };
        group.remittance_fee = if settings.has_remittance_fee {
            settings.remittance_fee_amount
        } else {
            0
        };
        group.net_total = group.subtotal - group.remittance_fee - group.tax - group.insurance;
        group.settings = settings;
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, amount: i64) -> RemittanceLine {
        RemittanceLine {
            confirmation_item_id: Uuid::new_v4(),
            kol_name: "香菜阿姨".to_string(),
            project_name: "春季開箱企劃".to_string(),
            service: "短影音".to_string(),
            amount,
            remittance_name: name.to_string(),
            bank_label: "國泰世華 013-123456789".to_string(),
        }
    }

    #[test]
    fn netting_with_all_toggles() {
        let settings_map: RemittanceSettingsMap = [(
            "香菜阿姨".to_string(),
            RemittanceSettings {
                has_tax: true,
                has_insurance: true,
                has_remittance_fee: true,
                remittance_fee_amount: 30,
            },
        )]
        .into_iter()
        .collect();

        let groups = group_lines(vec![line("香菜阿姨", 10_000)], &settings_map);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.subtotal, 10_000);
        assert_eq!(g.tax, 1_000);
        assert_eq!(g.insurance, 211);
        assert_eq!(g.remittance_fee, 30);
        assert_eq!(g.net_total, 8_759);
    }

    #[test]
    fn percentage_amounts_floor_not_round() {
        let settings_map: RemittanceSettingsMap = [(
            "x".to_string(),
            RemittanceSettings {
                has_tax: true,
                has_insurance: true,
                ..Default::default()
            },
        )]
        .into_iter()
        .collect();

        // 9999 * 10% = 999.9 -> 999; 9999 * 2.11% = 210.97... -> 210
        let groups = group_lines(vec![line("x", 9_999)], &settings_map);
        assert_eq!(groups[0].tax, 999);
        assert_eq!(groups[0].insurance, 210);
    }

    #[test]
    fn toggles_default_off_without_settings() {
        let groups = group_lines(vec![line("x", 10_000)], &RemittanceSettingsMap::new());
        assert_eq!(groups[0].net_total, 10_000);
        assert_eq!(groups[0].tax, 0);
        assert_eq!(groups[0].insurance, 0);
        assert_eq!(groups[0].remittance_fee, 0);
    }

    #[test]
    fn lines_group_by_payee() {
        let groups = group_lines(
            vec![line("a", 5_000), line("b", 3_000), line("a", 2_000)],
            &RemittanceSettingsMap::new(),
        );
        assert_eq!(groups.len(), 2);
        let a = groups.iter().find(|g| g.remittance_name == "a").unwrap();
        assert_eq!(a.items.len(), 2);
        assert_eq!(a.subtotal, 7_000);
    }

    #[test]
    fn name_resolution_precedence() {
        let company = BankInfo::Company {
            company_account_name: "星光傳媒有限公司".to_string(),
            bank_name: String::new(),
            account_number: String::new(),
        };
        let personal = BankInfo::Personal {
            account_name: "陳小姐".to_string(),
            bank_name: String::new(),
            account_number: String::new(),
        };
        let empty_personal = BankInfo::Personal {
            account_name: String::new(),
            bank_name: String::new(),
            account_number: String::new(),
        };

        // Explicit non-sentinel name wins.
        assert_eq!(
            resolve_remittance_name(Some("自訂戶名"), Some(&company), None, None),
            "自訂戶名"
        );
        // Sentinel stored explicitly is ignored.
        assert_eq!(
            resolve_remittance_name(Some(UNKNOWN_REMITTANCE_NAME), Some(&company), None, None),
            "星光傳媒有限公司"
        );
        assert_eq!(
            resolve_remittance_name(None, Some(&personal), Some("陳美麗"), Some("香菜阿姨")),
            "陳小姐"
        );
        // Empty personal account name falls through to real then display name.
        assert_eq!(
            resolve_remittance_name(None, Some(&empty_personal), Some("陳美麗"), Some("香菜阿姨")),
            "陳美麗"
        );
        assert_eq!(
            resolve_remittance_name(None, Some(&empty_personal), None, Some("香菜阿姨")),
            "香菜阿姨"
        );
        assert_eq!(
            resolve_remittance_name(None, None, None, None),
            UNKNOWN_REMITTANCE_NAME
        );
    }
}
