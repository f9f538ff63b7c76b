//! KOL bank profile blob.

use serde::{Deserialize, Serialize};

/// KOL bank profile, stored as a `bankType`-tagged JSONB blob on `kols`.
///
/// Kept as a tagged sum type rather than an open dictionary so the shape is
/// validated at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "bankType", rename_all = "camelCase")]
pub enum BankInfo {
    #[serde(rename_all = "camelCase")]
    Company {
        #[serde(default)]
        company_account_name: String,
        #[serde(default)]
        bank_name: String,
        #[serde(default)]
        account_number: String,
    },
    #[serde(rename_all = "camelCase")]
    Personal {
        #[serde(default)]
        account_name: String,
        #[serde(default)]
        bank_name: String,
        #[serde(default)]
        account_number: String,
    },
}

impl BankInfo {
    /// Lenient read of the JSONB column: a missing or unrecognized shape is
    /// simply no bank profile.
    pub fn from_value(value: Option<&serde_json::Value>) -> Option<BankInfo> {
        value.and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Bank label for payout files: "bank account".
    pub fn bank_label(&self) -> String {
        let (bank_name, account_number) = match self {
            BankInfo::Company {
                bank_name,
                account_number,
                ..
            }
            | BankInfo::Personal {
                bank_name,
                account_number,
                ..
            } => (bank_name, account_number),
        };
        match (bank_name.is_empty(), account_number.is_empty()) {
            (true, true) => String::new(),
            (false, true) => bank_name.clone(),
            (true, false) => account_number.clone(),
            (false, false) => format!("{} {}", bank_name, account_number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn company_profile_parses_from_tagged_json() {
        let value = json!({
            "bankType": "company",
            "companyAccountName": "星光傳媒有限公司",
            "bankName": "國泰世華",
            "accountNumber": "013-123456789"
        });
        let info = BankInfo::from_value(Some(&value)).unwrap();
        match &info {
            BankInfo::Company {
                company_account_name,
                ..
            } => assert_eq!(company_account_name, "星光傳媒有限公司"),
            _ => panic!("expected company profile"),
        }
        assert_eq!(info.bank_label(), "國泰世華 013-123456789");
    }

    #[test]
    fn unknown_shape_reads_as_no_profile() {
        assert_eq!(BankInfo::from_value(None), None);
        assert_eq!(
            BankInfo::from_value(Some(&json!({"bankType": "crypto"}))),
            None
        );
        assert_eq!(BankInfo::from_value(Some(&json!("free text"))), None);
    }
}
