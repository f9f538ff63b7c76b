//! CSV payout file for a confirmed batch.

use chrono::NaiveDate;

use crate::services::remittance::RemittanceGroup;

/// UTF-8 byte order mark so spreadsheet tools pick up the encoding.
const BOM: &str = "\u{feff}";

/// Column order: date, remittance name, bank info, project, KOL, service,
/// original amount, subtotal, withholding tax, NHI levy, fee, net total.
pub const CSV_HEADER: &str =
    "確認日期,匯款戶名,銀行資訊,專案名稱,KOL,服務項目,原始金額,小計,代扣所得稅,代扣二代健保,匯費,實付金額";

fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Build the payout CSV: one row per line item, with the group-level subtotal,
/// deductions and net repeated on every row of the group.
pub fn payout_csv(confirmation_date: NaiveDate, groups: &[RemittanceGroup]) -> String {
    let date = confirmation_date.format("%Y-%m-%d").to_string();

    let mut out = String::from(BOM);
    out.push_str(CSV_HEADER);
    out.push('\n');

    for group in groups {
        for item in &group.items {
            let row = [
                date.clone(),
                escape(&group.remittance_name),
                escape(&group.bank_label),
                escape(&item.project_name),
                escape(&item.kol_name),
                escape(&item.service),
                item.amount.to_string(),
                group.subtotal.to_string(),
                group.tax.to_string(),
                group.insurance.to_string(),
                group.remittance_fee.to_string(),
                group.net_total.to_string(),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::remittance::{group_lines, RemittanceLine};
    use uuid::Uuid;

    fn line(name: &str, project: &str, amount: i64) -> RemittanceLine {
        RemittanceLine {
            confirmation_item_id: Uuid::new_v4(),
            kol_name: "香菜阿姨".to_string(),
            project_name: project.to_string(),
            service: "短影音".to_string(),
            amount,
            remittance_name: name.to_string(),
            bank_label: "國泰世華 013-123456789".to_string(),
        }
    }

    #[test]
    fn csv_starts_with_bom_and_header() {
        let csv = payout_csv(
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(),
            &group_lines(vec![line("a", "p", 100)], &Default::default()),
        );
        assert!(csv.starts_with('\u{feff}'));
        assert!(csv[3..].starts_with(CSV_HEADER));
    }

    #[test]
    fn group_amounts_repeat_per_row() {
        let groups = group_lines(
            vec![line("a", "專案甲", 5000), line("a", "專案乙", 3000)],
            &Default::default(),
        );
        let csv = payout_csv(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(), &groups);
        let rows: Vec<&str> = csv.lines().skip(1).collect();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert!(row.ends_with(",8000,0,0,0,8000"), "row was: {row}");
        }
    }

    #[test]
    fn fields_with_commas_are_quoted() {
        let groups = group_lines(vec![line("a", "開箱, 上集", 100)], &Default::default());
        let csv = payout_csv(NaiveDate::from_ymd_opt(2026, 3, 15).unwrap(), &groups);
        assert!(csv.contains("\"開箱, 上集\""));
    }
}
