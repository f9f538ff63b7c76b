//! Unified candidate view: quotation items eligible for a payment request,
//! drawn from three disjoint sources.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::models::attachment::AttachmentDescriptor;
use crate::utils::is_valid_invoice_number;

/// Where a candidate item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    /// Never associated with any payment request.
    Fresh,
    /// Pending request without a request date.
    Draft,
    /// Rejected request returned for correction.
    Rejected,
}

/// One item as presented for payment selection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateItem {
    pub quotation_item_id: Uuid,
    pub payment_request_id: Option<Uuid>,
    pub source: CandidateSource,
    pub kol_id: Option<Uuid>,
    pub kol_name: Option<String>,
    pub project_name: String,
    pub service: String,
    pub quantity: i32,
    pub price: i64,
    pub cost_amount: i64,
    pub invoice_number: Option<String>,
    pub attachments: Vec<AttachmentDescriptor>,
    pub merge_group_id: Option<Uuid>,
    pub is_merge_leader: bool,
    pub merge_color: Option<String>,
    pub rejection_reason: Option<String>,
    /// Computed against the leader's fields for grouped members.
    pub is_ready: bool,
}

impl CandidateItem {
    /// Readiness against this item's own fields: at least one attachment or
    /// a well-formed invoice number.
    pub fn own_fields_ready(&self) -> bool {
        !self.attachments.is_empty()
            || self
                .invoice_number
                .as_deref()
                .is_some_and(is_valid_invoice_number)
    }
}

/// Combine the fresh set with existing draft/rejected requests. The sets must
/// not overlap: a fresh item superseded by an existing request is suppressed.
pub fn merge_candidate_sources(
    fresh: Vec<CandidateItem>,
    existing: Vec<CandidateItem>,
) -> Vec<CandidateItem> {
    let taken: HashSet<Uuid> = existing.iter().map(|c| c.quotation_item_id).collect();

    let mut out = existing;
    out.extend(
        fresh
            .into_iter()
            .filter(|c| !taken.contains(&c.quotation_item_id)),
    );
    out
}

/// Read-side projection of merge groups: followers display the leader's
/// invoice number and attachments, and every member's readiness is computed
/// against the leader's data. No writes happen here.
pub fn project_group_display(items: &mut [CandidateItem]) {
    let leaders: HashMap<Uuid, (Option<String>, Vec<AttachmentDescriptor>)> = items
        .iter()
        .filter(|c| c.is_merge_leader)
        .filter_map(|c| {
            c.merge_group_id
                .map(|g| (g, (c.invoice_number.clone(), c.attachments.clone())))
        })
        .collect();

    for item in items.iter_mut() {
        if let Some(group_id) = item.merge_group_id {
            if let Some((invoice, attachments)) = leaders.get(&group_id) {
                if !item.is_merge_leader {
                    item.invoice_number = invoice.clone();
                    item.attachments = attachments.clone();
                }
            }
        }
        item.is_ready = item.own_fields_ready();
    }
}

/// Group-atomicity check for submission: for every merge group with at least
/// one selected member, every member must be selected. Returns the missing
/// quotation item ids, empty when the selection is valid.
pub fn missing_group_members(
    selected: &HashSet<Uuid>,
    group_members: &HashMap<Uuid, Vec<Uuid>>,
) -> Vec<Uuid> {
    let mut missing: Vec<Uuid> = group_members
        .values()
        .filter(|members| members.iter().any(|m| selected.contains(m)))
        .flat_map(|members| members.iter().filter(|m| !selected.contains(m)).copied())
        .collect();
    missing.sort();
    missing.dedup();
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(source: CandidateSource, item_id: Uuid) -> CandidateItem {
        CandidateItem {
            quotation_item_id: item_id,
            payment_request_id: if matches!(source, CandidateSource::Fresh) {
                None
            } else {
                Some(Uuid::new_v4())
            },
            source,
            kol_id: Some(Uuid::new_v4()),
            kol_name: Some("香菜阿姨".to_string()),
            project_name: "春季開箱企劃".to_string(),
            service: "短影音".to_string(),
            quantity: 1,
            price: 5000,
            cost_amount: 3000,
            invoice_number: None,
            attachments: Vec::new(),
            merge_group_id: None,
            is_merge_leader: false,
            merge_color: None,
            rejection_reason: None,
            is_ready: false,
        }
    }

    fn attachment() -> AttachmentDescriptor {
        AttachmentDescriptor {
            name: "invoice.jpg".to_string(),
            url: "https://s/invoice.jpg".to_string(),
            path: "attachments/invoice.jpg".to_string(),
            uploaded_at: Utc::now(),
            size: 1024,
        }
    }

    #[test]
    fn fresh_item_superseded_by_draft_is_suppressed() {
        let shared = Uuid::new_v4();
        let fresh_only = Uuid::new_v4();
        let fresh = vec![
            candidate(CandidateSource::Fresh, shared),
            candidate(CandidateSource::Fresh, fresh_only),
        ];
        let existing = vec![candidate(CandidateSource::Draft, shared)];

        let merged = merge_candidate_sources(fresh, existing);
        assert_eq!(merged.len(), 2);
        let shared_entry = merged
            .iter()
            .find(|c| c.quotation_item_id == shared)
            .unwrap();
        assert_eq!(shared_entry.source, CandidateSource::Draft);
    }

    #[test]
    fn readiness_requires_attachment_or_valid_invoice() {
        let mut item = candidate(CandidateSource::Draft, Uuid::new_v4());
        assert!(!item.own_fields_ready());

        item.invoice_number = Some("ab-1234".to_string());
        assert!(!item.own_fields_ready());

        item.invoice_number = Some("AB-12345678".to_string());
        assert!(item.own_fields_ready());

        item.invoice_number = None;
        item.attachments.push(attachment());
        assert!(item.own_fields_ready());
    }

    #[test]
    fn follower_readiness_comes_from_leader() {
        let group = Uuid::new_v4();
        let mut leader = candidate(CandidateSource::Draft, Uuid::new_v4());
        leader.merge_group_id = Some(group);
        leader.is_merge_leader = true;
        leader.invoice_number = Some("AB-12345678".to_string());

        let mut follower = candidate(CandidateSource::Draft, Uuid::new_v4());
        follower.merge_group_id = Some(group);

        let mut items = vec![leader, follower];
        project_group_display(&mut items);

        assert!(items.iter().all(|c| c.is_ready));
        assert_eq!(
            items[1].invoice_number.as_deref(),
            Some("AB-12345678"),
            "follower mirrors the leader's invoice for display"
        );
    }

    #[test]
    fn partial_group_selection_reports_missing_members() {
        let group = Uuid::new_v4();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let groups = HashMap::from([(group, vec![a, b, c])]);

        let selected: HashSet<Uuid> = [a].into_iter().collect();
        let mut expected = vec![b, c];
        expected.sort();
        assert_eq!(missing_group_members(&selected, &groups), expected);

        let all: HashSet<Uuid> = [a, b, c].into_iter().collect();
        assert!(missing_group_members(&all, &groups).is_empty());

        // Untouched groups impose nothing.
        let none: HashSet<Uuid> = [Uuid::new_v4()].into_iter().collect();
        assert!(missing_group_members(&none, &groups).is_empty());
    }
}
