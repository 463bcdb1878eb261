use std::collections::HashMap;

use serde::Serialize;

use super::{
    compute_availability, format_reference, EntryType, LedgerEntry, UserProduct, WithdrawalId,
    WithdrawalRequest,
};

/// A single violated ledger invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Request without a withdrawal entry carrying its reference
    MissingEntry { withdrawal_id: WithdrawalId, reference: String },
    /// More than one withdrawal entry carries the same reference
    DuplicateEntries { reference: String, count: usize },
    /// Withdrawal entry whose reference matches no request
    OrphanEntry { entry_id: i64, reference: String },
    /// Request and entry disagree on status, owner, product or amount
    Mismatch { withdrawal_id: WithdrawalId, detail: String },
    /// `applied + pending > invested` for a subscription
    Overdrawn {
        user_id: i64,
        product_id: i64,
        invested: i64,
        committed: i64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub subscription_count: usize,
    pub withdrawal_count: usize,
    pub entry_count: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Check the cross-entity invariants between subscriptions, withdrawal
/// requests and ledger entries.
pub fn build_integrity_report(
    subscriptions: &[UserProduct],
    requests: &[WithdrawalRequest],
    entries: &[LedgerEntry],
) -> IntegrityReport {
    let mut issues = Vec::new();

    let mut by_reference: HashMap<&str, Vec<&LedgerEntry>> = HashMap::new();
    for entry in entries.iter().filter(|e| e.entry_type == EntryType::Withdrawal) {
        by_reference.entry(entry.reference.as_str()).or_default().push(entry);
    }

    let mut known_references = Vec::with_capacity(requests.len());
    for request in requests {
        let reference = format_reference(request.id);
        match by_reference.get(reference.as_str()).map(Vec::as_slice) {
            None | Some([]) => issues.push(IntegrityIssue::MissingEntry {
                withdrawal_id: request.id,
                reference: reference.clone(),
            }),
            Some([entry]) => {
                if let Some(detail) = describe_mismatch(request, entry) {
                    issues.push(IntegrityIssue::Mismatch {
                        withdrawal_id: request.id,
                        detail,
                    });
                }
            }
            Some(many) => issues.push(IntegrityIssue::DuplicateEntries {
                reference: reference.clone(),
                count: many.len(),
            }),
        }
        known_references.push(reference);
    }

    for (reference, paired) in &by_reference {
        if !known_references.iter().any(|r| r == reference) {
            for entry in paired {
                issues.push(IntegrityIssue::OrphanEntry {
                    entry_id: entry.id,
                    reference: entry.reference.clone(),
                });
            }
        }
    }

    for subscription in subscriptions {
        let Ok(availability) = compute_availability(
            subscription.user_id,
            subscription.product_id,
            Some(subscription),
            entries,
        ) else {
            continue;
        };
        if !availability.is_consistent() {
            issues.push(IntegrityIssue::Overdrawn {
                user_id: subscription.user_id,
                product_id: subscription.product_id,
                invested: availability.invested,
                committed: availability.pending_withdrawals + availability.applied_withdrawals,
            });
        }
    }

    IntegrityReport {
        subscription_count: subscriptions.len(),
        withdrawal_count: requests.len(),
        entry_count: entries.len(),
        issues,
    }
}

fn describe_mismatch(request: &WithdrawalRequest, entry: &LedgerEntry) -> Option<String> {
    if request.status != entry.status {
        return Some(format!(
            "request is {} but entry is {}",
            request.status, entry.status
        ));
    }
    if request.user_id != entry.user_id || request.product_id != entry.product_id {
        return Some("request and entry belong to different user/product".to_string());
    }
    if entry.amount_cents != -request.amount_cents {
        return Some(format!(
            "request amount {} does not offset entry amount {}",
            request.amount_cents, entry.amount_cents
        ));
    }
    None
}
