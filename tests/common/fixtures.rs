//! Test data seeding

use super::constants::*;
use caseknow_server::case_store::{CaseRecord, CaseStatus, CaseStore, SqliteCaseStore};

/// Cases inserted into every test store.
pub fn seeded_cases() -> Vec<CaseRecord> {
    vec![
        CaseRecord::published(
            CASE_REFUND_ID,
            TENANT,
            CASE_REFUND_TITLE,
            "Customers charged twice can ask for a refund from the billing page.",
        )
        .with_category("billing")
        .with_tags(vec!["refund".to_string(), "card".to_string()]),
        CaseRecord::published(
            CASE_INVOICE_ID,
            TENANT,
            CASE_INVOICE_TITLE,
            "Invoices are listed under billing history and can be exported as PDF.",
        )
        .with_category("billing"),
        CaseRecord::published(
            CASE_PASSWORD_ID,
            TENANT,
            CASE_PASSWORD_TITLE,
            "Use the forgot password link on the login page.",
        )
        .with_category("account"),
        CaseRecord::published(
            CASE_DRAFT_ID,
            TENANT,
            "Unreviewed refund notes",
            "Draft refund guidance that has not been approved.",
        )
        .with_status(CaseStatus::Draft),
    ]
}

/// In-memory store holding [`seeded_cases`].
pub fn create_test_store() -> SqliteCaseStore {
    let store = SqliteCaseStore::in_memory().expect("Failed to open in-memory case store");
    for case in seeded_cases() {
        store.insert_case(&case).expect("Failed to seed case");
    }
    store
}
