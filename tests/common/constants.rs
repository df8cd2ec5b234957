//! Shared constants for end-to-end tests
//!
//! When the seeded cases change, update only this file and `fixtures.rs`.

/// Tenant owning every seeded case
pub const TENANT: &str = "tenant-a";

/// A tenant with no cases at all
pub const OTHER_TENANT: &str = "tenant-b";

/// Published billing case about refunds
pub const CASE_REFUND_ID: &str = "case-refund";
pub const CASE_REFUND_TITLE: &str = "Refund for a duplicate charge";

/// Published billing case about invoices
pub const CASE_INVOICE_ID: &str = "case-invoice";
pub const CASE_INVOICE_TITLE: &str = "Download an invoice";

/// Published account case about password resets
pub const CASE_PASSWORD_ID: &str = "case-password";
pub const CASE_PASSWORD_TITLE: &str = "Reset a forgotten password";

/// Draft case, never visible to search
pub const CASE_DRAFT_ID: &str = "case-draft";

/// Answer returned by the scripted LLM by default
pub const SCRIPTED_ANSWER: &str = "Open the billing page and request a refund for the duplicate charge.";
