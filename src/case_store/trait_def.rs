//! CaseStore trait definition.

use super::models::{CaseFilters, CaseRecord};
use anyhow::Result;

/// Trait for case document storage backends.
///
/// Every operation is scoped to a tenant; a case id is only unique within
/// its tenant.
pub trait CaseStore: Send + Sync {
    // =========================================================================
    // Single-record access
    // =========================================================================

    /// Get a case by ID.
    fn get_case(&self, tenant_id: &str, case_id: &str) -> Result<Option<CaseRecord>>;

    /// Insert a new case.
    fn insert_case(&self, case: &CaseRecord) -> Result<()>;

    /// Replace an existing case. Returns false if it did not exist.
    fn update_case(&self, case: &CaseRecord) -> Result<bool>;

    /// Delete a case. Returns false if it did not exist.
    fn delete_case(&self, tenant_id: &str, case_id: &str) -> Result<bool>;

    // =========================================================================
    // Listing
    // =========================================================================

    /// List cases matching the filters, ordered by id.
    fn find_cases(
        &self,
        tenant_id: &str,
        filters: &CaseFilters,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<CaseRecord>>;

    /// Count cases matching the filters.
    fn count_cases(&self, tenant_id: &str, filters: &CaseFilters) -> Result<usize>;

    /// Case-insensitive substring scan over title and content of published
    /// cases, capped at `limit`.
    fn scan_text(
        &self,
        tenant_id: &str,
        needle: &str,
        filters: &CaseFilters,
        limit: usize,
    ) -> Result<Vec<CaseRecord>>;
}
