//! Case record models.

use serde::{Deserialize, Serialize};

/// Publication status of a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Pending,
    Published,
    Rejected,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Draft => "draft",
            CaseStatus::Pending => "pending",
            CaseStatus::Published => "published",
            CaseStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(CaseStatus::Draft),
            "pending" => Some(CaseStatus::Pending),
            "published" => Some(CaseStatus::Published),
            "rejected" => Some(CaseStatus::Rejected),
            _ => None,
        }
    }
}

/// A case as stored in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub id: String,
    pub tenant_id: String,
    pub title: String,
    pub content: String,
    /// "external" cases are visible to end users, "internal" only to agents.
    pub case_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: CaseStatus,
}

impl CaseRecord {
    /// Create a published external case with no category or tags.
    pub fn published(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            title: title.into(),
            content: content.into(),
            case_type: "external".to_string(),
            category_id: None,
            tags: Vec::new(),
            status: CaseStatus::Published,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_case_type(mut self, case_type: impl Into<String>) -> Self {
        self.case_type = case_type.into();
        self
    }

    pub fn with_status(mut self, status: CaseStatus) -> Self {
        self.status = status;
        self
    }
}

/// Optional narrowing applied on top of the tenant scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_type: Option<String>,
    /// A case must carry every listed tag.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CaseFilters {
    pub fn is_empty(&self) -> bool {
        self.category_id.is_none() && self.case_type.is_none() && self.tags.is_empty()
    }

    /// Whether a record satisfies these filters.
    pub fn matches(&self, case: &CaseRecord) -> bool {
        if let Some(category_id) = &self.category_id {
            if case.category_id.as_deref() != Some(category_id.as_str()) {
                return false;
            }
        }
        if let Some(case_type) = &self.case_type {
            if &case.case_type != case_type {
                return false;
            }
        }
        self.tags.iter().all(|tag| case.tags.contains(tag))
    }
}
