//! Core domain model for the training catalogue: parsed course records,
//! persisted row shapes, slug generation, and asset URL synthesis.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host serving vendor course documents and embeddable media.
pub const ASSET_HOST: &str = "https://videotilehost.com";

/// Validation failure raised when a course section lacks a required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing course title")]
    MissingTitle,
    #[error("missing vendor course id")]
    MissingExternalId,
    #[error("missing purchase URL")]
    MissingPurchaseUrl,
}

/// A course extracted from a vendor listing document.
///
/// Title, vendor id, and purchase URL are required; everything else is
/// optional or derived. Construct through [`CourseDraft::validate`] so the
/// invariants hold by the time a record exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedCourseRecord {
    pub title: String,
    pub slug: String,
    pub category_id: i64,
    pub category_name: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    /// Vendor-assigned course id, globally unique per course.
    pub external_id: i64,
    pub purchase_url: String,
    pub free_trial_url: Option<String>,
    pub document_url: String,
    pub media_url: String,
}

/// Unvalidated field bundle collected while scanning one listing section.
#[derive(Debug, Clone, Default)]
pub struct CourseDraft {
    pub title: String,
    pub category_id: i64,
    pub category_name: String,
    pub icon_url: Option<String>,
    pub description: Option<String>,
    pub external_id: Option<i64>,
    pub purchase_url: Option<String>,
    pub free_trial_url: Option<String>,
}

impl CourseDraft {
    /// Check the required fields and derive slug and asset URLs.
    pub fn validate(self) -> Result<ParsedCourseRecord, RecordError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(RecordError::MissingTitle);
        }
        let external_id = match self.external_id {
            Some(id) if id > 0 => id,
            _ => return Err(RecordError::MissingExternalId),
        };
        let purchase_url = self
            .purchase_url
            .filter(|url| !url.is_empty())
            .ok_or(RecordError::MissingPurchaseUrl)?;

        Ok(ParsedCourseRecord {
            slug: slugify(&title),
            document_url: document_url(external_id),
            media_url: media_url(external_id),
            title,
            category_id: self.category_id,
            category_name: self.category_name,
            icon_url: self.icon_url,
            description: self.description.filter(|d| !d.is_empty()),
            external_id,
            purchase_url,
            free_trial_url: self.free_trial_url,
        })
    }
}

/// Persisted course shape. The vendor id doubles as the primary key, which
/// is what makes re-imports idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseRow {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub category_id: i64,
    pub icon_url: String,
    pub description: String,
    pub purchase_url: String,
    pub free_trial_url: Option<String>,
}

impl From<&ParsedCourseRecord> for CourseRow {
    fn from(record: &ParsedCourseRecord) -> Self {
        Self {
            id: record.external_id,
            title: record.title.clone(),
            slug: record.slug.clone(),
            category_id: record.category_id,
            icon_url: record.icon_url.clone().unwrap_or_default(),
            description: record.description.clone().unwrap_or_default(),
            purchase_url: record.purchase_url.clone(),
            free_trial_url: record.free_trial_url.clone(),
        }
    }
}

/// Course category. Small fixed set, assigned by source document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Document,
    Media,
}

/// A downloadable or embeddable asset attached to a course. Assets are
/// fully replaced on every import; the vendor documents are the source of
/// truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseAsset {
    pub course_id: i64,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub url: String,
    pub label: Option<String>,
}

impl CourseAsset {
    pub fn document_for(record: &ParsedCourseRecord) -> Self {
        Self {
            course_id: record.external_id,
            kind: AssetKind::Document,
            url: record.document_url.clone(),
            label: Some(format!("{} - Course Information", record.title)),
        }
    }

    pub fn media_for(record: &ParsedCourseRecord) -> Self {
        Self {
            course_id: record.external_id,
            kind: AssetKind::Media,
            url: record.media_url.clone(),
            label: Some(format!("{} - Promotional Video", record.title)),
        }
    }
}

/// Canonical course-information document URL for a vendor course id.
pub fn document_url(external_id: i64) -> String {
    format!("{ASSET_HOST}/common/courses/info_{external_id}.pdf")
}

/// Canonical embeddable media URL for a vendor course id.
pub fn media_url(external_id: i64) -> String {
    format!("{ASSET_HOST}/embed/{external_id}")
}

/// Derive a URL-safe identifier from a human-readable title.
///
/// Lowercases, strips everything that is not a lowercase letter, digit,
/// whitespace, or hyphen, then collapses separator runs into single hyphens
/// with no leading or trailing hyphen. Deterministic; does not guarantee
/// cross-title uniqueness.
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_separator = false;
    for ch in lowered.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_separator {
                slug.push('-');
                pending_separator = false;
            }
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' {
            pending_separator = !slug.is_empty();
        }
    }
    slug
}
