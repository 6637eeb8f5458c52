//! Client for the hosted catalogue store.
//!
//! The store exposes its tables through a REST data API (PostgREST
//! dialect): filterable selects, keyed upserts, bulk inserts, filtered
//! deletes and patches, and exact row counts via the `Content-Range`
//! header. [`CatalogStore`] is the seam the import pipeline and the
//! maintenance commands work against; [`PostgrestStore`] is the real
//! client. Every call is attempted exactly once; there is no retry layer.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
pub use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use tci_core::{AssetKind, Category, CourseAsset, CourseRow};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store configuration error: {0}")]
    Config(String),
    #[error("store request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("store returned {status} during {operation}: {body}")]
    Api {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("unexpected store response during {operation}: {detail}")]
    Decode {
        operation: &'static str,
        detail: String,
    },
}

/// Connection settings for the hosted store.
///
/// The service role key bypasses row level security; bulk imports need it.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub base_url: String,
    pub service_role_key: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, StoreError> {
        Self::from_vars(
            std::env::var("TCI_STORE_URL").ok(),
            std::env::var("TCI_SERVICE_ROLE_KEY").ok(),
        )
    }

    fn from_vars(url: Option<String>, key: Option<String>) -> Result<Self, StoreError> {
        let base_url = url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| StoreError::Config("TCI_STORE_URL is not set".to_string()))?;
        let service_role_key = key.filter(|k| !k.is_empty()).ok_or_else(|| {
            StoreError::Config(
                "TCI_SERVICE_ROLE_KEY is not set (the service role key is required for bulk writes)"
                    .to_string(),
            )
        })?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role_key,
        })
    }
}

/// Course columns returned by an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpsertedCourse {
    pub id: i64,
    pub title: String,
}

/// Course columns returned by maintenance lookups.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CourseSummary {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub category_id: i64,
}

/// A persisted asset row, including its store-assigned row id.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoredAsset {
    pub id: i64,
    pub course_id: i64,
    #[serde(rename = "type")]
    pub kind: AssetKind,
    pub url: String,
    pub label: Option<String>,
}

/// Operations the catalogue needs from its storage collaborator.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Insert-or-overwrite course rows keyed on `id`. Never creates a
    /// second row for an existing key.
    async fn upsert_courses(&self, rows: &[CourseRow]) -> Result<Vec<UpsertedCourse>, StoreError>;

    /// Remove every asset row unconditionally.
    async fn delete_all_assets(&self) -> Result<(), StoreError>;

    async fn insert_assets(&self, assets: &[CourseAsset]) -> Result<(), StoreError>;

    async fn count_courses(&self) -> Result<u64, StoreError>;

    async fn count_assets(&self) -> Result<u64, StoreError>;

    async fn count_courses_in_category(&self, category_id: i64) -> Result<u64, StoreError>;

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn delete_category(&self, category_id: i64) -> Result<(), StoreError>;

    /// Case-insensitive title-substring lookup, ordered by title.
    async fn find_courses_by_title(&self, needle: &str)
        -> Result<Vec<CourseSummary>, StoreError>;

    /// The media asset attached to a course, if any.
    async fn media_asset(&self, course_id: i64) -> Result<Option<StoredAsset>, StoreError>;

    async fn update_asset_url(&self, asset_id: i64, url: &str) -> Result<(), StoreError>;
}

/// REST client for the hosted store. Built on transport defaults; the
/// pipeline's failure semantics assume no retries and no client timeout.
pub struct PostgrestStore {
    client: Client,
    config: StoreConfig,
}

impl PostgrestStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.config.base_url, table);
        self.client
            .request(method, url)
            .header("apikey", &self.config.service_role_key)
            .bearer_auth(&self.config.service_role_key)
    }

    async fn exact_count(
        &self,
        operation: &'static str,
        table: &str,
        filter: Option<(&str, String)>,
    ) -> Result<u64, StoreError> {
        let mut request = self
            .request(Method::HEAD, table)
            .query(&[("select", "id")])
            .header("Prefer", "count=exact");
        if let Some((column, condition)) = filter {
            request = request.query(&[(column, condition)]);
        }
        let response = check(operation, request.send().await?).await?;
        let header = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| StoreError::Decode {
                operation,
                detail: "missing content-range header".to_string(),
            })?;
        parse_exact_count(header).ok_or_else(|| StoreError::Decode {
            operation,
            detail: format!("unparseable content-range '{header}'"),
        })
    }
}

async fn check(operation: &'static str, response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Api {
        operation,
        status,
        body,
    })
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/0`.
fn parse_exact_count(content_range: &str) -> Option<u64> {
    content_range.rsplit('/').next()?.trim().parse().ok()
}

fn title_pattern(needle: &str) -> String {
    format!("ilike.*{needle}*")
}

#[async_trait]
impl CatalogStore for PostgrestStore {
    async fn upsert_courses(&self, rows: &[CourseRow]) -> Result<Vec<UpsertedCourse>, StoreError> {
        debug!("upserting {} course rows", rows.len());
        let response = self
            .request(Method::POST, "courses")
            .query(&[("on_conflict", "id"), ("select", "id,title")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(rows)
            .send()
            .await?;
        let response = check("course upsert", response).await?;
        Ok(response.json().await?)
    }

    async fn delete_all_assets(&self) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, "course_assets")
            .query(&[("id", "neq.0")])
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        check("asset deletion", response).await?;
        Ok(())
    }

    async fn insert_assets(&self, assets: &[CourseAsset]) -> Result<(), StoreError> {
        debug!("inserting {} asset rows", assets.len());
        let response = self
            .request(Method::POST, "course_assets")
            .header("Prefer", "return=minimal")
            .json(assets)
            .send()
            .await?;
        check("asset insertion", response).await?;
        Ok(())
    }

    async fn count_courses(&self) -> Result<u64, StoreError> {
        self.exact_count("course count", "courses", None).await
    }

    async fn count_assets(&self) -> Result<u64, StoreError> {
        self.exact_count("asset count", "course_assets", None).await
    }

    async fn count_courses_in_category(&self, category_id: i64) -> Result<u64, StoreError> {
        self.exact_count(
            "category course count",
            "courses",
            Some(("category_id", format!("eq.{category_id}"))),
        )
        .await
    }

    async fn list_categories(&self) -> Result<Vec<Category>, StoreError> {
        let response = self
            .request(Method::GET, "categories")
            .query(&[("select", "id,name"), ("order", "id.asc")])
            .send()
            .await?;
        let response = check("category listing", response).await?;
        Ok(response.json().await?)
    }

    async fn delete_category(&self, category_id: i64) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, "categories")
            .query(&[("id", format!("eq.{category_id}"))])
            .header("Prefer", "return=minimal")
            .send()
            .await?;
        check("category deletion", response).await?;
        Ok(())
    }

    async fn find_courses_by_title(
        &self,
        needle: &str,
    ) -> Result<Vec<CourseSummary>, StoreError> {
        let response = self
            .request(Method::GET, "courses")
            .query(&[
                ("select", "id,title,slug,category_id".to_string()),
                ("title", title_pattern(needle)),
                ("order", "title.asc".to_string()),
            ])
            .send()
            .await?;
        let response = check("course lookup", response).await?;
        Ok(response.json().await?)
    }

    async fn media_asset(&self, course_id: i64) -> Result<Option<StoredAsset>, StoreError> {
        let response = self
            .request(Method::GET, "course_assets")
            .query(&[
                ("select", "id,course_id,type,url,label".to_string()),
                ("course_id", format!("eq.{course_id}")),
                ("type", "eq.media".to_string()),
            ])
            .send()
            .await?;
        let response = check("media asset lookup", response).await?;
        let assets: Vec<StoredAsset> = response.json().await?;
        Ok(assets.into_iter().next())
    }

    async fn update_asset_url(&self, asset_id: i64, url: &str) -> Result<(), StoreError> {
        let response = self
            .request(Method::PATCH, "course_assets")
            .query(&[("id", format!("eq.{asset_id}"))])
            .header("Prefer", "return=minimal")
            .json(&serde_json::json!({ "url": url }))
            .send()
            .await?;
        check("asset update", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_both_variables() {
        let err = StoreConfig::from_vars(None, Some("key".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Config(msg) if msg.contains("TCI_STORE_URL")));

        let err =
            StoreConfig::from_vars(Some("https://store.example".to_string()), None).unwrap_err();
        assert!(matches!(err, StoreError::Config(msg) if msg.contains("TCI_SERVICE_ROLE_KEY")));

        let err = StoreConfig::from_vars(Some(String::new()), Some("key".to_string())).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn config_normalizes_trailing_slash() {
        let config = StoreConfig::from_vars(
            Some("https://store.example/".to_string()),
            Some("key".to_string()),
        )
        .unwrap();
        assert_eq!(config.base_url, "https://store.example");
    }

    #[test]
    fn content_range_totals_parse() {
        assert_eq!(parse_exact_count("0-24/3573"), Some(3573));
        assert_eq!(parse_exact_count("*/0"), Some(0));
        assert_eq!(parse_exact_count("0-49/120"), Some(120));
        assert_eq!(parse_exact_count("garbage"), None);
        assert_eq!(parse_exact_count("0-24/*"), None);
    }

    #[test]
    fn title_lookup_uses_wildcard_ilike() {
        assert_eq!(title_pattern("IATP"), "ilike.*IATP*");
    }

    #[test]
    fn stored_asset_decodes_wire_shape() {
        let asset: StoredAsset = serde_json::from_value(serde_json::json!({
            "id": 9,
            "course_id": 555,
            "type": "media",
            "url": "https://videotilehost.com/embed/555",
            "label": null
        }))
        .unwrap();
        assert_eq!(asset.kind, AssetKind::Media);
        assert_eq!(asset.course_id, 555);
        assert_eq!(asset.label, None);
    }
}
