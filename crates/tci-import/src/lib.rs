//! The catalogue import pipeline.
//!
//! A run parses every configured listing document, deduplicates the result
//! by vendor course id, maps the survivors to persisted rows, upserts them
//! in fixed-size batches, replaces the asset table wholesale, and reports
//! verification counts. Everything before the first store call is pure and
//! runs identically in dry-run mode.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use tci_core::{CourseAsset, CourseRow, ParsedCourseRecord};
use tci_parser::{parse_listing, QualityReport, DEFAULT_LINK_WINDOW};
use tci_storage::CatalogStore;

/// Course rows per upsert call. Batches are issued strictly in sequence so
/// a failure names the batch it happened in.
pub const COURSE_BATCH_SIZE: usize = 50;

/// The set of listing documents to import, each bound to its category.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceDocument {
    pub file: PathBuf,
    pub category_id: i64,
    pub category_name: String,
}

impl SourceRegistry {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let registry: Self =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if registry.sources.is_empty() {
            bail!("{} lists no source documents", path.display());
        }
        Ok(registry)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    pub link_window: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            link_window: DEFAULT_LINK_WINDOW,
        }
    }
}

/// Parse every registry document and concatenate the records in registry
/// order. Pure function of the registry contents.
pub fn parse_all_sources(
    registry: &SourceRegistry,
    link_window: usize,
) -> Result<Vec<ParsedCourseRecord>> {
    let mut records = Vec::new();
    for source in &registry.sources {
        let html = std::fs::read_to_string(&source.file)
            .with_context(|| format!("reading source document {}", source.file.display()))?;
        let listing = parse_listing(&html, source.category_id, &source.category_name, link_window);
        info!(
            "parsed {} courses from {} ({}), skipped {}",
            listing.stats.parsed,
            source.file.display(),
            source.category_name,
            listing.stats.skipped
        );
        records.extend(listing.records);
    }
    Ok(records)
}

#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    pub unique: Vec<ParsedCourseRecord>,
    pub duplicates: Vec<ParsedCourseRecord>,
}

/// Partition records by vendor course id: the first occurrence of an id is
/// canonical, every later one is a duplicate. Both sets keep their input
/// order, and every input record lands in exactly one of them.
pub fn dedupe_by_external_id(records: Vec<ParsedCourseRecord>) -> DedupOutcome {
    let mut seen = HashSet::new();
    let mut outcome = DedupOutcome::default();
    for record in records {
        if seen.insert(record.external_id) {
            outcome.unique.push(record);
        } else {
            outcome.duplicates.push(record);
        }
    }
    outcome
}

/// Give later records whose slug is already taken a `-<vendor id>` suffix.
/// Slugs are public lookup keys, so two courses must never share one.
/// Returns the number of rewrites.
pub fn resolve_slug_collisions(records: &mut [ParsedCourseRecord]) -> usize {
    let mut seen: HashSet<String> = HashSet::new();
    let mut rewrites = 0;
    for record in records.iter_mut() {
        if seen.insert(record.slug.clone()) {
            continue;
        }
        let mut candidate = format!("{}-{}", record.slug, record.external_id);
        while !seen.insert(candidate.clone()) {
            candidate.push_str(&format!("-{}", record.external_id));
        }
        warn!(
            "slug '{}' already taken; using '{}' for '{}'",
            record.slug, candidate, record.title
        );
        record.slug = candidate;
        rewrites += 1;
    }
    rewrites
}

/// Everything an import run knows before it touches the store. This is the
/// whole output of a dry run.
#[derive(Debug, Clone)]
pub struct StagedImport {
    pub unique: Vec<ParsedCourseRecord>,
    pub duplicates: Vec<ParsedCourseRecord>,
    pub quality: QualityReport,
    pub slug_rewrites: usize,
}

impl StagedImport {
    pub fn category_count(&self) -> usize {
        self.unique
            .iter()
            .map(|record| record.category_id)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Parse, deduplicate, and resolve slug collisions. No store contact.
pub fn stage(registry: &SourceRegistry, options: ImportOptions) -> Result<StagedImport> {
    let records = parse_all_sources(registry, options.link_window)?;
    let quality = QualityReport::from_records(&records);
    quality.log();

    let DedupOutcome { mut unique, duplicates } = dedupe_by_external_id(records);
    info!(
        "{} unique courses, {} duplicates discarded",
        unique.len(),
        duplicates.len()
    );
    for duplicate in &duplicates {
        warn!(
            "duplicate vendor id {}: '{}' ({})",
            duplicate.external_id, duplicate.title, duplicate.category_name
        );
    }

    let slug_rewrites = resolve_slug_collisions(&mut unique);
    Ok(StagedImport {
        unique,
        duplicates,
        quality,
        slug_rewrites,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub courses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub parsed: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub batches: usize,
    pub courses_upserted: usize,
    pub assets_inserted: usize,
    pub course_count: u64,
    pub asset_count: u64,
    pub category_counts: Vec<CategoryCount>,
}

/// Run the full import against the store.
///
/// Course batches and all other store calls are awaited one at a time. A
/// failed batch aborts the run and names its batch number; batches already
/// written stay written. Asset deletion failure is a warning only; asset
/// insertion failure aborts.
pub async fn import(
    registry: &SourceRegistry,
    options: ImportOptions,
    store: &dyn CatalogStore,
) -> Result<ImportSummary> {
    let started_at = Utc::now();
    let run_id = Uuid::new_v4();
    info!("starting catalogue import run {run_id}");

    let staged = stage(registry, options)?;
    let parsed = staged.unique.len() + staged.duplicates.len();

    let rows: Vec<CourseRow> = staged.unique.iter().map(CourseRow::from).collect();
    info!(
        "upserting {} courses in batches of {COURSE_BATCH_SIZE}",
        rows.len()
    );
    let mut courses_upserted = 0;
    let mut batches = 0;
    for (index, batch) in rows.chunks(COURSE_BATCH_SIZE).enumerate() {
        let upserted = store
            .upsert_courses(batch)
            .await
            .with_context(|| format!("upserting course batch {}", index + 1))?;
        courses_upserted += upserted.len();
        batches += 1;
        info!(
            "upserted {}/{} courses",
            index * COURSE_BATCH_SIZE + batch.len(),
            rows.len()
        );
    }

    info!("clearing existing course assets");
    if let Err(err) = store.delete_all_assets().await {
        warn!("could not clear existing course assets: {err}");
    }

    let assets: Vec<CourseAsset> = staged
        .unique
        .iter()
        .flat_map(|record| [CourseAsset::document_for(record), CourseAsset::media_for(record)])
        .collect();
    store
        .insert_assets(&assets)
        .await
        .context("inserting course assets")?;
    info!(
        "inserted {} course assets ({} documents, {} media)",
        assets.len(),
        assets.len() / 2,
        assets.len() / 2
    );

    info!("verifying import");
    let course_count = store.count_courses().await.context("counting courses")?;
    let asset_count = store.count_assets().await.context("counting assets")?;
    let mut category_counts = Vec::new();
    for category in store
        .list_categories()
        .await
        .context("listing categories")?
    {
        let count = store
            .count_courses_in_category(category.id)
            .await
            .with_context(|| format!("counting courses in category '{}'", category.name))?;
        if count > 0 {
            category_counts.push(CategoryCount {
                name: category.name,
                courses: count,
            });
        }
    }

    Ok(ImportSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        parsed,
        unique: staged.unique.len(),
        duplicates: staged.duplicates.len(),
        batches,
        courses_upserted,
        assets_inserted: assets.len(),
        course_count,
        asset_count,
        category_counts,
    })
}
