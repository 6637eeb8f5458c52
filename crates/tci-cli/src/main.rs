use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tci_core::{AssetKind, CourseAsset};
use tci_import::{dedupe_by_external_id, import, parse_all_sources, stage, ImportOptions, SourceRegistry};
use tci_parser::DEFAULT_LINK_WINDOW;
use tci_storage::{CatalogStore, PostgrestStore, StoreConfig};

#[derive(Debug, Parser)]
#[command(name = "tci")]
#[command(about = "Training catalogue importer and maintenance tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse the vendor listings and synchronize the catalogue store
    Import {
        /// Parse and deduplicate only; never contact the store
        #[arg(long)]
        dry_run: bool,
        /// Source registry file
        #[arg(long, default_value = "sources.yaml")]
        registry: PathBuf,
        /// Action links scanned after each course description
        #[arg(long, default_value_t = DEFAULT_LINK_WINDOW)]
        link_window: usize,
    },
    /// Report store row counts and the per-category breakdown
    Verify,
    /// Find courses whose title contains the pattern, case-insensitively
    Find { pattern: String },
    /// Report distinct courses in the source documents whose titles
    /// slugify identically
    SlugCollisions {
        #[arg(long, default_value = "sources.yaml")]
        registry: PathBuf,
        #[arg(long, default_value_t = DEFAULT_LINK_WINDOW)]
        link_window: usize,
    },
    /// Copy the media asset URL from one course to another
    CopyMedia {
        /// Course id to copy the media URL from
        #[arg(long)]
        from: i64,
        /// Course id to copy the media URL to
        #[arg(long)]
        to: i64,
    },
    /// Delete categories that have no courses
    PruneCategories,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Import {
            dry_run,
            registry,
            link_window,
        } => run_import(dry_run, &registry, link_window).await,
        Commands::Verify => verify(&connect()?).await,
        Commands::Find { pattern } => find(&connect()?, &pattern).await,
        Commands::SlugCollisions {
            registry,
            link_window,
        } => slug_collisions(&registry, link_window),
        Commands::CopyMedia { from, to } => copy_media(&connect()?, from, to).await,
        Commands::PruneCategories => prune_categories(&connect()?).await,
    }
}

/// Fatal when credentials are missing; no partial work is attempted.
fn connect() -> Result<PostgrestStore> {
    let config = StoreConfig::from_env().context("connecting to the catalogue store")?;
    PostgrestStore::new(config).context("connecting to the catalogue store")
}

async fn run_import(dry_run: bool, registry_path: &Path, link_window: usize) -> Result<()> {
    let registry = SourceRegistry::load(registry_path)?;
    let options = ImportOptions { link_window };

    if dry_run {
        let staged = stage(&registry, options)?;
        println!(
            "Dry run: {} unique courses, {} duplicates.",
            staged.unique.len(),
            staged.duplicates.len()
        );
        println!(
            "Would import {} courses across {} categories.",
            staged.unique.len(),
            staged.category_count()
        );
        return Ok(());
    }

    let store = connect()?;
    let summary = import(&registry, options, &store).await?;
    println!(
        "Import complete: run_id={} unique={} duplicates={} batches={}",
        summary.run_id, summary.unique, summary.duplicates, summary.batches
    );
    println!(
        "Store now holds {} courses and {} assets.",
        summary.course_count, summary.asset_count
    );
    for category in &summary.category_counts {
        println!("  {}: {} courses", category.name, category.courses);
    }
    Ok(())
}

async fn verify(store: &dyn CatalogStore) -> Result<()> {
    let course_count = store.count_courses().await.context("counting courses")?;
    let asset_count = store.count_assets().await.context("counting assets")?;
    println!("Courses: {course_count}");
    println!("Assets:  {asset_count}");

    println!("\nCourses by category:");
    for category in store
        .list_categories()
        .await
        .context("listing categories")?
    {
        let count = store
            .count_courses_in_category(category.id)
            .await
            .with_context(|| format!("counting courses in category '{}'", category.name))?;
        println!("  {}: {}", category.name, count);
    }
    Ok(())
}

async fn find(store: &dyn CatalogStore, pattern: &str) -> Result<()> {
    let courses = store
        .find_courses_by_title(pattern)
        .await
        .context("searching courses")?;
    if courses.is_empty() {
        println!("No courses match '{pattern}'.");
        return Ok(());
    }
    println!("Found {} courses matching '{pattern}':", courses.len());
    for course in courses {
        println!("  {:>5}  {}", course.id, course.title);
    }
    Ok(())
}

fn slug_collisions(registry_path: &Path, link_window: usize) -> Result<()> {
    let registry = SourceRegistry::load(registry_path)?;
    let records = parse_all_sources(&registry, link_window)?;
    let outcome = dedupe_by_external_id(records);

    let mut by_slug: BTreeMap<String, Vec<(i64, String)>> = BTreeMap::new();
    for record in &outcome.unique {
        by_slug
            .entry(record.slug.clone())
            .or_default()
            .push((record.external_id, record.title.clone()));
    }

    let collisions: Vec<_> = by_slug
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .collect();
    if collisions.is_empty() {
        println!(
            "No slug collisions across {} unique courses.",
            outcome.unique.len()
        );
        return Ok(());
    }

    println!("{} colliding slugs:", collisions.len());
    for (slug, members) in collisions {
        println!("  {slug}");
        for (id, title) in members {
            println!("    {id}: {title}");
        }
    }
    Ok(())
}

async fn copy_media(store: &dyn CatalogStore, from: i64, to: i64) -> Result<()> {
    let source = store
        .media_asset(from)
        .await
        .context("looking up source media asset")?
        .with_context(|| format!("course {from} has no media asset"))?;

    match store
        .media_asset(to)
        .await
        .context("looking up target media asset")?
    {
        Some(existing) if existing.url == source.url => {
            println!("Media for course {to} already matches; nothing to do.");
        }
        Some(existing) => {
            store
                .update_asset_url(existing.id, &source.url)
                .await
                .context("updating media asset")?;
            println!("Updated media for course {to}: {}", source.url);
        }
        None => {
            let asset = CourseAsset {
                course_id: to,
                kind: AssetKind::Media,
                url: source.url.clone(),
                label: Some("Promotional Video".to_string()),
            };
            store
                .insert_assets(&[asset])
                .await
                .context("adding media asset")?;
            println!("Added media for course {to}: {}", source.url);
        }
    }
    Ok(())
}

async fn prune_categories(store: &dyn CatalogStore) -> Result<()> {
    let mut removed = 0;
    for category in store
        .list_categories()
        .await
        .context("listing categories")?
    {
        let count = store
            .count_courses_in_category(category.id)
            .await
            .with_context(|| format!("counting courses in category '{}'", category.name))?;
        if count == 0 {
            store
                .delete_category(category.id)
                .await
                .with_context(|| format!("deleting category '{}'", category.name))?;
            println!("Removed unused category '{}'", category.name);
            removed += 1;
        } else {
            println!("Keeping '{}' ({count} courses)", category.name);
        }
    }
    if removed == 0 {
        println!("No unused categories.");
    }
    Ok(())
}
