//! Parser for vendor course listing pages.
//!
//! A listing page is a flat sequence of sections: an `h2.vtheading` carries
//! the course title, the immediately following `p.vtptext` carries the icon
//! and description, and the purchase / free-trial actions appear among the
//! next few `a.vtbuttons` siblings. The vendor encodes its numeric course id
//! in those action URLs (`nid=` for purchases, `trial=` for free trials).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use tci_core::{CourseDraft, ParsedCourseRecord};

/// How many `a.vtbuttons` siblings after the description block are scanned
/// for the purchase and free-trial actions.
pub const DEFAULT_LINK_WINDOW: usize = 3;

static HEADING: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h2.vtheading").unwrap());
static ICON: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.vticons").unwrap());
static NID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"nid=(\d+)").unwrap());
static TRIAL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"trial=(\d+)").unwrap());

/// Counters for a single document parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub parsed: usize,
    pub skipped: usize,
}

/// Records extracted from one listing document, in document order.
#[derive(Debug, Clone)]
pub struct ParsedListing {
    pub records: Vec<ParsedCourseRecord>,
    pub stats: ParseStats,
}

/// Extract course records from one listing document.
///
/// Sections missing a title, a numeric vendor id, or a purchase URL are
/// skipped with a warning and counted in [`ParseStats::skipped`]; parsing
/// always continues with the remaining sections.
pub fn parse_listing(
    html: &str,
    category_id: i64,
    category_name: &str,
    link_window: usize,
) -> ParsedListing {
    let document = Html::parse_document(html);
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for heading in document.select(&HEADING) {
        let title = collect_text(&heading);

        let description_block = heading
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .next()
            .filter(|el| is_element(el, "p", "vtptext"));

        let (icon_url, description) = match &description_block {
            Some(block) => {
                let icon = block
                    .select(&ICON)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .map(str::to_string)
                    .filter(|src| !src.is_empty());
                let text = collect_text(block);
                (icon, Some(text).filter(|t| !t.is_empty()))
            }
            None => (None, None),
        };

        let mut draft = CourseDraft {
            title,
            category_id,
            category_name: category_name.to_string(),
            icon_url,
            description,
            ..CourseDraft::default()
        };

        // The action links trail the description block, sometimes with other
        // markup in between. The first match of each kind within the window
        // is authoritative; the purchase id wins over the trial id.
        let mut trial_id = None;
        let mut purchase_id = None;
        if let Some(block) = description_block {
            let actions = block
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .filter(|el| is_element(el, "a", "vtbuttons"))
                .take(link_window);
            for action in actions {
                let href = action.value().attr("href").unwrap_or_default();
                let text = collect_text(&action);
                if text == "Free Trial"
                    && href.contains("freeTrial.php")
                    && draft.free_trial_url.is_none()
                {
                    draft.free_trial_url = Some(href.to_string());
                    trial_id = extract_id(&TRIAL_RE, href);
                } else if text == "Buy Now"
                    && href.contains("purchaseCourse.php")
                    && draft.purchase_url.is_none()
                {
                    draft.purchase_url = Some(href.to_string());
                    purchase_id = extract_id(&NID_RE, href);
                }
            }
        }
        draft.external_id = purchase_id.or(trial_id);

        let section_title = draft.title.clone();
        match draft.validate() {
            Ok(record) => records.push(record),
            Err(err) => {
                let shown = if section_title.is_empty() {
                    "unknown"
                } else {
                    section_title.as_str()
                };
                warn!("skipping incomplete course section '{shown}': {err}");
                skipped += 1;
            }
        }
    }

    let stats = ParseStats {
        parsed: records.len(),
        skipped,
    };
    ParsedListing { records, stats }
}

/// Data-quality counters over a full parse run (all documents concatenated).
/// Duplicate titles are a warning only; they never drive deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QualityReport {
    pub total: usize,
    pub missing_descriptions: usize,
    pub missing_icons: usize,
    pub missing_free_trials: usize,
    pub duplicate_titles: Vec<(String, usize)>,
}

impl QualityReport {
    pub fn from_records(records: &[ParsedCourseRecord]) -> Self {
        let mut title_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in records {
            *title_counts.entry(record.title.as_str()).or_default() += 1;
        }
        Self {
            total: records.len(),
            missing_descriptions: records.iter().filter(|r| r.description.is_none()).count(),
            missing_icons: records.iter().filter(|r| r.icon_url.is_none()).count(),
            missing_free_trials: records.iter().filter(|r| r.free_trial_url.is_none()).count(),
            duplicate_titles: title_counts
                .into_iter()
                .filter(|(_, count)| *count > 1)
                .map(|(title, count)| (title.to_string(), count))
                .collect(),
        }
    }

    pub fn log(&self) {
        tracing::info!(
            "data quality: {} records, {} missing descriptions, {} missing icons, {} missing free trials",
            self.total,
            self.missing_descriptions,
            self.missing_icons,
            self.missing_free_trials
        );
        for (title, count) in &self.duplicate_titles {
            warn!("title '{title}' appears {count} times");
        }
    }
}

fn collect_text(element: &ElementRef) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn is_element(element: &ElementRef, name: &str, class: &str) -> bool {
    element.value().name() == name && element.value().classes().any(|c| c == class)
}

fn extract_id(re: &Regex, href: &str) -> Option<i64> {
    re.captures(href).and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(title: &str, nid: i64) -> String {
        format!(
            r#"<h2 class="vtheading">{title}</h2>
            <p class="vtptext"><img class="vticons" src="https://vendor.example/icons/{nid}.png">
            About the {title} course.</p>
            <p class="vtdetails">Duration: 2 hours</p>
            <a class="vtbuttons" href="https://vendor.example/freeTrial.php?trial={nid}">Free Trial</a>
            <a class="vtbuttons" href="https://vendor.example/purchaseCourse.php?nid={nid}">Buy Now</a>"#
        )
    }

    #[test]
    fn parses_complete_section() {
        let html = section("Asbestos Awareness", 555);
        let listing = parse_listing(&html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);
        assert_eq!(listing.stats, ParseStats { parsed: 1, skipped: 0 });

        let record = &listing.records[0];
        assert_eq!(record.title, "Asbestos Awareness");
        assert_eq!(record.slug, "asbestos-awareness");
        assert_eq!(record.external_id, 555);
        assert_eq!(record.category_id, 1);
        assert_eq!(record.category_name, "Health & Safety");
        assert_eq!(
            record.icon_url.as_deref(),
            Some("https://vendor.example/icons/555.png")
        );
        assert_eq!(
            record.description.as_deref(),
            Some("About the Asbestos Awareness course.")
        );
        assert_eq!(
            record.free_trial_url.as_deref(),
            Some("https://vendor.example/freeTrial.php?trial=555")
        );
        assert_eq!(
            record.purchase_url,
            "https://vendor.example/purchaseCourse.php?nid=555"
        );
        assert_eq!(
            record.document_url,
            "https://videotilehost.com/common/courses/info_555.pdf"
        );
        assert_eq!(record.media_url, "https://videotilehost.com/embed/555");
    }

    #[test]
    fn purchase_id_wins_over_trial_id() {
        let html = r#"<h2 class="vtheading">Fire Safety</h2>
            <p class="vtptext">Stay safe.</p>
            <a class="vtbuttons" href="https://vendor.example/freeTrial.php?trial=900">Free Trial</a>
            <a class="vtbuttons" href="https://vendor.example/purchaseCourse.php?nid=901">Buy Now</a>"#;
        let listing = parse_listing(html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);
        assert_eq!(listing.records[0].external_id, 901);
    }

    #[test]
    fn section_without_purchase_link_is_skipped_not_failed() {
        let html = r#"<h2 class="vtheading">Orphan Course</h2>
            <p class="vtptext">No way to buy this.</p>
            <a class="vtbuttons" href="https://vendor.example/freeTrial.php?trial=">Free Trial</a>"#;
        let listing = parse_listing(html, 2, "Business Skills", DEFAULT_LINK_WINDOW);
        assert!(listing.records.is_empty());
        assert_eq!(listing.stats, ParseStats { parsed: 0, skipped: 1 });
    }

    #[test]
    fn section_without_description_block_is_skipped() {
        // No p.vtptext immediately after the heading means there is no
        // anchor point for the action scan either.
        let html = r#"<h2 class="vtheading">Detached Course</h2>
            <div>interruption</div>
            <p class="vtptext">Too late to count.</p>"#;
        let listing = parse_listing(html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);
        assert_eq!(listing.stats, ParseStats { parsed: 0, skipped: 1 });
    }

    #[test]
    fn link_window_bounds_the_action_scan() {
        let html = r#"<h2 class="vtheading">Buried Course</h2>
            <p class="vtptext">Desc.</p>
            <a class="vtbuttons" href="https://vendor.example/other.php">More Info</a>
            <a class="vtbuttons" href="https://vendor.example/other2.php">Brochure</a>
            <a class="vtbuttons" href="https://vendor.example/other3.php">Contact</a>
            <a class="vtbuttons" href="https://vendor.example/purchaseCourse.php?nid=42">Buy Now</a>"#;
        let narrow = parse_listing(html, 1, "Health & Safety", 3);
        assert_eq!(narrow.stats.skipped, 1);

        let wide = parse_listing(html, 1, "Health & Safety", 4);
        assert_eq!(wide.records[0].external_id, 42);
    }

    #[test]
    fn non_action_markup_between_links_is_ignored() {
        // The vtdetails paragraph sits between the description and the
        // buttons; the scan filters to a.vtbuttons siblings only.
        let html = section("Manual Handling", 77);
        let listing = parse_listing(&html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);
        assert_eq!(listing.records[0].external_id, 77);
    }

    #[test]
    fn multiple_sections_parse_in_document_order() {
        let html = format!("{}{}{}", section("Course A", 1), section("Course B", 2), section("Course C", 3));
        let listing = parse_listing(&html, 3, "Health & Social Care", DEFAULT_LINK_WINDOW);
        let ids: Vec<i64> = listing.records.iter().map(|r| r.external_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn quality_report_counts_gaps_and_duplicate_titles() {
        let html = format!(
            "{}{}{}",
            section("Working at Height", 10),
            r#"<h2 class="vtheading">Working at Height</h2>
               <p class="vtptext">Second listing of the same course.</p>
               <a class="vtbuttons" href="https://vendor.example/purchaseCourse.php?nid=11">Buy Now</a>"#,
            r#"<h2 class="vtheading">Ladder Safety</h2>
               <p class="vtptext"><img class="vticons" src=""></p>
               <a class="vtbuttons" href="https://vendor.example/purchaseCourse.php?nid=12">Buy Now</a>"#
        );
        let listing = parse_listing(&html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);
        let report = QualityReport::from_records(&listing.records);
        assert_eq!(report.total, 3);
        assert_eq!(report.missing_descriptions, 1); // Ladder Safety has icon-only block
        assert_eq!(report.missing_icons, 2);
        assert_eq!(report.missing_free_trials, 2);
        assert_eq!(report.duplicate_titles, vec![("Working at Height".to_string(), 2)]);
    }
}
