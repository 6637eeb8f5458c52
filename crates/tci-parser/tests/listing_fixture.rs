use tci_parser::{parse_listing, QualityReport, DEFAULT_LINK_WINDOW};

#[test]
fn vendor_listing_fixture_parses_end_to_end() {
    let html = std::fs::read_to_string("tests/fixtures/health_and_safety.html").unwrap();
    let listing = parse_listing(&html, 1, "Health & Safety", DEFAULT_LINK_WINDOW);

    // Six sections; "Coming Soon" has no purchase action and is skipped.
    assert_eq!(listing.stats.parsed, 5);
    assert_eq!(listing.stats.skipped, 1);

    let ids: Vec<i64> = listing.records.iter().map(|r| r.external_id).collect();
    assert_eq!(ids, vec![50, 62, 71, 84, 90]);

    let asbestos = &listing.records[0];
    assert_eq!(asbestos.title, "Asbestos Awareness");
    assert_eq!(asbestos.slug, "asbestos-awareness");
    assert_eq!(
        asbestos.icon_url.as_deref(),
        Some("https://videotilehost.com/common/icons/asbestos.png")
    );
    assert!(asbestos
        .description
        .as_deref()
        .unwrap()
        .starts_with("This course provides an awareness"));
    assert_eq!(
        asbestos.free_trial_url.as_deref(),
        Some("https://videotilehost.com/hamptonsafety/freeTrial.php?trial=50")
    );
    assert_eq!(
        asbestos.document_url,
        "https://videotilehost.com/common/courses/info_50.pdf"
    );
    assert_eq!(asbestos.media_url, "https://videotilehost.com/embed/50");

    // Manual Handling has no icon and no free trial.
    let manual = listing
        .records
        .iter()
        .find(|r| r.external_id == 71)
        .unwrap();
    assert_eq!(manual.icon_url, None);
    assert_eq!(manual.free_trial_url, None);

    let report = QualityReport::from_records(&listing.records);
    assert_eq!(report.total, 5);
    assert_eq!(report.missing_icons, 1);
    assert_eq!(report.missing_free_trials, 1);
    assert_eq!(report.missing_descriptions, 0);
    assert!(report.duplicate_titles.is_empty());
}
