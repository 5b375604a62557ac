//! Paged browsing tests against the fake directory.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

mod common;

use common::{FakeDirectory, engine_with, person, server, test_config};
use dirbrowse_core::{BrowseOptions, BrowsePage, DirectoryEngine, Entry, Result};
use std::collections::BTreeSet;

const BASE: &str = "dc=example,dc=com";

fn paged_engine(directory: &FakeDirectory, page_size: u32) -> DirectoryEngine {
    engine_with(
        directory,
        test_config().with_browse(BrowseOptions::default().with_page_size(page_size)),
    )
}

fn names(page: &BrowsePage) -> Vec<&str> {
    page.entries.iter().map(|entry| entry.display_name.as_str()).collect()
}

#[tokio::test]
async fn test_engine_browse_sequential_pages() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    let first = engine.browse_page(&corp, BASE, 0, None).await?;
    assert_eq!(names(&first), ["ou-000", "ou-001", "ou-002"]);
    assert!(first.has_next);
    assert!(!first.has_prev);
    assert_eq!(first.page_size, 3);

    let second = engine.browse_page(&corp, BASE, 1, None).await?;
    assert_eq!(names(&second), ["ou-003", "ou-004", "ou-005"]);
    assert!(second.has_next);
    assert!(second.has_prev);

    let third = engine.browse_page(&corp, BASE, 2, None).await?;
    assert_eq!(names(&third), ["ou-006"]);
    assert!(!third.has_next);
    assert!(third.has_prev);
    assert!(!third.truncated);

    // Each page continued from the cached cookie
    assert_eq!(directory.searches(), 3);
    assert_eq!(engine.cursor_count(), 0, "exhausted listing leaves no cursor");

    let distinct: BTreeSet<&str> = first
        .entries
        .iter()
        .chain(&second.entries)
        .chain(&third.entries)
        .map(|entry| entry.dn.as_str())
        .collect();
    assert_eq!(distinct.len(), 7);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_jump_replays_from_start() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    let page = engine.browse_page(&corp, BASE, 2, None).await?;
    assert_eq!(names(&page), ["ou-006"]);
    assert!(!page.has_next);
    assert_eq!(directory.searches(), 3);

    let page = engine.browse_page(&corp, BASE, 1, None).await?;
    assert_eq!(names(&page), ["ou-003", "ou-004", "ou-005"]);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_past_end_is_empty() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);

    let page = engine.browse_page(&server("corp"), BASE, 5, None).await?;
    assert!(page.entries.is_empty());
    assert!(!page.has_next);
    assert!(page.has_prev);
    assert_eq!(page.page_index, 5);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_size_limit_returns_partial_page() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 200);
    directory.set_size_limit(50);
    let engine = paged_engine(&directory, 100);

    let page = engine.browse_page(&server("corp"), BASE, 0, None).await?;
    assert_eq!(page.entries.len(), 50);
    assert!(page.truncated);
    assert!(page.has_next);
    assert_eq!(engine.cursor_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_sorts_by_display_name() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.insert(person("cn=zulu,dc=example,dc=com"));
    directory.insert(person("cn=Alpha,dc=example,dc=com"));
    directory.insert(person("cn=Smith\\, John,dc=example,dc=com"));
    directory.insert(
        Entry::new("ou=mike,dc=example,dc=com").with_values("objectClass", ["organizationalUnit"]),
    );
    let engine = paged_engine(&directory, 10);

    let page = engine.browse_page(&server("corp"), BASE, 0, None).await?;
    assert_eq!(names(&page), ["Alpha", "mike", "Smith, John", "zulu"]);

    let expandable: Vec<bool> = page.entries.iter().map(|entry| entry.has_children).collect();
    assert_eq!(expandable, [false, true, false, false]);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_filter() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 3);
    directory.insert(person("cn=alice,dc=example,dc=com"));
    directory.insert(person("cn=bob,dc=example,dc=com"));
    let engine = paged_engine(&directory, 10);
    let corp = server("corp");

    let everything = engine.browse_page(&corp, BASE, 0, None).await?;
    assert_eq!(everything.entries.len(), 5);

    let people = engine
        .browse_page(&corp, BASE, 0, Some("(objectClass=person)"))
        .await?;
    assert_eq!(names(&people), ["alice", "bob"]);

    // A blank filter falls back to the configured default
    let blank = engine.browse_page(&corp, BASE, 0, Some("  ")).await?;
    assert_eq!(blank.entries.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_filter_change_replays() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    engine.browse_page(&corp, BASE, 0, None).await?;
    let page = engine
        .browse_page(&corp, BASE, 1, Some("(objectClass=organizationalUnit)"))
        .await?;

    assert_eq!(names(&page), ["ou-003", "ou-004", "ou-005"]);
    assert_eq!(directory.searches(), 3, "cursor from another filter is not reused");
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_stale_cookie_replays() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    engine.browse_page(&corp, BASE, 0, None).await?;
    directory.reject_next_cookie();
    let page = engine.browse_page(&corp, BASE, 1, None).await?;

    assert_eq!(names(&page), ["ou-003", "ou-004", "ou-005"]);
    // page 0, the rejected continuation, then a two-page replay
    assert_eq!(directory.searches(), 4);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_connection_fault_rebuilds_and_replays() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    engine.browse_page(&corp, BASE, 0, None).await?;
    directory.fail_next_operations(&[dirbrowse_core::ResultCode::ServerDown]);
    let page = engine.browse_page(&corp, BASE, 1, None).await?;

    assert_eq!(names(&page), ["ou-003", "ou-004", "ou-005"]);
    assert_eq!(directory.connects(), 2);
    assert_eq!(directory.searches(), 4);
    Ok(())
}

#[tokio::test]
async fn test_engine_browse_clear_cursor() -> Result<()> {
    let directory = FakeDirectory::new();
    directory.populate(BASE, 7);
    directory.populate("ou=ou-000,dc=example,dc=com", 4);
    let engine = paged_engine(&directory, 3);
    let corp = server("corp");

    engine.browse_page(&corp, BASE, 0, None).await?;
    engine.browse_page(&corp, "ou=ou-000,dc=example,dc=com", 0, None).await?;
    assert_eq!(engine.cursor_count(), 2);

    engine.clear_cursor_for("corp", BASE);
    assert_eq!(engine.cursor_count(), 1);

    engine.clear_cursor("corp");
    assert_eq!(engine.cursor_count(), 0);

    let before = directory.searches();
    let page = engine.browse_page(&corp, BASE, 1, None).await?;
    assert_eq!(names(&page), ["ou-003", "ou-004", "ou-005"]);
    assert_eq!(directory.searches() - before, 2);
    Ok(())
}
