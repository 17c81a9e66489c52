//! Layout tests — optimizer suggestions and paginated placement through
//! the public request path.

mod common;

use pretty_assertions::assert_eq;
use serde_json::json;
use tabscore::layout::{plan, resolve, suggest};
use tabscore::request::validate;

#[test]
fn sixteen_measures_of_four_notes_without_tab() {
    let raw = common::request(16, 4, json!({ "tabEnabled": false }));
    let (score, options) = validate(&raw).unwrap();
    let suggestion = suggest(&score, &options);
    assert_eq!(suggestion.measures_per_line, 4);
    assert_eq!(suggestion.stave_spacing, 150);

    let plan = plan(&score, &options);
    assert_eq!(plan.page_count(), 1);
    assert!(plan.pages[0].tabs.is_empty());
    let first_line: Vec<u32> = plan.pages[0].staves.iter().take(5).map(|s| s.y).collect();
    assert_eq!(first_line, vec![50, 50, 50, 50, 200]);
}

#[test]
fn layout_is_deterministic() {
    let raw = common::request(40, 6, json!({}));
    let (score, options) = validate(&raw).unwrap();
    assert_eq!(plan(&score, &options), plan(&score, &options));
}

#[test]
fn suggestion_stays_in_bounds_for_any_density() {
    for notes in 0..=40 {
        let raw = common::request(8, notes, json!({}));
        let (score, options) = validate(&raw).unwrap();
        let m = suggest(&score, &options).measures_per_line;
        assert!((2..=6).contains(&m), "{notes} notes per measure gave {m}");
    }
}

#[test]
fn both_pinned_skip_the_optimizer() {
    let raw = common::request(16, 4, json!({ "measuresPerLine": 7, "staveWidth": 150 }));
    let (score, options) = validate(&raw).unwrap();
    let geometry = resolve(&score, &options);
    assert_eq!((geometry.measures_per_line, geometry.stave_width), (7, 150));
    let plan = plan(&score, &options);
    assert_eq!(plan.pages[0].staves[6].x, 50 + 6 * 150);
    assert_eq!(plan.pages[0].staves[7].x, 50);
}

#[test]
fn single_pinned_value_overrides_only_itself() {
    let raw = common::request(16, 4, json!({ "staveWidth": 300 }));
    let (score, options) = validate(&raw).unwrap();
    let geometry = resolve(&score, &options);
    assert_eq!(geometry.stave_width, 300);
    assert_eq!(geometry.measures_per_line, 4);

    let raw = common::request(16, 4, json!({ "measuresPerLine": 5 }));
    let (score, options) = validate(&raw).unwrap();
    let geometry = resolve(&score, &options);
    assert_eq!(geometry.measures_per_line, 5);
    assert_eq!(geometry.stave_width, 1100 / 5);
}

#[test]
fn long_scores_paginate_with_every_measure_once() {
    let raw = common::request(120, 4, json!({}));
    let (score, options) = validate(&raw).unwrap();
    let plan = plan(&score, &options);
    assert!(plan.page_count() > 1);

    let indices: Vec<u32> = plan.pages.iter().flat_map(|p| p.measure_indices()).collect();
    assert_eq!(indices, (0..120).collect::<Vec<u32>>());
    for (i, page) in plan.pages.iter().enumerate() {
        assert_eq!(page.number, i as u32 + 1);
        assert_eq!(page.staves[0].y, 50, "page {} starts at the margin", page.number);
        let limit = 1600 - 2 * plan.stave_spacing;
        assert!(page.staves.iter().all(|s| s.y <= limit));
    }
}

#[test]
fn tab_offset_is_configurable() {
    let raw = common::request(2, 4, json!({ "tabOffset": 140 }));
    let (score, options) = validate(&raw).unwrap();
    let plan = plan(&score, &options);
    let page = &plan.pages[0];
    assert_eq!(page.tabs[0].y, page.staves[0].y + 140);
    assert_eq!(page.tabs[1].x, page.staves[1].x);
}
