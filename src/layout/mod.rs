//! Layout computation — places measures on lines and lines on pages.
//!
//! The layout is a pure function of the score and the resolved line
//! geometry: the same inputs always produce the same plan, which every
//! output format then draws from.

pub mod constants;
pub mod optimizer;

use serde::{Deserialize, Serialize};

use crate::model::Score;
use crate::options::RenderOptions;
pub use optimizer::{resolve, suggest, LayoutSuggestion};

// ═══════════════════════════════════════════════════════════════════════
// Layout structures
// ═══════════════════════════════════════════════════════════════════════

/// Position of one measure's notation stave on a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StavePlacement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub measure_index: u32,
    /// Set only on the very first measure: draw clef and time signature.
    pub header: bool,
}

/// Position of one measure's tablature stave. Same shape as a stave
/// placement; kept as its own type so the two cannot be mixed up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabPlacement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub measure_index: u32,
    pub header: bool,
}

/// One page of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based page number
    pub number: u32,
    pub staves: Vec<StavePlacement>,
    pub tabs: Vec<TabPlacement>,
}

impl Page {
    fn new(number: u32) -> Self {
        Self { number, staves: Vec::new(), tabs: Vec::new() }
    }

    fn is_empty(&self) -> bool {
        self.staves.is_empty() && self.tabs.is_empty()
    }

    /// Measure indices on this page, in order.
    pub fn measure_indices(&self) -> Vec<u32> {
        if !self.staves.is_empty() {
            self.staves.iter().map(|s| s.measure_index).collect()
        } else {
            self.tabs.iter().map(|t| t.measure_index).collect()
        }
    }
}

/// Full paginated layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub pages: Vec<Page>,
    pub measures_per_line: u32,
    pub stave_width: u32,
    pub stave_spacing: u32,
    pub page_width: u32,
    pub page_height: u32,
}

impl LayoutPlan {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Total placed measures (each measure counted once).
    pub fn measure_count(&self) -> usize {
        self.pages.iter().map(|p| p.measure_indices().len()).sum()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Main layout computation
// ═══════════════════════════════════════════════════════════════════════

/// Lay out a score with already resolved line geometry.
///
/// Measures fill a line left to right until `measures_per_line` is
/// reached; the next measure starts a new line `stave_spacing` lower. A
/// new line that would start below `page_height - 2 * stave_spacing`
/// starts a new page instead.
pub fn layout(score: &Score, options: &RenderOptions, geometry: LayoutSuggestion) -> LayoutPlan {
    let LayoutSuggestion { measures_per_line, stave_width, stave_spacing } = geometry;
    let margin = options.margin;
    let page_limit = options.page_height as i64 - 2 * stave_spacing as i64;
    let tab_dy = if options.notation_enabled { options.tab_offset } else { 0 };

    let mut pages: Vec<Page> = Vec::new();
    let mut page = Page::new(1);
    let mut x = margin;
    let mut y = margin;
    let mut on_line = 0u32;

    for (position, measure) in score.measures.iter().enumerate() {
        if on_line == measures_per_line && on_line > 0 {
            x = margin;
            y += stave_spacing;
            on_line = 0;
            if y as i64 > page_limit {
                let number = page.number + 1;
                pages.push(std::mem::replace(&mut page, Page::new(number)));
                y = margin;
            }
        }

        let header = position == 0;
        if options.notation_enabled {
            page.staves.push(StavePlacement {
                x,
                y,
                width: stave_width,
                measure_index: measure.index,
                header,
            });
        }
        if options.tab_enabled {
            page.tabs.push(TabPlacement {
                x,
                y: y + tab_dy,
                width: stave_width,
                measure_index: measure.index,
                header,
            });
        }

        x += stave_width;
        on_line += 1;
    }

    if !page.is_empty() {
        pages.push(page);
    }

    LayoutPlan {
        pages,
        measures_per_line,
        stave_width,
        stave_spacing,
        page_width: options.page_width,
        page_height: options.page_height,
    }
}

/// Resolve line geometry (optimizer unless pinned) and lay out the score.
pub fn plan(score: &Score, options: &RenderOptions) -> LayoutPlan {
    layout(score, options, resolve(score, options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Measure;

    fn empty_measures(n: u32) -> Score {
        Score::new((0..n).map(|index| Measure { index, notes: vec![] }).collect())
    }

    fn geometry(measures_per_line: u32) -> LayoutSuggestion {
        LayoutSuggestion { measures_per_line, stave_width: 250, stave_spacing: 200 }
    }

    #[test]
    fn first_line_starts_at_margin() {
        let plan = layout(&empty_measures(3), &RenderOptions::default(), geometry(4));
        assert_eq!(plan.page_count(), 1);
        let staves = &plan.pages[0].staves;
        assert_eq!((staves[0].x, staves[0].y), (50, 50));
        assert_eq!((staves[1].x, staves[1].y), (300, 50));
        assert_eq!((staves[2].x, staves[2].y), (550, 50));
    }

    #[test]
    fn wraps_after_measures_per_line() {
        let plan = layout(&empty_measures(5), &RenderOptions::default(), geometry(2));
        let ys: Vec<u32> = plan.pages[0].staves.iter().map(|s| s.y).collect();
        assert_eq!(ys, vec![50, 50, 250, 250, 450]);
        assert_eq!(plan.pages[0].staves[2].x, 50);
    }

    #[test]
    fn tab_sits_below_notation() {
        let plan = layout(&empty_measures(1), &RenderOptions::default(), geometry(4));
        assert_eq!(plan.pages[0].tabs[0].y, plan.pages[0].staves[0].y + 100);
    }

    #[test]
    fn tab_only_takes_notation_row() {
        let mut options = RenderOptions::default();
        options.notation_enabled = false;
        let plan = layout(&empty_measures(1), &options, geometry(4));
        assert!(plan.pages[0].staves.is_empty());
        assert_eq!(plan.pages[0].tabs[0].y, 50);
    }

    #[test]
    fn header_only_on_first_measure() {
        let plan = layout(&empty_measures(20), &RenderOptions::default(), geometry(2));
        let headers: Vec<u32> = plan
            .pages
            .iter()
            .flat_map(|p| p.staves.iter().filter(|s| s.header).map(|s| s.measure_index))
            .collect();
        assert_eq!(headers, vec![0]);
        let tab_headers = plan.pages.iter().flat_map(|p| &p.tabs).filter(|t| t.header).count();
        assert_eq!(tab_headers, 1);
    }

    #[test]
    fn page_break_when_line_passes_limit() {
        // Limit is 1600 - 400 = 1200: lines at 50, 250, ..., 1050 fit (6 lines),
        // the 7th at 1250 moves to a new page.
        let plan = layout(&empty_measures(14), &RenderOptions::default(), geometry(2));
        assert_eq!(plan.page_count(), 2);
        assert_eq!(plan.pages[0].staves.len(), 12);
        assert_eq!(plan.pages[1].staves[0].y, 50);
        assert_eq!(plan.pages[1].staves[0].measure_index, 12);
        assert_eq!(plan.pages[1].number, 2);
    }

    #[test]
    fn empty_score_has_no_pages() {
        let plan = layout(&Score::default(), &RenderOptions::default(), geometry(4));
        assert!(plan.is_empty());
    }
}
