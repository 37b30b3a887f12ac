//! Tile rectangles for the window layouts.

use std::ops::Range;

use serde::{Deserialize, Serialize};

/// Tile origins and extents are kept on even pixels.
const TILE_ALIGN: u32 = 2;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layout {
    One,
    Four,
    Six,
    Eight,
    Nine,
    Sixteen,
}

impl Layout {
    pub const ALL: [Layout; 6] = [
        Layout::One,
        Layout::Four,
        Layout::Six,
        Layout::Eight,
        Layout::Nine,
        Layout::Sixteen,
    ];

    /// Layouts are identified by their visible window count.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.id() == id)
    }

    pub fn id(&self) -> u32 {
        self.window_count() as u32
    }

    pub fn window_count(&self) -> usize {
        match self {
            Layout::One => 1,
            Layout::Four => 4,
            Layout::Six => 6,
            Layout::Eight => 8,
            Layout::Nine => 9,
            Layout::Sixteen => 16,
        }
    }

    /// `(grid, cells)` where each cell is `(column, row, span)`.
    fn cells(&self) -> (u32, Vec<(u32, u32, u32)>) {
        match self {
            Layout::One => (1, vec![(0, 0, 1)]),
            Layout::Four => (2, uniform(2)),
            Layout::Nine => (3, uniform(3)),
            Layout::Sixteen => (4, uniform(4)),
            Layout::Six => (
                3,
                vec![
                    (0, 0, 2),
                    (2, 0, 1),
                    (2, 1, 1),
                    (0, 2, 1),
                    (1, 2, 1),
                    (2, 2, 1),
                ],
            ),
            Layout::Eight => (
                4,
                vec![
                    (0, 0, 3),
                    (3, 0, 1),
                    (3, 1, 1),
                    (3, 2, 1),
                    (0, 3, 1),
                    (1, 3, 1),
                    (2, 3, 1),
                    (3, 3, 1),
                ],
            ),
        }
    }
}

fn uniform(n: u32) -> Vec<(u32, u32, u32)> {
    (0..n * n).map(|i| (i % n, i / n, 1)).collect()
}

fn align_down(v: u32, align: u32) -> u32 {
    v / align * align
}

/// Start and length of cell `index..index + span` on an axis of `len` pixels
/// cut into `grid` parts. The last cell absorbs the rounding remainder.
fn span(len: u32, grid: u32, index: u32, span: u32) -> (u32, u32) {
    let start = align_down((len as u64 * index as u64 / grid as u64) as u32, TILE_ALIGN);
    let end = if index + span >= grid {
        len
    } else {
        align_down(
            (len as u64 * (index + span) as u64 / grid as u64) as u32,
            TILE_ALIGN,
        )
    };
    (start, end - start)
}

/// Rectangles of every visible window of `layout`, in window order.
pub fn layout_rects(layout: Layout, screen_width: u32, screen_height: u32) -> Vec<Rect> {
    let (grid, cells) = layout.cells();
    cells
        .into_iter()
        .map(|(col, row, n)| {
            let (x, width) = span(screen_width, grid, col, n);
            let (y, height) = span(screen_height, grid, row, n);
            Rect::new(x, y, width, height)
        })
        .collect()
}

/// Windows on the page that contains `selected` when pages hold
/// `layout.window_count()` windows each.
pub fn page_range(layout: Layout, selected: usize, total: usize) -> Range<usize> {
    let per_page = layout.window_count();
    let start = selected / per_page * per_page;
    start.min(total)..(start + per_page).min(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_window_covers_screen() {
        let rects = layout_rects(Layout::One, 1920, 1080);
        assert_eq!(rects, vec![Rect::new(0, 0, 1920, 1080)]);
    }

    #[test]
    fn every_layout_tiles_the_screen() {
        for layout in Layout::ALL {
            let rects = layout_rects(layout, 1920, 1080);
            assert_eq!(rects.len(), layout.window_count(), "{:?}", layout);
            let total: u64 = rects.iter().map(|r| r.area()).sum();
            assert_eq!(total, 1920 * 1080, "{:?}", layout);
            for r in &rects {
                assert_eq!(r.x % 2, 0);
                assert_eq!(r.y % 2, 0);
                assert!(r.x + r.width <= 1920 && r.y + r.height <= 1080);
            }
        }
    }

    #[test]
    fn nine_split_absorbs_remainder_in_last_column() {
        let rects = layout_rects(Layout::Nine, 1280, 720);
        assert_eq!(rects[0], Rect::new(0, 0, 426, 240));
        assert_eq!(rects[1], Rect::new(426, 0, 426, 240));
        assert_eq!(rects[2], Rect::new(852, 0, 428, 240));
    }

    #[test]
    fn six_has_one_large_tile() {
        let rects = layout_rects(Layout::Six, 1920, 1080);
        assert_eq!(rects[0], Rect::new(0, 0, 1280, 720));
        assert_eq!(rects[5], Rect::new(1280, 720, 640, 360));
    }

    #[test]
    fn layout_ids_round_trip() {
        assert_eq!(Layout::from_id(9), Some(Layout::Nine));
        assert_eq!(Layout::from_id(5), None);
    }

    #[test]
    fn page_of_selected_window() {
        assert_eq!(page_range(Layout::Four, 5, 16), 4..8);
        assert_eq!(page_range(Layout::Nine, 10, 16), 9..16);
        assert_eq!(page_range(Layout::One, 0, 16), 0..1);
    }
}
