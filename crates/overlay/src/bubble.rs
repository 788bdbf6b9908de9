//! Detail-bubble placement around a pin.

use serde::Serialize;
use slidepin_core::anchor::Point;

/// Side of the pin the bubble opens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BubblePlacement {
    Right,
    Left,
    Top,
    Bottom,
}

impl BubblePlacement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Right => "right",
            Self::Left => "left",
            Self::Top => "top",
            Self::Bottom => "bottom",
        }
    }
}

/// Keep the bubble away from the nearest slide edge: pins in the right 30%
/// open left, then top 30% open below, bottom 30% open above.
pub fn bubble_placement(point: Point) -> BubblePlacement {
    if point.x > 0.7 {
        BubblePlacement::Left
    } else if point.y < 0.3 {
        BubblePlacement::Bottom
    } else if point.y > 0.7 {
        BubblePlacement::Top
    } else {
        BubblePlacement::Right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f64, y: f64) -> BubblePlacement {
        bubble_placement(Point { x, y })
    }

    #[test]
    fn right_edge_wins_over_vertical() {
        assert_eq!(at(0.8, 0.9), BubblePlacement::Left);
        assert_eq!(at(0.71, 0.1), BubblePlacement::Left);
    }

    #[test]
    fn vertical_bands() {
        assert_eq!(at(0.2, 0.1), BubblePlacement::Bottom);
        assert_eq!(at(0.2, 0.9), BubblePlacement::Top);
        assert_eq!(at(0.5, 0.5), BubblePlacement::Right);
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(at(0.7, 0.3), BubblePlacement::Right);
        assert_eq!(at(0.7, 0.7), BubblePlacement::Right);
    }
}
