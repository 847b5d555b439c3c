//! Layout and score configuration (all lengths in user units, the same units
//! the layout tree reports).
//!
//! Both structs deserialize from partial JSON: missing fields keep their
//! defaults.

use serde::{Deserialize, Serialize};

use super::tree::Spacing;

// ── Defaults ────────────────────────────────────────────────────────
const DEFAULT_PAGE_WIDTH: f64 = 820.0;
const PAGE_MARGIN_LEFT: f64 = 50.0;
const PAGE_MARGIN_RIGHT: f64 = 30.0;
const PAGE_MARGIN_TOP: f64 = 30.0;
const PAGE_MARGIN_BOTTOM: f64 = 30.0;

const STAFF_HEIGHT: f64 = 40.0;
const SYSTEM_SPACING: f64 = 50.0;
const LINE_SPACING: f64 = 20.0;
const BLOCK_SPACING: f64 = 30.0;

const PER_BEAT_WIDTH: f64 = 55.0;
const MIN_MEASURE_WIDTH: f64 = 38.0;
const MIN_MEASURE_SCALE: f64 = 0.8;

const TITLE_FONT_SIZE: f64 = 22.0;
const SUBTITLE_FONT_SIZE: f64 = 15.0;
const CONTRIBUTOR_FONT_SIZE: f64 = 12.0;
const HEADING_FONT_SIZE: f64 = 14.0;
const LYRICS_FONT_SIZE: f64 = 13.0;
const LYRICS_LINE_HEIGHT: f64 = 16.0;

/// Styling of one text line (title, subtitle, contributors, headings).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    /// Hidden lines produce no layout node
    pub visible: bool,
    pub font_size: f64,
    pub margin: Spacing,
}

impl TextStyle {
    fn sized(font_size: f64, below: f64) -> Self {
        Self { visible: true, font_size, margin: Spacing { bottom: below, ..Spacing::default() } }
    }

    /// Line height for this style.
    pub fn line_height(&self) -> f64 {
        (self.font_size * 1.3).ceil()
    }
}

impl Default for TextStyle {
    fn default() -> Self {
        Self::sized(12.0, 4.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    /// Fixed page width; 0 means "use the container width"
    pub width: f64,
    /// Page height for pagination; 0 means a single endless page
    pub height: f64,
    pub padding: Spacing,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_PAGE_WIDTH,
            height: 0.0,
            padding: Spacing {
                top: PAGE_MARGIN_TOP,
                right: PAGE_MARGIN_RIGHT,
                bottom: PAGE_MARGIN_BOTTOM,
                left: PAGE_MARGIN_LEFT,
            },
        }
    }
}

/// Page geometry, spacing and measure sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub page: PageConfig,
    /// Space below each block (title block, section block)
    pub block_spacing: f64,
    /// Space between the voice lines of one system
    pub line_spacing: f64,
    /// Space below the last voice line of a system
    pub system_spacing: f64,
    /// Horizontal space per beat of a measure's duration
    pub px_per_beat: f64,
    pub min_measure_width: f64,
    /// How far a line may be compressed before a measure moves down
    pub min_measure_scale: f64,
    pub title: TextStyle,
    pub subtitle: TextStyle,
    pub contributors: TextStyle,
    pub section_heading: TextStyle,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            page: PageConfig::default(),
            block_spacing: BLOCK_SPACING,
            line_spacing: LINE_SPACING,
            system_spacing: SYSTEM_SPACING,
            px_per_beat: PER_BEAT_WIDTH,
            min_measure_width: MIN_MEASURE_WIDTH,
            min_measure_scale: MIN_MEASURE_SCALE,
            title: TextStyle::sized(TITLE_FONT_SIZE, 6.0),
            subtitle: TextStyle::sized(SUBTITLE_FONT_SIZE, 4.0),
            contributors: TextStyle::sized(CONTRIBUTOR_FONT_SIZE, 4.0),
            section_heading: TextStyle::sized(HEADING_FONT_SIZE, 6.0),
        }
    }
}

/// Size of one kind of musical element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementStyle {
    pub height: f64,
    /// Horizontal space kept free on both sides inside the element's slot
    pub padding: f64,
}

impl Default for ElementStyle {
    fn default() -> Self {
        Self { height: STAFF_HEIGHT, padding: 2.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LyricStyle {
    pub visible: bool,
    pub font_size: f64,
    pub line_height: f64,
}

impl Default for LyricStyle {
    fn default() -> Self {
        Self { visible: true, font_size: LYRICS_FONT_SIZE, line_height: LYRICS_LINE_HEIGHT }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChordStyle {
    pub visible: bool,
    pub font_size: f64,
    /// Space reserved above the staff when a system shows chord symbols
    pub height: f64,
}

impl Default for ChordStyle {
    fn default() -> Self {
        Self { visible: true, font_size: 12.0, height: 18.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeasureNumbers {
    None,
    /// First measure of every line
    LineStart,
    Every,
}

/// How musical content is drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreConfig {
    pub note: ElementStyle,
    pub rest: ElementStyle,
    pub lyric: LyricStyle,
    pub chord: ChordStyle,
    pub tie: ElementStyle,
    pub measure_numbers: MeasureNumbers,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            note: ElementStyle::default(),
            rest: ElementStyle::default(),
            lyric: LyricStyle::default(),
            chord: ChordStyle::default(),
            tie: ElementStyle { height: STAFF_HEIGHT, padding: 0.0 },
            measure_numbers: MeasureNumbers::LineStart,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: LayoutConfig = serde_json::from_str(r#"{"page": {"width": 600}, "px_per_beat": 30}"#).unwrap();
        assert_eq!(config.page.width, 600.0);
        assert_eq!(config.page.padding.left, PAGE_MARGIN_LEFT);
        assert_eq!(config.px_per_beat, 30.0);
        assert_eq!(config.min_measure_scale, MIN_MEASURE_SCALE);
    }

    #[test]
    fn measure_number_modes_from_json() {
        let config: ScoreConfig = serde_json::from_str(r#"{"measure_numbers": "every"}"#).unwrap();
        assert_eq!(config.measure_numbers, MeasureNumbers::Every);
        let config: ScoreConfig = serde_json::from_str(r#"{"measure_numbers": "line-start"}"#).unwrap();
        assert_eq!(config.measure_numbers, MeasureNumbers::LineStart);
        assert!(config.lyric.visible);
    }
}
