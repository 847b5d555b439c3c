//! Measure sizing and the voice-group synchronizer.
//!
//! All voices of a section share one list of measure widths (the widest
//! voice at each index wins) and one set of line breaks, so their measures
//! stay vertically aligned.

use std::ops::Range;

use super::config::LayoutConfig;
use crate::ticks::Ticks;

/// Ideal width of a measure: proportional to its duration in beats, never
/// below the configured minimum.
pub fn measure_ideal_width(ticks: Ticks, ticks_per_beat: Ticks, config: &LayoutConfig) -> f64 {
    let beats = ticks as f64 / ticks_per_beat.max(1) as f64;
    (beats * config.px_per_beat).max(config.min_measure_width)
}

/// Per-index maximum over all voices. Voices may have different lengths;
/// missing measures count as zero.
pub fn synchronize(voices: &[Vec<f64>]) -> Vec<f64> {
    let len = voices.iter().map(Vec::len).max().unwrap_or(0);
    (0..len)
        .map(|i| voices.iter().filter_map(|v| v.get(i)).copied().fold(0.0, f64::max))
        .collect()
}

/// Greedy line packing. An index joins the current line while the line,
/// compressed to `min_scale`, still fits `available`. A line always takes
/// at least one index, so a single oversize measure gets a line of its own.
pub fn pack_lines(widths: &[f64], available: f64, min_scale: f64) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut sum = 0.0;

    for (i, &w) in widths.iter().enumerate() {
        if i > start && (sum + w) * min_scale > available {
            lines.push(start..i);
            start = i;
            sum = 0.0;
        }
        sum += w;
    }
    if start < widths.len() {
        lines.push(start..widths.len());
    }
    lines
}

/// Scale applied to the measures of a line. Lines other than the last are
/// stretched or compressed to fill exactly; the last line is only
/// compressed when it overflows.
pub fn line_scale(total: f64, available: f64, last: bool) -> f64 {
    if total <= 0.0 || (last && total <= available) {
        1.0
    } else {
        available / total
    }
}

/// One system: the measure indices it holds and their final widths.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemPlan {
    pub measures: Range<usize>,
    pub widths: Vec<f64>,
}

impl SystemPlan {
    pub fn width(&self) -> f64 {
        self.widths.iter().sum()
    }
}

/// Break a section into systems. `available` is `None` when the page has
/// no width; everything then goes on one line at ideal widths.
pub fn plan_systems(voices: &[Vec<f64>], available: Option<f64>, min_scale: f64) -> Vec<SystemPlan> {
    let widths = synchronize(voices);
    if widths.is_empty() {
        return Vec::new();
    }
    let Some(available) = available else {
        return vec![SystemPlan { measures: 0..widths.len(), widths }];
    };

    let lines = pack_lines(&widths, available, min_scale);
    let count = lines.len();
    lines
        .into_iter()
        .enumerate()
        .map(|(i, range)| {
            let ideal = &widths[range.clone()];
            let scale = line_scale(ideal.iter().sum(), available, i + 1 == count);
            log::debug!("system {i}: measures {range:?} scale {scale:.3}");
            SystemPlan { widths: ideal.iter().map(|w| w * scale).collect(), measures: range }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voices_share_widths_and_breaks() {
        let voices = vec![vec![100.0, 100.0, 100.0, 100.0], vec![80.0, 80.0, 200.0, 80.0]];
        assert_eq!(synchronize(&voices), vec![100.0, 100.0, 200.0, 100.0]);
        let systems = plan_systems(&voices, Some(250.0), 0.8);
        let ranges: Vec<_> = systems.iter().map(|s| s.measures.clone()).collect();
        assert_eq!(ranges, vec![0..2, 2..4]);
    }

    #[test]
    fn oversize_measure_stands_alone() {
        assert_eq!(pack_lines(&[50.0, 400.0, 50.0], 100.0, 1.0), vec![0..1, 1..2, 2..3]);
    }

    #[test]
    fn stretch_all_but_the_last_line() {
        let systems = plan_systems(&[vec![60.0, 60.0, 60.0]], Some(130.0), 1.0);
        assert_eq!(systems.len(), 2);
        assert!((systems[0].width() - 130.0).abs() < 1e-9);
        assert_eq!(systems[1].widths, vec![60.0]);
    }

    #[test]
    fn compressed_last_line_fits() {
        let systems = plan_systems(&[vec![100.0, 100.0]], Some(190.0), 0.8);
        assert_eq!(systems.len(), 1);
        assert!((systems[0].width() - 190.0).abs() < 1e-9);
    }

    #[test]
    fn no_width_means_one_line() {
        let systems = plan_systems(&[vec![100.0; 12]], None, 0.8);
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].width(), 1200.0);
    }

    #[test]
    fn ideal_width_has_a_floor() {
        let config = LayoutConfig { px_per_beat: 25.0, min_measure_width: 80.0, ..LayoutConfig::default() };
        assert_eq!(measure_ideal_width(48, 12, &config), 100.0);
        assert_eq!(measure_ideal_width(24, 12, &config), 80.0);
    }
}
