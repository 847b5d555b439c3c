//! Lyric lines: extraction from a voice's text, syllable segmentation and
//! mapping of syllables onto measures.

use std::collections::BTreeMap;

use super::measure::{split_bars, starts_with_barline};
use crate::model::LyricAlignment;

/// One `w:`/`W:` line (or one bracketed verse of it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricLine {
    pub verse: u32,
    /// Index of the first measure of the music line this lyric follows
    pub start_measure: usize,
    pub text: String,
    /// 1-based source line within the voice text
    pub line: usize,
}

/// Lyric material for one note slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LyricUnit {
    /// Empty for skips
    pub syllables: Vec<String>,
    pub alignment: LyricAlignment,
    /// Followed by `_`
    pub held: bool,
}

/// The units one verse contributes to one measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerseLyrics {
    pub verse: u32,
    pub units: Vec<LyricUnit>,
}

/// Lyrics keyed by measure index.
pub type MeasureLyrics = BTreeMap<usize, Vec<VerseLyrics>>;

fn lyric_prefix(line: &str) -> Option<(bool, &str)> {
    if let Some(rest) = line.strip_prefix("w:") {
        Some((false, rest))
    } else {
        line.strip_prefix("W:").map(|rest| (true, rest))
    }
}

/// Whether a trimmed line carries music (not lyric, comment, field or blank).
pub(crate) fn is_music_line(line: &str) -> bool {
    let line = line.trim();
    !line.is_empty()
        && !line.starts_with('%')
        && lyric_prefix(line).is_none()
        && super::header::split_field(line).is_none()
}

/// Pull lyric lines out of a voice's text.
///
/// `w:` sets the verse to 1 and `W:` increments it; a line made of
/// `[n.text]` blocks yields one lyric line per block with verse `n`. The
/// starting measure is estimated by counting the measures of the music lines
/// preceding the music line the lyric follows.
pub fn extract_lyric_lines(voice_text: &str) -> Vec<LyricLine> {
    let mut lines = Vec::new();
    let mut measures_before = 0usize;
    let mut current_start = 0usize;
    let mut open_measure = false;
    let mut verse = 0u32;

    for (idx, raw) in voice_text.lines().enumerate() {
        let line = raw.trim();
        if let Some((upper, text)) = lyric_prefix(line) {
            verse = if upper { verse + 1 } else { 1 };
            let blocks = verse_blocks(text);
            if blocks.is_empty() {
                lines.push(LyricLine {
                    verse,
                    start_measure: current_start,
                    text: text.trim().to_string(),
                    line: idx + 1,
                });
            } else {
                for (number, block) in blocks {
                    lines.push(LyricLine {
                        verse: number,
                        start_measure: current_start,
                        text: block,
                        line: idx + 1,
                    });
                }
            }
            continue;
        }
        if super::header::split_field(line).is_some() {
            // a body field closes the measure left open by the previous line
            open_measure = false;
            continue;
        }
        if !is_music_line(line) {
            continue;
        }

        let music = super::header::strip_comment(line);
        let segments = split_bars(music);
        let continued = open_measure && !segments.is_empty() && !starts_with_barline(music);
        current_start = if continued { measures_before - 1 } else { measures_before };
        measures_before += segments.len() - usize::from(continued);
        open_measure = segments.last().is_some_and(|s| !s.closed);
    }

    lines
}

/// `[1.text][2.text]` → [(1, "text"), (2, "text")]; empty if the line is
/// not in block form.
fn verse_blocks(text: &str) -> Vec<(u32, String)> {
    let mut blocks = Vec::new();
    let mut rest = text.trim();
    while let Some(inner) = rest.strip_prefix('[') {
        let Some(close) = inner.find(']') else {
            return Vec::new();
        };
        let body = &inner[..close];
        let Some((number, content)) = body.split_once('.') else {
            return Vec::new();
        };
        let Ok(number) = number.trim().parse::<u32>() else {
            return Vec::new();
        };
        blocks.push((number, content.trim().to_string()));
        rest = inner[close + 1..].trim_start();
    }
    if !rest.is_empty() {
        return Vec::new();
    }
    blocks
}

/// Segment one measure's lyric text into note-slot units.
pub fn segment(text: &str) -> Vec<LyricUnit> {
    let mut units: Vec<LyricUnit> = Vec::new();

    for raw in text.split_whitespace() {
        if raw.chars().all(|c| c == '_') {
            if let Some(last) = units.last_mut() {
                last.held = true;
            }
            continue;
        }
        let held = raw.len() > 1 && raw.ends_with('_');
        let token = raw.trim_end_matches('_');

        let unit = if token == "*" {
            LyricUnit { syllables: Vec::new(), alignment: LyricAlignment::Skip, held }
        } else if let Some(word) = token.strip_prefix("\\-") {
            LyricUnit {
                syllables: vec![word.replace('-', "")],
                alignment: LyricAlignment::MultiSyllable,
                held,
            }
        } else if token.contains('~') {
            LyricUnit {
                syllables: vec![token.split('~').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")],
                alignment: LyricAlignment::MultiWord,
                held,
            }
        } else if token.contains('-') {
            let syllables: Vec<String> = token.split('-').filter(|s| !s.is_empty()).map(String::from).collect();
            if syllables.is_empty() {
                continue;
            }
            LyricUnit { syllables, alignment: LyricAlignment::SyllableSplit, held }
        } else {
            LyricUnit { syllables: vec![token.to_string()], alignment: LyricAlignment::Normal, held }
        };
        units.push(unit);
    }

    units
}

/// Map lyric lines onto measures. Sections of a line are separated by `|`;
/// section `i` belongs to measure `start_measure + i`. Sections past the
/// last measure are returned as the second value (dropped count).
pub fn parse_lyrics(lines: &[LyricLine], measure_count: usize) -> (MeasureLyrics, usize) {
    let mut map = MeasureLyrics::new();
    let mut dropped = 0;

    for line in lines {
        for (offset, section) in line.text.split('|').enumerate() {
            let units = segment(section);
            if units.is_empty() {
                continue;
            }
            let index = line.start_measure + offset;
            if index >= measure_count {
                dropped += 1;
                continue;
            }
            let verses = map.entry(index).or_default();
            match verses.iter_mut().find(|v| v.verse == line.verse) {
                Some(existing) => existing.units.extend(units),
                None => verses.push(VerseLyrics { verse: line.verse, units }),
            }
        }
    }

    (map, dropped)
}
