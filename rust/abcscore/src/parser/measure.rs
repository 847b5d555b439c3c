//! Measure parser: barline splitting, inline overrides, element assembly,
//! lyric attachment and duration validation for one measure.

use super::element::{parse_element_with, Element};
use super::header::{parse_key, parse_note_length, parse_tempo, parse_time_signature};
use super::lyrics::VerseLyrics;
use super::tokenizer::{is_inline_field, tokenize};
use super::ParseContext;
use crate::error::{ParseError, ParseWarning};
use crate::model::{
    BarlineStyle, ChordMeta, KeySignature, LyricMeta, MeasureMeta, NodeId, NodeKind, NoteMeta, Props, RestMeta,
    TickSpan, TimeSignature, TupletMeta,
};
use crate::ticks::{default_note_length, validate_measure_duration, NoteValue, Ticks, TimeUnit};

/// Meter assumed when no `M:` is in effect.
const DEFAULT_METER: TimeSignature = TimeSignature { numerator: 4, denominator: 4 };

/// Tokens that carry no timing and are dropped quietly (slurs, line
/// continuation, beam-break backquote).
const IGNORED_SYMBOLS: &[&str] = &["(", ")", "\\", "`"];

// ═══════════════════════════════════════════════════════════════════════
// Barline splitting
// ═══════════════════════════════════════════════════════════════════════

/// Measure text between two barlines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarSegment {
    /// Measure text, including any `:` repeat dots next to the barlines
    pub text: String,
    /// Byte offset of the segment start in the split text
    pub start: usize,
    /// Whether a barline ends this segment
    pub closed: bool,
    /// Style of the closing barline
    pub barline: BarlineStyle,
}

/// Split music text at barlines (`|`, `||`, `|]`, `[|`, `::`). Segments with
/// no content besides repeat dots are merged into their neighbours.
pub fn split_bars(text: &str) -> Vec<BarSegment> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut start = 0usize;
    let mut i = 0;

    let mut close = |current: &mut String, start: &mut usize, next: usize, closed: bool, style: BarlineStyle| {
        let text = std::mem::take(current);
        let content = text.trim();
        if !content.trim_matches(':').trim().is_empty() {
            segments.push(BarSegment { text: content.to_string(), start: *start, closed, barline: style });
        } else if content.contains(':') {
            // a bare `:` between barlines belongs to the previous measure
            if let Some(prev) = segments.last_mut() {
                if !prev.text.ends_with(':') {
                    prev.text.push(':');
                }
            }
        }
        *start = next;
    };

    while i < chars.len() {
        let (offset, c) = chars[i];
        match c {
            '"' => {
                let end = chars[i + 1..].iter().position(|&(_, d)| d == '"').map_or(chars.len(), |p| i + p + 2);
                current.extend(chars[i..end.min(chars.len())].iter().map(|&(_, d)| d));
                i = end;
            }
            '[' if chars.get(i + 1).map(|&(_, d)| d) == Some('|') => {
                let next = chars.get(i + 2).map_or(text.len(), |&(o, _)| o);
                close(&mut current, &mut start, next, true, BarlineStyle::Double);
                i += 2;
            }
            '[' => {
                let end = chars[i..].iter().position(|&(_, d)| d == ']').map_or(i + 1, |p| i + p + 1);
                current.extend(chars[i..end].iter().map(|&(_, d)| d));
                i = end;
            }
            '|' => {
                let mut j = i;
                while chars.get(j).map(|&(_, d)| d) == Some('|') {
                    j += 1;
                }
                let pipes = j - i;
                let style = if chars.get(j).map(|&(_, d)| d) == Some(']') {
                    j += 1;
                    BarlineStyle::Final
                } else if pipes >= 2 {
                    BarlineStyle::Double
                } else {
                    BarlineStyle::Single
                };
                let next = chars.get(j).map_or(text.len(), |&(o, _)| o);
                close(&mut current, &mut start, next, true, style);
                i = j;
            }
            ':' if chars.get(i + 1).map(|&(_, d)| d) == Some(':') => {
                current.push(':');
                let next = chars.get(i + 1).map_or(text.len(), |&(o, _)| o);
                close(&mut current, &mut start, next, true, BarlineStyle::Single);
                current.push(':');
                i += 2;
            }
            _ => {
                if current.is_empty() && c.is_whitespace() {
                    start = offset + c.len_utf8();
                } else {
                    current.push(c);
                }
                i += 1;
            }
        }
    }
    close(&mut current, &mut start, text.len(), false, BarlineStyle::Single);
    segments
}

/// Whether music text opens with a barline, so it cannot continue a measure
/// left open on the previous line.
pub(crate) fn starts_with_barline(text: &str) -> bool {
    let text = text.trim_start().trim_start_matches(':');
    text.starts_with('|') || text.starts_with("[|")
}

// ═══════════════════════════════════════════════════════════════════════
// Measure environment
// ═══════════════════════════════════════════════════════════════════════

/// Running musical context while a voice's measures are parsed. Inline and
/// body-level field changes update it and persist for later measures.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasureEnv {
    pub time_signature: Option<TimeSignature>,
    pub time_unit: TimeUnit,
    pub note_length: NoteValue,
    /// Props stamped on every measure parsed while an override is active
    pub overrides: Props,
}

impl MeasureEnv {
    pub fn new(time_signature: Option<TimeSignature>, time_unit: TimeUnit, note_length: NoteValue) -> Self {
        Self { time_signature, time_unit, note_length, overrides: Props::default() }
    }

    pub fn set_key(&mut self, key: KeySignature) {
        self.overrides.key_signature = Some(key);
    }

    pub fn set_time_signature(&mut self, ts: TimeSignature) {
        self.time_signature = Some(ts);
        self.time_unit = self.time_unit.with_time_signature(&ts);
        self.overrides.time_signature = Some(ts);
        self.overrides.time_unit = Some(self.time_unit);
    }

    pub fn set_note_length(&mut self, length: NoteValue) {
        self.note_length = length;
        self.time_unit = TimeUnit::new(length, self.time_signature.as_ref());
        self.overrides.note_length = Some(length);
        self.overrides.time_unit = Some(self.time_unit);
    }

    fn meter(&self) -> TimeSignature {
        self.time_signature.unwrap_or(DEFAULT_METER)
    }
}

impl Default for MeasureEnv {
    fn default() -> Self {
        let length = default_note_length(None);
        Self::new(None, TimeUnit::new(length, None), length)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Measure parsing
// ═══════════════════════════════════════════════════════════════════════

/// Parse one measure under `voice` and return its node.
///
/// The measure is always produced: bad tokens are skipped and a duration
/// mismatch is recorded on the node and as a warning.
pub fn parse_measure(
    ctx: &mut ParseContext,
    voice: NodeId,
    segment: &BarSegment,
    index: usize,
    lyrics: Option<&[VerseLyrics]>,
    env: &mut MeasureEnv,
    voice_number: u32,
) -> NodeId {
    let raw = segment.text.trim();
    let repeat_start = raw.starts_with(':');
    let repeat_end = raw.len() > 1 && raw.ends_with(':');
    let body = raw.trim_start_matches(':').trim_end_matches(':');

    let barline = match (repeat_start, repeat_end) {
        (true, true) => BarlineStyle::RepeatBoth,
        (true, false) => BarlineStyle::RepeatStart,
        (false, true) => BarlineStyle::RepeatEnd,
        (false, false) => segment.barline,
    };

    let (music, voice_override) = extract_inline_fields(ctx, body, env);

    let placeholder = validate_measure_duration(0, &env.meter(), &env.time_unit);
    let measure = ctx.tree.push(
        voice,
        NodeKind::Measure(MeasureMeta { index, barline, voice_override, validation: placeholder }),
        raw,
    );
    ctx.tree.node_mut(measure).props = env.overrides.clone();

    let mut position: Ticks = 0;
    let mut pending_symbol: Option<String> = None;
    let mut inexact = Vec::new();

    for token in tokenize(&music) {
        if let Some(text) = token.strip_prefix('"') {
            let text = text.trim_end_matches('"');
            // `"^text"`-style annotations are positional text, not chords
            if !text.starts_with(['^', '_', '<', '>', '@']) && !text.is_empty() {
                pending_symbol = Some(text.to_string());
            }
            continue;
        }
        if IGNORED_SYMBOLS.contains(&token.as_str()) {
            continue;
        }
        match parse_element_with(&token, &env.time_unit, env.note_length, &mut inexact) {
            Ok(element) => {
                let symbol = if matches!(element, Element::Tie) { None } else { pending_symbol.take() };
                insert_element(ctx, measure, &token, element, &mut position, symbol);
            }
            Err(err) => ctx.warn(ParseError::Syntax(err)),
        }
    }
    for err in inexact {
        ctx.warn(ParseError::Tick(err));
    }

    if let Some(verses) = lyrics {
        attach_lyrics(ctx, measure, verses, index);
    }

    let validation = validate_measure_duration(position, &env.meter(), &env.time_unit);
    if let Some(message) = &validation.error {
        ctx.warn(ParseError::MeasureDuration { index, message: format!("voice {voice_number}: {message}") });
    }
    let node = ctx.tree.node_mut(measure);
    node.duration = Some(position);
    if let NodeKind::Measure(meta) = &mut node.kind {
        meta.validation = validation;
    }
    measure
}

/// Remove `[K:..]`, `[V:..]`, `[M:..]`, `[L:..]`, `[Q:..]` from the measure
/// text, applying them to the environment.
fn extract_inline_fields(ctx: &mut ParseContext, text: &str, env: &mut MeasureEnv) -> (String, Option<u32>) {
    let chars: Vec<char> = text.chars().collect();
    let mut music = String::with_capacity(text.len());
    let mut voice_override = None;
    let mut i = 0;

    while i < chars.len() {
        if is_inline_field(&chars, i) {
            if let Some(close) = chars[i..].iter().position(|&c| c == ']') {
                let tag = chars[i + 1];
                let value: String = chars[i + 3..i + close].iter().collect();
                apply_inline_field(ctx, tag, value.trim(), env, &mut voice_override);
                music.push(' ');
                i += close + 1;
                continue;
            }
        }
        music.push(chars[i]);
        i += 1;
    }
    (music, voice_override)
}

fn apply_inline_field(
    ctx: &mut ParseContext,
    tag: char,
    value: &str,
    env: &mut MeasureEnv,
    voice_override: &mut Option<u32>,
) {
    match tag {
        'K' => match parse_key(value) {
            Ok((key, _)) => env.set_key(key),
            Err(err) => ctx.warn(err),
        },
        'M' => match parse_time_signature(value) {
            Ok(ts) => env.set_time_signature(ts),
            Err(err) => ctx.warn(err),
        },
        'L' => match parse_note_length(value) {
            Ok(len) => env.set_note_length(len),
            Err(err) => ctx.warn(err),
        },
        'Q' => match parse_tempo(value) {
            Ok(tempo) => env.overrides.tempo = Some(tempo),
            Err(err) => ctx.warn(err),
        },
        'V' => match value.split_whitespace().next().and_then(|n| n.parse().ok()) {
            Some(n) => *voice_override = Some(n),
            None => ctx.warn(ParseError::VoiceParse(format!("inline voice '[V:{value}]'"))),
        },
        _ => log::debug!("ignoring inline field [{tag}:{value}]"),
    }
}

fn insert_element(
    ctx: &mut ParseContext,
    parent: NodeId,
    origin: &str,
    element: Element,
    position: &mut Ticks,
    chord_symbol: Option<String>,
) -> NodeId {
    let duration = element.duration();
    // saturates; an overlong measure fails validation
    let span = TickSpan { start: *position, end: position.saturating_add(duration) };
    let id = match element {
        Element::Note(note) => ctx.tree.push(
            parent,
            NodeKind::Note(NoteMeta {
                pitch: note.pitch,
                dots: note.dots,
                decorations: note.decorations,
                chord_symbol,
            }),
            origin,
        ),
        Element::Rest(rest) => ctx.tree.push(
            parent,
            NodeKind::Rest(RestMeta { dots: rest.dots, invisible: rest.invisible, chord_symbol }),
            origin,
        ),
        Element::Tie => ctx.tree.push(parent, NodeKind::Tie, origin),
        Element::Chord(chord) => {
            let id = ctx.tree.push(parent, NodeKind::Chord(ChordMeta { dots: chord.dots, chord_symbol }), origin);
            for note in chord.notes {
                let member = ctx.tree.push(
                    id,
                    NodeKind::Note(NoteMeta {
                        pitch: note.pitch,
                        dots: note.dots,
                        decorations: note.decorations,
                        chord_symbol: None,
                    }),
                    "",
                );
                let node = ctx.tree.node_mut(member);
                node.duration = Some(note.duration);
                node.span = Some(TickSpan { start: span.start, end: span.start.saturating_add(note.duration) });
            }
            id
        }
        Element::Tuplet(tuplet) => {
            let id = ctx.tree.push(parent, NodeKind::Tuplet(TupletMeta { count: tuplet.count }), origin);
            let count = tuplet.elements.len() as Ticks;
            let mut inner_pos = span.start;
            for (k, inner) in tuplet.elements.into_iter().enumerate() {
                let mut cursor = inner_pos;
                let inner_id = insert_element(ctx, id, "", inner, &mut cursor, None);
                let offset = u64::from(duration) * (k as u64 + 1) / u64::from(count.max(1));
                let end = span.start.saturating_add(Ticks::try_from(offset).unwrap_or(Ticks::MAX));
                ctx.tree.node_mut(inner_id).span = Some(TickSpan { start: inner_pos, end });
                inner_pos = end;
            }
            id
        }
    };
    let node = ctx.tree.node_mut(id);
    node.duration = Some(duration);
    node.span = Some(span);
    *position = span.end;
    id
}

/// Elements that take one lyric unit, in order.
fn lyric_slots(ctx: &ParseContext, measure: NodeId) -> Vec<NodeId> {
    let tree = &ctx.tree;
    let mut slots = Vec::new();
    for child in tree.children(measure) {
        match child.kind {
            NodeKind::Note(_) | NodeKind::Rest(_) | NodeKind::Chord(_) => slots.push(child.id),
            NodeKind::Tuplet(_) => slots.extend(tree.children(child.id).filter(|n| n.kind.is_element()).map(|n| n.id)),
            _ => {}
        }
    }
    slots
}

fn attach_lyrics(ctx: &mut ParseContext, measure: NodeId, verses: &[VerseLyrics], index: usize) {
    let slots = lyric_slots(ctx, measure);
    for verse in verses {
        if verse.units.len() > slots.len() {
            let message = format!(
                "measure {index}: verse {} has {} lyric units for {} notes",
                verse.verse,
                verse.units.len(),
                slots.len()
            );
            log::warn!("{message}");
            ctx.warnings.push(ParseWarning { line: ctx.line, message });
        }
        for (unit, &slot) in verse.units.iter().zip(&slots) {
            let held_at = unit.syllables.len().saturating_sub(1);
            if unit.syllables.is_empty() {
                let meta = LyricMeta {
                    syllable: String::new(),
                    alignment: unit.alignment,
                    skip: true,
                    verse: verse.verse,
                    held: unit.held,
                };
                ctx.tree.push(slot, NodeKind::Lyric(meta), "*");
                continue;
            }
            for (k, syllable) in unit.syllables.iter().enumerate() {
                let meta = LyricMeta {
                    syllable: syllable.clone(),
                    alignment: unit.alignment,
                    skip: false,
                    verse: verse.verse,
                    held: unit.held && k == held_at,
                };
                ctx.tree.push(slot, NodeKind::Lyric(meta), syllable.as_str());
            }
        }
    }
}
