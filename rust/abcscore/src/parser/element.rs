//! Element parser: turns one token into a typed music element with its
//! duration resolved to ticks.

use num_rational::Ratio;

use super::tokenizer::{is_accidental, is_note_letter, is_rest_letter, scan_note, skip_decorations};
use crate::error::{ElementParseError, TickError};
use crate::model::{Accidental, Pitch};
use crate::ticks::{
    dot_factor, note_value_to_duration, parse_duration_multiplier, round_to_ticks, scale_note_value, NoteValue, Ticks,
    TimeUnit,
};

#[derive(Debug, Clone, PartialEq)]
pub struct NoteElement {
    pub pitch: Pitch,
    pub duration: Ticks,
    pub dots: u32,
    pub decorations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestElement {
    pub duration: Ticks,
    pub dots: u32,
    pub invisible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChordElement {
    pub notes: Vec<NoteElement>,
    pub duration: Ticks,
    pub dots: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupletElement {
    pub count: u32,
    pub elements: Vec<Element>,
    pub duration: Ticks,
}

/// A parsed measure element.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Note(NoteElement),
    Rest(RestElement),
    Tie,
    Tuplet(TupletElement),
    Chord(ChordElement),
}

impl Element {
    pub fn duration(&self) -> Ticks {
        match self {
            Element::Note(n) => n.duration,
            Element::Rest(r) => r.duration,
            Element::Tie => 0,
            Element::Tuplet(t) => t.duration,
            Element::Chord(c) => c.duration,
        }
    }
}

/// Parse a token using the given tick resolution and default note length
/// (defaults: 1/8 note length, 96 ticks per whole).
///
/// Values the resolution cannot represent exactly are rounded to the nearest
/// tick and logged.
pub fn parse_element(
    token: &str,
    time_unit: Option<&TimeUnit>,
    default_note_length: Option<NoteValue>,
) -> Result<Element, ElementParseError> {
    let unit = time_unit.copied().unwrap_or_default();
    let length = default_note_length.unwrap_or_else(|| Ratio::new(1, 8));
    let mut inexact = Vec::new();
    let element = parse_element_with(token, &unit, length, &mut inexact)?;
    for err in &inexact {
        log::warn!("{token}: {err}, rounded");
    }
    Ok(element)
}

/// Parser entry used by the measure parser; rounding problems are collected
/// into `inexact` instead of logged.
pub(crate) fn parse_element_with(
    token: &str,
    unit: &TimeUnit,
    default_note_length: NoteValue,
    inexact: &mut Vec<TickError>,
) -> Result<Element, ElementParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ElementParseError::Empty);
    }
    if token == "-" {
        return Ok(Element::Tie);
    }

    let chars: Vec<char> = token.chars().collect();
    if chars[0] == '(' && chars.get(1).is_some_and(|c| c.is_ascii_digit()) {
        return parse_tuplet(token, &chars, unit, default_note_length, inexact);
    }

    match scan_note(&chars, 0) {
        Some(end) if end == chars.len() => {}
        _ => return Err(ElementParseError::Unrecognized(token.to_string())),
    }

    let parts = split_note(token, &chars)?;
    let value = note_value(token, &[default_note_length, parts.multiplier, dot_factor(parts.dots)])?;
    let duration = to_ticks(token, value, unit, inexact)?;

    match parts.head {
        Head::Rest { invisible } => Ok(Element::Rest(RestElement {
            duration,
            dots: parts.dots,
            invisible,
        })),
        Head::Pitch(pitch) => Ok(Element::Note(NoteElement {
            pitch,
            duration,
            dots: parts.dots,
            decorations: parts.decorations,
        })),
        Head::Chord(members) => {
            let mut notes = Vec::with_capacity(members.len());
            for member in members {
                let member_value = note_value(
                    token,
                    &[
                        default_note_length,
                        member.multiplier,
                        dot_factor(member.dots),
                        parts.multiplier,
                        dot_factor(parts.dots),
                    ],
                )?;
                if let Head::Pitch(pitch) = member.head {
                    notes.push(NoteElement {
                        pitch,
                        duration: to_ticks(token, member_value, unit, inexact)?,
                        dots: member.dots,
                        decorations: member.decorations,
                    });
                }
            }
            let duration = notes.first().map_or(duration, |n| n.duration);
            Ok(Element::Chord(ChordElement { notes, duration, dots: parts.dots }))
        }
    }
}

fn too_long(token: &str) -> ElementParseError {
    ElementParseError::Duration {
        token: token.to_string(),
        duration: "too long".to_string(),
    }
}

fn note_value(token: &str, factors: &[NoteValue]) -> Result<NoteValue, ElementParseError> {
    scale_note_value(factors).ok_or_else(|| too_long(token))
}

fn to_ticks(
    token: &str,
    value: NoteValue,
    unit: &TimeUnit,
    inexact: &mut Vec<TickError>,
) -> Result<Ticks, ElementParseError> {
    match note_value_to_duration(value, unit) {
        Ok(ticks) => Ok(ticks),
        Err(TickError::TooLong { .. }) => Err(too_long(token)),
        Err(err) => {
            inexact.push(err);
            Ok(round_to_ticks(value, unit))
        }
    }
}

fn parse_tuplet(
    token: &str,
    chars: &[char],
    unit: &TimeUnit,
    default_note_length: NoteValue,
    inexact: &mut Vec<TickError>,
) -> Result<Element, ElementParseError> {
    let mut i = 1;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    let count: u32 = token[1..i]
        .parse()
        .map_err(|_| ElementParseError::Unrecognized(token.to_string()))?;
    if count < 2 {
        return Err(ElementParseError::Unrecognized(token.to_string()));
    }
    // `(p:q:r` ratio forms: the ratio itself is not used
    while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == ':') {
        i += 1;
    }

    let mut elements = Vec::new();
    while i < chars.len() {
        if chars[i].is_whitespace() || chars[i] == ')' {
            i += 1;
            continue;
        }
        let end = scan_note(chars, i).ok_or_else(|| ElementParseError::Unrecognized(token.to_string()))?;
        let inner: String = chars[i..end].iter().collect();
        elements.push(parse_element_with(&inner, unit, default_note_length, inexact)?);
        i = end;
    }

    if elements.len() != count as usize {
        return Err(ElementParseError::TupletArity {
            token: token.to_string(),
            expected: count as usize,
            found: elements.len(),
        });
    }

    let duration = elements[0]
        .duration()
        .checked_mul(count - 1)
        .ok_or_else(|| too_long(token))?;
    Ok(Element::Tuplet(TupletElement { count, elements, duration }))
}

// ─── Note anatomy ────────────────────────────────────────────────────

enum Head {
    Pitch(Pitch),
    Rest { invisible: bool },
    Chord(Vec<NoteParts>),
}

struct NoteParts {
    decorations: Vec<String>,
    head: Head,
    multiplier: NoteValue,
    dots: u32,
}

fn split_note(token: &str, chars: &[char]) -> Result<NoteParts, ElementParseError> {
    let deco_end = skip_decorations(chars, 0);
    let decorations = decoration_names(&chars[..deco_end]);
    let mut i = deco_end;

    let acc_start = i;
    while chars.get(i).copied().is_some_and(is_accidental) {
        i += 1;
    }
    let accidental: String = chars[acc_start..i].iter().collect();

    let head = match chars.get(i).copied() {
        Some(c) if is_rest_letter(c) => {
            i += 1;
            Head::Rest { invisible: c == 'x' }
        }
        Some(c) if is_note_letter(c) => {
            i += 1;
            let mut octave = if c.is_ascii_uppercase() { 4 } else { 5 };
            while let Some(&mark) = chars.get(i) {
                match mark {
                    ',' => octave -= 1,
                    '\'' => octave += 1,
                    _ => break,
                }
                i += 1;
            }
            Head::Pitch(Pitch {
                letter: c.to_ascii_uppercase(),
                accidental: parse_accidental(&accidental),
                octave,
            })
        }
        Some('[') => {
            let close = chars[i..]
                .iter()
                .position(|&c| c == ']')
                .map(|p| p + i)
                .ok_or_else(|| ElementParseError::Unrecognized(token.to_string()))?;
            let members = split_chord(token, &chars[i + 1..close])?;
            i = close + 1;
            Head::Chord(members)
        }
        _ => return Err(ElementParseError::Unrecognized(token.to_string())),
    };

    let dur_start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit() || *c == '/') {
        i += 1;
    }
    let duration_text: String = chars[dur_start..i].iter().collect();
    let multiplier = parse_duration_multiplier(&duration_text).ok_or_else(|| ElementParseError::Duration {
        token: token.to_string(),
        duration: duration_text.clone(),
    })?;

    let mut dots = 0;
    while chars.get(i) == Some(&'.') {
        dots += 1;
        i += 1;
    }

    Ok(NoteParts { decorations, head, multiplier, dots })
}

fn split_chord(token: &str, inner: &[char]) -> Result<Vec<NoteParts>, ElementParseError> {
    let mut members = Vec::new();
    let mut i = 0;
    while i < inner.len() {
        if inner[i].is_whitespace() {
            i += 1;
            continue;
        }
        let end = scan_note(inner, i).ok_or_else(|| ElementParseError::Unrecognized(token.to_string()))?;
        let member_chars = &inner[i..end];
        let member: String = member_chars.iter().collect();
        let parts = split_note(&member, member_chars)?;
        if !matches!(parts.head, Head::Pitch(_)) {
            return Err(ElementParseError::Unrecognized(token.to_string()));
        }
        members.push(parts);
        i = end;
    }
    if members.is_empty() {
        return Err(ElementParseError::Unrecognized(token.to_string()));
    }
    Ok(members)
}

fn parse_accidental(text: &str) -> Option<Accidental> {
    match text {
        "^" => Some(Accidental::Sharp),
        "^^" => Some(Accidental::DoubleSharp),
        "_" => Some(Accidental::Flat),
        "__" => Some(Accidental::DoubleFlat),
        "=" => Some(Accidental::Natural),
        _ => None,
    }
}

fn decoration_names(chars: &[char]) -> Vec<String> {
    let mut names = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '!' || c == '+' {
            let close = chars[i + 1..].iter().position(|&d| d == c).map_or(chars.len(), |p| p + i + 1);
            names.push(chars[i + 1..close].iter().collect());
            i = close + 1;
            continue;
        }
        let name = match c {
            '.' => "staccato",
            '~' => "roll",
            'H' => "fermata",
            'L' => "accent",
            'M' => "lowermordent",
            'O' => "coda",
            'P' => "uppermordent",
            'S' => "segno",
            'T' => "trill",
            'u' => "upbow",
            'v' => "downbow",
            _ => "",
        };
        if !name.is_empty() {
            names.push(name.to_string());
        }
        i += 1;
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> TimeUnit {
        TimeUnit { ticks_per_whole: 48, ticks_per_beat: 12 }
    }

    fn parse(token: &str) -> Element {
        parse_element(token, Some(&unit()), Some(Ratio::new(1, 4))).unwrap()
    }

    fn note(token: &str) -> NoteElement {
        match parse(token) {
            Element::Note(n) => n,
            other => panic!("expected note, got {other:?}"),
        }
    }

    #[test]
    fn durations_relative_to_default_length() {
        assert_eq!(note("C").duration, 12);
        assert_eq!(note("C4").duration, 48);
        assert_eq!(note("C/").duration, 6);
        assert_eq!(note("C/2").duration, 6);
        assert_eq!(note("C3/2").duration, 18);
        assert_eq!(note("C//").duration, 3);
    }

    #[test]
    fn dots_use_the_half_rule() {
        let n = note("C2.");
        assert_eq!(n.dots, 1);
        assert_eq!(n.duration, 30);
    }

    #[test]
    fn pitch_accidental_and_octave() {
        let n = note("^c'");
        assert_eq!(n.pitch.letter, 'C');
        assert_eq!(n.pitch.accidental, Some(Accidental::Sharp));
        assert_eq!(n.pitch.octave, 6);

        let n = note("__B,,");
        assert_eq!(n.pitch.accidental, Some(Accidental::DoubleFlat));
        assert_eq!(n.pitch.octave, 2);

        assert_eq!(note("=G").pitch.accidental, Some(Accidental::Natural));
        assert_eq!(note("^^F").pitch.accidental, Some(Accidental::DoubleSharp));
    }

    #[test]
    fn decorations_are_reattached() {
        let n = note("!trill!.G2");
        assert_eq!(n.decorations, vec!["trill".to_string(), "staccato".to_string()]);
        assert_eq!(n.duration, 24);
        assert_eq!(note("HA").decorations, vec!["fermata".to_string()]);
    }

    #[test]
    fn rests_and_ties() {
        match parse("z2") {
            Element::Rest(r) => {
                assert_eq!(r.duration, 24);
                assert!(!r.invisible);
            }
            other => panic!("{other:?}"),
        }
        match parse("x") {
            Element::Rest(r) => assert!(r.invisible),
            other => panic!("{other:?}"),
        }
        assert_eq!(parse("-"), Element::Tie);
    }

    #[test]
    fn tuplet_duration_is_first_times_count_minus_one() {
        match parse("(3ABC)") {
            Element::Tuplet(t) => {
                assert_eq!(t.count, 3);
                assert_eq!(t.elements.len(), 3);
                assert_eq!(t.duration, 24);
            }
            other => panic!("{other:?}"),
        }
        match parse("(2A/B/") {
            Element::Tuplet(t) => assert_eq!(t.duration, 6),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn tuplet_arity_mismatch_is_an_error() {
        let err = parse_element("(3AB", Some(&unit()), Some(Ratio::new(1, 4))).unwrap_err();
        assert!(matches!(err, ElementParseError::TupletArity { expected: 3, found: 2, .. }));
    }

    #[test]
    fn chord_takes_first_member_duration() {
        match parse("[CEG]2") {
            Element::Chord(c) => {
                assert_eq!(c.notes.len(), 3);
                assert_eq!(c.duration, 24);
                assert_eq!(c.notes[2].pitch.letter, 'G');
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unknown_tokens_fail() {
        for token in [">", "|", "[K:C]", "\"Am\"", "Q", "C2x"] {
            assert!(parse_element(token, Some(&unit()), None).is_err(), "{token}");
        }
    }

    #[test]
    fn inexact_values_are_rounded() {
        let mut issues = Vec::new();
        let el = parse_element_with("C/8", &unit(), Ratio::new(1, 4), &mut issues).unwrap();
        assert_eq!(el.duration(), 2);
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn oversized_durations_are_errors() {
        for token in ["C999999999", "C4294967295", "z99999999999", "[CE]4294967295", "C/4294967295"] {
            match parse_element(token, Some(&unit()), Some(Ratio::new(1, 4))) {
                Err(ElementParseError::Duration { .. }) => {}
                other => panic!("{token}: expected a duration error, got {other:?}"),
            }
        }
    }

    #[test]
    fn durations_past_the_tick_range_are_errors() {
        let wide = TimeUnit { ticks_per_whole: u32::MAX, ticks_per_beat: u32::MAX / 4 };
        let err = parse_element("C256", Some(&wide), Some(Ratio::from_integer(1))).unwrap_err();
        assert!(matches!(err, ElementParseError::Duration { .. }));
        let err = parse_element("(3C2DE)", Some(&wide), Some(Ratio::new(1, 2))).unwrap_err();
        assert!(matches!(err, ElementParseError::Duration { .. }));
    }
}
