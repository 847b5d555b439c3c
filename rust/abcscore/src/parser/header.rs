//! Header field parser: turns `X:`-style field lines into inheritable
//! props and per-scope metadata.
//!
//! Malformed values never abort: the field is dropped, defaults stay in
//! effect and a warning is recorded on the returned [`Header`].

use std::collections::BTreeMap;

use num_rational::Ratio;

use crate::error::{FieldError, ParseWarning};
use crate::model::{
    Accidental, Contributor, ContributorRole, KeySignature, Mode, Props, Tempo, TimeSignature, VoiceDef,
};
use crate::ticks::{default_note_length, NoteValue, TimeUnit, MAX_FRACTION_TERM};

/// Parsed header of one scope (file, score or section).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    /// `S:` identifier (sections) or `X:` number as text (scores)
    pub id: Option<String>,
    pub props: Props,
    pub meta: HeaderMeta,
    pub warnings: Vec<ParseWarning>,
}

/// Non-inherited header data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMeta {
    pub reference: Option<u32>,
    pub fields: BTreeMap<String, Vec<String>>,
    pub directives: BTreeMap<String, String>,
    pub clef: Option<String>,
    pub transpose: Option<i32>,
}

/// Modifiers that may trail a `K:` value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyModifiers {
    pub clef: Option<String>,
    pub transpose: Option<i32>,
}

impl Header {
    /// Fill in `props.time_unit` when this header changed the note length or
    /// the meter, combining its own values with the inherited ones.
    pub fn resolve_time_unit(&mut self, inherited_length: Option<NoteValue>, inherited_meter: Option<TimeSignature>) {
        if self.props.note_length.is_none() && self.props.time_signature.is_none() {
            return;
        }
        let meter = self.props.time_signature.or(inherited_meter);
        let length = self
            .props
            .note_length
            .or(inherited_length)
            .unwrap_or_else(|| default_note_length(meter.as_ref()));
        self.props.time_unit = Some(TimeUnit::new(length, meter.as_ref()));
    }

    pub(crate) fn warn(&mut self, line: Option<usize>, err: FieldError) {
        log::warn!("{}", err);
        self.warnings.push(ParseWarning { line, message: err.to_string() });
    }

    /// Apply one field line. `line` is the 1-based source line, if known.
    pub(crate) fn apply_field(&mut self, line: Option<usize>, tag: char, value: &str) {
        let value = value.trim();
        match tag {
            'T' => {
                if value.is_empty() {
                    return;
                }
                if self.props.title.is_none() {
                    self.props.title = Some(value.to_string());
                } else if self.props.subtitle.is_none() {
                    self.props.subtitle = Some(value.to_string());
                }
            }
            'C' => match parse_contributor(value) {
                Some(c) => self.props.contributors.push(c),
                None => self.warn(line, FieldError::FieldFormat { tag, value: value.to_string() }),
            },
            'M' => match parse_time_signature(value) {
                Ok(ts) => self.props.time_signature = Some(ts),
                Err(e) => self.warn(line, e),
            },
            'L' => match parse_note_length(value) {
                Ok(len) => self.props.note_length = Some(len),
                Err(e) => self.warn(line, e),
            },
            'K' => match parse_key(value) {
                Ok((key, modifiers)) => {
                    self.props.key_signature = Some(key);
                    if modifiers.clef.is_some() {
                        self.meta.clef = modifiers.clef;
                    }
                    if modifiers.transpose.is_some() {
                        self.meta.transpose = modifiers.transpose;
                    }
                }
                Err(e) => self.warn(line, e),
            },
            'Q' => match parse_tempo(value) {
                Ok(tempo) => self.props.tempo = Some(tempo),
                Err(e) => self.warn(line, e),
            },
            'V' => match parse_voice_def(value) {
                Ok(def) => self.props.define_voice(def),
                Err(e) => self.warn(line, e),
            },
            'X' => match value.parse::<u32>() {
                Ok(n) => {
                    self.meta.reference = Some(n);
                    self.id = Some(n.to_string());
                }
                Err(_) => self.warn(line, FieldError::FieldFormat { tag, value: value.to_string() }),
            },
            'S' => {
                if !value.is_empty() {
                    self.id = Some(value.to_string());
                }
            }
            'I' => {}
            _ => match info_field_name(tag) {
                Some(name) => self.meta.fields.entry(name.to_string()).or_default().push(value.to_string()),
                None => self.warn(line, FieldError::FieldFormat { tag, value: value.to_string() }),
            },
        }
    }
}

fn info_field_name(tag: char) -> Option<&'static str> {
    Some(match tag {
        'O' => "origin",
        'A' => "area",
        'N' => "notes",
        'R' => "rhythm",
        'Z' => "transcription",
        'H' => "history",
        'D' => "discography",
        'B' => "book",
        'F' => "file",
        'G' => "group",
        'P' => "parts",
        _ => return None,
    })
}

/// Split a `T:value` line into its tag and value.
pub fn split_field(line: &str) -> Option<(char, &str)> {
    let mut chars = line.chars();
    let tag = chars.next()?;
    if !tag.is_ascii_alphabetic() || chars.next() != Some(':') {
        return None;
    }
    Some((tag, &line[2..]))
}

/// Parse lines before the first tune: directives, comments and defaults.
pub fn parse_file_header(text: &str) -> Header {
    let mut header = Header::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if let Some(directive) = line.strip_prefix("%%") {
            let mut parts = directive.trim().splitn(2, char::is_whitespace);
            if let Some(name) = parts.next().filter(|n| !n.is_empty()) {
                let value = parts.next().unwrap_or("").trim();
                header.meta.directives.insert(name.to_string(), value.to_string());
            }
            continue;
        }
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        if let Some((tag, value)) = split_field(line) {
            header.apply_field(Some(idx + 1), tag, value);
        }
    }
    header.resolve_time_unit(None, None);
    header
}

/// Parse a tune header (`X:` through the last field before the body).
pub fn parse_score_header(text: &str) -> Header {
    parse_fields(text)
}

/// Parse a section header (`S:` plus its leading field lines).
pub fn parse_section_header(text: &str) -> Header {
    parse_fields(text)
}

fn parse_fields(text: &str) -> Header {
    let mut header = Header::default();
    for (idx, raw) in text.lines().enumerate() {
        let line = strip_comment(raw).trim();
        if line.is_empty() {
            continue;
        }
        if let Some((tag, value)) = split_field(line) {
            header.apply_field(Some(idx + 1), tag, value);
        }
    }
    header.resolve_time_unit(None, None);
    header
}

/// Drop a trailing `%` comment.
pub(crate) fn strip_comment(line: &str) -> &str {
    match line.find('%') {
        Some(pos) if !line[..pos].ends_with('\\') => &line[..pos],
        _ => line,
    }
}

// ─── Field value parsers ─────────────────────────────────────────────

/// `4/4`, `6/8`, `C` (4/4), `C|` (2/2), `2+3/8`.
pub fn parse_time_signature(value: &str) -> Result<TimeSignature, FieldError> {
    let value = value.trim();
    let err = || FieldError::TimeSignature(value.to_string());
    match value {
        "C" => return Ok(TimeSignature { numerator: 4, denominator: 4 }),
        "C|" => return Ok(TimeSignature { numerator: 2, denominator: 2 }),
        _ => {}
    }
    let (num, den) = value.split_once('/').ok_or_else(err)?;
    let mut numerator = 0u32;
    for part in num.split('+') {
        let term = part.trim().parse::<u32>().map_err(|_| err())?;
        numerator = numerator.checked_add(term).ok_or_else(err)?;
    }
    let denominator: u32 = den.trim().parse().map_err(|_| err())?;
    if numerator == 0
        || numerator > MAX_FRACTION_TERM
        || denominator == 0
        || denominator > MAX_FRACTION_TERM
        || !denominator.is_power_of_two()
    {
        return Err(err());
    }
    Ok(TimeSignature { numerator, denominator })
}

/// `1/8`, `1/4`, `1`.
pub fn parse_note_length(value: &str) -> Result<NoteValue, FieldError> {
    let value = value.trim();
    let err = || FieldError::NoteLength(value.to_string());
    let (num, den) = match value.split_once('/') {
        Some((n, d)) => (n.trim(), d.trim()),
        None => (value, "1"),
    };
    let numerator: u32 = num.parse().map_err(|_| err())?;
    let denominator: u32 = den.parse().map_err(|_| err())?;
    if numerator == 0 || denominator == 0 || numerator > MAX_FRACTION_TERM || denominator > MAX_FRACTION_TERM {
        return Err(err());
    }
    Ok(Ratio::new(numerator, denominator))
}

/// Key signature with optional `clef=` / `transpose=` modifiers.
pub fn parse_key(value: &str) -> Result<(KeySignature, KeyModifiers), FieldError> {
    let err = || FieldError::KeySignature(value.trim().to_string());
    let mut modifiers = KeyModifiers::default();
    let mut key_words = Vec::new();

    for word in value.split_whitespace() {
        if let Some((name, arg)) = word.split_once('=') {
            match name.to_ascii_lowercase().as_str() {
                "clef" => modifiers.clef = Some(arg.to_string()),
                "transpose" => modifiers.transpose = Some(arg.parse().map_err(|_| err())?),
                _ => {}
            }
            continue;
        }
        match word.to_ascii_lowercase().as_str() {
            "treble" | "bass" | "alto" | "tenor" => modifiers.clef = Some(word.to_ascii_lowercase()),
            _ => key_words.push(word),
        }
    }

    let key_text: String = key_words.concat();
    if key_text.is_empty() || key_text.eq_ignore_ascii_case("none") {
        return Ok((KeySignature::c_major(), modifiers));
    }

    let mut chars = key_text.chars();
    let letter = chars
        .next()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| ('A'..='G').contains(c))
        .ok_or_else(err)?;
    let rest = chars.as_str();
    let (symbol, mode_text) = match rest.chars().next() {
        Some('#') => (Some(Accidental::Sharp), &rest[1..]),
        Some('b') => (Some(Accidental::Flat), &rest[1..]),
        _ => (None, rest),
    };
    let mode = parse_mode(mode_text).ok_or_else(err)?;
    Ok((KeySignature { letter, symbol, mode }, modifiers))
}

fn parse_mode(text: &str) -> Option<Mode> {
    let lower = text.to_ascii_lowercase();
    if lower.is_empty() {
        return Some(Mode::Major);
    }
    if lower == "m" {
        return Some(Mode::Minor);
    }
    let mode = match lower.get(..3)? {
        "maj" | "ion" => Mode::Major,
        "min" | "aeo" => Mode::Minor,
        "dor" => Mode::Dorian,
        "phr" => Mode::Phrygian,
        "lyd" => Mode::Lydian,
        "mix" => Mode::Mixolydian,
        "loc" => Mode::Locrian,
        _ => return None,
    };
    Some(mode)
}

/// `120`, `1/4=120`, `"Allegro" 3/8=80`.
pub fn parse_tempo(value: &str) -> Result<Tempo, FieldError> {
    let err = || FieldError::Tempo(value.trim().to_string());
    let mut text = None;
    let mut rest = String::new();
    let mut in_quote = false;
    let mut quoted = String::new();
    for c in value.chars() {
        match (c, in_quote) {
            ('"', false) => in_quote = true,
            ('"', true) => {
                in_quote = false;
                text = Some(std::mem::take(&mut quoted));
            }
            (c, true) => quoted.push(c),
            (c, false) => rest.push(c),
        }
    }
    let rest = rest.trim();
    if rest.is_empty() {
        return match text {
            Some(t) => Ok(Tempo { value: 0, unit: Ratio::new(1, 4), text: Some(t) }),
            None => Err(err()),
        };
    }

    let (unit, bpm) = match rest.split_once('=') {
        Some((unit, bpm)) => {
            let first = unit.split_whitespace().next().ok_or_else(err)?;
            (parse_note_length(first).map_err(|_| err())?, bpm.trim())
        }
        None => (Ratio::new(1, 4), rest),
    };
    let value: u32 = bpm.parse().map_err(|_| err())?;
    if value == 0 {
        return Err(err());
    }
    Ok(Tempo { value, unit, text })
}

/// `1 name="Soprano" clef=treble transpose=-2`.
pub fn parse_voice_def(value: &str) -> Result<VoiceDef, FieldError> {
    let err = || FieldError::Voice(value.trim().to_string());
    let words = split_attributes(value);
    let mut words = words.into_iter();
    let number: u32 = words.next().and_then(|w| w.parse().ok()).ok_or_else(err)?;

    let mut def = VoiceDef { number, name: None, clef: None, transpose: None };
    for word in words {
        let Some((key, arg)) = word.split_once('=') else {
            continue;
        };
        let arg = arg.trim_matches('"').to_string();
        match key.to_ascii_lowercase().as_str() {
            "name" | "nm" => def.name = Some(arg),
            "clef" => def.clef = Some(arg),
            "transpose" => def.transpose = Some(arg.parse().map_err(|_| err())?),
            _ => {}
        }
    }
    Ok(def)
}

/// Whitespace split that keeps `key="quoted words"` together.
fn split_attributes(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in value.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// `作词:name` → lyricist, `作曲:name` → composer, anything else → composer.
pub fn parse_contributor(value: &str) -> Option<Contributor> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    for (prefix, role) in [("作词", ContributorRole::Lyricist), ("作曲", ContributorRole::Composer)] {
        if let Some(rest) = value.strip_prefix(prefix) {
            if let Some(name) = rest.strip_prefix(':').or_else(|| rest.strip_prefix('：')) {
                let name = name.trim();
                if name.is_empty() {
                    return None;
                }
                return Some(Contributor { role, name: name.to_string() });
            }
        }
    }
    Some(Contributor { role: ContributorRole::Composer, name: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_signatures() {
        assert_eq!(parse_time_signature("3/4").unwrap(), TimeSignature { numerator: 3, denominator: 4 });
        assert_eq!(parse_time_signature("C").unwrap(), TimeSignature { numerator: 4, denominator: 4 });
        assert_eq!(parse_time_signature("C|").unwrap(), TimeSignature { numerator: 2, denominator: 2 });
        assert_eq!(parse_time_signature("2+3/8").unwrap(), TimeSignature { numerator: 5, denominator: 8 });
        assert!(parse_time_signature("4/0").is_err());
        assert!(parse_time_signature("3/5").is_err());
        assert!(parse_time_signature("waltz").is_err());
    }

    #[test]
    fn key_forms() {
        let (k, _) = parse_key("G").unwrap();
        assert_eq!((k.letter, k.symbol, k.mode), ('G', None, Mode::Major));
        let (k, _) = parse_key("F#").unwrap();
        assert_eq!(k.symbol, Some(Accidental::Sharp));
        let (k, _) = parse_key("Bb major").unwrap();
        assert_eq!((k.symbol, k.mode), (Some(Accidental::Flat), Mode::Major));
        for text in ["Am", "Amin", "A minor", "a"] {
            let (k, _) = parse_key(text).unwrap();
            assert_eq!(k.letter, 'A', "{text}");
        }
        assert_eq!(parse_key("Am").unwrap().0.mode, Mode::Minor);
        assert_eq!(parse_key("A minor").unwrap().0.mode, Mode::Minor);
        assert_eq!(parse_key("D dor").unwrap().0.mode, Mode::Dorian);
        assert!(parse_key("H").is_err());
        assert!(parse_key("C xyz").is_err());
    }

    #[test]
    fn key_modifiers_are_stripped() {
        let (k, m) = parse_key("Em clef=bass transpose=-12").unwrap();
        assert_eq!((k.letter, k.mode), ('E', Mode::Minor));
        assert_eq!(m.clef.as_deref(), Some("bass"));
        assert_eq!(m.transpose, Some(-12));
        let (k, m) = parse_key("D treble").unwrap();
        assert_eq!(k.letter, 'D');
        assert_eq!(m.clef.as_deref(), Some("treble"));
    }

    #[test]
    fn tempo_forms() {
        let t = parse_tempo("120").unwrap();
        assert_eq!((t.value, t.unit), (120, Ratio::new(1, 4)));
        let t = parse_tempo("3/8=80").unwrap();
        assert_eq!((t.value, t.unit), (80, Ratio::new(3, 8)));
        let t = parse_tempo("\"Allegro\" 1/4=132").unwrap();
        assert_eq!(t.text.as_deref(), Some("Allegro"));
        assert_eq!(t.value, 132);
        assert!(parse_tempo("fast").is_err());
    }

    #[test]
    fn voice_definitions() {
        let v = parse_voice_def("2 name=\"Alto Voice\" clef=treble transpose=-2").unwrap();
        assert_eq!(v.number, 2);
        assert_eq!(v.name.as_deref(), Some("Alto Voice"));
        assert_eq!(v.clef.as_deref(), Some("treble"));
        assert_eq!(v.transpose, Some(-2));
        assert!(parse_voice_def("T1").is_err());
    }

    #[test]
    fn contributors() {
        let c = parse_contributor("作词:张三").unwrap();
        assert_eq!((c.role, c.name.as_str()), (ContributorRole::Lyricist, "张三"));
        let c = parse_contributor("作曲：李四").unwrap();
        assert_eq!((c.role, c.name.as_str()), (ContributorRole::Composer, "李四"));
        let c = parse_contributor("Trad.").unwrap();
        assert_eq!(c.role, ContributorRole::Composer);
    }

    #[test]
    fn score_header_collects_props_and_time_unit() {
        let h = parse_score_header("X:3\nT:Main\nT:Second\nM:4/4\nL:1/4\nK:C\nO:Ireland\nQ:1/4=100");
        assert_eq!(h.meta.reference, Some(3));
        assert_eq!(h.props.title.as_deref(), Some("Main"));
        assert_eq!(h.props.subtitle.as_deref(), Some("Second"));
        assert_eq!(h.props.time_unit, Some(TimeUnit { ticks_per_whole: 48, ticks_per_beat: 12 }));
        assert_eq!(h.meta.fields["origin"], vec!["Ireland".to_string()]);
        assert!(h.warnings.is_empty());
    }

    #[test]
    fn malformed_fields_warn_and_keep_defaults() {
        let h = parse_score_header("X:1\nM:abc\nK:Q\nL:1/8");
        assert_eq!(h.props.time_signature, None);
        assert_eq!(h.props.key_signature, None);
        assert_eq!(h.warnings.len(), 2);
        assert_eq!(h.warnings[0].line, Some(2));
    }

    #[test]
    fn oversized_meter_and_length_are_rejected() {
        assert!(parse_time_signature("99999999/4").is_err());
        assert!(parse_time_signature("4294967295+1/4").is_err());
        assert!(parse_time_signature("4/512").is_err());
        assert_eq!(parse_time_signature("7+5/16").unwrap(), TimeSignature { numerator: 12, denominator: 16 });
        assert!(parse_note_length("1/999999999").is_err());
        assert!(parse_note_length("4294967295").is_err());
        assert_eq!(parse_note_length("1/256").unwrap(), Ratio::new(1, 256));

        let h = parse_score_header("X:1\nM:4294967295/1\nL:1/4294967295\nK:C");
        assert_eq!(h.props.time_signature, None);
        assert_eq!(h.props.note_length, None);
        assert_eq!(h.warnings.len(), 2);
    }

    #[test]
    fn meter_change_recomputes_beat() {
        let mut h = parse_section_header("S:B\nM:6/8");
        assert_eq!(h.id.as_deref(), Some("B"));
        h.resolve_time_unit(Some(Ratio::new(1, 8)), None);
        assert_eq!(h.props.time_unit, Some(TimeUnit { ticks_per_whole: 96, ticks_per_beat: 12 }));
    }

    #[test]
    fn file_header_directives() {
        let h = parse_file_header("%%pagewidth 21cm\n% comment\nL:1/4");
        assert_eq!(h.meta.directives["pagewidth"], "21cm");
        assert_eq!(h.props.note_length, Some(Ratio::new(1, 4)));
    }
}
