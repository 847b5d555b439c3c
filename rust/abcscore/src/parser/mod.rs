//! ABC parser: converts notation text into the [`ScoreTree`] data model.
//!
//! The document is cut into a file header, scores (`X:`), sections (`S:`)
//! and voices (`V:`); each voice's music is split at barlines and handed to
//! the measure parser. Nothing here aborts on bad input: problems become
//! [`ParseWarning`]s on the output.

pub mod element;
pub mod header;
pub mod lyrics;
pub mod measure;
pub mod tokenizer;

use serde::Serialize;

use crate::error::{ParseError, ParseWarning};
use crate::model::{FileMeta, NodeId, NodeKind, ScoreMeta, ScoreTree, SectionMeta, VoiceDef, VoiceMeta};
use crate::ticks::default_note_length;

use header::{parse_file_header, parse_key, parse_note_length, parse_score_header, parse_section_header};
use header::{parse_tempo, parse_time_signature, parse_voice_def, split_field, strip_comment, Header};
use lyrics::{extract_lyric_lines, is_music_line, parse_lyrics};
use measure::{parse_measure, split_bars, starts_with_barline, BarSegment, MeasureEnv};

/// Result of parsing a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseOutput {
    pub tree: ScoreTree,
    pub warnings: Vec<ParseWarning>,
}

/// State threaded through one parse: the tree arena, collected warnings and
/// the source line being worked on.
#[derive(Debug)]
pub struct ParseContext {
    tree: ScoreTree,
    warnings: Vec<ParseWarning>,
    line: Option<usize>,
}

impl ParseContext {
    pub fn new(meta: FileMeta) -> Self {
        Self { tree: ScoreTree::new(meta), warnings: Vec::new(), line: None }
    }

    pub fn tree(&self) -> &ScoreTree {
        &self.tree
    }

    pub fn warnings(&self) -> &[ParseWarning] {
        &self.warnings
    }

    /// Record a recoverable error against the current line.
    pub fn warn(&mut self, err: impl Into<ParseError>) {
        let err = err.into();
        match self.line {
            Some(line) => log::warn!("line {line}: {err}"),
            None => log::warn!("{err}"),
        }
        self.warnings.push(ParseWarning { line: self.line, message: err.to_string() });
    }

    /// Take over warnings produced by a header parse whose line numbers are
    /// relative to `first_line`.
    fn absorb(&mut self, warnings: Vec<ParseWarning>, first_line: usize) {
        self.warnings.extend(warnings.into_iter().map(|w| ParseWarning {
            line: w.line.map(|l| l + first_line - 1),
            message: w.message,
        }));
    }

    pub fn finish(self) -> ParseOutput {
        ParseOutput { tree: self.tree, warnings: self.warnings }
    }
}

/// A source line with its 1-based number.
type Line<'a> = (usize, &'a str);

/// Parse a whole document.
pub fn parse_document(text: &str) -> ParseOutput {
    let lines: Vec<Line> = text.lines().enumerate().map(|(i, l)| (i + 1, l)).collect();
    let score_starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, (_, l))| matches!(split_field(l.trim()), Some(('X', _))))
        .map(|(i, _)| i)
        .collect();

    let header_end = score_starts.first().copied().unwrap_or_else(|| {
        // no `X:` at all: everything from the first music line is one score
        lines.iter().position(|(_, l)| is_music_line(l)).unwrap_or(lines.len())
    });

    let file_header = parse_file_header(&join(&lines[..header_end]));
    let mut ctx = ParseContext::new(FileMeta { directives: file_header.meta.directives.clone() });
    ctx.absorb(file_header.warnings, 1);
    let root = ctx.tree.root;
    ctx.tree.node_mut(root).props = file_header.props;

    let mut bounds: Vec<usize> = if score_starts.is_empty() && header_end < lines.len() {
        vec![header_end]
    } else {
        score_starts
    };
    bounds.push(lines.len());
    for pair in bounds.windows(2) {
        parse_score(&mut ctx, &lines[pair[0]..pair[1]]);
    }

    log::debug!("parsed {} nodes with {} warnings", ctx.tree.len(), ctx.warnings.len());
    ctx.finish()
}

fn join(lines: &[Line]) -> String {
    lines.iter().map(|(_, l)| *l).collect::<Vec<_>>().join("\n")
}

fn is_lyric_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with("w:") || line.starts_with("W:")
}

fn is_section_line(line: &str) -> bool {
    matches!(split_field(line.trim()), Some(('S', _)))
}

fn is_voice_line(line: &str) -> bool {
    matches!(split_field(line.trim()), Some(('V', _)))
}

/// Index of the first line that ends a header: music, lyrics or (after the
/// first line) a section marker. Section headers also end at `V:`, which
/// switches voices there instead of defining them.
fn header_len(lines: &[Line], stop_at_voice: bool) -> usize {
    lines
        .iter()
        .enumerate()
        .position(|(i, (_, l))| {
            is_music_line(l)
                || is_lyric_line(l)
                || (i > 0 && is_section_line(l))
                || (stop_at_voice && is_voice_line(l))
        })
        .unwrap_or(lines.len())
}

/// Resolve a header's time unit against what its parent node provides.
fn inherit(ctx: &ParseContext, parent: NodeId, mut header: Header) -> Header {
    let length = ctx.tree.lookup(parent, |p| p.note_length);
    let meter = ctx.tree.time_signature(parent);
    header.resolve_time_unit(length, meter);
    header
}

fn parse_score(ctx: &mut ParseContext, lines: &[Line]) {
    let Some(&(first_line, _)) = lines.first() else {
        return;
    };
    let split = header_len(lines, false);
    let header = parse_score_header(&join(&lines[..split]));
    ctx.absorb(header.warnings.clone(), first_line);
    let header = inherit(ctx, ctx.tree.root, header);

    let meta = ScoreMeta {
        reference: header.meta.reference,
        fields: header.meta.fields,
        clef: header.meta.clef,
        transpose: header.meta.transpose,
    };
    let root = ctx.tree.root;
    let score = ctx.tree.push(root, NodeKind::Score(meta), header.id.unwrap_or_default());
    ctx.tree.node_mut(score).props = header.props;
    log::debug!("score {:?} at line {first_line}", ctx.tree.node(score).origin);

    let body = &lines[split..];
    let mut starts: Vec<usize> = body.iter().enumerate().filter(|(_, (_, l))| is_section_line(l)).map(|(i, _)| i).collect();
    if starts.first() != Some(&0) && body.iter().any(|(_, l)| is_music_line(l) || is_lyric_line(l)) {
        starts.insert(0, 0);
    }
    starts.push(body.len());
    for pair in starts.windows(2) {
        parse_section(ctx, score, &body[pair[0]..pair[1]]);
    }
}

fn parse_section(ctx: &mut ParseContext, score: NodeId, lines: &[Line]) {
    let Some(&(first_line, first)) = lines.first() else {
        return;
    };
    let split = if is_section_line(first) { header_len(lines, true) } else { 0 };
    let header = parse_section_header(&join(&lines[..split]));
    ctx.absorb(header.warnings.clone(), first_line);
    let header = inherit(ctx, score, header);

    let meta = SectionMeta { name: header.id.clone(), fields: header.meta.fields };
    let section = ctx.tree.push(score, NodeKind::Section(meta), header.id.unwrap_or_default());
    ctx.tree.node_mut(section).props = header.props;
    log::debug!("section {:?} at line {first_line}", ctx.tree.node(section).origin);

    for voice in split_voices(ctx, section, &lines[split..]) {
        parse_voice(ctx, section, voice);
    }
}

/// One line of a voice's body.
#[derive(Debug, Clone, PartialEq)]
enum VoiceLine<'a> {
    Music(&'a str),
    Lyric(&'a str),
    Field(char, &'a str),
}

/// The lines of one voice inside a section, in source order.
#[derive(Debug, Clone, PartialEq)]
struct VoiceBody<'a> {
    number: u32,
    def: Option<VoiceDef>,
    lines: Vec<(usize, VoiceLine<'a>)>,
}

/// Distribute section body lines over voices. A `V:` line switches the
/// current voice; one without a usable number makes the following lines be
/// skipped until the next valid `V:`.
fn split_voices<'a>(ctx: &mut ParseContext, section: NodeId, lines: &[Line<'a>]) -> Vec<VoiceBody<'a>> {
    let first_defined = ctx.tree.lookup(section, |p| p.voices.first().map(|v| v.number)).unwrap_or(1);
    let mut voices: Vec<VoiceBody<'a>> = Vec::new();
    let mut current = Some(first_defined);

    for &(number, raw) in lines {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('%') {
            continue;
        }
        ctx.line = Some(number);

        let entry = if is_lyric_line(line) {
            VoiceLine::Lyric(line)
        } else if let Some((tag, value)) = split_field(line) {
            if tag == 'V' {
                current = match parse_voice_def(strip_comment(value)) {
                    Ok(def) => {
                        let n = def.number;
                        let entry = voice_entry(&mut voices, n);
                        entry.def = Some(overlay(entry.def.take(), def));
                        Some(n)
                    }
                    Err(_) => {
                        ctx.warn(ParseError::VoiceParse(format!("'V:{}' has no voice number", value.trim())));
                        None
                    }
                };
                continue;
            }
            if !matches!(tag, 'K' | 'M' | 'L' | 'Q') {
                log::debug!("ignoring body field {tag}: at line {number}");
                continue;
            }
            VoiceLine::Field(tag, value)
        } else {
            VoiceLine::Music(line)
        };

        if let Some(n) = current {
            voice_entry(&mut voices, n).lines.push((number, entry));
        }
    }
    ctx.line = None;
    voices.retain(|v| v.lines.iter().any(|(_, l)| matches!(l, VoiceLine::Music(_))));
    voices
}

/// Apply the attributes a `V:` line names on top of an earlier definition.
fn overlay(base: Option<VoiceDef>, def: VoiceDef) -> VoiceDef {
    match base {
        Some(base) => VoiceDef {
            number: def.number,
            name: def.name.or(base.name),
            clef: def.clef.or(base.clef),
            transpose: def.transpose.or(base.transpose),
        },
        None => def,
    }
}

fn voice_entry<'v, 'a>(voices: &'v mut Vec<VoiceBody<'a>>, number: u32) -> &'v mut VoiceBody<'a> {
    let pos = match voices.iter().position(|v| v.number == number) {
        Some(pos) => pos,
        None => {
            voices.push(VoiceBody { number, def: None, lines: Vec::new() });
            voices.len() - 1
        }
    };
    &mut voices[pos]
}

/// What a voice's music turns into before measures are built.
enum VoiceItem<'a> {
    Measure(BarSegment, usize),
    Field(char, &'a str, usize),
}

/// Join measures that continue across lines and interleave body fields.
fn voice_items<'a>(body: &VoiceBody<'a>) -> Vec<VoiceItem<'a>> {
    let mut items = Vec::new();
    let mut open: Option<(BarSegment, usize)> = None;

    for &(number, ref line) in &body.lines {
        match *line {
            VoiceLine::Music(text) => {
                let text = strip_comment(text);
                if starts_with_barline(text) {
                    if let Some((segment, start)) = open.take() {
                        items.push(VoiceItem::Measure(segment, start));
                    }
                }
                for segment in split_bars(text) {
                    let (segment, start) = match open.take() {
                        Some((mut prev, start)) => {
                            prev.text = format!("{} {}", prev.text, segment.text);
                            prev.closed = segment.closed;
                            prev.barline = segment.barline;
                            (prev, start)
                        }
                        None => (segment, number),
                    };
                    if segment.closed {
                        items.push(VoiceItem::Measure(segment, start));
                    } else {
                        open = Some((segment, start));
                    }
                }
            }
            VoiceLine::Field(tag, value) => {
                if let Some((segment, start)) = open.take() {
                    items.push(VoiceItem::Measure(segment, start));
                }
                items.push(VoiceItem::Field(tag, value, number));
            }
            VoiceLine::Lyric(_) => {}
        }
    }
    if let Some((segment, start)) = open {
        items.push(VoiceItem::Measure(segment, start));
    }
    items
}

fn parse_voice(ctx: &mut ParseContext, section: NodeId, body: VoiceBody) {
    let inherited = ctx.tree.lookup(section, |p| p.voices.iter().find(|v| v.number == body.number).cloned());
    let def = match body.def.clone() {
        Some(def) => Some(overlay(inherited, def)),
        None => inherited,
    };
    let meta = VoiceMeta {
        number: body.number,
        name: def.as_ref().and_then(|d| d.name.clone()),
        clef: def.as_ref().and_then(|d| d.clef.clone()),
        transpose: def.as_ref().and_then(|d| d.transpose),
    };
    let voice = ctx.tree.push(section, NodeKind::Voice(meta), format!("V:{}", body.number));

    let items = voice_items(&body);
    let measure_count = items.iter().filter(|i| matches!(i, VoiceItem::Measure(..))).count();
    log::debug!("voice {} with {measure_count} measures", body.number);

    let voice_text = body
        .lines
        .iter()
        .map(|(_, line)| match *line {
            VoiceLine::Music(t) | VoiceLine::Lyric(t) => t.to_string(),
            VoiceLine::Field(tag, value) => format!("{tag}:{value}"),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let lyric_lines = extract_lyric_lines(&voice_text);
    let (lyrics, dropped) = parse_lyrics(&lyric_lines, measure_count);
    if dropped > 0 {
        let line = lyric_lines.last().and_then(|l| body.lines.get(l.line - 1)).map(|(n, _)| *n);
        let message = format!("voice {}: {dropped} lyric sections past the last measure were dropped", body.number);
        log::warn!("{message}");
        ctx.warnings.push(ParseWarning { line, message });
    }

    let meter = ctx.tree.time_signature(voice);
    let length = ctx
        .tree
        .lookup(voice, |p| p.note_length)
        .unwrap_or_else(|| default_note_length(meter.as_ref()));
    let mut env = MeasureEnv::new(meter, ctx.tree.time_unit(voice), length);

    let mut index = 0;
    for item in items {
        match item {
            VoiceItem::Field(tag, value, line) => {
                ctx.line = Some(line);
                apply_body_field(ctx, &mut env, tag, value);
            }
            VoiceItem::Measure(segment, line) => {
                ctx.line = Some(line);
                let verses = lyrics.get(&index).map(Vec::as_slice);
                parse_measure(ctx, voice, &segment, index, verses, &mut env, body.number);
                index += 1;
            }
        }
    }
    ctx.line = None;
}

/// `K:`/`M:`/`L:`/`Q:` between music lines change the following measures.
fn apply_body_field(ctx: &mut ParseContext, env: &mut MeasureEnv, tag: char, value: &str) {
    let value = strip_comment(value).trim();
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
            Ok(length) => env.set_note_length(length),
            Err(err) => ctx.warn(err),
        },
        'Q' => match parse_tempo(value) {
            Ok(tempo) => env.overrides.tempo = Some(tempo),
            Err(err) => ctx.warn(err),
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BarlineStyle, NodeKind};

    fn measures(tree: &ScoreTree, voice: NodeId) -> Vec<NodeId> {
        tree.children_of_kind(voice, "measure").map(|n| n.id).collect()
    }

    fn only_voice(tree: &ScoreTree) -> NodeId {
        let score = tree.scores().next().unwrap().id;
        let section = tree.children(score).next().unwrap().id;
        tree.children(section).next().unwrap().id
    }

    #[test]
    fn file_header_directives_and_defaults() {
        let out = parse_document("%%scale 0.8\n% comment\nM:3/4\n\nX:1\nK:C\nCDE|");
        match &out.tree.root_node().kind {
            NodeKind::Root(meta) => assert_eq!(meta.directives.get("scale").map(String::as_str), Some("0.8")),
            other => panic!("{other:?}"),
        }
        let voice = only_voice(&out.tree);
        assert_eq!(out.tree.time_signature(voice).map(|t| t.numerator), Some(3));
        // 3/4 → default length 1/8 → 96 per whole; CDE is three eighths
        assert_eq!(out.tree.node(measures(&out.tree, voice)[0]).duration, Some(36));
    }

    #[test]
    fn several_scores() {
        let out = parse_document("X:1\nT:One\nK:C\nC8|\n\nX:2\nT:Two\nK:G\nG8|");
        let titles: Vec<_> = out.tree.scores().map(|s| s.props.title.clone().unwrap_or_default()).collect();
        assert_eq!(titles, vec!["One".to_string(), "Two".to_string()]);
    }

    #[test]
    fn sections_and_voices() {
        let text = "X:1\nM:4/4\nL:1/4\nV:1 name=\"Lead\"\nV:2\nK:C\nS:A\nV:1\nCDEF|\nV:2\nC4|\nS:B\nGABc|";
        let out = parse_document(text);
        let score = out.tree.scores().next().unwrap().id;
        let sections: Vec<_> = out.tree.children(score).map(|s| s.id).collect();
        assert_eq!(sections.len(), 2);
        let voices: Vec<_> = out
            .tree
            .children(sections[0])
            .map(|v| match &v.kind {
                NodeKind::Voice(meta) => (meta.number, meta.name.clone()),
                other => panic!("{other:?}"),
            })
            .collect();
        assert_eq!(voices, vec![(1, Some("Lead".to_string())), (2, None)]);
        // music before any V: in section B goes to the first defined voice
        let b_voice = out.tree.children(sections[1]).next().unwrap();
        assert!(matches!(&b_voice.kind, NodeKind::Voice(meta) if meta.number == 1));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn bad_voice_line_skips_until_next_voice() {
        let text = "X:1\nL:1/4\nK:C\nV:1\nCDEF|\nV:soprano\nGABc|\nV:2\nC4|";
        let out = parse_document(text);
        let score = out.tree.scores().next().unwrap().id;
        let section = out.tree.children(score).next().unwrap().id;
        let counts: Vec<usize> = out.tree.children(section).map(|v| v.children.len()).collect();
        assert_eq!(counts, vec![1, 1]);
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].line, Some(6));
    }

    #[test]
    fn measure_continues_on_next_line() {
        let out = parse_document("X:1\nL:1/4\nK:C\nCD\nEF|GABc|]");
        let voice = only_voice(&out.tree);
        let ms = measures(&out.tree, voice);
        assert_eq!(ms.len(), 2);
        assert_eq!(out.tree.node(ms[0]).children.len(), 4);
        match &out.tree.node(ms[1]).kind {
            NodeKind::Measure(meta) => assert_eq!(meta.barline, BarlineStyle::Final),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn body_meter_change_applies_to_later_measures() {
        let out = parse_document("X:1\nM:4/4\nL:1/4\nK:C\nCDEF|\nM:3/4\nCDE|\nK:G\nGAB|");
        let voice = only_voice(&out.tree);
        let ms = measures(&out.tree, voice);
        assert_eq!(ms.len(), 3);
        assert_eq!(out.tree.time_signature(ms[1]).map(|t| t.numerator), Some(3));
        assert_eq!(out.tree.key_signature(ms[1]).map(|k| k.letter), Some('C'));
        assert_eq!(out.tree.key_signature(ms[2]).map(|k| k.letter), Some('G'));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[test]
    fn lyrics_follow_their_music_line() {
        let text = "X:1\nL:1/4\nK:C\nCDEF|GABc|\nw:a b c d|e f g h\ncdef|\nw:i j k l";
        let out = parse_document(text);
        let voice = only_voice(&out.tree);
        let ms = measures(&out.tree, voice);
        let first_note = out.tree.node(ms[2]).children[0];
        assert_eq!(out.tree.lyrics(first_note).next().map(|l| l.syllable.as_str()), Some("i"));
    }

    #[test]
    fn lyrics_after_a_body_field_keep_their_measure() {
        let out = parse_document("X:1\nL:1/4\nK:C\nCD\nK:G\nEF|\nGABc|\nw:x");
        let voice = only_voice(&out.tree);
        let ms = measures(&out.tree, voice);
        assert_eq!(ms.len(), 3);
        let syllable = |m: NodeId| {
            let note = out.tree.node(m).children[0];
            out.tree.lyrics(note).next().map(|l| l.syllable.clone())
        };
        assert_eq!(syllable(ms[1]), None);
        assert_eq!(syllable(ms[2]), Some("x".to_string()));
    }

    #[test]
    fn oversized_durations_warn_instead_of_panicking() {
        for text in [
            "X:1\nL:1/4\nK:C\nC999999999|",
            "X:1\nM:99999999/4\nK:C\nCDEF|",
            "X:1\nM:4294967295+1/4\nK:C\nCDEF|",
            "X:1\nL:1/999999999\nK:C\nCDEF|",
        ] {
            let out = parse_document(text);
            assert!(!out.warnings.is_empty(), "{text}");
            let voice = only_voice(&out.tree);
            assert_eq!(measures(&out.tree, voice).len(), 1, "{text}");
        }
    }

    #[test]
    fn text_without_reference_is_one_score() {
        let out = parse_document("L:1/4\nCDEF|");
        assert_eq!(out.tree.scores().count(), 1);
        let voice = only_voice(&out.tree);
        assert_eq!(measures(&out.tree, voice).len(), 1);
    }
}
