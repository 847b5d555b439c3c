//! Integration tests: parse the sample files in the sheetmusic/ directory.

use abcscore::{
    parse, parse_file, tree_to_json, BarlineStyle, ContributorRole, LyricAlignment, NodeId, NodeKind, ParseError,
    ParseOutput, ScoreTree,
};
use pretty_assertions::assert_eq;
use std::path::PathBuf;

/// Sample files live at the workspace root.
fn sheetmusic_dir() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    // rust/abcscore -> ../../sheetmusic
    manifest_dir.join("../../sheetmusic")
}

fn load(name: &str) -> ParseOutput {
    let path = sheetmusic_dir().join(name);
    parse_file(&path).unwrap_or_else(|e| panic!("Failed to parse {name}: {e}"))
}

fn kids(tree: &ScoreTree, id: NodeId, kind: &str) -> Vec<NodeId> {
    tree.children_of_kind(id, kind).map(|n| n.id).collect()
}

fn durations(tree: &ScoreTree, measure: NodeId) -> Vec<u32> {
    tree.children(measure).filter_map(|n| n.duration).collect()
}

fn measure_meta(tree: &ScoreTree, measure: NodeId) -> &abcscore::MeasureMeta {
    match &tree.node(measure).kind {
        NodeKind::Measure(meta) => meta,
        other => panic!("expected a measure, got {other:?}"),
    }
}

// ─── Single voice ───────────────────────────────────────────────────

#[test]
fn parse_scale() {
    let out = load("scale.abc");
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    let tree = &out.tree;

    let scores: Vec<_> = tree.scores().collect();
    assert_eq!(scores.len(), 1);
    assert_eq!(scores[0].props.title.as_deref(), Some("Test"));

    let section = kids(tree, scores[0].id, "section")[0];
    let voice = kids(tree, section, "voice")[0];
    let measures = kids(tree, voice, "measure");
    assert_eq!(measures.len(), 2);

    let ts = tree.time_signature(measures[0]).expect("time signature");
    assert_eq!((ts.numerator, ts.denominator), (4, 4));
    let unit = tree.time_unit(measures[0]);
    assert_eq!((unit.ticks_per_whole, unit.ticks_per_beat), (48, 12));

    assert_eq!(durations(tree, measures[0]), vec![12, 12, 12, 12]);
    assert_eq!(durations(tree, measures[1]), vec![24, 24]);
    for &m in &measures {
        let validation = &measure_meta(tree, m).validation;
        assert!(validation.valid);
        assert_eq!(validation.expected, 48);
    }
}

// ─── Sections, voices, lyrics ───────────────────────────────────────

#[test]
fn parse_two_voices() {
    let out = load("two-voices.abc");
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    let tree = &out.tree;

    match &tree.root_node().kind {
        NodeKind::Root(meta) => assert_eq!(meta.directives.get("abc-charset").map(String::as_str), Some("utf-8")),
        other => panic!("{other:?}"),
    }

    let score = tree.scores().next().expect("score");
    assert_eq!(score.props.title.as_deref(), Some("Morning Song"));
    assert_eq!(score.props.subtitle.as_deref(), Some("for two voices"));
    let roles: Vec<_> = score.props.contributors.iter().map(|c| (c.role, c.name.as_str())).collect();
    assert_eq!(roles, vec![(ContributorRole::Lyricist, "Li Bai"), (ContributorRole::Composer, "Wang Wei")]);
    assert_eq!(score.props.tempo.as_ref().map(|t| t.value), Some(96));
    match &score.kind {
        NodeKind::Score(meta) => {
            assert_eq!(meta.reference, Some(7));
            assert_eq!(meta.fields.get("origin"), Some(&vec!["China".to_string()]));
        }
        other => panic!("{other:?}"),
    }

    let sections = kids(tree, score.id, "section");
    let names: Vec<_> = sections
        .iter()
        .map(|&s| match &tree.node(s).kind {
            NodeKind::Section(meta) => meta.name.clone(),
            _ => None,
        })
        .collect();
    assert_eq!(names, vec![Some("Verse".to_string()), Some("Chorus".to_string())]);

    let verse_voices = kids(tree, sections[0], "voice");
    let voice_names: Vec<_> = verse_voices
        .iter()
        .map(|&v| match &tree.node(v).kind {
            NodeKind::Voice(meta) => (meta.number, meta.name.clone(), meta.clef.clone()),
            _ => panic!("voice expected"),
        })
        .collect();
    assert_eq!(
        voice_names,
        vec![
            (1, Some("Melody".to_string()), Some("treble".to_string())),
            (2, Some("Bass".to_string()), Some("bass".to_string())),
        ]
    );

    // every measure of 3/4 with L:1/8 holds 72 ticks
    for &voice in &verse_voices {
        let measures = kids(tree, voice, "measure");
        assert_eq!(measures.len(), 4);
        assert!(measures.iter().all(|&m| tree.node(m).duration == Some(72)));
        assert_eq!(measure_meta(tree, measures[3]).barline, BarlineStyle::Final);
    }

    // lyrics: split words stay on one note, tuplet notes take skips
    let melody = kids(tree, verse_voices[0], "measure");
    let first = tree.node(melody[0]).children[0];
    let syllables: Vec<_> = tree.lyrics(first).map(|l| (l.syllable.as_str(), l.alignment)).collect();
    assert_eq!(
        syllables,
        vec![("Morn", LyricAlignment::SyllableSplit), ("ing", LyricAlignment::SyllableSplit)]
    );
    let tuplet = tree.node(melody[2]).children[1];
    assert!(matches!(tree.node(tuplet).kind, NodeKind::Tuplet(_)));
    for &inner in &tree.node(tuplet).children {
        assert!(tree.lyrics(inner).all(|l| l.skip));
    }
    match &tree.node(tree.node(melody[1]).children[0]).kind {
        NodeKind::Note(meta) => assert_eq!(meta.chord_symbol.as_deref(), Some("C")),
        other => panic!("{other:?}"),
    }

    // chorus: key change and repeats
    let chorus_melody = kids(tree, kids(tree, sections[1], "voice")[0], "measure");
    assert_eq!(tree.key_signature(chorus_melody[0]).map(|k| k.letter), Some('D'));
    assert_eq!(tree.key_signature(melody[0]).map(|k| k.letter), Some('G'));
    let barlines: Vec<_> = chorus_melody.iter().map(|&m| measure_meta(tree, m).barline).collect();
    assert_eq!(barlines, vec![BarlineStyle::RepeatStart, BarlineStyle::RepeatEnd]);
}

// ─── Recoverable errors ─────────────────────────────────────────────

#[test]
fn parse_malformed() {
    let out = load("malformed.abc");
    let tree = &out.tree;

    let mut lines: Vec<_> = out.warnings.iter().filter_map(|w| w.line).collect();
    lines.sort_unstable();
    assert_eq!(lines, vec![5, 6, 7, 8]);

    let score = tree.scores().next().expect("score");
    let voices: Vec<_> = tree
        .children(kids(tree, score.id, "section")[0])
        .map(|v| v.id)
        .collect();
    assert_eq!(voices.len(), 1, "lines after a bad V: are skipped");

    let measures = kids(tree, voices[0], "measure");
    assert_eq!(measures.len(), 3);
    let short = &measure_meta(tree, measures[0]).validation;
    assert!(!short.valid);
    assert_eq!((short.actual, short.expected), (36, 48));
    assert!(short.error.is_some());
    // the unknown `>` is dropped, the rest of the measure survives
    assert_eq!(durations(tree, measures[2]), vec![12, 12, 12, 12]);
    // bad key keeps the default
    assert_eq!(tree.key_signature(measures[0]), None);
}

#[test]
fn missing_file_is_an_io_error() {
    match parse_file(sheetmusic_dir().join("does-not-exist.abc")) {
        Err(ParseError::Io { path, .. }) => assert!(path.ends_with("does-not-exist.abc")),
        other => panic!("expected an I/O error, got {other:?}"),
    }
}

// ─── Properties ─────────────────────────────────────────────────────

#[test]
fn parsing_is_idempotent() {
    for name in ["scale.abc", "two-voices.abc", "malformed.abc"] {
        let text = std::fs::read_to_string(sheetmusic_dir().join(name)).unwrap();
        assert_eq!(parse(&text), parse(&text), "{name}");
    }
}

#[test]
fn tree_json_carries_types_and_durations() {
    let out = load("scale.abc");
    let json = tree_to_json(&out.tree).expect("json");
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let nodes = value["nodes"].as_array().unwrap();
    let types: Vec<&str> = nodes.iter().filter_map(|n| n["type"].as_str()).collect();
    assert_eq!(&types[..5], &["root", "score", "section", "voice", "measure"]);
    let notes: Vec<u64> = nodes
        .iter()
        .filter(|n| n["type"] == "note")
        .filter_map(|n| n["duration"].as_u64())
        .collect();
    assert_eq!(notes, vec![12, 12, 12, 12, 24, 24]);
}
