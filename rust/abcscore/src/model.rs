//! Data model for a parsed notation document.
//!
//! The document is an arena of [`Node`]s addressed by [`NodeId`]. Each node
//! owns an ordered list of child ids and keeps a plain parent id, so the tree
//! has no reference cycles. Inheritable musical properties live in [`Props`]
//! and are resolved by walking parents ([`ScoreTree::lookup`]); everything
//! specific to one kind of node lives in that kind's metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ticks::{MeasureValidation, NoteValue, Ticks, TimeUnit};

// ═══════════════════════════════════════════════════════════════════════
// Musical value types
// ═══════════════════════════════════════════════════════════════════════

/// Time signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub numerator: u32,
    /// Denominator (e.g., 4 in 3/4)
    pub denominator: u32,
}

/// Accidental attached to a note or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Accidental {
    Sharp,
    DoubleSharp,
    Flat,
    DoubleFlat,
    Natural,
}

impl Accidental {
    /// Chromatic alteration in semitones.
    pub fn semitones(self) -> i32 {
        match self {
            Accidental::Sharp => 1,
            Accidental::DoubleSharp => 2,
            Accidental::Flat => -1,
            Accidental::DoubleFlat => -2,
            Accidental::Natural => 0,
        }
    }
}

/// Key mode. Church modes are accepted alongside major and minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    /// Fifths offset of this mode relative to the major key on the same tonic.
    fn fifths_offset(self) -> i32 {
        match self {
            Mode::Major => 0,
            Mode::Lydian => 1,
            Mode::Mixolydian => -1,
            Mode::Dorian => -2,
            Mode::Minor => -3,
            Mode::Phrygian => -4,
            Mode::Locrian => -5,
        }
    }
}

/// Key signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    /// Tonic letter, upper case A–G
    pub letter: char,
    /// Sharp or flat on the tonic, if any
    pub symbol: Option<Accidental>,
    pub mode: Mode,
}

impl KeySignature {
    pub fn c_major() -> Self {
        Self { letter: 'C', symbol: None, mode: Mode::Major }
    }

    /// Number of sharps (positive) or flats (negative).
    pub fn fifths(&self) -> i32 {
        let base = match self.letter {
            'C' => 0,
            'G' => 1,
            'D' => 2,
            'A' => 3,
            'E' => 4,
            'B' => 5,
            'F' => -1,
            _ => 0,
        };
        let alter = self.symbol.map_or(0, |a| a.semitones() * 7);
        base + alter + self.mode.fifths_offset()
    }
}

/// Tempo marking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tempo {
    /// Beats per minute
    pub value: u32,
    /// Note value that receives one beat
    pub unit: NoteValue,
    /// Free text such as "Allegro"
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributorRole {
    Composer,
    Lyricist,
}

/// A person credited in the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contributor {
    pub role: ContributorRole,
    pub name: String,
}

/// A voice declared with `V:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceDef {
    pub number: u32,
    pub name: Option<String>,
    pub clef: Option<String>,
    pub transpose: Option<i32>,
}

/// Pitch of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name, upper case A–G
    pub letter: char,
    pub accidental: Option<Accidental>,
    /// Octave number (middle C = C4)
    pub octave: i32,
}

impl Pitch {
    /// Convert pitch to MIDI note number.
    /// Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.letter {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            'B' => 11,
            _ => 0,
        };
        let alter = self.accidental.map_or(0, Accidental::semitones);
        (self.octave + 1) * 12 + step_semitone + alter
    }
}

/// Barline closing a measure, including repeat markings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BarlineStyle {
    Single,
    Double,
    Final,
    RepeatStart,
    RepeatEnd,
    RepeatBoth,
}

/// How a lyric token maps onto notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LyricAlignment {
    Normal,
    Skip,
    SyllableSplit,
    MultiSyllable,
    MultiWord,
}

// ═══════════════════════════════════════════════════════════════════════
// Inheritable properties
// ═══════════════════════════════════════════════════════════════════════

/// Musical properties inherited by descendants unless overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Props {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_signature: Option<TimeSignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_signature: Option<KeySignature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<Tempo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_unit: Option<TimeUnit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_length: Option<NoteValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub voices: Vec<VoiceDef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contributors: Vec<Contributor>,
}

impl Props {
    /// Add or replace a voice definition, keeping first-definition order.
    pub fn define_voice(&mut self, def: VoiceDef) {
        match self.voices.iter_mut().find(|v| v.number == def.number) {
            Some(existing) => *existing = def,
            None => self.voices.push(def),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Props::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Per-kind metadata
// ═══════════════════════════════════════════════════════════════════════

/// File-level `%%directive value` lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileMeta {
    pub directives: BTreeMap<String, String>,
}

/// Score (tune) metadata that is not inherited.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScoreMeta {
    /// `X:` reference number
    pub reference: Option<u32>,
    /// Informational fields (origin, area, notes, ...) in document order
    pub fields: BTreeMap<String, Vec<String>>,
    /// `clef=` modifier from `K:`
    pub clef: Option<String>,
    /// `transpose=` modifier from `K:`
    pub transpose: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SectionMeta {
    /// `S:` identifier; `None` for the implicit section
    pub name: Option<String>,
    pub fields: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceMeta {
    pub number: u32,
    pub name: Option<String>,
    pub clef: Option<String>,
    pub transpose: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasureMeta {
    /// 0-based index within the voice
    pub index: usize,
    pub barline: BarlineStyle,
    /// Voice named by an inline `[V:n]`
    pub voice_override: Option<u32>,
    pub validation: MeasureValidation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteMeta {
    pub pitch: Pitch,
    pub dots: u32,
    pub decorations: Vec<String>,
    pub chord_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestMeta {
    pub dots: u32,
    /// `x` rests take time but are not drawn
    pub invisible: bool,
    pub chord_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TupletMeta {
    /// Declared note count, e.g. 3 for `(3`
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChordMeta {
    pub dots: u32,
    pub chord_symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LyricMeta {
    pub syllable: String,
    pub alignment: LyricAlignment,
    /// `*` placeholder: occupies the note, no text
    pub skip: bool,
    pub verse: u32,
    /// Followed by `_` (syllable held over further notes)
    pub held: bool,
}

/// Node type with its kind-specific metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "meta", rename_all = "lowercase")]
pub enum NodeKind {
    Root(FileMeta),
    Score(ScoreMeta),
    Section(SectionMeta),
    Voice(VoiceMeta),
    Measure(MeasureMeta),
    Note(NoteMeta),
    Rest(RestMeta),
    Tie,
    Tuplet(TupletMeta),
    Chord(ChordMeta),
    Lyric(LyricMeta),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root(_) => "root",
            NodeKind::Score(_) => "score",
            NodeKind::Section(_) => "section",
            NodeKind::Voice(_) => "voice",
            NodeKind::Measure(_) => "measure",
            NodeKind::Note(_) => "note",
            NodeKind::Rest(_) => "rest",
            NodeKind::Tie => "tie",
            NodeKind::Tuplet(_) => "tuplet",
            NodeKind::Chord(_) => "chord",
            NodeKind::Lyric(_) => "lyric",
        }
    }

    /// Elements that take a place inside a measure.
    pub fn is_element(&self) -> bool {
        matches!(
            self,
            NodeKind::Note(_) | NodeKind::Rest(_) | NodeKind::Tie | NodeKind::Tuplet(_) | NodeKind::Chord(_)
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tree
// ═══════════════════════════════════════════════════════════════════════

/// Index of a node in its [`ScoreTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NodeId(pub usize);

/// Start/end offsets of an element within its measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickSpan {
    pub start: Ticks,
    pub end: Ticks,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: NodeId,
    /// Source text this node was parsed from
    pub origin: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Ticks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<TickSpan>,
    #[serde(skip_serializing_if = "Props::is_empty")]
    pub props: Props,
    #[serde(skip)]
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// A parsed document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreTree {
    pub root: NodeId,
    pub nodes: Vec<Node>,
}

impl ScoreTree {
    /// Create a tree holding only a root node.
    pub fn new(meta: FileMeta) -> Self {
        let root = Node {
            id: NodeId(0),
            origin: String::new(),
            kind: NodeKind::Root(meta),
            duration: None,
            span: None,
            props: Props::default(),
            parent: None,
            children: Vec::new(),
        };
        Self { root: NodeId(0), nodes: vec![root] }
    }

    /// Append a node as the last child of `parent`.
    pub(crate) fn push(&mut self, parent: NodeId, kind: NodeKind, origin: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            origin: origin.into(),
            kind,
            duration: None,
            span: None,
            props: Props::default(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn root_node(&self) -> &Node {
        self.node(self.root)
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        self.node(id).children.iter().map(move |&c| self.node(c))
    }

    /// The node itself followed by its ancestors up to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = &Node> + '_ {
        let mut next = Some(id);
        std::iter::from_fn(move || {
            let node = self.node(next?);
            next = node.parent;
            Some(node)
        })
    }

    /// Resolve an inherited property: the nearest node (self first) whose
    /// props yield a value.
    pub fn lookup<'a, T: 'a>(
        &'a self,
        id: NodeId,
        select: impl Fn(&'a Props) -> Option<T>,
    ) -> Option<T> {
        self.ancestors(id).find_map(|node| select(&node.props))
    }

    pub fn time_signature(&self, id: NodeId) -> Option<TimeSignature> {
        self.lookup(id, |p| p.time_signature)
    }

    pub fn key_signature(&self, id: NodeId) -> Option<KeySignature> {
        self.lookup(id, |p| p.key_signature)
    }

    /// Effective tick resolution, falling back to the ABC defaults.
    pub fn time_unit(&self, id: NodeId) -> TimeUnit {
        self.lookup(id, |p| p.time_unit).unwrap_or_else(|| {
            let ts = self.time_signature(id);
            TimeUnit::new(crate::ticks::default_note_length(ts.as_ref()), ts.as_ref())
        })
    }

    pub fn tempo(&self, id: NodeId) -> Option<&Tempo> {
        self.lookup(id, |p| p.tempo.as_ref())
    }

    /// Children of `id` with the given kind name ("score", "voice", ...).
    pub fn children_of_kind<'a>(&'a self, id: NodeId, kind: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children(id).filter(move |n| n.kind.name() == kind)
    }

    pub fn scores(&self) -> impl Iterator<Item = &Node> + '_ {
        self.children_of_kind(self.root, "score")
    }

    /// Lyric nodes attached to an element.
    pub fn lyrics(&self, id: NodeId) -> impl Iterator<Item = &LyricMeta> + '_ {
        self.children(id).filter_map(|n| match &n.kind {
            NodeKind::Lyric(meta) => Some(meta),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }
}
