//! Layout engine: turns a [`ScoreTree`] into a positioned [`LayoutTree`].
//!
//! Structure: Root → Page → Block → Line → Element. Each score gets a title
//! block; each section gets a block whose lines are systems. A system line
//! holds one staff element per voice, a staff holds measure elements and a
//! measure holds one element per note, rest, tie, chord or tuplet.
//!
//! Widths are decided while the nodes are built, heights bottom-up in
//! [`WidthResolved::measure`], positions top-down in
//! [`HeightResolved::place`].

pub mod beam;
pub mod config;
pub mod sync;
pub mod tree;

use crate::model::{ContributorRole, LyricAlignment, NodeId, NodeKind, ScoreTree};
use crate::ticks::Ticks;

use beam::find_beam_groups;
use config::{ElementStyle, LayoutConfig, MeasureNumbers, ScoreConfig, TextStyle};
use sync::{measure_ideal_width, plan_systems, SystemPlan};
use tree::{
    ElementKind, HeightResolved, LayoutDetail, LayoutKind, LayoutTree, LyricText, Spacing, TextRole, WidthResolved,
};

const TEXT_CHAR_WIDTH_FACTOR: f64 = 0.55;

/// Estimate the rendered width of a text string for a given font size.
pub fn estimate_text_width(text: &str, font_size: f64) -> f64 {
    text.chars().count() as f64 * font_size * TEXT_CHAR_WIDTH_FACTOR
}

/// Build the layout for a whole document.
///
/// The page width is `config.page.width` when positive, else the container
/// width, else 0. With no width, lines are never broken and measures keep
/// their ideal widths. With `config.page.height > 0` blocks are split over
/// pages at system boundaries.
pub fn build(
    tree: &ScoreTree,
    config: &LayoutConfig,
    score_config: &ScoreConfig,
    container_width: Option<f64>,
) -> LayoutTree {
    let page_width = if config.page.width > 0.0 {
        config.page.width
    } else {
        container_width.filter(|w| *w > 0.0).unwrap_or(0.0)
    };
    let available = (page_width > 0.0).then(|| (page_width - config.page.padding.horizontal()).max(0.0));

    let builder = Builder { tree, config, score_config, available };
    let mut blocks = Vec::new();
    for score in tree.scores() {
        blocks.extend(builder.title_block(score.id));
        for section in tree.children_of_kind(score.id, "section") {
            blocks.extend(builder.section_block(section.id));
        }
    }

    // without a page width everything sizes to its content
    let content_width = available.unwrap_or_else(|| blocks.iter().map(|b| b.width).fold(0.0, f64::max));
    let width = content_width + config.page.padding.horizontal();
    let blocks: Vec<HeightResolved> = blocks.into_iter().map(|b| stretch(b, content_width).measure()).collect();

    let pages = paginate(blocks, config, width);
    log::debug!("layout: {} pages, width {width}", pages.len());
    let root = HeightResolved::stack(
        LayoutKind::Root,
        Some(tree.root),
        width,
        Spacing::default(),
        Spacing::default(),
        LayoutDetail::None,
        0.0,
        pages,
    );
    root.into_tree()
}

/// Blocks and lines take their parent's content width.
fn stretch(mut node: WidthResolved, width: f64) -> WidthResolved {
    if matches!(node.kind, LayoutKind::Block | LayoutKind::Line) {
        node.width = width;
        let inner = node.content_width();
        node.children = node.children.into_iter().map(|c| stretch(c, inner)).collect();
    }
    node
}

/// Distribute blocks over pages. A block that does not fit on an empty page
/// is split between its lines.
fn paginate(blocks: Vec<HeightResolved>, config: &LayoutConfig, width: f64) -> Vec<HeightResolved> {
    let padding = config.page.padding;
    let page = |children: Vec<HeightResolved>, fixed: f64| {
        HeightResolved::stack(LayoutKind::Page, None, width, padding, Spacing::default(), LayoutDetail::None, fixed, children)
    };
    if config.page.height <= 0.0 {
        return vec![page(blocks, 0.0)];
    }

    let capacity = (config.page.height - padding.vertical()).max(0.0);
    let mut pages = Vec::new();
    let mut current: Vec<HeightResolved> = Vec::new();
    let mut used = 0.0;

    let mut queue: std::collections::VecDeque<HeightResolved> = blocks.into();
    while let Some(block) = queue.pop_front() {
        let outer = block.outer_height();
        if used + outer <= capacity || (current.is_empty() && block.children.len() <= 1) {
            used += outer;
            current.push(block);
            continue;
        }
        if !current.is_empty() {
            pages.push(page(std::mem::take(&mut current), capacity));
            used = 0.0;
            if outer <= capacity {
                queue.push_front(block);
                continue;
            }
        }
        let (head, tail) = split_block(block, capacity);
        used += head.outer_height();
        current.push(head);
        if let Some(tail) = tail {
            pages.push(page(std::mem::take(&mut current), capacity));
            used = 0.0;
            queue.push_front(tail);
        }
    }
    if !current.is_empty() || pages.is_empty() {
        pages.push(page(current, capacity));
    }
    pages
}

/// Cut a block after the last line that fits into `capacity`; the first
/// line always stays.
fn split_block(block: HeightResolved, capacity: f64) -> (HeightResolved, Option<HeightResolved>) {
    let fixed = block.padding.vertical() + block.margin.top + block.margin.bottom;
    let mut used = fixed;
    let mut head = Vec::new();
    let mut rest = block.children.into_iter().peekable();
    while let Some(line) = rest.peek() {
        if !head.is_empty() && used + line.outer_height() > capacity {
            break;
        }
        used += line.outer_height();
        head.extend(rest.next());
    }
    let tail: Vec<HeightResolved> = rest.collect();
    let part = |children| {
        HeightResolved::stack(
            LayoutKind::Block,
            block.data,
            block.width,
            block.padding,
            block.margin,
            block.detail.clone(),
            0.0,
            children,
        )
    };
    let tail = (!tail.is_empty()).then(|| part(tail));
    (part(head), tail)
}

struct Builder<'a> {
    tree: &'a ScoreTree,
    config: &'a LayoutConfig,
    score_config: &'a ScoreConfig,
    /// Line width, `None` when the page has no width
    available: Option<f64>,
}

impl Builder<'_> {
    fn line_width(&self, content: f64) -> f64 {
        self.available.unwrap_or(content)
    }

    fn block(&self, data: NodeId, lines: Vec<WidthResolved>) -> WidthResolved {
        let width = lines.iter().map(|l| l.width).fold(0.0, f64::max);
        WidthResolved::new(LayoutKind::Block, width, LayoutDetail::None)
            .with_data(data)
            .with_margin(Spacing { bottom: self.config.block_spacing, ..Spacing::default() })
            .with_children(lines)
    }

    fn text_line(&self, text: String, role: TextRole, style: &TextStyle) -> WidthResolved {
        let text_width = estimate_text_width(&text, style.font_size);
        let element = WidthResolved::new(
            LayoutKind::Element,
            text_width,
            LayoutDetail::Text { text, role, font_size: style.font_size },
        )
        .with_content_height(style.line_height());
        WidthResolved::new(LayoutKind::Line, self.line_width(text_width), LayoutDetail::None)
            .with_margin(style.margin)
            .with_children(vec![element])
    }

    fn title_block(&self, score: NodeId) -> Option<WidthResolved> {
        let props = &self.tree.node(score).props;
        let mut lines = Vec::new();
        if let Some(title) = props.title.clone().filter(|_| self.config.title.visible) {
            lines.push(self.text_line(title, TextRole::Title, &self.config.title));
        }
        if let Some(subtitle) = props.subtitle.clone().filter(|_| self.config.subtitle.visible) {
            lines.push(self.text_line(subtitle, TextRole::Subtitle, &self.config.subtitle));
        }
        if self.config.contributors.visible && !props.contributors.is_empty() {
            let text = props
                .contributors
                .iter()
                .map(|c| match c.role {
                    ContributorRole::Composer => format!("Music: {}", c.name),
                    ContributorRole::Lyricist => format!("Lyrics: {}", c.name),
                })
                .collect::<Vec<_>>()
                .join("   ");
            lines.push(self.text_line(text, TextRole::Contributors, &self.config.contributors));
        }
        (!lines.is_empty()).then(|| self.block(score, lines))
    }

    fn section_block(&self, section: NodeId) -> Option<WidthResolved> {
        let voices: Vec<NodeId> = self.tree.children_of_kind(section, "voice").map(|v| v.id).collect();
        let measures: Vec<Vec<NodeId>> = voices
            .iter()
            .map(|&v| self.tree.children_of_kind(v, "measure").map(|m| m.id).collect())
            .collect();
        let ideal: Vec<Vec<f64>> = measures
            .iter()
            .map(|list| list.iter().map(|&m| self.ideal_width(m)).collect())
            .collect();
        let systems = plan_systems(&ideal, self.available, self.config.min_measure_scale);

        let mut lines = Vec::new();
        let name = match &self.tree.node(section).kind {
            NodeKind::Section(meta) => meta.name.clone(),
            _ => None,
        };
        if let Some(name) = name.filter(|n| !n.is_empty() && self.config.section_heading.visible) {
            lines.push(self.text_line(name, TextRole::SectionHeading, &self.config.section_heading));
        }
        for (index, plan) in systems.iter().enumerate() {
            lines.push(self.system_line(index, plan, &voices, &measures));
        }
        (!lines.is_empty()).then(|| self.block(section, lines))
    }

    fn ideal_width(&self, measure: NodeId) -> f64 {
        let ticks = self.tree.node(measure).duration.unwrap_or(0);
        let unit = self.tree.time_unit(measure);
        measure_ideal_width(ticks, unit.ticks_per_beat, self.config)
    }

    fn system_line(&self, system: usize, plan: &SystemPlan, voices: &[NodeId], measures: &[Vec<NodeId>]) -> WidthResolved {
        let width = plan.width();
        let staves = voices
            .iter()
            .zip(measures)
            .enumerate()
            .map(|(k, (&voice, list))| {
                let number = match &self.tree.node(voice).kind {
                    NodeKind::Voice(meta) => meta.number,
                    _ => 0,
                };
                let children = plan
                    .measures
                    .clone()
                    .zip(&plan.widths)
                    .map(|(index, &w)| {
                        let shown = match self.score_config.measure_numbers {
                            MeasureNumbers::None => false,
                            MeasureNumbers::LineStart => k == 0 && index == plan.measures.start,
                            MeasureNumbers::Every => k == 0,
                        };
                        self.measure_element(list.get(index).copied(), index, w, shown)
                    })
                    .collect();
                let spacing = if k + 1 < voices.len() { self.config.line_spacing } else { 0.0 };
                WidthResolved::new(
                    LayoutKind::Element,
                    width,
                    LayoutDetail::Staff { voice: number, system, first_system: system == 0 },
                )
                .with_data(voice)
                .with_margin(Spacing { bottom: spacing, ..Spacing::default() })
                .with_children(children)
            })
            .collect();
        WidthResolved::new(LayoutKind::Line, self.line_width(width), LayoutDetail::None)
            .with_margin(Spacing { bottom: self.config.system_spacing, ..Spacing::default() })
            .with_children(staves)
    }

    /// A measure slot. Voices with fewer measures get an empty slot so the
    /// staves keep the same width.
    fn measure_element(&self, measure: Option<NodeId>, index: usize, width: f64, shown: bool) -> WidthResolved {
        let number = shown.then_some(index + 1);
        let Some(measure) = measure else {
            return WidthResolved::new(LayoutKind::Element, width, LayoutDetail::Measure { index, number, beams: Vec::new() })
                .with_content_height(self.score_config.note.height);
        };
        let unit = self.tree.time_unit(measure);
        let beams = find_beam_groups(self.tree, measure, &unit);
        let total = self.tree.node(measure).duration.unwrap_or(0);
        let children = self.spread(measure, width, total);
        WidthResolved::new(LayoutKind::Element, width, LayoutDetail::Measure { index, number, beams })
            .with_data(measure)
            .with_content_height(self.score_config.note.height)
            .with_children(children)
    }

    /// Elements of `parent` sized in proportion to their ticks. With no
    /// ticks at all the width is shared evenly.
    fn spread(&self, parent: NodeId, width: f64, total: Ticks) -> Vec<WidthResolved> {
        let elements: Vec<NodeId> = self.tree.children(parent).filter(|n| n.kind.is_element()).map(|n| n.id).collect();
        let count = elements.len().max(1) as f64;
        elements
            .into_iter()
            .map(|id| {
                let node = self.tree.node(id);
                let ticks = node.span.map(|s| s.end - s.start).or(node.duration).unwrap_or(0);
                let w = if total > 0 { width * ticks as f64 / total as f64 } else { width / count };
                self.element(id, w)
            })
            .collect()
    }

    fn element(&self, id: NodeId, width: f64) -> WidthResolved {
        let node = self.tree.node(id);
        let (kind, style, chord_symbol): (ElementKind, &ElementStyle, Option<String>) = match &node.kind {
            NodeKind::Note(meta) => (ElementKind::Note, &self.score_config.note, meta.chord_symbol.clone()),
            NodeKind::Rest(meta) => (ElementKind::Rest, &self.score_config.rest, meta.chord_symbol.clone()),
            NodeKind::Chord(meta) => (ElementKind::Chord, &self.score_config.note, meta.chord_symbol.clone()),
            NodeKind::Tuplet(_) => (ElementKind::Tuplet, &self.score_config.note, None),
            _ => (ElementKind::Tie, &self.score_config.tie, None),
        };
        let chord_symbol = chord_symbol.filter(|_| self.score_config.chord.visible);
        let lyrics = self.lyrics(id);

        let verses = lyrics.iter().map(|l| l.verse).max().unwrap_or(0);
        let mut height = style.height + verses as f64 * self.score_config.lyric.line_height;
        if chord_symbol.is_some() {
            height += self.score_config.chord.height;
        }

        let children = match kind {
            // inner notes share the content box, inside the padding
            ElementKind::Tuplet => self.spread(id, (width - 2.0 * style.padding).max(0.0), node.duration.unwrap_or(0)),
            _ => Vec::new(),
        };
        WidthResolved::new(LayoutKind::Element, width, LayoutDetail::Element { kind, chord_symbol, lyrics })
            .with_data(id)
            .with_padding(Spacing { left: style.padding, right: style.padding, ..Spacing::default() })
            .with_content_height(height)
            .with_children(children)
    }

    fn lyrics(&self, id: NodeId) -> Vec<LyricText> {
        if !self.score_config.lyric.visible {
            return Vec::new();
        }
        let all: Vec<_> = self.tree.lyrics(id).collect();
        all.iter()
            .enumerate()
            .map(|(i, lyric)| {
                let next_same_verse = all[i + 1..].iter().any(|l| l.verse == lyric.verse);
                LyricText {
                    verse: lyric.verse,
                    text: if lyric.skip { String::new() } else { lyric.syllable.clone() },
                    hyphen: lyric.alignment == LyricAlignment::SyllableSplit && next_same_verse,
                    held: lyric.held,
                }
            })
            .collect()
    }
}
