//! Layout tree and the node types of the three layout phases.
//!
//! Builders produce [`WidthResolved`] nodes (children built).
//! [`WidthResolved::measure`] turns a subtree into [`HeightResolved`] nodes
//! bottom-up, and [`HeightResolved::place`] writes positioned nodes into the
//! [`LayoutTree`] arena top-down. Each phase consumes the previous one, so no step can read a
//! value that has not been computed yet.

use serde::{Deserialize, Serialize};

use super::beam::BeamGroup;
use crate::model::NodeId;

/// Box edge sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Spacing {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Spacing {
    pub fn uniform(value: f64) -> Self {
        Self { top: value, right: value, bottom: value, left: value }
    }

    pub fn horizontal(&self) -> f64 {
        self.left + self.right
    }

    pub fn vertical(&self) -> f64 {
        self.top + self.bottom
    }
}

/// Position relative to the parent's content box, plus size and spacing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub padding: Spacing,
    pub margin: Spacing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Root,
    Page,
    Block,
    Line,
    Element,
}

impl LayoutKind {
    /// Root, Page, Block and Line stack their children top to bottom;
    /// Element lays them out left to right.
    pub fn stacks_vertically(self) -> bool {
        !matches!(self, LayoutKind::Element)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextRole {
    Title,
    Subtitle,
    Contributors,
    SectionHeading,
}

/// Which data element a note-level layout node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Note,
    Rest,
    Tie,
    Chord,
    Tuplet,
}

/// A lyric syllable drawn under an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LyricText {
    pub verse: u32,
    pub text: String,
    /// Followed by a hyphen to the next syllable
    pub hyphen: bool,
    pub held: bool,
}

/// Renderer hints carried by a layout node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayoutDetail {
    None,
    Text {
        text: String,
        role: TextRole,
        font_size: f64,
    },
    Staff {
        voice: u32,
        /// Index of the system within its section
        system: usize,
        first_system: bool,
    },
    Measure {
        index: usize,
        /// Displayed measure number (1-based), when numbers are shown here
        number: Option<usize>,
        beams: Vec<BeamGroup>,
    },
    Element {
        kind: ElementKind,
        chord_symbol: Option<String>,
        lyrics: Vec<LyricText>,
    },
}

/// Index of a node in its [`LayoutTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LayoutId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutNode {
    pub id: LayoutId,
    #[serde(rename = "type")]
    pub kind: LayoutKind,
    /// Data-tree node this box draws; `None` for synthetic nodes
    pub data: Option<NodeId>,
    pub layout: Rect,
    pub detail: LayoutDetail,
    #[serde(skip)]
    pub parent: Option<LayoutId>,
    pub children: Vec<LayoutId>,
}

/// A fully positioned layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutTree {
    pub root: LayoutId,
    pub nodes: Vec<LayoutNode>,
}

impl LayoutTree {
    pub fn node(&self, id: LayoutId) -> &LayoutNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: LayoutId) -> Option<&LayoutNode> {
        self.nodes.get(id.0)
    }

    pub fn root_node(&self) -> &LayoutNode {
        self.node(self.root)
    }

    pub fn children(&self, id: LayoutId) -> impl Iterator<Item = &LayoutNode> + '_ {
        self.node(id).children.iter().map(move |&c| self.node(c))
    }

    /// Page-absolute position of a node's top-left corner.
    pub fn absolute_position(&self, id: LayoutId) -> (f64, f64) {
        let mut x = 0.0;
        let mut y = 0.0;
        let mut next = Some(id);
        while let Some(current) = next {
            let node = self.node(current);
            x += node.layout.x;
            y += node.layout.y;
            next = node.parent;
            if let Some(parent) = next {
                let padding = self.node(parent).layout.padding;
                x += padding.left;
                y += padding.top;
            }
        }
        (x, y)
    }

    /// Nodes of one kind in depth-first order.
    pub fn nodes_of_kind(&self, kind: LayoutKind) -> impl Iterator<Item = &LayoutNode> + '_ {
        let mut stack = vec![self.root];
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            let node = self.node(id);
            stack.extend(node.children.iter().rev().copied());
            Some(node)
        })
        .filter(move |n| n.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Phases
// ═══════════════════════════════════════════════════════════════════════

/// Phase 1: width resolved, children built.
#[derive(Debug, Clone, PartialEq)]
pub struct WidthResolved {
    pub kind: LayoutKind,
    pub data: Option<NodeId>,
    pub width: f64,
    pub padding: Spacing,
    pub margin: Spacing,
    pub detail: LayoutDetail,
    /// Height of the node's own content, used when it is taller than what
    /// its children need
    pub content_height: f64,
    pub children: Vec<WidthResolved>,
}

impl WidthResolved {
    pub fn new(kind: LayoutKind, width: f64, detail: LayoutDetail) -> Self {
        Self {
            kind,
            data: None,
            width,
            padding: Spacing::default(),
            margin: Spacing::default(),
            detail,
            content_height: 0.0,
            children: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: NodeId) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_margin(mut self, margin: Spacing) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_padding(mut self, padding: Spacing) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_content_height(mut self, height: f64) -> Self {
        self.content_height = height;
        self
    }

    pub fn with_children(mut self, children: Vec<WidthResolved>) -> Self {
        self.children = children;
        self
    }

    /// Width available to children.
    pub fn content_width(&self) -> f64 {
        (self.width - self.padding.horizontal()).max(0.0)
    }

    /// Phase 2: resolve heights bottom-up.
    pub fn measure(self) -> HeightResolved {
        let children = self.children.into_iter().map(WidthResolved::measure).collect();
        HeightResolved::stack(self.kind, self.data, self.width, self.padding, self.margin, self.detail, self.content_height, children)
    }
}

/// Phase 2: width and height resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightResolved {
    pub kind: LayoutKind,
    pub data: Option<NodeId>,
    pub width: f64,
    pub height: f64,
    pub padding: Spacing,
    pub margin: Spacing,
    pub detail: LayoutDetail,
    pub children: Vec<HeightResolved>,
}

impl HeightResolved {
    /// Build a measured node from measured children. The height is the
    /// largest `offset + height + margin.bottom` over the children in the
    /// node's stacking direction, plus padding.
    #[allow(clippy::too_many_arguments)]
    pub fn stack(
        kind: LayoutKind,
        data: Option<NodeId>,
        width: f64,
        padding: Spacing,
        margin: Spacing,
        detail: LayoutDetail,
        content_height: f64,
        children: Vec<HeightResolved>,
    ) -> Self {
        let inner = if kind.stacks_vertically() {
            children.iter().map(HeightResolved::outer_height).sum::<f64>()
        } else {
            children.iter().map(HeightResolved::outer_height).fold(0.0, f64::max)
        };
        Self {
            kind,
            data,
            width,
            height: inner.max(content_height) + padding.vertical(),
            padding,
            margin,
            detail,
            children,
        }
    }

    /// Height including vertical margins.
    pub fn outer_height(&self) -> f64 {
        self.margin.top + self.height + self.margin.bottom
    }

    /// Phase 3: assign positions top-down and write the subtree into the
    /// arena. `x`/`y` are relative to the parent's content box.
    pub fn place(self, tree: &mut LayoutTree, parent: Option<LayoutId>, x: f64, y: f64) -> LayoutId {
        let id = LayoutId(tree.nodes.len());
        tree.nodes.push(LayoutNode {
            id,
            kind: self.kind,
            data: self.data,
            layout: Rect { x, y, width: self.width, height: self.height, padding: self.padding, margin: self.margin },
            detail: self.detail,
            parent,
            children: Vec::new(),
        });

        let vertical = self.kind.stacks_vertically();
        let mut cursor = 0.0;
        let mut children = Vec::with_capacity(self.children.len());
        for child in self.children {
            let (cx, cy) = if vertical {
                (child.margin.left, cursor + child.margin.top)
            } else {
                (cursor + child.margin.left, child.margin.top)
            };
            cursor = if vertical {
                cy + child.height + child.margin.bottom
            } else {
                cx + child.width + child.margin.right
            };
            children.push(child.place(tree, Some(id), cx, cy));
        }
        tree.nodes[id.0].children = children;
        id
    }

    /// Place this node as the root of a new tree at (0, 0).
    pub fn into_tree(self) -> LayoutTree {
        let mut tree = LayoutTree { root: LayoutId(0), nodes: Vec::new() };
        self.place(&mut tree, None, 0.0, 0.0);
        tree
    }
}
