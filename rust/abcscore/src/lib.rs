//! abcscore: ABC notation parser and score layout engine.
//!
//! Text is parsed into a tick-exact [`ScoreTree`] (Root → Score → Section →
//! Voice → Measure → Element) and laid out into a positioned
//! [`LayoutTree`] (Root → Page → Block → Line → Element) for a renderer.
//!
//! # Example
//! ```no_run
//! use abcscore::{build_layout, parse_file, LayoutConfig, ScoreConfig};
//!
//! let output = parse_file("path/to/tune.abc").unwrap();
//! for warning in &output.warnings {
//!     eprintln!("{warning}");
//! }
//! let layout = build_layout(&output.tree, &LayoutConfig::default(), &ScoreConfig::default(), None);
//! println!("Layout nodes: {}", layout.len());
//! ```

pub mod error;
pub mod layout;
pub mod model;
pub mod parser;
pub mod ticks;

use std::path::Path;

pub use error::{ElementParseError, FieldError, ParseError, ParseWarning, TickError};
pub use layout::config::{LayoutConfig, MeasureNumbers, PageConfig, ScoreConfig};
pub use layout::tree::{LayoutDetail, LayoutId, LayoutKind, LayoutNode, LayoutTree};
pub use model::*;
pub use parser::tokenizer::tokenize;
pub use parser::element::{parse_element, Element};
pub use parser::{ParseContext, ParseOutput};
pub use ticks::{TimeUnit, Ticks};

/// Parse ABC text. Never fails: problems are reported as warnings.
pub fn parse(text: &str) -> ParseOutput {
    parser::parse_document(text)
}

/// Parse an ABC file from a file path.
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<ParseOutput, ParseError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    log::info!("parsing {}", path.display());
    Ok(parse(&text))
}

/// Lay out a parsed tree. `container_width` is used when the configured
/// page width is 0.
pub fn build_layout(
    tree: &ScoreTree,
    config: &LayoutConfig,
    score_config: &ScoreConfig,
    container_width: Option<f64>,
) -> LayoutTree {
    layout::build(tree, config, score_config, container_width)
}

/// Convert a data tree to a JSON string for the player.
pub fn tree_to_json(tree: &ScoreTree) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(tree)
}

/// Convert a layout to a JSON string for the renderer.
pub fn layout_to_json(layout: &LayoutTree) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(layout)
}

/// Parse ABC text and lay it out in one step.
pub fn layout_text(text: &str, config: &LayoutConfig, score_config: &ScoreConfig, container_width: Option<f64>) -> LayoutTree {
    let output = parse(text);
    build_layout(&output.tree, config, score_config, container_width)
}
