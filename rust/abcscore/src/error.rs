//! Error taxonomy for parsing.
//!
//! Nothing below the document level aborts a parse: element, field and
//! voice errors are downgraded to [`ParseWarning`]s at the smallest
//! enclosing parser and the offending piece is skipped.

use serde::Serialize;
use thiserror::Error;

/// A token matched no element grammar rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElementParseError {
    #[error("empty token")]
    Empty,

    #[error("unrecognized token '{0}'")]
    Unrecognized(String),

    #[error("invalid duration '{duration}' in '{token}'")]
    Duration { token: String, duration: String },

    #[error("tuplet '{token}' declares {expected} notes but has {found}")]
    TupletArity {
        token: String,
        expected: usize,
        found: usize,
    },
}

/// A header field value is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("malformed {tag}: field '{value}'")]
    FieldFormat { tag: char, value: String },

    #[error("cannot parse key signature '{0}'")]
    KeySignature(String),

    #[error("cannot parse time signature '{0}'")]
    TimeSignature(String),

    #[error("cannot parse tempo '{0}'")]
    Tempo(String),

    #[error("cannot parse note length '{0}'")]
    NoteLength(String),

    #[error("cannot parse voice definition '{0}'")]
    Voice(String),
}

/// A note value cannot be represented at the current tick resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickError {
    #[error("{numerator}/{denominator} of a whole note is not a whole number of ticks at {ticks_per_whole} per whole")]
    Inexact {
        numerator: u32,
        denominator: u32,
        ticks_per_whole: u32,
    },

    #[error("{numerator}/{denominator} of a whole note does not fit in a tick count at {ticks_per_whole} per whole")]
    TooLong {
        numerator: u32,
        denominator: u32,
        ticks_per_whole: u32,
    },
}

/// Everything that can go wrong while turning notation text into a tree.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(#[from] ElementParseError),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Tick(#[from] TickError),

    #[error("measure {index}: {message}")]
    MeasureDuration { index: usize, message: String },

    #[error("voice skipped: {0}")]
    VoiceParse(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A recoverable problem found while parsing, with its source line (1-based)
/// when one is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseWarning {
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}
