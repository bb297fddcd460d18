//! Structural comparison of expected and actual results
//!
//! Every difference is reported; nothing short-circuits after the first one.

use lsp_types::{Hover, HoverContents, Location, MarkedString, MarkupContent, Range};
use std::fmt;

/// One difference between an expected and an actual result
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// The server returned no hover at all
    MissingHover,
    HoverRange {
        expected: Option<Range>,
        actual: Option<Range>,
    },
    HoverBlockCount {
        expected: usize,
        actual: usize,
    },
    HoverBlock {
        index: usize,
        expected: String,
        actual: String,
    },
    LocationCount {
        expected: usize,
        actual: usize,
    },
    Location {
        index: usize,
        expected: Location,
        actual: Location,
    },
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mismatch::MissingHover => write!(f, "expected a hover result, got none"),
            Mismatch::HoverRange { expected, actual } => write!(
                f,
                "Range: expected {} got {}",
                display_range(expected.as_ref()),
                display_range(actual.as_ref())
            ),
            Mismatch::HoverBlockCount { expected, actual } => {
                write!(f, "len(Contents): expected {expected} got {actual}")
            }
            Mismatch::HoverBlock {
                index,
                expected,
                actual,
            } => write!(f, "Content[{index}]: expected {expected} got {actual}"),
            Mismatch::LocationCount { expected, actual } => {
                write!(f, "len(Location): expected {expected} got {actual}")
            }
            Mismatch::Location {
                index,
                expected,
                actual,
            } => write!(
                f,
                "Location[{index}]: expected {} got {}",
                display_location(expected),
                display_location(actual)
            ),
        }
    }
}

/// Hover content normalised to a list of blocks
#[derive(Debug, PartialEq)]
enum ContentBlock<'a> {
    Marked(&'a MarkedString),
    Markup(&'a MarkupContent),
}

fn content_blocks(contents: &HoverContents) -> Vec<ContentBlock<'_>> {
    match contents {
        HoverContents::Scalar(block) => vec![ContentBlock::Marked(block)],
        HoverContents::Array(blocks) => blocks.iter().map(ContentBlock::Marked).collect(),
        HoverContents::Markup(markup) => vec![ContentBlock::Markup(markup)],
    }
}

/// Compare range and every content block, in order
pub fn compare_hover(expected: &Hover, actual: Option<&Hover>) -> Vec<Mismatch> {
    let Some(actual) = actual else {
        return vec![Mismatch::MissingHover];
    };

    let mut mismatches = Vec::new();

    if expected.range != actual.range {
        mismatches.push(Mismatch::HoverRange {
            expected: expected.range,
            actual: actual.range,
        });
    }

    let expected_blocks = content_blocks(&expected.contents);
    let actual_blocks = content_blocks(&actual.contents);
    if expected_blocks.len() != actual_blocks.len() {
        mismatches.push(Mismatch::HoverBlockCount {
            expected: expected_blocks.len(),
            actual: actual_blocks.len(),
        });
    }

    for (index, (want, got)) in expected_blocks.iter().zip(&actual_blocks).enumerate() {
        if want != got {
            mismatches.push(Mismatch::HoverBlock {
                index,
                expected: format!("{want:?}"),
                actual: format!("{got:?}"),
            });
        }
    }

    mismatches
}

/// Exact, ordered comparison of two location lists
pub fn compare_locations(expected: &[Location], actual: &[Location]) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();

    if expected.len() != actual.len() {
        mismatches.push(Mismatch::LocationCount {
            expected: expected.len(),
            actual: actual.len(),
        });
    }

    for (index, (want, got)) in expected.iter().zip(actual).enumerate() {
        if want != got {
            mismatches.push(Mismatch::Location {
                index,
                expected: want.clone(),
                actual: got.clone(),
            });
        }
    }

    mismatches
}

fn display_range(range: Option<&Range>) -> String {
    match range {
        Some(r) => format!(
            "{}:{}-{}:{}",
            r.start.line, r.start.character, r.end.line, r.end.character
        ),
        None => "<none>".to_string(),
    }
}

fn display_location(location: &Location) -> String {
    format!(
        "{}@{}",
        location.uri.as_str(),
        display_range(Some(&location.range))
    )
}
