//! Regression fixtures
//!
//! A fixture set pairs one repository with the hover, definition and
//! references cases recorded against it. Sets are JSON documents compiled
//! into the binary. Expected URIs may start with `${workspace}`, which is
//! replaced by the `file://` URI of the checked-out repository at load time.

pub mod compare;

use crate::lsp::types::DocumentPositionParams;
use lsp_types::{Hover, Location};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use url::Url;

/// Placeholder for the workspace URI inside expected locations
pub const WORKSPACE_PLACEHOLDER: &str = "${workspace}";

const PYTHON_FIXTURES: &str = include_str!("../../fixtures/python.json");
const SAMPLE_FIXTURES: &str = include_str!("../../fixtures/sample.json");

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("no fixtures for language {0:?}")]
    UnknownLanguage(String),

    #[error("invalid fixture document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("cannot resolve workspace {}: {source}", .path.display())]
    Workspace { path: PathBuf, source: io::Error },

    #[error("workspace {} has no file:// URI", .0.display())]
    WorkspaceUri(PathBuf),
}

/// One recorded hover expectation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HoverCase {
    pub file: String,
    pub line: u32,
    pub character: u32,
    pub expected: Hover,
}

/// One recorded definition or references expectation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationCase {
    pub file: String,
    pub line: u32,
    pub character: u32,
    pub expected: Vec<Location>,
}

impl HoverCase {
    pub fn to_request_params(&self) -> DocumentPositionParams {
        DocumentPositionParams::new(&self.file, self.line, self.character)
    }
}

impl LocationCase {
    pub fn to_request_params(&self) -> DocumentPositionParams {
        DocumentPositionParams::new(&self.file, self.line, self.character)
    }
}

/// All cases recorded for one repository
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureSet {
    pub language: String,
    pub repo: String,

    /// `<base>/<repo>`; filled in at load time
    #[serde(skip)]
    pub workspace: PathBuf,

    #[serde(default)]
    pub hover_cases: Vec<HoverCase>,
    #[serde(default)]
    pub definition_cases: Vec<LocationCase>,
    #[serde(default)]
    pub references_cases: Vec<LocationCase>,
}

#[derive(Deserialize)]
struct FixtureHeader {
    repo: String,
}

impl FixtureSet {
    /// The fixture set compiled in for `language`, rooted under `base`
    pub fn builtin(language: &str, base: &Path) -> Result<Self, FixtureError> {
        let raw = match language {
            "python" => PYTHON_FIXTURES,
            "sample" => SAMPLE_FIXTURES,
            other => return Err(FixtureError::UnknownLanguage(other.to_string())),
        };
        Self::parse(raw, base)
    }

    /// Parse a fixture document whose repository lives under `base`
    ///
    /// A relative `base` is resolved against the current directory.
    pub fn parse(raw: &str, base: &Path) -> Result<Self, FixtureError> {
        let header: FixtureHeader = serde_json::from_str(raw)?;
        let workspace = std::path::absolute(base.join(&header.repo)).map_err(|source| {
            FixtureError::Workspace {
                path: base.to_path_buf(),
                source,
            }
        })?;
        let uri = Url::from_file_path(&workspace)
            .map_err(|()| FixtureError::WorkspaceUri(workspace.clone()))?;

        // Substitute inside the JSON text so the result is still valid JSON.
        let quoted = serde_json::to_string(uri.as_str())?;
        let escaped = quoted
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&quoted);
        let resolved = raw.replace(WORKSPACE_PLACEHOLDER, escaped);

        let mut set: FixtureSet = serde_json::from_str(&resolved)?;
        set.workspace = workspace;
        Ok(set)
    }

    /// Workspace root handed to `initialize`
    pub fn root_path(&self) -> String {
        self.workspace.to_string_lossy().into_owned()
    }

    pub fn case_count(&self) -> usize {
        self.hover_cases.len() + self.definition_cases.len() + self.references_cases.len()
    }
}
