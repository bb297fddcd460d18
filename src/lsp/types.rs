//! Wire parameters for the position-based requests
//!
//! The document is carried as a plain string and forwarded exactly as the
//! caller gave it: relative paths stay relative, URIs are not re-encoded.
//! Result types come from `lsp_types`.

use lsp_types::Position;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

/// `TextDocumentPositionParams` with a verbatim document string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPositionParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
}

impl DocumentPositionParams {
    pub fn new(document: impl Into<String>, line: u32, character: u32) -> Self {
        Self {
            text_document: TextDocumentIdentifier {
                uri: document.into(),
            },
            position: Position::new(line, character),
        }
    }

    pub fn document(&self) -> &str {
        &self.text_document.uri
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceContext {
    pub include_declaration: bool,
}

/// `textDocument/references` params; the declaration is always requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceParams {
    #[serde(flatten)]
    pub position: DocumentPositionParams,
    pub context: ReferenceContext,
}

impl From<DocumentPositionParams> for ReferenceParams {
    fn from(position: DocumentPositionParams) -> Self {
        Self {
            position,
            context: ReferenceContext {
                include_declaration: true,
            },
        }
    }
}

/// `initialize` params: the workspace root plus the minimal client identity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub process_id: Option<u32>,
    pub root_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_uri: Option<String>,
    pub capabilities: lsp_types::ClientCapabilities,
    pub client_info: lsp_types::ClientInfo,
}
