//! Protocol-level data model: the typed shapes this crate converts to and
//! from the wire, independent of any particular gRPC message layout.
//!
//! These mirror the MCP content/catalog algebra described in the data
//! model: content blocks, tools, resources, resource templates, and the
//! result of a tool invocation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in conversation; used only as an audience hint on [`Annotations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user.
    User,
    /// The assistant/model.
    Assistant,
}

/// Optional metadata hints for MCP objects.
///
/// Per MCP, annotations are weak hints only; consumers may ignore them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    /// Role-based audience hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<Vec<Role>>,
    /// Subjective priority hint, conventionally in `[0, 1]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    /// ISO 8601 timestamp of last modification.
    #[serde(rename = "lastModified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

/// A resource body delivered either as text or as a base64-encoded blob,
/// never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    /// URI the content was read from.
    pub uri: String,
    /// MIME type, when known.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text body, mutually exclusive with `blob`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded binary body, mutually exclusive with `text`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

impl ResourceContents {
    /// Build a text resource body.
    #[must_use]
    pub fn text(uri: impl Into<String>, mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            text: Some(text.into()),
            blob: None,
        }
    }

    /// Build a binary resource body from a base64 string.
    #[must_use]
    pub fn blob(uri: impl Into<String>, mime_type: impl Into<String>, blob_base64: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some(mime_type.into()),
            text: None,
            blob: Some(blob_base64.into()),
        }
    }
}

/// A tagged piece of tool output or resource content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
        /// Optional annotations.
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    /// An image, base64-encoded on the wire.
    Image {
        /// Base64-encoded image bytes.
        data: String,
        /// MIME type, e.g. `image/png`.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Optional annotations.
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    /// Audio, base64-encoded on the wire.
    Audio {
        /// Base64-encoded audio bytes.
        data: String,
        /// MIME type, e.g. `audio/wav`.
        #[serde(rename = "mimeType")]
        mime_type: String,
        /// Optional annotations.
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    /// A resource embedded inline rather than referenced by link.
    #[serde(rename = "resource")]
    EmbeddedResource {
        /// The embedded resource body.
        resource: ResourceContents,
        /// Optional annotations.
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    /// A reference to a resource by URI, without embedding its body.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Display name of the linked resource, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        /// Optional annotations.
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
}

impl Content {
    /// Build a text content block with no annotations.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            annotations: None,
        }
    }

    /// Return the text of this block if it is a [`Content::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }
}

/// A JSON Schema document, materialized from a protobuf `Struct` on the wire.
pub type JsonSchema = serde_json::Map<String, Value>;

/// A callable operation hosted by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    /// Unique name within the server's catalog.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Display title, distinct from `name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// JSON Schema describing accepted arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: JsonSchema,
    /// JSON Schema describing the `structuredContent` of results, if any.
    #[serde(rename = "outputSchema", skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<JsonSchema>,
}

/// An addressable, read-only artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Absolute URI, also the catalog key.
    pub uri: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// MIME type, if known.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Size in bytes, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Optional annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

/// A parameterized resource, addressed via an RFC 6570 URI template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceTemplate {
    /// URI template with `{placeholder}` segments.
    #[serde(rename = "uriTemplate")]
    pub uri_template: String,
    /// Human-readable name.
    pub name: String,
    /// Optional description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// MIME type, if known.
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Optional annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

/// The result of invoking a tool: content blocks plus optional structured
/// JSON, tagged with whether the call represents an application-level error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Ordered content blocks.
    pub content: Vec<Content>,
    /// Structured JSON result, present when the tool declares an output
    /// schema (or otherwise chooses to return structured data).
    #[serde(rename = "structuredContent", skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
    /// Whether this result represents a tool-level (not transport-level)
    /// failure. The stream still completes successfully; callers must
    /// inspect this flag.
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Build a successful, unstructured text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            structured_content: None,
            is_error: false,
        }
    }

    /// Build an in-band error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            structured_content: None,
            is_error: true,
        }
    }
}

/// Raw return value produced by a tool handler, before normalization.
///
/// This is the explicit sum type that replaces duck-typed returns: a
/// handler may answer with only unstructured content, only a structured
/// map (which gets a synthesized text block), or both.
#[derive(Debug, Clone)]
pub enum ToolReturn {
    /// Structured JSON only; a pretty-printed text block is synthesized.
    Structured(serde_json::Map<String, Value>),
    /// An ordered sequence of content blocks, no structured component.
    Unstructured(Vec<Content>),
    /// Both an explicit content sequence and a structured map.
    Both(Vec<Content>, serde_json::Map<String, Value>),
}

/// Arguments passed to a tool invocation.
pub type ToolArguments = HashMap<String, Value>;

/// A single progress update for an in-flight `CallTool` invocation.
#[derive(Debug, Clone)]
pub struct Progress {
    /// Opaque wire token correlating this update to a request.
    pub progress_token: String,
    /// Current progress value.
    pub progress: f64,
    /// Total expected, if known.
    pub total: Option<f64>,
    /// Human-readable status message, if any.
    pub message: Option<String>,
}
