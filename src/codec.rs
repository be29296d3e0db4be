//! Content Codec: bidirectional conversion between the protocol data model
//! ([`crate::types`]) and the generated protobuf messages ([`crate::proto`]),
//! plus normalization and output-schema validation of tool return values.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use jsonschema::{Draft, JSONSchema};
use prost_types::value::Kind;
use prost_types::{ListValue, Struct, Value as ProstValue};
use serde_json::{Map, Value};

use crate::error::{GrpcError, GrpcResult};
use crate::proto;
use crate::types::{
    Annotations, CallToolResult, Content, Resource, ResourceContents, ResourceTemplate, Role,
    Tool, ToolReturn,
};

// --- Duration/TTL --------------------------------------------------------

/// Convert a [`Duration`] to a protobuf `Duration`, preserving exact
/// seconds and sub-second nanos.
#[must_use]
pub fn duration_to_proto(ttl: Duration) -> prost_types::Duration {
    prost_types::Duration {
        seconds: i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX),
        nanos: i32::try_from(ttl.subsec_nanos()).unwrap_or(0),
    }
}

/// Convert a protobuf `Duration` back to a [`Duration`].
#[must_use]
pub fn duration_from_proto(ttl: &prost_types::Duration) -> Duration {
    let seconds = u64::try_from(ttl.seconds.max(0)).unwrap_or(0);
    let nanos = u32::try_from(ttl.nanos.max(0)).unwrap_or(0);
    Duration::new(seconds, nanos)
}

// --- JSON <-> protobuf Struct --------------------------------------------

fn json_value_to_prost(value: &Value) -> ProstValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or(0.0)),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_value_to_prost).collect(),
        }),
        Value::Object(map) => Kind::StructValue(json_map_to_struct(map)),
    };
    ProstValue { kind: Some(kind) }
}

fn prost_value_to_json(value: &ProstValue) -> Value {
    match &value.kind {
        None | Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::NumberValue(n)) => {
            serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number)
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(prost_value_to_json).collect())
        }
        Some(Kind::StructValue(s)) => Value::Object(struct_to_json_map(s)),
    }
}

/// Convert a JSON object to a protobuf `Struct`.
#[must_use]
pub fn json_map_to_struct(map: &Map<String, Value>) -> Struct {
    Struct {
        fields: map
            .iter()
            .map(|(k, v)| (k.clone(), json_value_to_prost(v)))
            .collect(),
    }
}

/// Convert a protobuf `Struct` to a JSON object.
#[must_use]
pub fn struct_to_json_map(s: &Struct) -> Map<String, Value> {
    s.fields
        .iter()
        .map(|(k, v)| (k.clone(), prost_value_to_json(v)))
        .collect()
}

// --- Annotations ----------------------------------------------------------

impl From<&Annotations> for proto::Annotations {
    fn from(a: &Annotations) -> Self {
        let audience = a
            .audience
            .as_ref()
            .map(|roles| {
                roles
                    .iter()
                    .map(|r| match r {
                        Role::User => proto::Role::User as i32,
                        Role::Assistant => proto::Role::Assistant as i32,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            audience,
            priority: Some(a.priority.unwrap_or(0.0)),
            last_modified: a.last_modified.clone(),
        }
    }
}

impl From<&proto::Annotations> for Annotations {
    fn from(p: &proto::Annotations) -> Self {
        let audience: Vec<Role> = p
            .audience
            .iter()
            .filter_map(|r| match proto::Role::try_from(*r) {
                Ok(proto::Role::User) => Some(Role::User),
                Ok(proto::Role::Assistant) => Some(Role::Assistant),
                _ => None,
            })
            .collect();
        Self {
            audience: if audience.is_empty() {
                None
            } else {
                Some(audience)
            },
            priority: p.priority,
            last_modified: p.last_modified.clone(),
        }
    }
}

// --- Resource / ResourceTemplate / Tool -----------------------------------

impl From<&Resource> for proto::Resource {
    fn from(r: &Resource) -> Self {
        Self {
            uri: r.uri.clone(),
            name: r.name.clone(),
            description: r.description.clone(),
            title: r.title.clone(),
            mime_type: r.mime_type.clone(),
            size: r.size,
            annotations: r.annotations.as_ref().map(Into::into),
        }
    }
}

impl From<&proto::Resource> for Resource {
    fn from(p: &proto::Resource) -> Self {
        Self {
            uri: p.uri.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            title: p.title.clone(),
            mime_type: p.mime_type.clone(),
            size: p.size,
            annotations: p.annotations.as_ref().map(Into::into),
        }
    }
}

impl From<&ResourceTemplate> for proto::ResourceTemplate {
    fn from(r: &ResourceTemplate) -> Self {
        Self {
            uri_template: r.uri_template.clone(),
            name: r.name.clone(),
            description: r.description.clone(),
            title: r.title.clone(),
            mime_type: r.mime_type.clone(),
            annotations: r.annotations.as_ref().map(Into::into),
        }
    }
}

impl From<&proto::ResourceTemplate> for ResourceTemplate {
    fn from(p: &proto::ResourceTemplate) -> Self {
        Self {
            uri_template: p.uri_template.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            title: p.title.clone(),
            mime_type: p.mime_type.clone(),
            annotations: p.annotations.as_ref().map(Into::into),
        }
    }
}

impl TryFrom<&Tool> for proto::Tool {
    type Error = GrpcError;

    fn try_from(t: &Tool) -> GrpcResult<Self> {
        Ok(Self {
            name: t.name.clone(),
            description: t.description.clone(),
            title: t.title.clone(),
            input_schema: Some(json_map_to_struct(&t.input_schema)),
            output_schema: t.output_schema.as_ref().map(json_map_to_struct),
        })
    }
}

impl TryFrom<&proto::Tool> for Tool {
    type Error = GrpcError;

    fn try_from(p: &proto::Tool) -> GrpcResult<Self> {
        Ok(Self {
            name: p.name.clone(),
            description: p.description.clone(),
            title: p.title.clone(),
            input_schema: p
                .input_schema
                .as_ref()
                .map(struct_to_json_map)
                .unwrap_or_default(),
            output_schema: p.output_schema.as_ref().map(struct_to_json_map),
        })
    }
}

// --- ResourceContents -------------------------------------------------------

impl TryFrom<&ResourceContents> for proto::ResourceContents {
    type Error = GrpcError;

    fn try_from(r: &ResourceContents) -> GrpcResult<Self> {
        let payload = match (&r.text, &r.blob) {
            (Some(text), None) => proto::resource_contents::Payload::Text(text.clone()),
            (None, Some(blob)) => {
                let bytes = BASE64
                    .decode(blob)
                    .map_err(|e| GrpcError::parse(format!("invalid base64 blob: {e}")))?;
                proto::resource_contents::Payload::Blob(bytes)
            }
            (Some(_), Some(_)) => {
                return Err(GrpcError::invalid_request(
                    "resource contents must not carry both text and blob",
                ))
            }
            (None, None) => {
                return Err(GrpcError::invalid_request(
                    "resource contents must carry either text or blob",
                ))
            }
        };
        Ok(Self {
            uri: r.uri.clone(),
            mime_type: r.mime_type.clone(),
            payload: Some(payload),
        })
    }
}

impl TryFrom<&proto::ResourceContents> for ResourceContents {
    type Error = GrpcError;

    fn try_from(p: &proto::ResourceContents) -> GrpcResult<Self> {
        let (text, blob) = match &p.payload {
            Some(proto::resource_contents::Payload::Text(t)) => (Some(t.clone()), None),
            Some(proto::resource_contents::Payload::Blob(b)) => {
                (None, Some(BASE64.encode(b)))
            }
            None => {
                return Err(GrpcError::parse(
                    "resource contents carried neither text nor blob",
                ))
            }
        };
        Ok(Self {
            uri: p.uri.clone(),
            mime_type: p.mime_type.clone(),
            text,
            blob,
        })
    }
}

// --- Content ---------------------------------------------------------------

impl TryFrom<&Content> for proto::Content {
    type Error = GrpcError;

    fn try_from(content: &Content) -> GrpcResult<Self> {
        let (inner, annotations) = match content {
            Content::Text { text, annotations } => (
                proto::content::Content::Text(proto::TextContent { text: text.clone() }),
                annotations,
            ),
            Content::Image {
                data,
                mime_type,
                annotations,
            } => {
                let bytes = BASE64
                    .decode(data)
                    .map_err(|e| GrpcError::parse(format!("invalid base64 image data: {e}")))?;
                (
                    proto::content::Content::Image(proto::ImageContent {
                        data: bytes,
                        mime_type: mime_type.clone(),
                    }),
                    annotations,
                )
            }
            Content::Audio {
                data,
                mime_type,
                annotations,
            } => {
                let bytes = BASE64
                    .decode(data)
                    .map_err(|e| GrpcError::parse(format!("invalid base64 audio data: {e}")))?;
                (
                    proto::content::Content::Audio(proto::AudioContent {
                        data: bytes,
                        mime_type: mime_type.clone(),
                    }),
                    annotations,
                )
            }
            Content::EmbeddedResource {
                resource,
                annotations,
            } => (
                proto::content::Content::EmbeddedResource(proto::EmbeddedResource {
                    resource: Some(resource.try_into()?),
                }),
                annotations,
            ),
            Content::ResourceLink {
                uri,
                name,
                annotations,
            } => (
                proto::content::Content::ResourceLink(proto::ResourceLink {
                    uri: uri.clone(),
                    name: name.clone(),
                }),
                annotations,
            ),
        };
        Ok(Self {
            content: Some(inner),
            annotations: annotations.as_ref().map(Into::into),
        })
    }
}

impl TryFrom<&proto::Content> for Content {
    type Error = GrpcError;

    fn try_from(p: &proto::Content) -> GrpcResult<Self> {
        let annotations = p.annotations.as_ref().map(Into::into);
        match &p.content {
            Some(proto::content::Content::Text(t)) => Ok(Self::Text {
                text: t.text.clone(),
                annotations,
            }),
            Some(proto::content::Content::Image(i)) => Ok(Self::Image {
                data: BASE64.encode(&i.data),
                mime_type: i.mime_type.clone(),
                annotations,
            }),
            Some(proto::content::Content::Audio(a)) => Ok(Self::Audio {
                data: BASE64.encode(&a.data),
                mime_type: a.mime_type.clone(),
                annotations,
            }),
            Some(proto::content::Content::EmbeddedResource(e)) => {
                let resource = e
                    .resource
                    .as_ref()
                    .ok_or_else(|| GrpcError::parse("embedded resource missing body"))?;
                Ok(Self::EmbeddedResource {
                    resource: resource.try_into()?,
                    annotations,
                })
            }
            Some(proto::content::Content::ResourceLink(l)) => Ok(Self::ResourceLink {
                uri: l.uri.clone(),
                name: l.name.clone(),
                annotations,
            }),
            None => Err(GrpcError::parse("content frame missing its payload")),
        }
    }
}

// --- CallToolResult ----------------------------------------------------------

impl TryFrom<&CallToolResult> for proto::CallToolResult {
    type Error = GrpcError;

    fn try_from(r: &CallToolResult) -> GrpcResult<Self> {
        Ok(Self {
            content: r
                .content
                .iter()
                .map(TryInto::try_into)
                .collect::<GrpcResult<Vec<_>>>()?,
            structured_content: r
                .structured_content
                .as_ref()
                .and_then(Value::as_object)
                .map(json_map_to_struct),
            is_error: r.is_error,
        })
    }
}

impl TryFrom<&proto::CallToolResult> for CallToolResult {
    type Error = GrpcError;

    fn try_from(p: &proto::CallToolResult) -> GrpcResult<Self> {
        Ok(Self {
            content: p
                .content
                .iter()
                .map(TryInto::try_into)
                .collect::<GrpcResult<Vec<_>>>()?,
            structured_content: p.structured_content.as_ref().map(|s| Value::Object(struct_to_json_map(s))),
            is_error: p.is_error,
        })
    }
}

// --- Normalization & output validation ---------------------------------------

/// Normalize a tool's raw return value into a [`CallToolResult`], and, if
/// `tool` declares an output schema, validate the structured content
/// against it.
///
/// Mirrors the reference normalizer:
/// - `Both(content, structured)` is used as-is.
/// - `Structured(map)` synthesizes one text block containing the
///   pretty-printed JSON of `map`.
/// - `Unstructured(content)` carries no structured content.
///
/// Returns `Err(GrpcError::serialization(..))` ("value shape or schema
/// validation is wrong" per the content codec's contract) when the tool
/// declares an output schema but no structured content is present, or
/// when the structured content fails schema validation.
pub fn normalize_tool_return(ret: ToolReturn, tool: Option<&Tool>) -> GrpcResult<CallToolResult> {
    let (content, structured) = match ret {
        ToolReturn::Both(content, structured) => (content, Some(structured)),
        ToolReturn::Structured(map) => {
            let pretty = serde_json::to_string_pretty(&Value::Object(map.clone()))
                .map_err(|e| GrpcError::serialization(e.to_string()))?;
            (vec![Content::text(pretty)], Some(map))
        }
        ToolReturn::Unstructured(content) => (content, None),
    };

    if let Some(tool) = tool {
        if let Some(schema) = &tool.output_schema {
            let Some(structured) = &structured else {
                return Err(GrpcError::serialization(format!(
                    "tool '{}' declares an output schema but returned no structured content",
                    tool.name
                )));
            };
            validate_structured_content(schema, structured, &tool.name)?;
        }
    }

    Ok(CallToolResult {
        content,
        structured_content: structured.map(Value::Object),
        is_error: false,
    })
}

/// Validate `instance` against `schema` (a JSON Schema document), used both
/// when normalizing a server-side tool return and when a client validates a
/// received result against its cached output schema.
///
/// # Errors
/// [`GrpcError::Serialization`] if `schema` itself fails to compile, or if
/// `instance` does not satisfy it.
pub fn validate_structured_content(
    schema: &Map<String, Value>,
    instance: &Map<String, Value>,
    tool_name: &str,
) -> GrpcResult<()> {
    let schema_value = Value::Object(schema.clone());
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_value)
        .map_err(|e| {
            GrpcError::serialization(format!(
                "tool '{tool_name}' has an invalid output schema: {e}"
            ))
        })?;

    let instance_value = Value::Object(instance.clone());
    if let Err(errors) = compiled.validate(&instance_value) {
        let messages: Vec<String> = errors
            .map(|e| format!("{}: {}", e.instance_path, e))
            .collect();
        return Err(GrpcError::serialization(format!(
            "tool '{tool_name}' result validation failed: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotations, Role};
    use std::time::Duration;

    fn sample_resource() -> Resource {
        Resource {
            uri: "file:///test.txt".into(),
            name: "Test File".into(),
            description: Some("A test file".into()),
            title: None,
            mime_type: Some("text/plain".into()),
            size: Some(42),
            annotations: Some(Annotations {
                audience: Some(vec![Role::User]),
                priority: Some(0.5),
                last_modified: None,
            }),
        }
    }

    #[test]
    fn resource_round_trips_through_proto() {
        let resource = sample_resource();
        let proto: proto::Resource = (&resource).into();
        let back: Resource = (&proto).into();
        assert_eq!(resource.uri, back.uri);
        assert_eq!(resource.name, back.name);
        assert_eq!(resource.size, back.size);
        assert_eq!(
            resource.annotations.as_ref().unwrap().audience,
            back.annotations.as_ref().unwrap().audience
        );
    }

    #[test]
    fn resource_template_round_trips() {
        let template = ResourceTemplate {
            uri_template: "file:///{name}.txt".into(),
            name: "Template".into(),
            description: None,
            title: None,
            mime_type: None,
            annotations: None,
        };
        let proto: proto::ResourceTemplate = (&template).into();
        let back: ResourceTemplate = (&proto).into();
        assert_eq!(template.uri_template, back.uri_template);
        assert_eq!(template.name, back.name);
    }

    #[test]
    fn tool_round_trips_through_struct_schema() {
        let mut input_schema = Map::new();
        input_schema.insert("type".into(), Value::String("object".into()));
        let tool = Tool {
            name: "greet".into(),
            description: Some("Greets someone".into()),
            title: None,
            input_schema,
            output_schema: None,
        };
        let proto: proto::Tool = (&tool).try_into().unwrap();
        let back: Tool = (&proto).try_into().unwrap();
        assert_eq!(tool.name, back.name);
        assert_eq!(tool.input_schema, back.input_schema);
    }

    #[test]
    fn text_content_round_trips() {
        let content = Content::text("hello");
        let proto: proto::Content = (&content).try_into().unwrap();
        let back: Content = (&proto).try_into().unwrap();
        assert_eq!(content.as_text(), back.as_text());
    }

    #[test]
    fn image_content_round_trips_base64_safe_bytes() {
        let data = BASE64.encode([0u8, 1, 2, 255, 254]);
        let content = Content::Image {
            data,
            mime_type: "image/png".into(),
            annotations: None,
        };
        let proto: proto::Content = (&content).try_into().unwrap();
        let back: Content = (&proto).try_into().unwrap();
        match (&content, &back) {
            (Content::Image { data: a, .. }, Content::Image { data: b, .. }) => {
                assert_eq!(a, b);
            }
            _ => panic!("expected image content"),
        }
    }

    #[test]
    fn embedded_text_resource_round_trips() {
        let content = Content::EmbeddedResource {
            resource: ResourceContents::text("test://hello", "text/plain", "Hello from resource!"),
            annotations: None,
        };
        let proto: proto::Content = (&content).try_into().unwrap();
        let back: Content = (&proto).try_into().unwrap();
        match back {
            Content::EmbeddedResource { resource, .. } => {
                assert_eq!(resource.text.as_deref(), Some("Hello from resource!"));
            }
            _ => panic!("expected embedded resource"),
        }
    }

    #[test]
    fn embedded_blob_resource_round_trips() {
        let blob = BASE64.encode([9u8, 8, 7, 6]);
        let content = Content::EmbeddedResource {
            resource: ResourceContents::blob("test://bin", "application/octet-stream", blob.clone()),
            annotations: None,
        };
        let proto: proto::Content = (&content).try_into().unwrap();
        let back: Content = (&proto).try_into().unwrap();
        match back {
            Content::EmbeddedResource { resource, .. } => {
                assert_eq!(resource.blob.as_deref(), Some(blob.as_str()));
            }
            _ => panic!("expected embedded resource"),
        }
    }

    #[test]
    fn resource_link_round_trips() {
        let content = Content::ResourceLink {
            uri: "file:///linked.txt".into(),
            name: Some("Linked".into()),
            annotations: None,
        };
        let proto: proto::Content = (&content).try_into().unwrap();
        let back: Content = (&proto).try_into().unwrap();
        match back {
            Content::ResourceLink { uri, name, .. } => {
                assert_eq!(uri, "file:///linked.txt");
                assert_eq!(name.as_deref(), Some("Linked"));
            }
            _ => panic!("expected resource link"),
        }
    }

    #[test]
    fn duration_round_trips_exact_seconds_and_nanos() {
        let ttl = Duration::new(3723, 500_000_000);
        let proto = duration_to_proto(ttl);
        let back = duration_from_proto(&proto);
        assert_eq!(ttl, back);
    }

    #[test]
    fn structured_only_return_synthesizes_text_block() {
        let mut map = Map::new();
        map.insert("result".into(), Value::from(3));
        let result = normalize_tool_return(ToolReturn::Structured(map.clone()), None).unwrap();
        assert_eq!(result.content.len(), 1);
        assert!(result.content[0].as_text().unwrap().contains("\"result\""));
        assert_eq!(result.structured_content, Some(Value::Object(map)));
    }

    #[test]
    fn output_schema_validation_rejects_missing_structured_content() {
        let mut schema = Map::new();
        schema.insert("type".into(), Value::String("object".into()));
        let tool = Tool {
            name: "test_tool".into(),
            description: None,
            title: None,
            input_schema: Map::new(),
            output_schema: Some(schema),
        };
        let err = normalize_tool_return(
            ToolReturn::Unstructured(vec![Content::text("3")]),
            Some(&tool),
        )
        .unwrap_err();
        assert!(matches!(err, GrpcError::Serialization(_)));
    }

    #[test]
    fn output_schema_validation_accepts_matching_structured_content() {
        let mut schema = Map::new();
        schema.insert("type".into(), Value::String("object".into()));
        schema.insert(
            "required".into(),
            Value::Array(vec![Value::String("result".into())]),
        );
        let tool = Tool {
            name: "test_tool".into(),
            description: None,
            title: None,
            input_schema: Map::new(),
            output_schema: Some(schema),
        };
        let mut structured = Map::new();
        structured.insert("result".into(), Value::from(3));
        let result = normalize_tool_return(
            ToolReturn::Both(vec![Content::text("3")], structured),
            Some(&tool),
        )
        .unwrap();
        assert!(!result.is_error);
    }
}
