//! Server-side protocol version gate.
//!
//! Applied uniformly to every RPC handler before it touches the registry:
//! validates the `mcp-protocol-version` metadata key, aborts with
//! `UNIMPLEMENTED` (carrying the server's latest version in initial
//! metadata) when the version is missing or unsupported, and otherwise
//! echoes the negotiated version back.

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::MCP_PROTOCOL_VERSION_KEY;

/// Case-insensitively look up `key` in `metadata`, decoding byte values as
/// UTF-8 (matching the reference implementation's handling of bytes-typed
/// gRPC metadata values).
#[must_use]
pub fn metadata_value(metadata: &MetadataMap, key: &str) -> Option<String> {
    if let Some(value) = metadata.get(key) {
        return value.to_str().ok().map(str::to_owned);
    }
    // MetadataMap's `get` is already case-insensitive for ascii keys per the
    // HTTP/2 spec, but guard explicitly since caller-supplied keys may not
    // be lowercase ASCII literals.
    metadata
        .keys()
        .find_map(|k| {
            let name = k.as_str();
            if name.eq_ignore_ascii_case(key) {
                metadata
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            } else {
                None
            }
        })
}

/// Validate the inbound protocol version metadata, returning the
/// negotiated version on success or a `Status::unimplemented` (with the
/// server's latest version already placed in `initial_metadata`) on
/// failure.
pub fn negotiate(
    metadata: &MetadataMap,
    supported_versions: &[&str],
    initial_metadata: &mut MetadataMap,
) -> Result<String, Status> {
    let latest = supported_versions.last().copied().unwrap_or_default();
    let supported_str = supported_versions.join(", ");

    let Some(received) = metadata_value(metadata, MCP_PROTOCOL_VERSION_KEY) else {
        insert_version(initial_metadata, latest);
        return Err(Status::unimplemented(format!(
            "Protocol version not provided. Supported versions are: {supported_str}"
        )));
    };

    if !supported_versions.contains(&received.as_str()) {
        insert_version(initial_metadata, latest);
        return Err(Status::unimplemented(format!(
            "Unsupported protocol version: {received}. Supported versions are: {supported_str}"
        )));
    }

    insert_version(initial_metadata, &received);
    Ok(received)
}

fn insert_version(metadata: &mut MetadataMap, version: &str) {
    if let Ok(value) = version.parse() {
        metadata.insert(MCP_PROTOCOL_VERSION_KEY, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

    #[test]
    fn missing_version_is_rejected_with_latest_advertised() {
        let metadata = MetadataMap::new();
        let mut initial = MetadataMap::new();
        let err = negotiate(&metadata, VERSIONS, &mut initial).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
        assert!(err.message().contains("Protocol version not provided"));
        assert_eq!(
            initial.get(MCP_PROTOCOL_VERSION_KEY).unwrap().to_str().unwrap(),
            "2025-11-25"
        );
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut metadata = MetadataMap::new();
        metadata.insert(MCP_PROTOCOL_VERSION_KEY, "1999-01-01".parse().unwrap());
        let mut initial = MetadataMap::new();
        let err = negotiate(&metadata, VERSIONS, &mut initial).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unimplemented);
        assert!(err.message().contains("Unsupported protocol version: 1999-01-01"));
    }

    #[test]
    fn supported_version_is_echoed_back() {
        let mut metadata = MetadataMap::new();
        metadata.insert(MCP_PROTOCOL_VERSION_KEY, "2025-03-26".parse().unwrap());
        let mut initial = MetadataMap::new();
        let negotiated = negotiate(&metadata, VERSIONS, &mut initial).unwrap();
        assert_eq!(negotiated, "2025-03-26");
        assert_eq!(
            initial.get(MCP_PROTOCOL_VERSION_KEY).unwrap().to_str().unwrap(),
            "2025-03-26"
        );
    }
}
