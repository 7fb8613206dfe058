use std::str::FromStr;
use tonic::metadata::{AsciiMetadataValue, KeyAndValueRef, MetadataKey, MetadataMap};

// gRPC metadata helpers

/// Collect the ascii metadata entries as header pairs for the
/// worker pipe.
pub(crate) fn metadata_to_headers(metadata: &MetadataMap) -> Vec<(&str, &str)> {
    metadata
        .iter()
        .filter_map(|entry| match entry {
            KeyAndValueRef::Ascii(key, value) => Some((key.as_str(), value.to_str().ok()?)),
            _ => None,
        })
        .collect()
}

/// Report the reply status and headers as response metadata
pub(crate) fn headers_to_metadata(
    metadata: &mut MetadataMap,
    status: i64,
    headers: &[(String, String)],
) {
    metadata.insert("x-reply-status-code", status.into());
    for (name, value) in headers {
        match (
            MetadataKey::from_str(name),
            AsciiMetadataValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                metadata.insert(name, value);
            }
            (Err(_), _) => log::error!("Invalid response header key {:?}", name),
            (_, Err(_)) => log::error!("Invalid response header value {:?}", value),
        }
    }
}
