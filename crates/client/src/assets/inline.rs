//! `data:` URI encoding for inlined resources and exported images.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const DATA_URI_PREFIX: &str = "data:";

/// Encode bytes as a base64 `data:` URI.
pub fn encode_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("{DATA_URI_PREFIX}{mime};base64,{}", STANDARD.encode(bytes))
}

/// Decode the body of a base64 `data:` URI.
///
/// Returns `None` for anything that is not a well-formed base64 data URI.
pub fn decode_data_uri(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix(DATA_URI_PREFIX)?;
    let (metadata, data) = rest.split_once(',')?;
    if !metadata.split(';').any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return None;
    }
    STANDARD.decode(data.trim()).ok()
}
