use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};

/// Decode either base64 alphabet, padded or not.
///
/// Uploads carry the standard alphabet; download manifests and link
/// fragments use the URL-safe one.
pub(crate) fn decode_any(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = input.trim().trim_end_matches('=');
    if trimmed.contains(['-', '_']) {
        URL_SAFE_NO_PAD.decode(trimmed)
    } else {
        STANDARD_NO_PAD.decode(trimmed)
    }
}

pub(crate) fn encode_standard(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub(crate) fn encode_url_safe(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}
