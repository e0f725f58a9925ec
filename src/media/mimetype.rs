/// Content type used when the bytes don't identify the format.
pub const FALLBACK_MIME: &str = "image/jpeg";

/// Sniffs the content type from the leading bytes of a file.
pub fn detect_mimetype(bytes: &[u8]) -> String {
    match infer::get(bytes) {
        Some(k) => k.mime_type().to_string(),
        None => FALLBACK_MIME.to_string(),
    }
}
