use subtle::ConstantTimeEq as _;

/// Helper function to create URL-safe base64 encoding without padding
pub fn base64_url_encode(input: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(input)
}

/// Compare two secrets without short-circuiting on the first differing byte.
///
/// Slices of different lengths compare unequal, so an empty value never matches
/// a non-empty one.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Join a base URL and an encoded query string, keeping any query the base already carries
pub fn append_query(base: &str, query: &str) -> String {
    if query.is_empty() {
        return base.to_string();
    }

    let separator = if base.contains('?') {
        if base.ends_with('?') || base.ends_with('&') {
            ""
        } else {
            "&"
        }
    } else {
        "?"
    };

    format!("{}{}{}", base, separator, query)
}
