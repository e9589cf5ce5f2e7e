//! Header vocabulary shared by the transfer engine and the resources.
//!
//! Structured object attributes travel beside the binary body as HTTP
//! headers.  This module owns the names, the operation id generator and
//! the base32 rendering used for both operation ids and digests.

use std::collections::HashMap;

use axum::http::HeaderMap;

/// Response/request header block as plain strings.  Inserting an
/// existing key replaces its value.
pub type HeaderFields = HashMap<String, String>;

// -- Engine headers -----------------------------------------------------------

/// Correlation id of one transfer; generated when absent, always echoed.
pub const X_OP_ID: &str = "x-relaystore-op-id";

/// Human-readable failure message on error responses.
pub const X_ERROR: &str = "x-relaystore-error";

/// Module that produced an error response.
pub const X_MODULE: &str = "x-relaystore-module";

/// Client identity forwarded between sites.
pub const X_CLIENT_ID: &str = "x-relaystore-client-id";

/// Answer of an existence check: `NONE`, `BUCKET`, `DIRECTORY` or `OBJECT`.
pub const X_TYPE: &str = "x-relaystore-type";

// -- Object metadata block ----------------------------------------------------

pub const X_OBJECT_ID: &str = "x-relaystore-id";
pub const X_OBJECT_SITE: &str = "x-relaystore-site";
pub const X_OBJECT_BUCKET: &str = "x-relaystore-bucket";
pub const X_OBJECT_NAME: &str = "x-relaystore-name";
pub const X_OBJECT_HASH: &str = "x-relaystore-hash";
pub const X_OBJECT_STATUS: &str = "x-relaystore-status";
pub const X_OBJECT_CREATION: &str = "x-relaystore-creation";
pub const X_OBJECT_EXPIRES: &str = "x-relaystore-expires";
pub const X_OBJECT_SIZE: &str = "x-relaystore-size";
/// JSON object of string to string.
pub const X_OBJECT_METADATA: &str = "x-relaystore-metadata";

// -- Listing filter -----------------------------------------------------------

pub const X_FILTER_NAME_PREFIX: &str = "x-relaystore-name-prefix";
pub const X_FILTER_STATUSES: &str = "x-relaystore-statuses";
pub const X_FILTER_CREATION_BEFORE: &str = "x-relaystore-creation-before";
pub const X_FILTER_CREATION_AFTER: &str = "x-relaystore-creation-after";
pub const X_FILTER_SIZE_LT: &str = "x-relaystore-size-lt";
pub const X_FILTER_SIZE_GT: &str = "x-relaystore-size-gt";

// -- Values -------------------------------------------------------------------

/// The single compression token negotiated through
/// `Content-Encoding`/`Accept-Encoding`.
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const CONNECTION_CLOSE: &str = "close";
pub const CHUNKED: &str = "chunked";
pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_NDJSON: &str = "application/x-ndjson";

/// Generate a 26-character operation id (128 random bits, base32).
pub fn generate_op_id() -> String {
    let bytes: [u8; 16] = rand::random();
    base32_lower(&bytes)
}

/// RFC 4648 base32 alphabet, rendered lowercase without padding.
pub fn base32_lower(data: &[u8]) -> String {
    const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u16 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u16::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[usize::from((buffer >> bits) & 0x1f)] as char);
        }
    }
    if bits > 0 {
        out.push(ALPHABET[usize::from((buffer << (5 - bits)) & 0x1f)] as char);
    }
    out
}

/// True when any value of `name` lists `token` as one of its
/// comma-separated entries (case-insensitive, parameters ignored).
pub fn header_has_token(headers: &HeaderMap, name: &str, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|entry| entry.split(';').next().unwrap_or("").trim())
        .any(|entry| entry.eq_ignore_ascii_case(token))
}

/// First value of `name` as a trimmed, non-empty string.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_base32_rfc4648_vectors() {
        assert_eq!(base32_lower(b""), "");
        assert_eq!(base32_lower(b"f"), "my");
        assert_eq!(base32_lower(b"fo"), "mzxq");
        assert_eq!(base32_lower(b"foo"), "mzxw6");
        assert_eq!(base32_lower(b"foob"), "mzxw6yq");
        assert_eq!(base32_lower(b"fooba"), "mzxw6ytb");
        assert_eq!(base32_lower(b"foobar"), "mzxw6ytboi");
    }

    #[test]
    fn test_sha256_digest_length() {
        assert_eq!(base32_lower(&[0u8; 32]).len(), 52);
    }

    #[test]
    fn test_op_id_shape() {
        let a = generate_op_id();
        let b = generate_op_id();
        assert_eq!(a.len(), 26);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn test_token_match_is_exact_and_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("accept-encoding", HeaderValue::from_static("gzip, ZSTD;q=0.9"));
        assert!(header_has_token(&headers, "accept-encoding", COMPRESSION_ZSTD));

        headers.insert("accept-encoding", HeaderValue::from_static("zstdx, gzip"));
        assert!(!header_has_token(&headers, "accept-encoding", COMPRESSION_ZSTD));

        assert!(!header_has_token(&headers, "content-encoding", COMPRESSION_ZSTD));
    }

    #[test]
    fn test_token_match_across_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("accept-encoding", HeaderValue::from_static("gzip"));
        headers.append("accept-encoding", HeaderValue::from_static("zstd"));
        assert!(header_has_token(&headers, "accept-encoding", COMPRESSION_ZSTD));
    }

    #[test]
    fn test_header_str_skips_blank() {
        let mut headers = HeaderMap::new();
        headers.insert(X_OP_ID, HeaderValue::from_static("   "));
        assert_eq!(header_str(&headers, X_OP_ID), None);
        headers.insert(X_OP_ID, HeaderValue::from_static(" abc "));
        assert_eq!(header_str(&headers, X_OP_ID), Some("abc"));
    }
}
