//! Canonical request pieces for AWS Signature V4.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::{BTreeMap, HashMap};

/// Unreserved characters plus `/`, left unencoded in paths.
const URI_PATH_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Unreserved characters, left unencoded in query components.
const QUERY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// URI-encodes a string. Slashes are encoded only when `encode_slash` is set.
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    if encode_slash {
        utf8_percent_encode(input, QUERY_SET).to_string()
    } else {
        utf8_percent_encode(input, URI_PATH_SET).to_string()
    }
}

/// Collapses duplicate slashes and resolves `.` and `..` segments.
pub fn normalize_uri_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }

    let has_trailing_slash = path.ends_with('/');
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut result = String::from("/");
    result.push_str(&segments.join("/"));
    if has_trailing_slash && !result.ends_with('/') {
        result.push('/');
    }
    result
}

/// Encodes and sorts query parameters by name, then value.
pub fn canonical_query_string(query_params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = query_params
        .iter()
        .map(|(key, value)| (uri_encode(key, true), uri_encode(value, true)))
        .collect();
    encoded.sort();

    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Returns true for headers included in the signature.
pub fn should_sign_header(name: &str) -> bool {
    let name = name.to_lowercase();
    name == "host"
        || name.starts_with("x-amz-")
        || name == "content-type"
        || name == "content-md5"
}

/// Builds the canonical headers block and the signed headers list.
pub fn canonical_headers(headers: &HashMap<String, String>) -> (String, String) {
    let mut sorted: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.to_lowercase();
        if !should_sign_header(&name) {
            continue;
        }
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        sorted.insert(name, value);
    }

    let canonical = sorted
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect::<String>();
    let signed = sorted.keys().map(String::as_str).collect::<Vec<_>>().join(";");
    (canonical, signed)
}
