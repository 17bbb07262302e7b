//! Deterministic cache keys.

use reqwest::header::HeaderMap;
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// SHA-256 over method, normalized URL, the `vary` header subset and a
/// hash of the body, hex encoded.
///
/// `vary` names are matched case-insensitively and hashed in sorted order,
/// so configuration order does not change keys.
pub fn fingerprint(method: &Method, url: &Url, headers: &HeaderMap, body: &[u8], vary: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_str().as_bytes());
    hasher.update(b"\n");

    let mut names: Vec<String> = vary.iter().map(|n| n.to_ascii_lowercase()).collect();
    names.sort();
    names.dedup();
    for name in &names {
        let values: Vec<&[u8]> = headers.get_all(name.as_str()).iter().map(|v| v.as_bytes()).collect();
        if values.is_empty() {
            continue;
        }
        hasher.update(name.as_bytes());
        hasher.update(b":");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                hasher.update(b",");
            }
            hasher.update(value);
        }
        hasher.update(b"\n");
    }

    hasher.update(Sha256::digest(body));
    format!("{:x}", hasher.finalize())
}
