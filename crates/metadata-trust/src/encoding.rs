//! Entity identifier to URL resource mapping.

use url::{form_urlencoded, Url};

use crate::error::Result;

/// Prefix for encodings that would otherwise be an empty or dot path segment.
/// The serializer always escapes `~`, so prefixed segments cannot collide.
const RESERVED_SEGMENT_PREFIX: char = '~';

/// Encode an entity identifier as a single URL path segment.
///
/// Uses `application/x-www-form-urlencoded` byte serialization, which escapes
/// every byte outside `[A-Za-z0-9*-._]` (spaces become `+`), so `/`, `:` and
/// `%` in the identifier can never alias another identifier's segment.
///
/// `""`, `"."` and `".."` survive serialization unchanged and would be
/// dropped or resolved by URL path normalization, so they get a `~` prefix.
pub fn entity_id_as_resource(entity_id: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(entity_id.as_bytes()).collect();
    match encoded.as_str() {
        "" | "." | ".." => format!("{RESERVED_SEGMENT_PREFIX}{encoded}"),
        _ => encoded,
    }
}

/// Metadata location for an entity: `<base>/<encoded entity id>`
pub fn metadata_source_uri(base: &Url, entity_id: &str) -> Result<Url> {
    let base = base.as_str().trim_end_matches('/');
    Ok(Url::parse(&format!("{base}/{}", entity_id_as_resource(entity_id)))?)
}
