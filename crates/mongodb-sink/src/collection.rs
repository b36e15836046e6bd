//! Stream name to collection name mapping.

/// Maps a stream name to a collection name that is legal in MongoDB.
///
/// Every byte outside ASCII alphanumerics and `-_.~` is percent-encoded, so
/// path separators, `$` and NUL never reach the namespace. Percent-encoding
/// is injective: distinct stream names never share a collection.
pub fn resolve_collection(stream_name: &str) -> String {
    urlencoding::encode(stream_name).into_owned()
}

/// Checks a resolved collection name against the names MongoDB refuses to
/// create: the empty name and the reserved `system.` prefix. Both survive
/// percent-encoding unchanged.
pub fn check_collection_name(collection: &str) -> Result<(), &'static str> {
    if collection.is_empty() {
        return Err("collection names must not be empty");
    }
    if collection.starts_with("system.") {
        return Err("the 'system.' prefix is reserved by MongoDB");
    }
    Ok(())
}
