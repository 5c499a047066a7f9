//! Unified cache key schema
//!
//! Key format: v{VERSION}:{entity}:{identifier}[:sub_key]
//!
//! Caller-supplied ids are percent-escaped so they cannot spill into the
//! next segment or act as SCAN glob characters.
//!
//! Bumping [`CACHE_VERSION`] orphans every previously written entry, which then
//! expires through its TTL.

/// Cache schema version - increment when changing key formats or payload shapes
pub const CACHE_VERSION: u32 = 4;

/// Reader id given to anonymous pseudo-profiles
pub const ANONYMOUS: &str = "anon";

/// Context segment when no context post was supplied
pub const NO_CONTEXT: &str = "none";

/// Reader segment for anonymous feeds. User segments always carry `u=`,
/// so no user id can produce it.
const ANONYMOUS_SEGMENT: &str = "a";

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    // ============= Personalized Feed Keys =============

    /// Personalized feed for a reader in a given context
    /// Format: v4:pfeed:{u={user_id}|a}:{c={context_post_id}|none}:{limit}:{fallback_limit}
    pub fn personalized_feed(
        user_id: Option<&str>,
        context_post_id: Option<&str>,
        limit: usize,
        fallback_limit: usize,
    ) -> String {
        let context = match context_post_id {
            Some(id) => format!("c={}", escape_segment(id)),
            None => NO_CONTEXT.to_string(),
        };
        format!(
            "{}{}:{}:{}",
            Self::personalized_feed_prefix(user_id),
            context,
            limit,
            fallback_limit
        )
    }

    /// Prefix shared by every cached feed of one reader, used for purges
    /// Format: v4:pfeed:{u={user_id}|a}:
    pub fn personalized_feed_prefix(user_id: Option<&str>) -> String {
        match user_id {
            Some(id) => format!("v{}:pfeed:u={}:", CACHE_VERSION, escape_segment(id)),
            None => format!("v{}:pfeed:{}:", CACHE_VERSION, ANONYMOUS_SEGMENT),
        }
    }

    // ============= Utility =============

    /// Extract entity type from key
    pub fn entity_type(key: &str) -> Option<&str> {
        let mut parts = key.split(':');
        match (parts.next(), parts.next()) {
            (Some(_), Some(entity)) => Some(entity),
            _ => None,
        }
    }
}

/// Percent-encode the separator (and the escape character itself) so a
/// caller-supplied id always stays inside one key segment.
fn escape_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '*' => out.push_str("%2A"),
            '?' => out.push_str("%3F"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            '\\' => out.push_str("%5C"),
            _ => out.push(ch),
        }
    }
    out
}
