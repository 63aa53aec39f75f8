//! Cache key derivation.
//!
//! A key is `<prefix>:<query-escaped request URI>`. Escaped URIs longer than
//! [`MAX_ESCAPED_LEN`] are replaced by the hex SHA-1 of the unescaped URI so
//! that backends with key-length limits never see an oversized key.

use std::collections::BTreeSet;
use std::fmt;

use sha1::{Digest, Sha1};
use url::form_urlencoded;

use crate::http::{Method, Request};

/// Namespace for keys written by this crate.
pub const PAGE_CACHE_PREFIX: &str = "rttp.page.cache";

/// Longest escaped URI kept verbatim in a key.
pub const MAX_ESCAPED_LEN: usize = 200;

/// An opaque identifier for one cacheable request variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which part of the request URI feeds the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryScope {
    /// Path plus (exclusion-filtered) query string.
    #[default]
    Full,
    /// Path only; the query string is ignored entirely.
    PathOnly,
}

/// Query parameter names stripped before key derivation.
///
/// ```
/// use rttp_cache::cache::ExclusionSet;
///
/// let mut set = ExclusionSet::new();
/// set.extend(["utm_source", "name"]);
/// set.insert("name");
/// assert_eq!(set.len(), 2);
/// assert!(set.contains("utm_source"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a name. Returns `false` if it was already present.
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: Into<String>> Extend<S> for ExclusionSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.names.extend(iter.into_iter().map(Into::into));
    }
}

impl<S: Into<String>> FromIterator<S> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

/// Builds a prefixed, length-bounded key for an already-assembled URI.
///
/// ```
/// use rttp_cache::cache::create_key;
///
/// let key = create_key("ns", "/ping?x=1");
/// assert_eq!(key.as_str(), "ns:%2Fping%3Fx%3D1");
/// ```
pub fn create_key(prefix: &str, uri: &str) -> CacheKey {
    let escaped: String = form_urlencoded::byte_serialize(uri.as_bytes()).collect();
    let body = if escaped.len() > MAX_ESCAPED_LEN {
        hex::encode(Sha1::digest(uri.as_bytes()))
    } else {
        escaped
    };
    CacheKey(format!("{prefix}:{body}"))
}

/// Derives the key for a request.
///
/// Method eligibility is not checked here. `GET` keys cover the request URI
/// alone; any other method is folded in front of the URI so it can never
/// share a key with a `GET`.
pub fn derive_key(
    prefix: &str,
    method: &Method,
    path: &str,
    raw_query: Option<&str>,
    exclusions: &ExclusionSet,
    scope: QueryScope,
) -> CacheKey {
    let uri = request_uri(path, raw_query, exclusions, scope);
    match method {
        Method::Get => create_key(prefix, &uri),
        other => create_key(prefix, &format!("{other} {uri}")),
    }
}

/// [`derive_key`] applied to a parsed [`Request`].
pub fn request_key(
    prefix: &str,
    request: &Request,
    exclusions: &ExclusionSet,
    scope: QueryScope,
) -> CacheKey {
    derive_key(
        prefix,
        request.method(),
        request.path(),
        request.query_string(),
        exclusions,
        scope,
    )
}

fn request_uri(
    path: &str,
    raw_query: Option<&str>,
    exclusions: &ExclusionSet,
    scope: QueryScope,
) -> String {
    let query = match (scope, raw_query) {
        (QueryScope::PathOnly, _) | (QueryScope::Full, None) => return path.to_owned(),
        (QueryScope::Full, Some(raw)) if exclusions.is_empty() => raw.to_owned(),
        (QueryScope::Full, Some(raw)) => strip_excluded(raw, exclusions),
    };

    if query.is_empty() {
        path.to_owned()
    } else {
        format!("{path}?{query}")
    }
}

// Parameters are re-encoded sorted by name; repeated names keep their order.
fn strip_excluded(raw: &str, exclusions: &ExclusionSet) -> String {
    let mut pairs: Vec<(String, String)> = form_urlencoded::parse(raw.as_bytes())
        .into_owned()
        .filter(|(name, _)| !exclusions.contains(name))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(target: &str, exclusions: &ExclusionSet, scope: QueryScope) -> CacheKey {
        let request = Request::get(target);
        request_key(PAGE_CACHE_PREFIX, &request, exclusions, scope)
    }

    #[test]
    fn deterministic() {
        let none = ExclusionSet::new();
        assert_eq!(
            key("/x?a=1&b=2", &none, QueryScope::Full),
            key("/x?a=1&b=2", &none, QueryScope::Full)
        );
    }

    #[test]
    fn prefixed_and_escaped() {
        let k = key("/cache_ping", &ExclusionSet::new(), QueryScope::Full);
        assert_eq!(k.as_str(), "rttp.page.cache:%2Fcache_ping");
    }

    #[test]
    fn query_distinguishes_without_exclusions() {
        let none = ExclusionSet::new();
        assert_ne!(
            key("/x?name=a", &none, QueryScope::Full),
            key("/x?name=b", &none, QueryScope::Full)
        );
    }

    #[test]
    fn excluded_parameter_is_ignored() {
        let exclusions: ExclusionSet = ["name"].into_iter().collect();
        assert_eq!(
            key("/x?name=a", &exclusions, QueryScope::Full),
            key("/x?name=b", &exclusions, QueryScope::Full)
        );
        assert_eq!(
            key("/x?name=a", &exclusions, QueryScope::Full),
            key("/x", &exclusions, QueryScope::Full)
        );
    }

    #[test]
    fn remaining_parameters_are_sorted() {
        let exclusions: ExclusionSet = ["utm"].into_iter().collect();
        let k = key("/x?b=2&utm=z&a=1&b=1", &exclusions, QueryScope::Full);
        assert_eq!(k, create_key(PAGE_CACHE_PREFIX, "/x?a=1&b=2&b=1"));
    }

    #[test]
    fn path_only_scope_ignores_query() {
        let none = ExclusionSet::new();
        assert_eq!(
            key("/x?foo=1", &none, QueryScope::PathOnly),
            key("/x?foo=2", &none, QueryScope::PathOnly)
        );
        assert_eq!(
            key("/x?foo=1", &none, QueryScope::PathOnly),
            key("/x", &none, QueryScope::Full)
        );
    }

    #[test]
    fn long_uris_are_hashed() {
        let long = format!("/search?q={}", "a".repeat(250));
        let k = create_key(PAGE_CACHE_PREFIX, &long);
        let (prefix, digest) = k.as_str().split_once(':').unwrap();
        assert_eq!(prefix, PAGE_CACHE_PREFIX);
        assert_eq!(digest.len(), 40);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(k, create_key(PAGE_CACHE_PREFIX, &long));
        assert_ne!(k, create_key(PAGE_CACHE_PREFIX, &format!("{long}b")));
    }

    #[test]
    fn bound_is_on_escaped_length() {
        // 200 escaped characters stay verbatim, 201 are hashed.
        let at_bound = format!("/{}", "a".repeat(197));
        assert_eq!(
            form_urlencoded::byte_serialize(at_bound.as_bytes())
                .collect::<String>()
                .len(),
            200
        );
        assert!(create_key("p", &at_bound).as_str().ends_with(&"a".repeat(197)));
        let over = format!("{at_bound}a");
        assert_eq!(create_key("p", &over).as_str().len(), "p:".len() + 40);
    }

    #[test]
    fn methods_do_not_share_keys() {
        let none = ExclusionSet::new();
        let get = derive_key("p", &Method::Get, "/x", None, &none, QueryScope::Full);
        let head = derive_key("p", &Method::Head, "/x", None, &none, QueryScope::Full);
        assert_ne!(get, head);
    }
}
