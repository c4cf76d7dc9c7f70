//! Segment-wise path matching with positional placeholders.

use std::collections::BTreeMap;
use std::fmt;

use http::Method;

// ---------------------------------------------------------------------------
// Segments
// ---------------------------------------------------------------------------

/// One `/`-separated piece of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the path segment at the same position.
    Literal(String),
    /// Matches any single path segment; captured under this name.
    Placeholder(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        if is_placeholder(raw) {
            Segment::Placeholder(raw[1..].to_string())
        } else {
            Segment::Literal(raw.to_string())
        }
    }

    fn accepts(&self, value: &str) -> bool {
        match self {
            Segment::Literal(literal) => literal == value,
            Segment::Placeholder(_) => true,
        }
    }
}

/// A placeholder is `:` followed by one or more word characters and the
/// fixed suffix `Id` (e.g. `:updateId`, `:backupId`).
pub fn is_placeholder(raw: &str) -> bool {
    let Some(name) = raw.strip_prefix(':') else {
        return false;
    };
    let Some(stem) = name.strip_suffix("Id") else {
        return false;
    };
    !stem.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Placeholder name → captured path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// A method + pattern pair bound to a handler value.
#[derive(Debug, Clone)]
pub struct Route<H> {
    method: Method,
    pattern: String,
    segments: Vec<Segment>,
    handler: H,
}

impl<H> Route<H> {
    pub fn new(method: Method, pattern: impl Into<String>, handler: H) -> Self {
        let pattern = pattern.into();
        let segments = pattern.split('/').map(Segment::parse).collect();
        Self {
            method,
            pattern,
            segments,
            handler,
        }
    }

    pub fn get(pattern: impl Into<String>, handler: H) -> Self {
        Self::new(Method::GET, pattern, handler)
    }

    pub fn post(pattern: impl Into<String>, handler: H) -> Self {
        Self::new(Method::POST, pattern, handler)
    }

    pub fn delete(pattern: impl Into<String>, handler: H) -> Self {
        Self::new(Method::DELETE, pattern, handler)
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Path-only match: equal segment counts, literals equal positionally.
    pub fn matches_path(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(&parts)
                .all(|(segment, part)| segment.accepts(part))
    }

    /// Placeholder values of `path`, positionally. Callers match first; on a
    /// non-matching path the result is whatever lines up.
    pub fn extract_params(&self, path: &str) -> Params {
        let mut params = BTreeMap::new();
        for (segment, part) in self.segments.iter().zip(path.split('/')) {
            if let Segment::Placeholder(name) = segment {
                params.insert(name.clone(), part.to_string());
            }
        }
        Params(params)
    }
}

impl<H> fmt::Display for Route<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.pattern)
    }
}

// ---------------------------------------------------------------------------
// Table
// ---------------------------------------------------------------------------

/// Outcome of resolving one request against a [`RouteTable`].
#[derive(Debug)]
pub enum RouteMatch<'a, H> {
    Matched { route: &'a Route<H>, params: Params },
    /// The first route whose path matched expects a different verb.
    MethodNotAllowed { route: &'a Route<H> },
    NotFound,
}

/// Ordered, read-only route list. First path match decides.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    routes: Vec<Route<H>>,
}

impl<H> RouteTable<H> {
    pub fn new(routes: Vec<Route<H>>) -> Self {
        Self { routes }
    }

    pub fn routes(&self) -> &[Route<H>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Walk the table in order. A path match with the wrong verb stops the
    /// walk with `MethodNotAllowed`; later routes are never consulted.
    pub fn resolve(&self, method: &Method, path: &str) -> RouteMatch<'_, H> {
        for route in &self.routes {
            if !route.matches_path(path) {
                continue;
            }
            if route.method != *method {
                return RouteMatch::MethodNotAllowed { route };
            }
            return RouteMatch::Matched {
                route,
                params: route.extract_params(path),
            };
        }
        RouteMatch::NotFound
    }
}
