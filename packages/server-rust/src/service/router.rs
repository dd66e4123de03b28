//! Request routing: resolves `(method, path)` to a registered
//! [`OperationHandle`] and its bound route parameters.
//!
//! Patterns are `/`-separated segments, each a literal or a `{name}`
//! parameter. Matching is exact-segment; bound parameters are
//! percent-decoded, and a segment that does not decode to UTF-8 matches
//! nothing. When several patterns match, the
//! one with the longest leading literal prefix wins, then the one with the
//! most literals. Two patterns that could match the same path with equal
//! specificity are rejected at registration.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use http::Method;

use super::chain::{Interceptor, InterceptorChain};
use super::operation::{Handler, OperationHandle};

// ---------------------------------------------------------------------------
// RouteError
// ---------------------------------------------------------------------------

/// Registration-time routing errors. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("route {method} {pattern} is ambiguous with {method} {existing}")]
    Conflict {
        method: Method,
        pattern: String,
        existing: String,
    },
    #[error("invalid route pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

// ---------------------------------------------------------------------------
// RoutePattern
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A parsed route pattern such as `/halls/{id}/tickets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// Parses `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] for a missing leading `/`,
    /// empty segments, unbalanced braces, and empty or duplicate parameter
    /// names.
    pub fn parse(raw: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some(rest) = raw.strip_prefix('/') else {
            return Err(invalid("must start with '/'"));
        };

        let mut segments = Vec::new();
        let mut names = HashSet::new();
        if !rest.is_empty() {
            for part in rest.split('/') {
                if part.is_empty() {
                    return Err(invalid("empty segment"));
                }
                if let Some(inner) = part.strip_prefix('{') {
                    let Some(name) = inner.strip_suffix('}') else {
                        return Err(invalid("unbalanced braces"));
                    };
                    if name.is_empty() {
                        return Err(invalid("empty parameter name"));
                    }
                    if name.contains(['{', '}']) {
                        return Err(invalid("unbalanced braces"));
                    }
                    if !names.insert(name) {
                        return Err(invalid(&format!("duplicate parameter `{name}`")));
                    }
                    segments.push(Segment::Param(name.to_string()));
                } else if part.contains(['{', '}']) {
                    return Err(invalid("unbalanced braces"));
                } else {
                    segments.push(Segment::Literal(part.to_string()));
                }
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `(leading literal prefix length, total literal count)`.
    #[must_use]
    pub fn specificity(&self) -> (usize, usize) {
        let prefix = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        (prefix, literals)
    }

    /// Matches already-split path segments, binding parameters.
    fn matches(&self, parts: &[&str]) -> Option<HashMap<String, String>> {
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if literal != part {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    let decoded = urlencoding::decode(part).ok()?;
                    params.insert(name.clone(), decoded.into_owned());
                }
            }
        }
        Some(params)
    }

    /// Whether some concrete path matches both patterns.
    fn overlaps(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    _ => true,
                })
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a concrete request path. `None` when it lacks the leading `/`.
fn split_path(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() {
        Some(Vec::new())
    } else {
        Some(rest.split('/').collect())
    }
}

// ---------------------------------------------------------------------------
// RouteSpec
// ---------------------------------------------------------------------------

/// A route awaiting registration.
pub struct RouteSpec {
    method: Method,
    pattern: String,
    handler: Arc<dyn Handler>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    transactional: bool,
}

impl RouteSpec {
    pub fn new(method: Method, pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            method,
            pattern: pattern.into(),
            handler: Arc::new(handler),
            interceptors: Vec::new(),
            transactional: false,
        }
    }

    pub fn get(pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::GET, pattern, handler)
    }

    pub fn post(pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::POST, pattern, handler)
    }

    pub fn delete(pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::DELETE, pattern, handler)
    }

    /// Appends a route-specific interceptor (inside the global ones).
    #[must_use]
    pub fn intercept(self, interceptor: impl Interceptor) -> Self {
        self.intercept_shared(Arc::new(interceptor))
    }

    #[must_use]
    pub fn intercept_shared(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    /// Run the handler inside a unit of work.
    #[must_use]
    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }
}

// ---------------------------------------------------------------------------
// RouteTableBuilder / RouteTable
// ---------------------------------------------------------------------------

/// Collects routes at startup and validates them.
pub struct RouteTableBuilder {
    global: Vec<Arc<dyn Interceptor>>,
    routes: HashMap<Method, Vec<Arc<OperationHandle>>>,
}

impl RouteTableBuilder {
    /// `global` interceptors wrap every route, outermost first.
    #[must_use]
    pub fn new(global: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            global,
            routes: HashMap::new(),
        }
    }

    /// Registers `spec`.
    ///
    /// # Errors
    ///
    /// Fails fast with [`RouteError::InvalidPattern`] or
    /// [`RouteError::Conflict`].
    pub fn register(&mut self, spec: RouteSpec) -> Result<&mut Self, RouteError> {
        let pattern = RoutePattern::parse(&spec.pattern)?;
        let existing = self.routes.entry(spec.method.clone()).or_default();

        if let Some(clash) = existing.iter().find(|handle| {
            handle.pattern().overlaps(&pattern)
                && handle.pattern().specificity() == pattern.specificity()
        }) {
            return Err(RouteError::Conflict {
                method: spec.method,
                pattern: pattern.raw,
                existing: clash.pattern().raw.clone(),
            });
        }

        let chain = InterceptorChain::new(
            self.global
                .iter()
                .cloned()
                .chain(spec.interceptors)
                .collect(),
        );
        existing.push(Arc::new(OperationHandle::new(
            spec.method,
            pattern,
            spec.handler,
            chain,
            spec.transactional,
        )));
        Ok(self)
    }

    /// Registers every spec in order.
    ///
    /// # Errors
    ///
    /// Stops at the first failing registration.
    pub fn register_all(
        &mut self,
        specs: impl IntoIterator<Item = RouteSpec>,
    ) -> Result<&mut Self, RouteError> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(self)
    }

    #[must_use]
    pub fn build(self) -> RouteTable {
        let mut routes = self.routes;
        for handles in routes.values_mut() {
            // Stable sort keeps registration order among equals.
            handles.sort_by_key(|h| std::cmp::Reverse(h.pattern().specificity()));
        }
        RouteTable { routes }
    }
}

/// A route that matched a request.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    pub handle: Arc<OperationHandle>,
    pub params: HashMap<String, String>,
}

/// Immutable, shareable route table.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<Method, Vec<Arc<OperationHandle>>>,
}

impl RouteTable {
    /// Resolves a request. Pure: the same input always yields the same handle.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<ResolvedRoute> {
        let parts = split_path(path)?;
        self.routes.get(method)?.iter().find_map(|handle| {
            handle.pattern().matches(&parts).map(|params| ResolvedRoute {
                handle: Arc::clone(handle),
                params,
            })
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered `(method, pattern)`, for startup logging.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes
            .iter()
            .flat_map(|(method, handles)| handles.iter().map(move |h| (method, h.pattern().as_str())))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
