use anyhow::{bail, Context, Result};
use axum::http::{header, HeaderName, Method};
use percent_encoding::percent_decode_str;
use std::fmt;

use crate::delegation::PermissionScope;
use crate::error::ApiError;
use crate::status::{self, StatusRule};

// Route path constants - single source of truth for all API paths

pub const HEALTH: &str = "/health";
pub const SWAGGER_UI: &str = "/swagger-ui";
pub const OPENAPI_JSON: &str = "/api-docs/openapi.json";

pub const FOLDER_ITEM: &str = "/{folder}/{item}";
pub const USER_FILE: &str = "/users/{userId}/files/{fileName}";

/// Declared proxy routes, one variant per method and path shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    FolderItem,
    UserFileGet,
    UserFilePut,
}

impl RouteKind {
    pub const ALL: [RouteKind; 3] = [
        RouteKind::FolderItem,
        RouteKind::UserFileGet,
        RouteKind::UserFilePut,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RouteKind::FolderItem => "get_folder_item",
            RouteKind::UserFileGet => "get_user_file",
            RouteKind::UserFilePut => "put_user_file",
        }
    }

    /// The static definition of this route
    pub fn definition(self) -> RouteDefinition {
        let response_header_map = vec![
            (header::DATE, HeaderName::from_static("timestamp")),
            (header::CONTENT_LENGTH, header::CONTENT_LENGTH),
            (header::CONTENT_TYPE, header::CONTENT_TYPE),
        ];

        match self {
            RouteKind::FolderItem => RouteDefinition {
                kind: self,
                method: Method::GET,
                pattern_source: FOLDER_ITEM,
                pattern: PathPattern::parse(FOLDER_ITEM),
                key_template: PathPattern::parse("{folder}/{item}"),
                forwarded_headers: vec![],
                required_headers: vec![],
                response_header_map,
                status_rules: status::default_rules(),
                scope: PermissionScope::Read,
            },
            RouteKind::UserFileGet => RouteDefinition {
                kind: self,
                method: Method::GET,
                pattern_source: USER_FILE,
                pattern: PathPattern::parse(USER_FILE),
                key_template: PathPattern::parse("{userId}/{fileName}"),
                forwarded_headers: vec![header::ACCEPT],
                required_headers: vec![header::ACCEPT],
                response_header_map,
                status_rules: status::default_rules(),
                scope: PermissionScope::ReadWrite,
            },
            RouteKind::UserFilePut => RouteDefinition {
                kind: self,
                method: Method::PUT,
                pattern_source: USER_FILE,
                pattern: PathPattern::parse(USER_FILE),
                key_template: PathPattern::parse("{userId}/{fileName}"),
                forwarded_headers: vec![header::CONTENT_TYPE],
                required_headers: vec![header::CONTENT_TYPE],
                response_header_map,
                status_rules: status::default_rules(),
                scope: PermissionScope::ReadWrite,
            },
        }
    }
}

/// A path or key segment: fixed text or a named capture written `{name}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Capture(String),
}

impl Segment {
    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
            Some(name) => Segment::Capture(name.to_string()),
            None => Segment::Literal(raw.to_string()),
        }
    }
}

/// Ordered `/`-separated segments, used both for inbound path patterns and
/// for object key templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Self {
        let segments = pattern
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(Segment::parse)
            .collect();
        Self { segments }
    }

    pub fn captures(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Capture(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Structural match: same segment count, equal literals, non-empty
    /// captures. Returns the raw (still percent-encoded) captured values.
    fn match_segments<'a>(&'a self, path: &[&'a str]) -> Option<Vec<(&'a str, &'a str)>> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(literal) if literal == value => {}
                Segment::Capture(name) if !value.is_empty() => {
                    captured.push((name.as_str(), *value));
                }
                _ => return None,
            }
        }
        Some(captured)
    }

    /// Substitute captures into this template, joining segments with `/`
    pub fn render(&self, captures: &Captures) -> Result<String> {
        let rendered = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(literal) => Ok(literal.as_str()),
                Segment::Capture(name) => captures
                    .get(name)
                    .with_context(|| format!("no value captured for '{{{}}}'", name)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join("/"))
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match segment {
                Segment::Literal(literal) => write!(f, "{}", literal)?,
                Segment::Capture(name) => write!(f, "{{{}}}", name)?,
            }
        }
        Ok(())
    }
}

/// Decoded path parameters of a matched request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    values: Vec<(String, String)>,
}

impl Captures {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(captured, _)| captured == name)
            .map(|(_, value)| value.as_str())
    }

    fn decode(raw: Vec<(&str, &str)>) -> Result<Self, ApiError> {
        let mut values = Vec::with_capacity(raw.len());
        for (name, value) in raw {
            let invalid = || ApiError::InvalidPathParameter {
                name: name.to_string(),
                value: value.to_string(),
            };
            let decoded = percent_decode_str(value)
                .decode_utf8()
                .map_err(|_| invalid())?;
            if decoded.contains('/') || decoded == "." || decoded == ".." {
                return Err(invalid());
            }
            values.push((name.to_string(), decoded.into_owned()));
        }
        Ok(Self { values })
    }
}

/// Static mapping from an inbound method and path shape to a storage operation
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub kind: RouteKind,
    pub method: Method,
    pub pattern_source: &'static str,
    pub pattern: PathPattern,
    pub key_template: PathPattern,
    pub forwarded_headers: Vec<HeaderName>,
    pub required_headers: Vec<HeaderName>,
    /// Storage response header -> caller response header
    pub response_header_map: Vec<(HeaderName, HeaderName)>,
    pub status_rules: Vec<StatusRule>,
    pub scope: PermissionScope,
}

impl RouteDefinition {
    pub fn validate(&self) -> Result<()> {
        let name = self.kind.name();

        let captures: Vec<&str> = self.pattern.captures().collect();
        for (i, capture) in captures.iter().enumerate() {
            if captures[i + 1..].contains(capture) {
                bail!("route {}: path capture '{{{}}}' is declared twice", name, capture);
            }
            let uses = self
                .key_template
                .captures()
                .filter(|used| used == capture)
                .count();
            if uses != 1 {
                bail!(
                    "route {}: path capture '{{{}}}' is used {} times in the key template, expected exactly once",
                    name,
                    capture,
                    uses
                );
            }
        }
        if let Some(unknown) = self
            .key_template
            .captures()
            .find(|used| !captures.contains(used))
        {
            bail!(
                "route {}: key template uses '{{{}}}' which the path does not capture",
                name,
                unknown
            );
        }

        status::validate_rules(&self.status_rules)
            .with_context(|| format!("route {}: invalid status rules", name))?;

        if !self.scope.permits(&self.method) {
            bail!(
                "route {}: {} is not permitted under the {} scope",
                name,
                self.method,
                self.scope
            );
        }

        Ok(())
    }
}

/// The immutable set of routes the proxy serves
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<RouteDefinition>,
}

impl RouteTable {
    /// The declared routes, validated
    pub fn declared() -> Result<Self> {
        Self::new(RouteKind::ALL.iter().map(|kind| kind.definition()).collect())
    }

    pub fn new(routes: Vec<RouteDefinition>) -> Result<Self> {
        for route in &routes {
            route.validate()?;
        }
        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[RouteDefinition] {
        &self.routes
    }

    /// Find the route for a request. The first structural match under the
    /// request method wins.
    pub fn resolve(&self, method: &Method, path: &str) -> Result<(&RouteDefinition, Captures), ApiError> {
        let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();

        let mut allowed = Vec::new();
        for route in &self.routes {
            let Some(raw) = route.pattern.match_segments(&segments) else {
                continue;
            };
            if route.method == *method {
                return Ok((route, Captures::decode(raw)?));
            }
            if !allowed.contains(&route.method) {
                allowed.push(route.method.clone());
            }
        }

        if allowed.is_empty() {
            Err(ApiError::RouteNotFound(path.to_string()))
        } else {
            Err(ApiError::MethodNotAllowed {
                method: method.clone(),
                allowed,
            })
        }
    }
}
