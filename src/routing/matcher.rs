//! Host and endpoint path matching.
//!
//! # Responsibilities
//! - Match virtual-host names (`*`, `*.domain`, exact; case-insensitive)
//! - Normalize endpoint paths and match them by whole segments
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110 host names)
//! - Path matching is case-sensitive and segment based: `/ab` never matches `/a`
//! - No regex to guarantee O(n) matching

/// Server-name pattern of a Host context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostPattern {
    /// `*`: every host.
    Any,
    /// A single name, stored lowercase.
    Exact(String),
    /// `*.domain`: any name with at least one label in front of `domain`.
    /// Stores the domain part, lowercase.
    Wildcard(String),
}

impl HostPattern {
    /// Parse a configured server name.
    pub fn new(server_name: &str) -> Self {
        let name = server_name.trim().to_lowercase();
        if name == "*" {
            HostPattern::Any
        } else if let Some(domain) = name.strip_prefix("*.") {
            HostPattern::Wildcard(domain.to_string())
        } else {
            HostPattern::Exact(name)
        }
    }

    /// Returns true if `hostname` (without port) is served by this pattern.
    ///
    /// Wildcards are checked by stripping the leftmost label repeatedly, so
    /// `*.example.com` accepts `www.example.com` and `a.b.example.com` but not
    /// `example.com`.
    pub fn is_match(&self, hostname: &str) -> bool {
        let hostname = hostname.trim_end_matches('.').to_lowercase();
        match self {
            HostPattern::Any => true,
            HostPattern::Exact(name) => *name == hostname,
            HostPattern::Wildcard(domain) => {
                let mut rest = hostname.as_str();
                while let Some(dot) = rest.find('.') {
                    rest = &rest[dot + 1..];
                    if rest == domain {
                        return true;
                    }
                }
                false
            }
        }
    }
}

impl std::fmt::Display for HostPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPattern::Any => f.write_str("*"),
            HostPattern::Exact(name) => f.write_str(name),
            HostPattern::Wildcard(domain) => write!(f, "*.{}", domain),
        }
    }
}

/// Strip the port from a `Host` header value.
///
/// Handles bracketed IPv6 literals (`[::1]:8080` → `[::1]`).
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Split a request path into its non-empty segments.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|segment| !segment.is_empty())
}

/// Normalized endpoint path: leading slash, no trailing slash, no empty segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct EndpointPath {
    segments: Vec<String>,
}

impl EndpointPath {
    pub fn new(path: &str) -> Self {
        Self {
            segments: path_segments(path).map(str::to_string).collect(),
        }
    }

    /// The root path `/`.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenate a nested endpoint path onto this one.
    pub fn join(&self, nested: &EndpointPath) -> EndpointPath {
        let mut segments = self.segments.clone();
        segments.extend(nested.segments.iter().cloned());
        EndpointPath { segments }
    }

    /// Returns true if this path is a whole-segment prefix of `request_path`.
    pub fn is_match(&self, request_path: &str) -> bool {
        let mut request = path_segments(request_path);
        self.segments
            .iter()
            .all(|segment| request.next() == Some(segment.as_str()))
    }
}

impl std::fmt::Display for EndpointPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}
