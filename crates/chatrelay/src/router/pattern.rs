/// One segment of a route template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(&'static str),
    Param(&'static str),
}

/// A path template such as `/chat/v1/sessions/{sessionId}/stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTemplate {
    segments: Vec<Segment>,
}

/// Parameters captured by a successful match, still percent-encoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteMatch {
    params: Vec<(&'static str, String)>,
}

impl RouteMatch {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl RouteTemplate {
    pub fn new(template: &'static str) -> Self {
        let segments = template
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => Segment::Param(name),
                None => Segment::Literal(s),
            })
            .collect();
        Self { segments }
    }

    /// Matches the whole path. A trailing slash is tolerated; empty parameters are not.
    pub fn matches(&self, path: &str) -> Option<RouteMatch> {
        let path = path.split('?').next().unwrap_or_default();
        let parts: Vec<&str> = path.trim_end_matches('/').split('/').skip(1).collect();
        if !path.starts_with('/') || parts.len() != self.segments.len() {
            return None;
        }

        let mut found = RouteMatch::default();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(lit) if *lit == part => {}
                Segment::Param(name) if !part.is_empty() => {
                    found.params.push((*name, part.to_string()));
                }
                _ => return None,
            }
        }
        Some(found)
    }
}
