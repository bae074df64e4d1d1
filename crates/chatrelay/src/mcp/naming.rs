//! Identifier rules for namespaced tool names.

/// Maps any character outside `[A-Za-z0-9_]` to `_` and collapses runs of underscores.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Key under which a provider's tool is registered in the aggregated toolset.
pub fn namespaced_tool_name(provider: &str, tool: &str) -> String {
    sanitize_identifier(&format!("{provider}_{tool}"))
}

/// Positional name for a provider configured without one.
pub fn default_provider_name(position: usize) -> String {
    format!("server{}", position + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_to_simple_identifiers() {
        assert_eq!(sanitize_identifier("short.io"), "short_io");
        assert_eq!(sanitize_identifier("my--tool  v2"), "my_tool_v2");
        assert_eq!(sanitize_identifier("already_ok_123"), "already_ok_123");
        assert_eq!(sanitize_identifier("a___b"), "a_b");
        assert_eq!(sanitize_identifier("über"), "_ber");
    }

    #[test]
    fn namespacing_joins_with_single_underscore() {
        assert_eq!(namespaced_tool_name("github", "search"), "github_search");
        assert_eq!(namespaced_tool_name("docs-", "-search"), "docs_search");
        assert_eq!(namespaced_tool_name("short.io", "create link"), "short_io_create_link");
    }

    #[test]
    fn default_names_are_one_based() {
        assert_eq!(default_provider_name(0), "server1");
        assert_eq!(default_provider_name(2), "server3");
    }
}
