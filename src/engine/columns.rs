//! Output column names for a Cypher query, derived from its RETURN clause.
//!
//! AGE needs the column list spelled out when a Cypher query is wrapped in
//! `cypher(...)`; Neo4j rows come back keyed, and the same list fixes their
//! column order.

use regex::Regex;
use std::sync::OnceLock;

/// Column name used when nothing better can be derived.
pub const DEFAULT_COLUMN: &str = "result";

fn return_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?is)\bRETURN\s+(?:DISTINCT\s+)?(.*?)(?:\s+ORDER\s+BY\b|\s+SKIP\b|\s+LIMIT\b|\s+UNION\b|$)",
        )
        .expect("valid RETURN regex")
    })
}

fn alias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s+AS\s+(\w+)\s*$").expect("valid alias regex"))
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+$").expect("valid identifier regex"))
}

fn property_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+\.(\w+)$").expect("valid property regex"))
}

/// Resolve the output columns of `cypher`.
///
/// - `n AS node` gives `node`
/// - `n` gives `n`
/// - `n.name` gives `name`
/// - anything else gives `col<N>`, N being its 1-based position
///
/// Without a RETURN clause (or with an empty one) the single column
/// [`DEFAULT_COLUMN`] is returned.
pub fn resolve_return_columns(cypher: &str) -> Vec<String> {
    let mut columns = Vec::new();
    for fragment in return_items(cypher) {
        let name = if let Some(alias) = alias_re().captures(fragment) {
            alias[1].to_string()
        } else if identifier_re().is_match(fragment) {
            fragment.to_string()
        } else if let Some(prop) = property_re().captures(fragment) {
            prop[1].to_string()
        } else {
            format!("col{}", columns.len() + 1)
        };
        columns.push(name);
    }

    if columns.is_empty() {
        vec![DEFAULT_COLUMN.to_string()]
    } else {
        columns
    }
}

/// The keys Neo4j gives each RETURN item: the alias when there is one,
/// otherwise the item's text as written (`n.name`, `count(*)`).
pub fn return_keys(cypher: &str) -> Vec<String> {
    return_items(cypher)
        .into_iter()
        .map(|fragment| match alias_re().captures(fragment) {
            Some(alias) => alias[1].to_string(),
            None => fragment.to_string(),
        })
        .collect()
}

/// Top-level items of the first RETURN clause, trimmed.
fn return_items(cypher: &str) -> Vec<&str> {
    return_clause_re()
        .captures(cypher)
        .and_then(|caps| caps.get(1))
        .map(|m| split_top_level(m.as_str().trim()))
        .unwrap_or_default()
}

/// Split on commas that are not nested inside `()`, `[]` or `{}`.
/// Commas inside quoted strings never split either.
fn split_top_level(clause: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in clause.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(clause[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(clause[start..].trim());

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_identifier_and_expression() {
        assert_eq!(
            resolve_return_columns("MATCH (n)-->(m) RETURN n, m.name AS mn, count(*)"),
            vec!["n", "mn", "col3"]
        );
    }

    #[test]
    fn test_commas_inside_calls_do_not_split() {
        let cols = resolve_return_columns("MATCH (a), (b) RETURN coalesce(a,b) AS x, c");
        assert_eq!(cols, vec!["x", "c"]);
    }

    #[test]
    fn test_commas_inside_lists_and_maps_do_not_split() {
        let cols = resolve_return_columns("RETURN [1, 2, 3] AS xs, {a: 1, b: 2} AS m, n");
        assert_eq!(cols, vec!["xs", "m", "n"]);
    }

    #[test]
    fn test_no_return_clause() {
        assert_eq!(resolve_return_columns("CREATE (n:Person)"), vec!["result"]);
    }

    #[test]
    fn test_empty_return_clause() {
        assert_eq!(resolve_return_columns("MATCH (n) RETURN "), vec!["result"]);
    }

    #[test]
    fn test_property_access() {
        assert_eq!(
            resolve_return_columns("MATCH (p:Person) RETURN p.name, p.age"),
            vec!["name", "age"]
        );
    }

    #[test]
    fn test_case_insensitive_and_distinct() {
        assert_eq!(
            resolve_return_columns("match (n) return distinct n as person"),
            vec!["person"]
        );
    }

    #[test]
    fn test_stops_at_order_skip_limit() {
        assert_eq!(
            resolve_return_columns("MATCH (n) RETURN n.name ORDER BY n.name SKIP 5 LIMIT 10"),
            vec!["name"]
        );
        assert_eq!(
            resolve_return_columns("MATCH (n) RETURN n LIMIT 25"),
            vec!["n"]
        );
    }

    #[test]
    fn test_stops_at_union() {
        assert_eq!(
            resolve_return_columns("MATCH (a:A) RETURN a.x AS v UNION MATCH (b:B) RETURN b.y AS v"),
            vec!["v"]
        );
    }

    #[test]
    fn test_multiline_query() {
        let q = "MATCH p = (a)-[r]->(b)\nRETURN p,\n       a,\n       size(nodes(p))";
        assert_eq!(resolve_return_columns(q), vec!["p", "a", "col3"]);
    }

    #[test]
    fn test_quoted_commas() {
        let q = "RETURN 'a, b' AS s, n";
        assert_eq!(resolve_return_columns(q), vec!["s", "n"]);
    }

    #[test]
    fn test_return_keys_keep_expression_text() {
        assert_eq!(
            return_keys("MATCH (n)-->(m) RETURN n.name, m, count(*) AS total"),
            vec!["n.name", "m", "total"]
        );
        assert_eq!(
            return_keys("MATCH (p:Person) RETURN DISTINCT p.name, p.age LIMIT 3"),
            vec!["p.name", "p.age"]
        );
        assert!(return_keys("CREATE (n)").is_empty());
    }

    #[test]
    fn test_synthesized_names_use_position() {
        assert_eq!(
            resolve_return_columns("RETURN 1 + 1, n, toUpper(n.name)"),
            vec!["col1", "n", "col3"]
        );
    }
}
