use crate::db::{CellValue, GraphRefKind, QueryResult};
use serde_json::json;
use unicode_width::UnicodeWidthStr;

/// Widest a text-table column is allowed to grow.
const TABLE_MAX_WIDTH: usize = 60;

pub fn to_csv(result: &QueryResult) -> String {
    let mut output = String::new();

    // Header
    let headers: Vec<String> = result.columns.iter().map(|c| csv_escape(c)).collect();
    output.push_str(&headers.join(","));
    output.push('\n');

    // Rows
    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| csv_escape(&cell_to_csv(cell)))
            .collect();
        output.push_str(&cells.join(","));
        output.push('\n');
    }

    output
}

pub fn to_tsv(result: &QueryResult) -> String {
    let mut output = String::new();

    output.push_str(&result.columns.join("\t"));
    output.push('\n');

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|cell| cell_to_csv(cell).replace(['\t', '\n'], " "))
            .collect();
        output.push_str(&cells.join("\t"));
        output.push('\n');
    }

    output
}

/// The full result as a JSON document: rows keyed by column plus the
/// collected graph.
pub fn to_json(result: &QueryResult) -> String {
    let rows: Vec<serde_json::Value> = result
        .rows
        .iter()
        .map(|row| {
            let obj: serde_json::Map<String, serde_json::Value> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    let col_name = result
                        .columns
                        .get(i)
                        .cloned()
                        .unwrap_or_else(|| format!("column_{}", i));
                    (col_name, cell_to_json(cell))
                })
                .collect();
            serde_json::Value::Object(obj)
        })
        .collect();

    let document = json!({
        "columns": result.columns,
        "rows": rows,
        "nodes": result.nodes,
        "relationships": result.relationships,
        "row_count": result.row_count,
        "execution_time_ms": result.execution_time_ms(),
        "is_graph_compatible": result.is_graph_compatible,
        "is_paths_only": result.is_paths_only,
    });
    serde_json::to_string_pretty(&document).unwrap_or_else(|_| "{}".to_string())
}

/// Plain-text grid for terminals, followed by a one-line summary.
pub fn to_table(result: &QueryResult) -> String {
    let mut output = String::new();

    if !result.columns.is_empty() {
        let cells: Vec<Vec<String>> = result
            .rows
            .iter()
            .map(|row| row.iter().map(|c| fit(&c.display(), TABLE_MAX_WIDTH)).collect())
            .collect();

        let mut widths: Vec<usize> = result.columns.iter().map(|c| c.width()).collect();
        for row in &cells {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.width());
                }
            }
        }

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        output.push_str(&table_line(&result.columns, &widths));
        output.push_str(&format!("+-{}-+\n", separator.join("-+-")));
        for row in &cells {
            output.push_str(&table_line(row, &widths));
        }
    }

    output.push_str(&format!(
        "({} row{}, {} node{}, {} relationship{}, {:.1} ms)\n",
        result.row_count,
        plural(result.row_count),
        result.nodes.len(),
        plural(result.nodes.len()),
        result.relationships.len(),
        plural(result.relationships.len()),
        result.execution_time_ms()
    ));
    output
}

fn table_line(cells: &[String], widths: &[usize]) -> String {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, w)| format!("{}{}", cell, " ".repeat(w.saturating_sub(cell.width()))))
        .collect();
    format!("| {} |\n", padded.join(" | "))
}

fn fit(text: &str, max: usize) -> String {
    let single = text.replace(['\n', '\r'], " ");
    if single.width() <= max {
        return single;
    }
    let mut out = String::new();
    for ch in single.chars() {
        if out.width() + 4 > max {
            break;
        }
        out.push(ch);
    }
    out.push_str("...");
    out
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn cell_to_csv(cell: &CellValue) -> String {
    match cell {
        CellValue::Null => String::new(),
        other => other.display(),
    }
}

fn cell_to_json(cell: &CellValue) -> serde_json::Value {
    match cell {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Bool(b) => serde_json::Value::Bool(*b),
        CellValue::Int(i) => json!(*i),
        CellValue::Float(f) => json!(*f),
        CellValue::Json(j) => j.clone(),
        CellValue::List(items) => serde_json::Value::Array(items.iter().map(cell_to_json).collect()),
        CellValue::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), cell_to_json(v)))
                .collect(),
        ),
        CellValue::Graph(r) => {
            let kind = match r.kind {
                GraphRefKind::Node => "node",
                GraphRefKind::Relationship => "rel",
                GraphRefKind::Path => "path",
            };
            json!({ "__type": kind, "id": r.id, "display": r.display })
        }
        other => serde_json::Value::String(other.display()),
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GraphCollector, GraphNode, GraphRef, GraphRelationship, Properties};
    use std::time::Duration;

    fn make_result() -> QueryResult {
        QueryResult::assemble(
            vec!["id".to_string(), "name".to_string(), "active".to_string()],
            vec![
                vec![
                    CellValue::Int(1),
                    CellValue::Text("Alice".to_string()),
                    CellValue::Bool(true),
                ],
                vec![
                    CellValue::Int(2),
                    CellValue::Text("Bob".to_string()),
                    CellValue::Null,
                ],
            ],
            GraphCollector::new(),
            Duration::from_millis(10),
        )
    }

    fn make_graph_result() -> QueryResult {
        let mut graph = GraphCollector::new();
        for id in ["1", "2"] {
            graph.insert_node(GraphNode {
                id: id.to_string(),
                labels: vec!["Person".to_string()],
                properties: Properties::new(),
            });
        }
        graph.insert_relationship(GraphRelationship {
            id: "9".to_string(),
            rel_type: "KNOWS".to_string(),
            start_node_id: "1".to_string(),
            end_node_id: "2".to_string(),
            properties: Properties::new(),
        });
        QueryResult::assemble(
            vec!["a".into(), "r".into(), "b".into()],
            vec![vec![
                CellValue::Graph(GraphRef::node("1", "(Person)".into())),
                CellValue::Graph(GraphRef::relationship("9", "-[:KNOWS]->".into())),
                CellValue::Graph(GraphRef::node("2", "(Person)".into())),
            ]],
            graph,
            Duration::from_millis(3),
        )
    }

    #[test]
    fn test_csv_export() {
        let result = make_result();
        let csv = to_csv(&result);
        assert!(csv.starts_with("id,name,active\n"));
        assert!(csv.contains("1,Alice,true\n"));
        assert!(csv.contains("2,Bob,\n"));
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("hello"), "hello");
        assert_eq!(csv_escape("hello,world"), "\"hello,world\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_tsv_export() {
        let result = make_result();
        let tsv = to_tsv(&result);
        assert!(tsv.starts_with("id\tname\tactive\n"));
        assert!(tsv.contains("1\tAlice\ttrue\n"));
    }

    #[test]
    fn test_json_export() {
        let result = make_result();
        let parsed: serde_json::Value = serde_json::from_str(&to_json(&result)).unwrap();
        assert_eq!(parsed["row_count"], 2);
        assert_eq!(parsed["rows"][0]["id"], 1);
        assert_eq!(parsed["rows"][0]["name"], "Alice");
        assert!(parsed["rows"][1]["active"].is_null());
        assert_eq!(parsed["is_graph_compatible"], false);
    }

    #[test]
    fn test_json_graph_export() {
        let parsed: serde_json::Value =
            serde_json::from_str(&to_json(&make_graph_result())).unwrap();
        assert_eq!(parsed["is_graph_compatible"], true);
        assert_eq!(parsed["rows"][0]["a"]["__type"], "node");
        assert_eq!(parsed["rows"][0]["r"]["__type"], "rel");
        assert_eq!(parsed["rows"][0]["r"]["id"], "9");
        assert_eq!(parsed["nodes"].as_array().map(|n| n.len()), Some(2));
        assert_eq!(parsed["relationships"][0]["type"], "KNOWS");
        assert_eq!(parsed["relationships"][0]["start_node_id"], "1");
    }

    #[test]
    fn test_path_ref_has_null_id() {
        let json = cell_to_json(&CellValue::Graph(GraphRef::path("Path(length=1)".into())));
        assert_eq!(json["__type"], "path");
        assert!(json["id"].is_null());
    }

    #[test]
    fn test_table_alignment() {
        let table = to_table(&make_result());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "| id | name  | active |");
        assert_eq!(lines[1], "+----+-------+--------+");
        assert_eq!(lines[2], "| 1  | Alice | true   |");
        assert_eq!(lines[3], "| 2  | Bob   | NULL   |");
        assert!(lines[4].starts_with("(2 rows, 0 nodes, 0 relationships"));
    }

    #[test]
    fn test_table_truncates_long_cells() {
        assert_eq!(fit("abcdef", 10), "abcdef");
        assert_eq!(fit("abcdefghijklmnop", 10), "abcdefg...");
        assert_eq!(fit("a\nb", 10), "a b");
    }

    #[test]
    fn test_empty_result_table() {
        let table = to_table(&QueryResult::empty(Duration::ZERO));
        assert_eq!(table, "(0 rows, 0 nodes, 0 relationships, 0.0 ms)\n");
    }
}
