//! Derived flags telling renderers which views of a result make sense.

use crate::db::{CellValue, GraphRefKind};

/// True iff every cell is a graph reference (node, relationship or path)
/// and there is at least one relationship to draw.
pub fn is_graph_compatible(rows: &[Vec<CellValue>], relationship_count: usize) -> bool {
    if relationship_count == 0 {
        return false;
    }
    rows.iter()
        .flatten()
        .all(|cell| matches!(cell, CellValue::Graph(_)))
}

/// True iff there is at least one row and every cell is a path reference.
pub fn is_paths_only(rows: &[Vec<CellValue>]) -> bool {
    if rows.is_empty() {
        return false;
    }
    rows.iter().flatten().all(|cell| {
        cell.as_graph_ref()
            .is_some_and(|r| r.kind == GraphRefKind::Path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::GraphRef;

    fn node(id: &str) -> CellValue {
        CellValue::Graph(GraphRef::node(id, format!("({})", id)))
    }

    fn rel(id: &str) -> CellValue {
        CellValue::Graph(GraphRef::relationship(id, "-[rel]->".into()))
    }

    fn path() -> CellValue {
        CellValue::Graph(GraphRef::path("Path(length=1)".into()))
    }

    #[test]
    fn test_paths_only_rows() {
        let rows = vec![vec![path()], vec![path(), path()]];
        assert!(is_paths_only(&rows));
        assert!(!is_graph_compatible(&rows, 0));
    }

    #[test]
    fn test_scalar_breaks_graph_compatibility() {
        let rows = vec![vec![node("1"), rel("r1"), CellValue::Int(3)]];
        assert!(!is_graph_compatible(&rows, 1));
        assert!(!is_paths_only(&rows));
    }

    #[test]
    fn test_graph_compatible_requires_relationships() {
        let rows = vec![vec![node("1"), rel("r1"), node("2")]];
        assert!(is_graph_compatible(&rows, 1));
        assert!(!is_graph_compatible(&rows, 0));
    }

    #[test]
    fn test_nodes_only_is_not_graph_compatible() {
        let rows = vec![vec![node("1")], vec![node("2")]];
        assert!(!is_graph_compatible(&rows, 0));
        assert!(!is_paths_only(&rows));
    }

    #[test]
    fn test_nested_list_is_not_a_graph_cell() {
        let rows = vec![vec![CellValue::List(vec![node("1")]), rel("r1")]];
        assert!(!is_graph_compatible(&rows, 1));
    }

    #[test]
    fn test_mixed_path_and_node_not_paths_only() {
        let rows = vec![vec![path(), node("1")]];
        assert!(!is_paths_only(&rows));
    }

    #[test]
    fn test_empty_rows() {
        assert!(!is_paths_only(&[]));
        assert!(!is_graph_compatible(&[], 0));
        // Vacuously every cell is a graph cell
        assert!(is_graph_compatible(&[], 2));
    }
}
