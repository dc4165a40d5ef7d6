use super::Normalizer;
use crate::db::{
    node_display, relationship_display, CellValue, GraphCollector, GraphNode, GraphRef,
    GraphRelationship, Properties,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use neo4rs::{BoltList, BoltMap, BoltNode, BoltPath, BoltRelation, BoltType, BoltUnboundedRelation};

/// Normalizer for values decoded from Bolt records.
#[derive(Debug, Default, Clone, Copy)]
pub struct BoltNormalizer;

impl Normalizer for BoltNormalizer {
    type Value = BoltType;

    fn normalize_value(&self, value: BoltType, graph: &mut GraphCollector) -> CellValue {
        match value {
            BoltType::Node(node) => CellValue::Graph(collect_node(node, graph)),
            BoltType::Relation(rel) => CellValue::Graph(collect_relation(rel, graph)),
            BoltType::UnboundedRelation(rel) => {
                CellValue::Graph(collect_unbounded(rel, String::new(), String::new(), graph))
            }
            BoltType::Path(path) => CellValue::Graph(collect_path(path, graph)),
            BoltType::List(list) => CellValue::List(
                list.value
                    .into_iter()
                    .map(|v| self.normalize_value(v, graph))
                    .collect(),
            ),
            BoltType::Map(map) => CellValue::Map(
                map.value
                    .into_iter()
                    .map(|(k, v)| (k.value, self.normalize_value(v, graph)))
                    .collect(),
            ),
            scalar => scalar_cell(scalar),
        }
    }
}

fn collect_node(node: BoltNode, graph: &mut GraphCollector) -> GraphRef {
    let id = node.id.value.to_string();
    let labels = labels_of(&node.labels);
    let properties = properties_of(&node.properties);
    let display = node_display(&labels, &properties);
    graph.insert_node(GraphNode {
        id: id.clone(),
        labels,
        properties,
    });
    GraphRef::node(id, display)
}

fn collect_relation(rel: BoltRelation, graph: &mut GraphCollector) -> GraphRef {
    let id = rel.id.value.to_string();
    let display = relationship_display(&rel.typ.value);
    if !graph.contains_relationship(&id) {
        graph.insert_relationship(GraphRelationship {
            id: id.clone(),
            start_node_id: rel.start_node_id.value.to_string(),
            end_node_id: rel.end_node_id.value.to_string(),
            properties: properties_of(&rel.properties),
            rel_type: rel.typ.value,
        });
    }
    GraphRef::relationship(id, display)
}

fn collect_unbounded(
    rel: BoltUnboundedRelation,
    start_node_id: String,
    end_node_id: String,
    graph: &mut GraphCollector,
) -> GraphRef {
    let id = rel.id.value.to_string();
    let display = relationship_display(&rel.typ.value);
    if !graph.contains_relationship(&id) {
        graph.insert_relationship(GraphRelationship {
            id: id.clone(),
            start_node_id,
            end_node_id,
            properties: properties_of(&rel.properties),
            rel_type: rel.typ.value,
        });
    }
    GraphRef::relationship(id, display)
}

/// Collect every element of `path`.
///
/// Bolt sends path relationships without endpoints. `indices` holds
/// (relationship, node) pairs walking from the first node: a relationship
/// index `i > 0` is `rels[i - 1]` traversed forwards, `i < 0` is
/// `rels[-i - 1]` traversed backwards.
fn collect_path(path: BoltPath, graph: &mut GraphCollector) -> GraphRef {
    let nodes = path.nodes();
    let rels = path.rels();
    let indices: Vec<i64> = path.indices().into_iter().map(|i| i.value).collect();
    let node_ids: Vec<String> = nodes.iter().map(|n| n.id.value.to_string()).collect();

    for node in nodes {
        collect_node(node, graph);
    }

    let mut endpoints: Vec<Option<(String, String)>> = vec![None; rels.len()];
    let mut current = node_ids.first().cloned().unwrap_or_default();
    for pair in indices.chunks_exact(2) {
        let (rel_index, node_index) = (pair[0], pair[1]);
        let next = usize::try_from(node_index)
            .ok()
            .and_then(|i| node_ids.get(i))
            .cloned()
            .unwrap_or_default();
        let slot = (rel_index.unsigned_abs() as usize).checked_sub(1);
        if let Some(slot) = slot.filter(|&s| s < endpoints.len()) {
            if endpoints[slot].is_none() {
                endpoints[slot] = Some(if rel_index > 0 {
                    (current.clone(), next.clone())
                } else {
                    (next.clone(), current.clone())
                });
            }
        }
        current = next;
    }

    for (rel, ends) in rels.into_iter().zip(endpoints) {
        let (start, end) = ends.unwrap_or_default();
        collect_unbounded(rel, start, end, graph);
    }

    GraphRef::path(format!("Path(length={})", indices.len() / 2))
}

fn labels_of(list: &BoltList) -> Vec<String> {
    list.value
        .iter()
        .filter_map(|v| match v {
            BoltType::String(s) => Some(s.value.clone()),
            _ => None,
        })
        .collect()
}

fn properties_of(map: &BoltMap) -> Properties {
    map.value
        .iter()
        .map(|(k, v)| (k.value.clone(), bolt_to_json(v)))
        .collect()
}

/// Property values as JSON. Temporal values become their ISO-ish text form.
fn bolt_to_json(value: &BoltType) -> serde_json::Value {
    use serde_json::Value;
    match value {
        BoltType::Null(_) => Value::Null,
        BoltType::Boolean(b) => Value::Bool(b.value),
        BoltType::Integer(i) => Value::from(i.value),
        BoltType::Float(f) => serde_json::Number::from_f64(f.value)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        BoltType::String(s) => Value::String(s.value.clone()),
        BoltType::List(list) => Value::Array(list.value.iter().map(bolt_to_json).collect()),
        BoltType::Map(map) => Value::Object(properties_of(map)),
        BoltType::Bytes(b) => Value::Array(b.value.iter().map(|byte| Value::from(*byte)).collect()),
        BoltType::Point2D(p) => serde_json::json!({
            "srid": p.sr_id.value,
            "x": p.x.value,
            "y": p.y.value,
        }),
        BoltType::Point3D(p) => serde_json::json!({
            "srid": p.sr_id.value,
            "x": p.x.value,
            "y": p.y.value,
            "z": p.z.value,
        }),
        BoltType::Node(_)
        | BoltType::Relation(_)
        | BoltType::UnboundedRelation(_)
        | BoltType::Path(_) => Value::Null,
        other => match scalar_cell(other.clone()) {
            CellValue::Null => Value::Null,
            cell => Value::String(cell.display()),
        },
    }
}

fn scalar_cell(value: BoltType) -> CellValue {
    match value {
        BoltType::Null(_) => CellValue::Null,
        BoltType::Boolean(b) => CellValue::Bool(b.value),
        BoltType::Integer(i) => CellValue::Int(i.value),
        BoltType::Float(f) => CellValue::Float(f.value),
        BoltType::String(s) => CellValue::Text(s.value),
        BoltType::Bytes(b) => CellValue::Bytes(b.value.to_vec()),
        BoltType::Date(d) => NaiveDate::try_from(&d)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        BoltType::LocalTime(t) => CellValue::Time(NaiveTime::from(&t)),
        BoltType::Time(t) => {
            let (time, offset): (NaiveTime, FixedOffset) = (&t).into();
            CellValue::Text(format!("{}{}", time, offset))
        }
        BoltType::LocalDateTime(dt) => NaiveDateTime::try_from(&dt)
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        BoltType::DateTime(dt) => DateTime::<FixedOffset>::try_from(&dt)
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        BoltType::DateTimeZoneId(dt) => DateTime::<FixedOffset>::try_from(&dt)
            .map(CellValue::TimestampTz)
            .unwrap_or(CellValue::Null),
        BoltType::Duration(d) => {
            let duration = std::time::Duration::from(d);
            CellValue::Text(format!("{}s", duration.as_secs_f64()))
        }
        point @ (BoltType::Point2D(_) | BoltType::Point3D(_)) => {
            CellValue::Json(bolt_to_json(&point))
        }
        other => CellValue::Opaque(format!("{:?}", other)),
    }
}
