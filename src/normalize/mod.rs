//! Conversion of backend-native values into [`CellValue`]s.
//!
//! Each backend gets one normalizer. Graph elements met along the way are
//! moved into a shared [`GraphCollector`] and replaced by
//! [`GraphRef`](crate::db::GraphRef) cells.

mod agtype;
mod bolt;

pub use agtype::{AgtypeNormalizer, PgCell};
pub use bolt::BoltNormalizer;

use crate::db::{CellValue, GraphCollector};

pub trait Normalizer {
    /// One backend value as it came off the wire.
    type Value;

    fn normalize_value(&self, value: Self::Value, graph: &mut GraphCollector) -> CellValue;

    fn normalize_rows(
        &self,
        rows: Vec<Vec<Self::Value>>,
    ) -> (Vec<Vec<CellValue>>, GraphCollector) {
        let mut graph = GraphCollector::new();
        let rows = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|value| self.normalize_value(value, &mut graph))
                    .collect()
            })
            .collect();
        (rows, graph)
    }
}
