//! Purpose: Shared matrix-info JSON serializers for the `info` command.
//! Exports: `matrix_info_json` and `index_map_json`.
//! Role: Keep the metadata envelope shape consistent across commands.
//! Invariants: Stable key names for v0 info payloads; per-kind keys are additive-only.

use ciftikit::core::matrix::CiftiMatrix;
use ciftikit::mapping::{Axis, CiftiXml, IndexMap, ModelKind};
use serde_json::{Map, Value, json};

pub(crate) fn matrix_info_json(matrix: &CiftiMatrix, xml: &CiftiXml) -> Value {
    let mut map = Map::new();
    map.insert("path".to_string(), json!(matrix.path().display().to_string()));
    map.insert("rows".to_string(), json!(matrix.rows()));
    map.insert("columns".to_string(), json!(matrix.columns()));
    map.insert("intent".to_string(), json!(matrix.intent().name()));
    map.insert("intent_code".to_string(), json!(matrix.intent().code()));
    map.insert("byte_order".to_string(), json!(matrix.byte_order().name()));
    map.insert(
        "maps".to_string(),
        json!({
            "rows": index_map_json(xml.map(Axis::Rows)),
            "columns": index_map_json(xml.map(Axis::Columns)),
        }),
    );
    if !xml.metadata().is_empty() {
        map.insert("metadata".to_string(), json!(xml.metadata()));
    }
    Value::Object(map)
}

pub(crate) fn index_map_json(index_map: &IndexMap) -> Value {
    let mut map = Map::new();
    map.insert("kind".to_string(), json!(index_map.kind().cifti_name()));
    map.insert("length".to_string(), json!(index_map.len()));
    match index_map {
        IndexMap::BrainModels(models) => {
            let entries: Vec<Value> = models
                .models()
                .iter()
                .map(|model| match model.kind() {
                    ModelKind::Surface {
                        number_of_vertices, ..
                    } => json!({
                        "structure": model.structure().cifti_name(),
                        "model": "surface",
                        "offset": model.offset(),
                        "count": model.count(),
                        "number_of_vertices": number_of_vertices,
                    }),
                    ModelKind::Voxels { .. } => json!({
                        "structure": model.structure().cifti_name(),
                        "model": "voxels",
                        "offset": model.offset(),
                        "count": model.count(),
                    }),
                })
                .collect();
            map.insert("models".to_string(), Value::Array(entries));
            if let Some(space) = models.volume_space() {
                map.insert("volume_dims".to_string(), json!(space.dims()));
            }
        }
        IndexMap::Parcels(parcels) => {
            let names: Vec<&str> = parcels.parcels().iter().map(|p| p.name.as_str()).collect();
            map.insert("parcels".to_string(), json!(names));
            let surfaces: Vec<Value> = parcels
                .surfaces()
                .map(|(structure, count)| {
                    json!({ "structure": structure.cifti_name(), "number_of_vertices": count })
                })
                .collect();
            map.insert("surfaces".to_string(), Value::Array(surfaces));
        }
        IndexMap::Labels(labels) => {
            let maps: Vec<Value> = labels
                .maps()
                .iter()
                .map(|named| json!({ "name": named.name, "labels": named.table.len() }))
                .collect();
            map.insert("maps".to_string(), Value::Array(maps));
        }
        IndexMap::Scalars(scalars) => {
            let names: Vec<&str> = scalars.maps().iter().map(|m| m.name.as_str()).collect();
            map.insert("names".to_string(), json!(names));
        }
        IndexMap::Series(series) => {
            map.insert("start".to_string(), json!(series.start));
            map.insert("step".to_string(), json!(series.step));
            map.insert("exponent".to_string(), json!(series.exponent));
            map.insert("unit".to_string(), json!(series.unit.cifti_name()));
        }
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::index_map_json;
    use ciftikit::mapping::{IndexMap, SeriesMap, SeriesUnit};

    #[test]
    fn series_json_carries_timing() {
        let value = index_map_json(&IndexMap::Series(SeriesMap::new(
            4,
            0.0,
            0.72,
            SeriesUnit::Second,
        )));
        assert_eq!(value["kind"], "CIFTI_INDEX_TYPE_SERIES");
        assert_eq!(value["length"], 4);
        assert_eq!(value["unit"], "SECOND");
    }
}
