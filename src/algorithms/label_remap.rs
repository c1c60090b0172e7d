// Label key remapping across a label table axis and the cells that reference it.
use crate::algorithms::{Phase, enter, in_file, prepare_output};
use crate::core::error::{Error, ErrorKind};
use crate::core::matrix::CiftiMatrix;
use crate::mapping::{Axis, KeyRemap, RemapOutcome};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MapSelection {
    #[default]
    All,
    One(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LabelRemapReport {
    pub axis: Axis,
    /// `(map index, outcome)` for every remapped table.
    pub maps: Vec<(usize, RemapOutcome)>,
    pub cells_changed: u64,
    pub rows_written: usize,
}

/// Remaps label keys in the selected tables and rewrites every cell holding
/// one of those tables' keys. Cells that are not keys are copied unchanged.
pub fn remap_label_keys(
    input: &CiftiMatrix,
    output: &mut CiftiMatrix,
    remap: &KeyRemap,
    selection: MapSelection,
) -> Result<LabelRemapReport, Error> {
    enter("label-remap", Phase::Validating);
    let mut xml = input.cifti_xml()?.clone();
    let Some(axis) = xml.labels_axis() else {
        return Err(Error::new(ErrorKind::MappingTypeMismatch)
            .with_message("file has no label mapping along either dimension")
            .with_path(input.path()));
    };
    let labels = xml.labels_mut(axis)?;
    let selected: Vec<usize> = match selection {
        MapSelection::All => (0..labels.len()).collect(),
        MapSelection::One(index) if index < labels.len() => vec![index],
        MapSelection::One(index) => {
            return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                .with_message(format!(
                    "label map {index} does not exist, file has {} maps",
                    labels.len()
                ))
                .with_path(input.path()));
        }
    };
    let mut outcomes: Vec<Option<RemapOutcome>> = vec![None; labels.len()];
    for index in &selected {
        let Some(map) = labels.map_mut(*index) else {
            continue;
        };
        let outcome = map.table.remap_keys(remap).map_err(|err| {
            let message = format!(
                "label map {index}: {}",
                err.message().unwrap_or("remap rejected")
            );
            err.with_message(message)
        });
        outcomes[*index] = Some(outcome.map_err(in_file(input))?);
    }

    enter("label-remap", Phase::Processing);
    prepare_output(output, xml)?;
    let mut buf = vec![0f32; input.columns()];
    let mut cells_changed = 0u64;
    for row in 0..input.rows() {
        input.get_row(&mut buf, row)?;
        match axis {
            Axis::Columns => {
                for (value, outcome) in buf.iter_mut().zip(&outcomes) {
                    if let Some(outcome) = outcome {
                        cells_changed += rewrite_cell(value, outcome);
                    }
                }
            }
            Axis::Rows => {
                if let Some(outcome) = &outcomes[row] {
                    for value in buf.iter_mut() {
                        cells_changed += rewrite_cell(value, outcome);
                    }
                }
            }
        }
        output.set_row(&buf, row)?;
    }

    enter("label-remap", Phase::Finalizing);
    let maps = selected
        .into_iter()
        .filter_map(|index| outcomes[index].take().map(|outcome| (index, outcome)))
        .collect();
    Ok(LabelRemapReport {
        axis,
        maps,
        cells_changed,
        rows_written: input.rows(),
    })
}

fn rewrite_cell(value: &mut f32, outcome: &RemapOutcome) -> u64 {
    if !value.is_finite() || value.fract() != 0.0 {
        return 0;
    }
    let raw = *value as f64;
    if raw < i32::MIN as f64 || raw > i32::MAX as f64 {
        return 0;
    }
    let key = raw as i32;
    match outcome.apply(key) {
        Some(new) if new != key => {
            *value = new as f32;
            1
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::{MapSelection, remap_label_keys};
    use crate::algorithms::testing::{read_all, reopen, write, writer};
    use crate::core::error::ErrorKind;
    use crate::mapping::{
        Axis, BrainModelsMap, CiftiXml, IndexMap, KeyRemap, Label, LabelTable, LabelsMap,
        NamedLabelMap, Structure,
    };

    fn table(keys: &[i32]) -> LabelTable {
        let mut table = LabelTable::with_unassigned();
        for key in keys {
            table
                .insert(*key, Label::new(format!("area {key}"), [1.0, 0.0, 0.0, 1.0]))
                .expect("label");
        }
        table
    }

    fn dlabel(maps: usize) -> CiftiXml {
        let mut models = BrainModelsMap::new();
        models
            .add_surface_model(Structure::CortexLeft, 5, None)
            .expect("surface");
        let labels = (0..maps)
            .map(|idx| NamedLabelMap::new(format!("parc {idx}"), table(&[3, 5, 8, 2])))
            .collect();
        CiftiXml::new(
            IndexMap::BrainModels(models),
            IndexMap::Labels(LabelsMap::new(labels)),
        )
        .expect("xml")
    }

    #[test]
    fn cells_follow_their_table_and_collisions_get_fresh_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = vec![
            vec![0.0, 3.0],
            vec![3.0, 5.0],
            vec![5.0, 8.0],
            vec![8.0, 2.0],
            vec![2.0, 7.5],
        ];
        let input = write(&dir.path().join("in.dlabel.nii"), dlabel(2), &data);
        let mut output = writer(&dir.path().join("out.dlabel.nii"));
        let remap = KeyRemap::new([(3, 5), (5, 8), (8, 2)]).expect("remap");
        let report = remap_label_keys(&input, &mut output, &remap, MapSelection::One(0))
            .expect("remap");
        assert_eq!(report.axis, Axis::Columns);
        assert_eq!(report.maps.len(), 1);
        assert_eq!(report.maps[0].1.synthesized, vec![(2, 1)]);
        assert_eq!(report.cells_changed, 4);

        let output = reopen(output);
        let xml = output.cifti_xml().expect("xml");
        let labels = xml.labels(Axis::Columns).expect("labels");
        let remapped = &labels.map(0).expect("map 0").table;
        assert_eq!(remapped.keys().collect::<Vec<_>>(), vec![0, 1, 2, 5, 8]);
        assert_eq!(remapped.get(1).expect("fresh").name, "area 2");
        assert_eq!(remapped.get(5).expect("five").name, "area 3");
        let untouched = &labels.map(1).expect("map 1").table;
        assert_eq!(untouched.get(3).expect("three").name, "area 3");

        let expected = vec![
            vec![0.0, 3.0],
            vec![5.0, 5.0],
            vec![8.0, 8.0],
            vec![2.0, 2.0],
            vec![1.0, 7.5],
        ];
        assert_eq!(read_all(&output), expected);
    }

    #[test]
    fn missing_key_or_map_fails_before_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data = vec![vec![0.0]; 5];
        let input = write(&dir.path().join("in.dlabel.nii"), dlabel(1), &data);
        let mut output = writer(&dir.path().join("out.dlabel.nii"));

        let remap = KeyRemap::new([(4, 6)]).expect("remap");
        let err = remap_label_keys(&input, &mut output, &remap, MapSelection::All)
            .expect_err("missing key");
        assert_eq!(err.kind(), ErrorKind::DuplicateOrMissingInput);
        assert_eq!(err.key(), Some(4));

        let remap = KeyRemap::new([(3, 6)]).expect("remap");
        let err = remap_label_keys(&input, &mut output, &remap, MapSelection::One(3))
            .expect_err("missing map");
        assert_eq!(err.kind(), ErrorKind::DuplicateOrMissingInput);
        assert!(output.cifti_xml().is_err());
    }

    #[test]
    fn files_without_labels_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let xml = crate::algorithms::testing::dense_series(2, 2);
        let input = write(&dir.path().join("in.nii"), xml, &[vec![0.0; 2], vec![0.0; 2]]);
        let mut output = writer(&dir.path().join("out.nii"));
        let remap = KeyRemap::new([(1, 2)]).expect("remap");
        let err = remap_label_keys(&input, &mut output, &remap, MapSelection::All)
            .expect_err("no labels");
        assert_eq!(err.kind(), ErrorKind::MappingTypeMismatch);
    }
}
