// CLI integration tests: fixtures are written through the library, commands run as a subprocess.
use std::path::{Path, PathBuf};
use std::process::Command;

use ciftikit::core::matrix::{CacheMode, CiftiMatrix, CreateOptions};
use ciftikit::mapping::{
    Axis, BrainModelsMap, CiftiXml, IndexMap, Label, LabelTable, LabelsMap, NamedLabelMap,
    NamedMap, ScalarsMap, SeriesMap, SeriesUnit, Structure,
};
use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_ciftikit");
    let mut command = Command::new(exe);
    command.env_remove("RUST_LOG");
    command
}

fn parse_json(value: &str) -> Value {
    serde_json::from_str(value).expect("valid json")
}

fn parse_json_lines(output: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(output)
        .lines()
        .filter(|line| line.trim_start().starts_with('{'))
        .map(parse_json)
        .collect()
}

fn models(vertices: i64) -> IndexMap {
    let mut map = BrainModelsMap::new();
    map.add_surface_model(Structure::CortexLeft, vertices, None)
        .expect("surface");
    IndexMap::BrainModels(map)
}

fn series_xml(vertices: i64, points: usize) -> CiftiXml {
    CiftiXml::new(
        models(vertices),
        IndexMap::Series(SeriesMap::new(points, 0.0, 0.72, SeriesUnit::Second)),
    )
    .expect("xml")
}

fn write_fixture(path: &Path, xml: CiftiXml, rows: &[Vec<f32>]) -> PathBuf {
    let mut matrix = CiftiMatrix::create_with_xml(path, xml, CreateOptions::new(CacheMode::OnDisk))
        .expect("create");
    for (idx, row) in rows.iter().enumerate() {
        matrix.set_row(row, idx).expect("row");
    }
    matrix.finish().expect("finish");
    path.to_path_buf()
}

fn read_rows(path: &Path) -> Vec<Vec<f32>> {
    let matrix = CiftiMatrix::open(path, CacheMode::InMemory).expect("open");
    let mut buf = vec![0f32; matrix.columns()];
    (0..matrix.rows())
        .map(|row| {
            matrix.get_row(&mut buf, row).expect("row");
            buf.clone()
        })
        .collect()
}

fn ramp(rows: usize, columns: usize, scale: f32) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|row| (0..columns).map(|col| scale * (row * columns + col) as f32).collect())
        .collect()
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[test]
fn info_reports_dimensions_and_maps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let file = write_fixture(
        &temp.path().join("a.dtseries.nii"),
        series_xml(3, 4),
        &ramp(3, 4, 1.0),
    );

    let info = cmd().args(["info", path_arg(&file)]).output().expect("info");
    assert!(info.status.success());
    let value = parse_json(std::str::from_utf8(&info.stdout).expect("utf8"));
    let info = value.get("info").expect("info object");
    assert_eq!(info["rows"], 3);
    assert_eq!(info["columns"], 4);
    assert_eq!(info["intent"], "ConnDenseSeries");
    assert_eq!(info["intent_code"], 3002);
    assert_eq!(info["byte_order"], "little");
    assert_eq!(info["maps"]["rows"]["kind"], "CIFTI_INDEX_TYPE_BRAIN_MODELS");
    assert_eq!(
        info["maps"]["rows"]["models"][0]["structure"],
        "CIFTI_STRUCTURE_CORTEX_LEFT"
    );
    assert_eq!(info["maps"]["columns"]["unit"], "SECOND");
}

#[test]
fn average_writes_weighted_mean() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = write_fixture(&temp.path().join("a.nii"), series_xml(2, 3), &ramp(2, 3, 1.0));
    let b = write_fixture(&temp.path().join("b.nii"), series_xml(2, 3), &ramp(2, 3, 4.0));
    let out = temp.path().join("mean.nii");

    let run = cmd()
        .args([
            "average",
            path_arg(&out),
            path_arg(&a),
            path_arg(&b),
            "--weights",
            "2,1",
        ])
        .output()
        .expect("average");
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let value = parse_json(std::str::from_utf8(&run.stdout).expect("utf8"));
    assert_eq!(value["average"]["inputs"], 2);
    assert_eq!(value["average"]["rows_written"], 2);
    assert_eq!(read_rows(&out), ramp(2, 3, 2.0));

    let in_memory = temp.path().join("mean_mem.nii");
    let run = cmd()
        .args(["average", path_arg(&in_memory), path_arg(&a), path_arg(&a), "--in-memory"])
        .output()
        .expect("average");
    assert!(run.status.success());
    assert_eq!(read_rows(&in_memory), ramp(2, 3, 1.0));
}

#[test]
fn weight_count_mismatch_exits_with_input_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = write_fixture(&temp.path().join("a.nii"), series_xml(2, 3), &ramp(2, 3, 1.0));
    let out = temp.path().join("mean.nii");

    let run = cmd()
        .args(["average", path_arg(&out), path_arg(&a), "--weights", "1,2"])
        .output()
        .expect("average");
    assert_eq!(run.status.code(), Some(8));
    let err = parse_json_lines(&run.stderr).pop().expect("error json");
    assert_eq!(err["error"]["kind"], "DuplicateOrMissingInput");
    assert!(run.stdout.is_empty());
}

#[test]
fn mismatched_inputs_report_structure_error_with_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = write_fixture(&temp.path().join("a.nii"), series_xml(2, 3), &ramp(2, 3, 1.0));
    let b = write_fixture(&temp.path().join("b.nii"), series_xml(3, 3), &ramp(3, 3, 1.0));
    let out = temp.path().join("mean.nii");

    let run = cmd()
        .args(["average", path_arg(&out), path_arg(&a), path_arg(&b)])
        .output()
        .expect("average");
    assert_eq!(run.status.code(), Some(7));
    let err = parse_json_lines(&run.stderr).pop().expect("error json");
    assert_eq!(err["error"]["kind"], "StructureMismatch");
    assert_eq!(err["error"]["path"], path_arg(&b));
    assert!(err["error"]["hint"].as_str().is_some());
}

#[test]
fn failed_average_leaves_existing_output_untouched() {
    let temp = tempfile::tempdir().expect("tempdir");
    let a = write_fixture(&temp.path().join("a.nii"), series_xml(2, 3), &ramp(2, 3, 1.0));
    let b = write_fixture(&temp.path().join("b.nii"), series_xml(3, 3), &ramp(3, 3, 1.0));
    let out = write_fixture(&temp.path().join("mean.nii"), series_xml(2, 3), &ramp(2, 3, 9.0));
    let before = std::fs::read(&out).expect("read output");

    for extra in [None, Some("--in-memory")] {
        let mut args = vec!["average", path_arg(&out), path_arg(&a), path_arg(&b)];
        args.extend(extra);
        let run = cmd().args(&args).output().expect("average");
        assert_eq!(run.status.code(), Some(7));
        assert_eq!(std::fs::read(&out).expect("read output"), before);
    }
    assert_eq!(read_rows(&out), ramp(2, 3, 9.0));
}

#[test]
fn correlate_with_itself_is_one() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = vec![vec![0.5, -1.0, 2.0, 3.5], vec![1.0, 4.0, -2.0, 0.0]];
    let a = write_fixture(&temp.path().join("a.nii"), series_xml(2, 4), &data);
    let out = temp.path().join("r.nii");

    let run = cmd()
        .args(["correlate", path_arg(&a), path_arg(&a), path_arg(&out)])
        .output()
        .expect("correlate");
    assert!(run.status.success());
    assert_eq!(read_rows(&out), vec![vec![1.0], vec![1.0]]);

    let fisher = temp.path().join("z.nii");
    let run = cmd()
        .args(["correlate", path_arg(&a), path_arg(&a), path_arg(&fisher), "--fisher-z"])
        .output()
        .expect("correlate");
    assert!(run.status.success());
    assert!(read_rows(&fisher).iter().all(|row| row[0].is_finite() && row[0] > 7.0));
}

#[test]
fn transpose_twice_restores_the_matrix() {
    let temp = tempfile::tempdir().expect("tempdir");
    let data = ramp(3, 5, 0.5);
    let input = write_fixture(&temp.path().join("x.nii"), series_xml(3, 5), &data);
    let once = temp.path().join("xt.nii");
    let twice = temp.path().join("xtt.nii");

    let run = cmd()
        .args(["transpose", path_arg(&input), path_arg(&once), "--mem-limit", "1"])
        .output()
        .expect("transpose");
    assert!(run.status.success());
    let value = parse_json(std::str::from_utf8(&run.stdout).expect("utf8"));
    assert_eq!(value["transpose"]["cache_rows"], 5);
    assert_eq!(value["transpose"]["passes"], 1);

    let run = cmd()
        .args(["transpose", path_arg(&once), path_arg(&twice)])
        .output()
        .expect("transpose");
    assert!(run.status.success());
    assert_eq!(read_rows(&twice), data);
}

#[test]
fn label_remap_emits_notice_for_synthesized_key() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut table = LabelTable::with_unassigned();
    for key in [3, 5, 8] {
        table
            .insert(key, Label::new(format!("area {key}"), [0.2, 0.4, 0.6, 1.0]))
            .expect("label");
    }
    let xml = CiftiXml::new(
        models(4),
        IndexMap::Labels(LabelsMap::new(vec![NamedLabelMap::new("parc", table)])),
    )
    .expect("xml");
    let data = vec![vec![0.0], vec![3.0], vec![5.0], vec![8.0]];
    let input = write_fixture(&temp.path().join("parc.dlabel.nii"), xml, &data);
    let out = temp.path().join("out.dlabel.nii");

    let run = cmd()
        .args([
            "label-remap",
            path_arg(&input),
            path_arg(&out),
            "--pair",
            "3:5",
            "--pair",
            "5:3",
            "--pair",
            "8:0",
        ])
        .output()
        .expect("label-remap");
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let notices = parse_json_lines(&run.stderr);
    let notice = notices
        .iter()
        .find(|value| value["notice"]["kind"] == "label_key_synthesized")
        .expect("synthesized notice");
    assert_eq!(notice["notice"]["details"]["old_key"], 0);
    assert_eq!(notice["notice"]["details"]["new_key"], 1);

    assert_eq!(read_rows(&out), vec![vec![1.0], vec![5.0], vec![3.0], vec![0.0]]);
    let matrix = CiftiMatrix::open(&out, CacheMode::OnDisk).expect("open");
    let xml = matrix.cifti_xml().expect("xml");
    let labels = xml.labels(Axis::Columns).expect("labels");
    assert_eq!(labels.map(0).expect("map").table.unassigned_key(), Some(1));
}

#[test]
fn label_remap_file_and_missing_key() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut table = LabelTable::with_unassigned();
    table
        .insert(2, Label::new("area", [1.0, 1.0, 1.0, 1.0]))
        .expect("label");
    let xml = CiftiXml::new(
        models(2),
        IndexMap::Labels(LabelsMap::new(vec![NamedLabelMap::new("parc", table)])),
    )
    .expect("xml");
    let input = write_fixture(&temp.path().join("parc.dlabel.nii"), xml, &[vec![2.0], vec![0.0]]);
    let remap = temp.path().join("keys.txt");
    std::fs::write(&remap, "# missing key\n9 10\n").expect("write remap");
    let out = temp.path().join("out.dlabel.nii");

    let run = cmd()
        .args([
            "label-remap",
            path_arg(&input),
            path_arg(&out),
            "--remap-file",
            path_arg(&remap),
        ])
        .output()
        .expect("label-remap");
    assert_eq!(run.status.code(), Some(8));
    let err = parse_json_lines(&run.stderr).pop().expect("error json");
    assert_eq!(err["error"]["key"], 9);
}

#[test]
fn roi_average_uses_scalar_column_as_mask() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = write_fixture(&temp.path().join("in.nii"), series_xml(3, 2), &ramp(3, 2, 1.0));
    let roi_xml = CiftiXml::new(
        models(3),
        IndexMap::Scalars(ScalarsMap::new(vec![NamedMap::new("precentral")])),
    )
    .expect("xml");
    let roi = write_fixture(
        &temp.path().join("roi.dscalar.nii"),
        roi_xml,
        &[vec![1.0], vec![0.0], vec![1.0]],
    );
    let out = temp.path().join("out.nii");

    let run = cmd()
        .args([
            "roi-average",
            path_arg(&out),
            "--cifti",
            path_arg(&input),
            "--roi",
            path_arg(&roi),
        ])
        .output()
        .expect("roi-average");
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let value = parse_json(std::str::from_utf8(&run.stdout).expect("utf8"));
    assert_eq!(value["rois"][0], "precentral");
    assert_eq!(value["roi_average"]["selected_elements"][0], 2);
    // rows 0 and 2 of [[0,1],[2,3],[4,5]]
    assert_eq!(read_rows(&out), vec![vec![2.0], vec![3.0]]);
}

#[test]
fn roi_average_writes_one_column_per_roi_map() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = write_fixture(&temp.path().join("in.nii"), series_xml(3, 2), &ramp(3, 2, 1.0));
    let roi_xml = CiftiXml::new(
        models(3),
        IndexMap::Scalars(ScalarsMap::new(vec![NamedMap::new("front"), NamedMap::new("back")])),
    )
    .expect("xml");
    let roi = write_fixture(
        &temp.path().join("roi.dscalar.nii"),
        roi_xml,
        &[vec![1.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
    );
    let out = temp.path().join("out.nii");

    let run = cmd()
        .args([
            "roi-average",
            path_arg(&out),
            "--cifti",
            path_arg(&input),
            "--roi",
            path_arg(&roi),
        ])
        .output()
        .expect("roi-average");
    assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
    let value = parse_json(std::str::from_utf8(&run.stdout).expect("utf8"));
    assert_eq!(value["rois"], serde_json::json!(["front", "back"]));
    assert_eq!(value["roi_average"]["selected_elements"], serde_json::json!([2, 1]));
    assert_eq!(read_rows(&out), vec![vec![1.0, 4.0], vec![2.0, 5.0]]);

    let only_back = temp.path().join("back.nii");
    let run = cmd()
        .args([
            "roi-average",
            path_arg(&only_back),
            "--cifti",
            path_arg(&input),
            "--roi",
            path_arg(&roi),
            "--roi-column",
            "1",
        ])
        .output()
        .expect("roi-average");
    assert!(run.status.success());
    assert_eq!(read_rows(&only_back), vec![vec![4.0], vec![5.0]]);
}

#[test]
fn roi_with_no_selection_is_empty_result() {
    let temp = tempfile::tempdir().expect("tempdir");
    let input = write_fixture(&temp.path().join("in.nii"), series_xml(2, 2), &ramp(2, 2, 1.0));
    let roi_xml = CiftiXml::new(
        models(2),
        IndexMap::Scalars(ScalarsMap::new(vec![NamedMap::new("empty")])),
    )
    .expect("xml");
    let roi = write_fixture(&temp.path().join("roi.nii"), roi_xml, &[vec![0.0], vec![0.0]]);
    let out = temp.path().join("out.nii");

    let run = cmd()
        .args([
            "roi-average",
            path_arg(&out),
            "--cifti",
            path_arg(&input),
            "--roi",
            path_arg(&roi),
        ])
        .output()
        .expect("roi-average");
    assert_eq!(run.status.code(), Some(9));
}

#[test]
fn missing_file_and_usage_exit_codes() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("missing.nii");

    let run = cmd().args(["info", path_arg(&missing)]).output().expect("info");
    assert_eq!(run.status.code(), Some(3));
    let err = parse_json_lines(&run.stderr).pop().expect("error json");
    assert_eq!(err["error"]["kind"], "FileAccess");
    assert_eq!(err["error"]["path"], path_arg(&missing));

    let run = cmd().args(["transpose", "only-one-arg"]).output().expect("usage");
    assert_eq!(run.status.code(), Some(2));
    let err = parse_json_lines(&run.stderr).pop().expect("error json");
    assert_eq!(err["error"]["kind"], "Usage");
    assert!(
        err["error"]["hint"]
            .as_str()
            .unwrap_or_default()
            .contains("ciftikit transpose --help")
    );
}

#[test]
fn non_cifti_file_is_format_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let junk = temp.path().join("junk.nii");
    std::fs::write(&junk, vec![7u8; 1024]).expect("write");

    let run = cmd().args(["info", path_arg(&junk)]).output().expect("info");
    assert_eq!(run.status.code(), Some(4));
}

#[test]
fn completion_generates_script() {
    let run = cmd().args(["completion", "bash"]).output().expect("completion");
    assert!(run.status.success());
    assert!(String::from_utf8_lossy(&run.stdout).contains("ciftikit"));
}
