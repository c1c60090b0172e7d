//! Purpose: Hold top-level CLI command dispatch for `ciftikit`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Outputs are finished (flushed or written) before their JSON report is printed.
//! Invariants: Non-fatal conditions surface as notices on stderr, never on stdout.

use super::*;
use ciftikit::algorithms::{
    CorrelationOptions, MapSelection, RoiSet, TransposeOptions, average, average_dense_roi,
    pairwise_correlation, remap_label_keys, transpose,
};
use ciftikit::mapping::KeyRemap;
use matrix_info_json::matrix_info_json;

pub(super) fn dispatch_command(command: Command, color_mode: ColorMode) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "ciftikit", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Info { file } => {
            let matrix = CiftiMatrix::open(&file, CacheMode::OnDisk)?;
            let xml = matrix.cifti_xml()?;
            emit_json(json!({ "info": matrix_info_json(&matrix, xml) }));
            Ok(RunOutcome::ok())
        }
        Command::Average {
            output,
            inputs,
            weights,
            in_memory,
        } => {
            let handles = open_inputs(&inputs)?;
            let refs: Vec<&CiftiMatrix> = handles.iter().collect();
            let mut out = create_output(&output, in_memory)?;
            let report = average(&refs, weights.as_deref(), &mut out)?;
            out.finish()?;
            emit_json(json!({
                "average": report_json(&report)?,
                "output": output.display().to_string(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Correlate {
            a,
            b,
            output,
            fisher_z,
            no_demean,
        } => {
            let left = CiftiMatrix::open(&a, CacheMode::OnDisk)?;
            let right = CiftiMatrix::open(&b, CacheMode::OnDisk)?;
            let mut out = create_output(&output, false)?;
            let options = CorrelationOptions {
                fisher_z,
                demean: !no_demean,
            };
            let report = pairwise_correlation(&left, &right, &mut out, options)?;
            out.finish()?;
            if report.undefined_rows > 0 {
                let notice = Notice::new(
                    "undefined_correlation",
                    "correlate",
                    output.display().to_string(),
                    format!("{} rows had zero variance and were written as NaN", report.undefined_rows),
                )
                .with_detail("rows", report.undefined_rows);
                emit_notice(&notice, color_mode);
            }
            emit_json(json!({
                "correlate": report_json(&report)?,
                "output": output.display().to_string(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::RoiAverage {
            output,
            inputs,
            roi,
            roi_column,
        } => {
            let roi_file = CiftiMatrix::open(&roi, CacheMode::InMemory)?;
            let roi_sets = match roi_column {
                Some(column) => vec![RoiSet::from_cifti(&roi_file, column)?],
                None => RoiSet::all_from_cifti(&roi_file)?,
            };
            let handles = open_inputs(&inputs)?;
            let refs: Vec<&CiftiMatrix> = handles.iter().collect();
            let mut out = create_output(&output, false)?;
            let report = average_dense_roi(&refs, &roi_sets, &mut out)?;
            out.finish()?;
            for skipped in &report.skipped {
                let what = skipped
                    .structure
                    .map(|structure| structure.cifti_name().to_string())
                    .unwrap_or_else(|| "volume".to_string());
                let notice = Notice::new(
                    "roi_mask_skipped",
                    "roi-average",
                    skipped.path.display().to_string(),
                    format!("input has no {what} data; ROI mask skipped"),
                )
                .with_detail("mask", what);
                emit_notice(&notice, color_mode);
            }
            emit_json(json!({
                "roi_average": report_json(&report)?,
                "rois": roi_sets.iter().map(RoiSet::name).collect::<Vec<_>>(),
                "output": output.display().to_string(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::Transpose {
            input,
            output,
            mem_limit,
        } => {
            let options = TransposeOptions {
                memory_limit_bytes: mem_limit.map(mem_limit_bytes).transpose()?,
            };
            let matrix = CiftiMatrix::open(&input, CacheMode::OnDisk)?;
            let mut out = create_output(&output, false)?;
            let report = transpose(&matrix, &mut out, options)?;
            out.finish()?;
            emit_json(json!({
                "transpose": report_json(&report)?,
                "output": output.display().to_string(),
            }));
            Ok(RunOutcome::ok())
        }
        Command::LabelRemap {
            input,
            output,
            remap_file,
            pairs,
            map,
        } => {
            let remap = match remap_file {
                Some(path) => {
                    let text = std::fs::read_to_string(&path).map_err(|err| {
                        Error::new(ErrorKind::FileAccess)
                            .with_message("failed to read remap file")
                            .with_path(&path)
                            .with_source(err)
                    })?;
                    KeyRemap::parse(&text).map_err(|err| err.or_path(&path))?
                }
                None => {
                    let parsed = pairs
                        .iter()
                        .map(|pair| parse_pair(pair))
                        .collect::<Result<Vec<_>, _>>()?;
                    KeyRemap::new(parsed)?
                }
            };
            let selection = map.map(MapSelection::One).unwrap_or_default();
            let matrix = CiftiMatrix::open(&input, CacheMode::OnDisk)?;
            let mut out = create_output(&output, false)?;
            let report = remap_label_keys(&matrix, &mut out, &remap, selection)?;
            out.finish()?;
            for (map_index, outcome) in &report.maps {
                for (old, new) in &outcome.synthesized {
                    let notice = Notice::new(
                        "label_key_synthesized",
                        "label-remap",
                        output.display().to_string(),
                        format!("label key {old} collided with a remap target and became {new}"),
                    )
                    .with_detail("map", *map_index)
                    .with_detail("old_key", *old)
                    .with_detail("new_key", *new);
                    emit_notice(&notice, color_mode);
                }
            }
            emit_json(json!({
                "label_remap": report_json(&report)?,
                "output": output.display().to_string(),
            }));
            Ok(RunOutcome::ok())
        }
    }
}
