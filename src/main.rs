use anyhow::{anyhow, bail, Result};
use lmdetl::{
    bytes_bar, detect_file_kind, probe_header, FileKind, ProgressEvent, TelemetryEtl,
};
use std::path::PathBuf;

fn main() -> Result<()> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("clean") => {
            let [input, output] = two_paths(&args[1..], "clean <input.csv> <output.csv>")?;
            reject_side_files(&input)?;
            let report = engine_with_bar(&input.display().to_string())
                .clean_file(&input, &output)
                .map_err(|e| anyhow!("{e}"))?;
            println!(
                "cleaned {} -> {}: kept {} of {} rows ({} dropped, {} duplicates)",
                input.display(),
                report.output.display(),
                report.stats.rows_written,
                report.stats.rows_read,
                report.stats.rows_dropped(),
                report.stats.drops.duplicate,
            );
        }
        Some("merge") => {
            let [dir, output] = two_paths(&args[1..], "merge <folder> <output.csv>")?;
            let report = engine_with_bar(&dir.display().to_string())
                .merge_folder(&dir, &output)
                .map_err(|e| anyhow!("{e}"))?;
            println!(
                "merged {} files: kept {} of {} rows ({} cross-file duplicates removed)",
                report.stats.files_processed,
                report.stats.rows_written,
                report.stats.rows_read,
                report.stats.drops.duplicate,
            );
        }
        Some("add-columns") => {
            if args.len() != 5 {
                bail!("usage: lmdetl add-columns <lmd.csv> <details.csv> <output.csv> <col1,col2,...>");
            }
            let lmd = PathBuf::from(&args[1]);
            let details = PathBuf::from(&args[2]);
            let output = PathBuf::from(&args[3]);
            let carry: Vec<String> = args[4]
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            let report = engine_with_bar(&details.display().to_string())
                .add_columns(&lmd, &details, carry, &output)
                .map_err(|e| anyhow!("{e}"))?;
            println!(
                "enriched {} rows -> {}",
                report.stats.rows_written,
                report.output.display(),
            );
        }
        _ => {
            eprintln!("usage:");
            eprintln!("  lmdetl clean <input.csv> <output.csv>");
            eprintln!("  lmdetl merge <folder> <output.csv>");
            eprintln!("  lmdetl add-columns <lmd.csv> <details.csv> <output.csv> <col1,col2,...>");
            std::process::exit(2);
        }
    }
    Ok(())
}

fn two_paths(rest: &[String], usage: &str) -> Result<[PathBuf; 2]> {
    if rest.len() != 2 {
        bail!("usage: lmdetl {usage}");
    }
    Ok([PathBuf::from(&rest[0]), PathBuf::from(&rest[1])])
}

/// The engine cleans telemetry exports; lane-fix and workbrief side files
/// have their own tooling. Catch the common mix-up before starting a job.
fn reject_side_files(input: &PathBuf) -> Result<()> {
    let probe = probe_header(input).map_err(|e| anyhow!("{e}"))?;
    match detect_file_kind(&probe.columns) {
        FileKind::LaneFixes => bail!(
            "'{}' looks like a lane-fixes file, not telemetry",
            input.display()
        ),
        FileKind::Workbrief => bail!(
            "'{}' looks like a workbrief file, not telemetry",
            input.display()
        ),
        FileKind::Telemetry | FileKind::Unknown => Ok(()),
    }
}

/// Wire engine progress events to an indicatif byte bar.
fn engine_with_bar(label: &str) -> TelemetryEtl {
    let label = label.to_string();
    let mut bar: Option<indicatif::ProgressBar> = None;
    TelemetryEtl::new().on_progress(move |event| match event {
        ProgressEvent::Start { total_bytes, .. } => {
            bar = Some(bytes_bar(&label, *total_bytes));
        }
        ProgressEvent::Chunk { fraction, .. } => {
            if let Some(pb) = &bar {
                pb.set_position((fraction * pb.length().unwrap_or(0) as f64) as u64);
            }
        }
        ProgressEvent::Stage { name } => {
            if let Some(pb) = &bar {
                pb.set_message(name.clone());
            }
        }
        ProgressEvent::Done { rows_written } => {
            if let Some(pb) = &bar {
                pb.finish_with_message(format!("done ({rows_written} rows)"));
            }
        }
        ProgressEvent::Error { message } => {
            if let Some(pb) = &bar {
                pb.abandon_with_message(message.clone());
            }
        }
    })
}
