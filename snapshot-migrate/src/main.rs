use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use draftdoc_io::{CURRENT_VERSION, migrate_bytes};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// Upgrades ESNP snapshots to the next format version.
#[derive(Debug, Parser)]
#[command(name = "snapshot-migrate", version)]
struct Cli {
    /// Version to produce. Inputs must be exactly one version older.
    #[arg(long, default_value_t = CURRENT_VERSION)]
    to: u32,
    /// Write results here instead of replacing the inputs.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Report what would happen without writing anything.
    #[arg(long)]
    dry_run: bool,
    /// Snapshot files, or directories searched for `*.esnp`.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum Status {
    Migrated,
    Skipped,
    Failed,
}

#[derive(Debug, Serialize)]
struct FileReport {
    path: PathBuf,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct Summary {
    target: u32,
    dry_run: bool,
    migrated: usize,
    skipped: usize,
    failed: usize,
    files: Vec<FileReport>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(summary) if summary.failed == 0 => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("snapshot-migrate: {err:#}");
            ExitCode::FAILURE
        }
    }
}

/// One snapshot to migrate and its path below `--out-dir`.
#[derive(Debug)]
struct Input {
    path: PathBuf,
    relative: PathBuf,
}

fn run(cli: &Cli) -> Result<Summary> {
    let inputs = collect_inputs(&cli.inputs)?;
    if let Some(dir) = cli.out_dir.as_deref().filter(|_| !cli.dry_run) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let mut claimed = HashSet::new();
    let files: Vec<FileReport> = inputs
        .iter()
        .map(|input| migrate_file(cli, input, &mut claimed))
        .collect();
    let count = |status: Status| files.iter().filter(|file| file.status == status).count();
    let summary = Summary {
        target: cli.to,
        dry_run: cli.dry_run,
        migrated: count(Status::Migrated),
        skipped: count(Status::Skipped),
        failed: count(Status::Failed),
        files,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(summary)
}

/// Expands directories into their `*.esnp` files, sorted for stable output.
/// Files found in a directory keep their path relative to it.
fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<Input>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in WalkDir::new(input) {
                let entry = entry.with_context(|| format!("walking {}", input.display()))?;
                let is_snapshot = entry.path().extension().is_some_and(|ext| ext == "esnp");
                if entry.file_type().is_file() && is_snapshot {
                    let relative = entry
                        .path()
                        .strip_prefix(input)
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|_| PathBuf::from(entry.file_name()));
                    found.push(Input {
                        path: entry.into_path(),
                        relative,
                    });
                }
            }
            found.sort_by(|a, b| a.path.cmp(&b.path));
            files.extend(found);
        } else {
            let relative = input
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| input.clone());
            files.push(Input {
                path: input.clone(),
                relative,
            });
        }
    }
    Ok(files)
}

/// Migrates one file. `claimed` holds the outputs taken so far; a second
/// input mapping to the same output fails instead of overwriting it.
fn migrate_file(cli: &Cli, input: &Input, claimed: &mut HashSet<PathBuf>) -> FileReport {
    let path = input.path.as_path();
    let mut report = FileReport {
        path: path.to_path_buf(),
        status: Status::Failed,
        output: None,
        sha256: None,
        message: None,
    };
    let output = match &cli.out_dir {
        Some(dir) => dir.join(&input.relative),
        None => path.to_path_buf(),
    };
    if !claimed.insert(output.clone()) {
        report.message = Some(format!(
            "output {} is already written by another input",
            output.display()
        ));
        return report;
    }
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            report.message = Some(format!("read failed: {err}"));
            return report;
        }
    };
    let (migrated, outcome) = match migrate_bytes(&bytes, cli.to) {
        Ok(result) => result,
        Err(err) => {
            if err.is_skip() {
                report.status = Status::Skipped;
            }
            report.message = Some(err.to_string());
            return report;
        }
    };

    if !cli.dry_run {
        if let Some(parent) = output.parent().filter(|_| cli.out_dir.is_some()) {
            if let Err(err) = fs::create_dir_all(parent) {
                report.message = Some(format!("creating {} failed: {err}", parent.display()));
                return report;
            }
        }
        if let Err(err) = fs::write(&output, &migrated) {
            report.message = Some(format!("write to {} failed: {err}", output.display()));
            return report;
        }
    }
    report.status = Status::Migrated;
    report.sha256 = Some(hex_digest(&migrated));
    report.message = Some(format!(
        "v{} -> v{}, resliced {}",
        outcome.from,
        outcome.to,
        outcome
            .resliced
            .iter()
            .map(|tag| tag.to_string())
            .collect::<Vec<_>>()
            .join(",")
    ));
    report.output = Some(output);
    report
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
