//! Plain-text rendering of catalog entries and job results.

use civitai_core::catalog::{Model, ModelFile, ModelVersion, SearchPage};
use civitai_core::download::{JobReport, PendingDownload};
use civitai_core::library::{
    html_to_text, DirectoryReconcile, ReconcileStatus, ScanSummary,
};
use civitai_core::VersionRef;
use std::collections::BTreeSet;

const CARD_WIDTH: usize = 100;
const DESCRIPTION_PREVIEW: usize = 100;

/// Human-readable size from kilobytes.
pub fn format_size(size_kb: f64) -> String {
    if size_kb >= 1_000_000.0 {
        format!("{:.2} GB", size_kb / 1_000_000.0)
    } else if size_kb >= 1_000.0 {
        format!("{:.2} MB", size_kb / 1_000.0)
    } else {
        format!("{} KB", size_kb)
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn separator(title: &str) -> String {
    let pad = CARD_WIDTH.saturating_sub(title.chars().count()) / 2;
    format!("{}{}{}", ".".repeat(pad), title, ".".repeat(pad))
}

fn file_lines(file: &ModelFile) -> Vec<String> {
    vec![
        format!("File: {}", file.name),
        format!("Size: {}", or_na(file.size_kb.map(format_size))),
        format!("Pickle scan: {}", or_na(file.pickle_scan_result.as_deref())),
        format!("Virus scan: {}", or_na(file.virus_scan_result.as_deref())),
        format!("Scanned at: {}", or_na(file.scanned_at.as_deref())),
    ]
}

/// Summary card for a search result or model lookup.
pub fn model_card(model: &Model) -> String {
    let mut lines = vec![separator(&model.name), String::new()];
    lines.push(format!("ID: {}", model.id));
    lines.push(format!("Name: {}", model.name));
    lines.push(format!(
        "Creator: {}",
        or_na(model.creator.as_ref().and_then(|c| c.username.as_deref()))
    ));
    lines.push(format!("Type: {}", model.model_type));

    let base_models = model.base_models();
    lines.push(format!(
        "Base models: {}",
        if base_models.is_empty() {
            "N/A".to_string()
        } else {
            base_models.join(", ")
        }
    ));
    lines.push(format!(
        "Rating: {}",
        or_na(model.stats.as_ref().and_then(|s| s.rating))
    ));
    lines.push(format!(
        "Downloads: {}",
        or_na(model.stats.as_ref().and_then(|s| s.download_count))
    ));
    lines.push(format!("NSFW: {}", model.nsfw));
    lines.push(format!("Tags: {}", model.tags.join(", ")));

    if let Some(file) = model.model_versions.first().and_then(|v| v.files.first()) {
        lines.extend(file_lines(file));
    }

    let description = model
        .description
        .as_deref()
        .map(html_to_text)
        .filter(|d| !d.is_empty())
        .map(|d| truncate(&d, DESCRIPTION_PREVIEW));
    lines.push(format!("Description: {}", or_na(description)));
    lines.join("\n")
}

/// Version list of a model, marking versions already on disk.
pub fn version_list(model: &Model, on_disk: &BTreeSet<VersionRef>) -> String {
    model
        .model_versions
        .iter()
        .map(|v| {
            let marker = if on_disk.contains(&VersionRef::Remote(v.id)) {
                " [downloaded]"
            } else {
                ""
            };
            format!(
                "  {} - {} ({}){}",
                v.id,
                v.name,
                or_na(v.base_model.as_deref()),
                marker
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Detail view of one version.
pub fn version_details(version: &ModelVersion) -> String {
    let mut lines = vec![separator(&version.name), String::new()];
    lines.push(format!("Version ID: {}", version.id));
    lines.push(format!("Model ID: {}", or_na(version.model_id)));
    lines.push(format!("Model: {}", or_na(version.model_name())));
    lines.push(format!("Type: {}", version.model_type()));
    lines.push(format!("Base model: {}", or_na(version.base_model.as_deref())));
    lines.push(format!("Download URL: {}", version.artifact_url()));
    if let Some(file) = version.primary_file() {
        lines.extend(file_lines(file));
        lines.push(format!("SHA256: {}", or_na(file.sha256())));
    }
    let notes = version
        .description
        .as_deref()
        .map(html_to_text)
        .filter(|d| !d.is_empty());
    lines.push(format!("Notes: {}", or_na(notes)));
    lines.join("\n")
}

pub fn page_footer(page: &SearchPage) -> String {
    let meta = &page.metadata;
    match (meta.current_page, meta.total_pages) {
        (Some(current), Some(total)) => format!(
            "Page {} of {} ({} models)",
            current,
            total,
            or_na(meta.total_items)
        ),
        _ => format!("{} models", page.items.len()),
    }
}

pub fn job_report(report: &JobReport) -> String {
    match (&report.artifact, &report.error) {
        (Some(artifact), None) => format!(
            "Version {}: {} -> {} ({} metadata files)",
            report.job.version_id,
            report.state,
            artifact.display(),
            report.metadata_written.len()
        ),
        (_, Some(error)) => format!(
            "Version {}: {} ({}); queued for retry",
            report.job.version_id, report.state, error
        ),
        (None, None) => format!("Version {}: {}", report.job.version_id, report.state),
    }
}

pub fn pending_entry(entry: &PendingDownload) -> String {
    format!(
        "  model {} version {} ({}) failed {}: {}",
        entry.model_id,
        entry.version_id,
        entry.model_type,
        entry.failed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        entry.last_error
    )
}

pub fn scan_summary(summary: &ScanSummary) -> String {
    let mut lines = Vec::new();
    for dir in &summary.directories {
        if dir.exists {
            lines.push(format!(
                "{}: {} files, {} new, {} hashed, {} pruned",
                dir.path.display(),
                dir.files_seen,
                dir.newly_indexed,
                dir.hashed,
                dir.pruned
            ));
        } else {
            lines.push(format!("{}: not found, skipped", dir.path.display()));
        }
    }
    lines.join("\n")
}

pub fn reconcile_entry(entry: &DirectoryReconcile) -> String {
    match entry.status {
        ReconcileStatus::Missing => format!("{}: not found, skipped", entry.path.display()),
        ReconcileStatus::AllUpToDate => {
            format!("{}: all models are up to date", entry.path.display())
        }
        ReconcileStatus::SomeUpdated {
            updated,
            unresolved,
        } => format!(
            "{}: {} updated, {} not found in the catalog",
            entry.path.display(),
            updated,
            unresolved
        ),
    }
}
