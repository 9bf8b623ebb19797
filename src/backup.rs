use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const LESSON_ENTRY: &str = "lesson.json";
pub const BUNDLE_FORMAT_V1: &str = "learnhub-lesson-v1";

/// One lesson's gradebook, detached from workspace ids.
///
/// Categories and items carry a `key` (their id at export time) so that
/// items and entries can point at them. Entries name their student by
/// username, which is the only user identity that survives a move between
/// workspaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonBundle {
    pub title: String,
    pub description: Option<String>,
    pub config: Option<BundledConfig>,
    pub categories: Vec<BundledCategory>,
    pub items: Vec<BundledItem>,
    pub entries: Vec<BundledEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledConfig {
    pub grading_type: String,
    pub total_points: f64,
    pub passing_grade: Option<String>,
    pub passing_percentage: f64,
    pub show_letter_grade: bool,
    pub show_percentage: bool,
    pub show_points: bool,
    pub scale: Vec<BundledBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledBand {
    pub letter: String,
    pub min: f64,
    pub max: f64,
    pub gpa: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledCategory {
    pub key: String,
    pub name: String,
    pub description: Option<String>,
    pub weight: f64,
    pub total_points: Option<f64>,
    pub is_published: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledItem {
    pub key: String,
    pub category_key: String,
    pub name: String,
    pub description: Option<String>,
    pub item_type: String,
    pub points_possible: f64,
    pub due_date: Option<String>,
    pub is_published: bool,
    pub sort_order: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundledEntry {
    pub item_key: String,
    pub username: String,
    pub score: Option<f64>,
    pub raw_score: Option<f64>,
    pub status: String,
    pub comments: Option<String>,
    pub graded_by: Option<String>,
    pub graded_at: Option<String>,
    pub is_late: bool,
    pub late_penalty: f64,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub lesson_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn write_bundle(out_path: &Path, bundle: &LessonBundle) -> anyhow::Result<ExportSummary> {
    let lesson_bytes =
        serde_json::to_vec_pretty(bundle).context("failed to serialize lesson payload")?;
    let lesson_sha256 = sha256_hex(&lesson_bytes);

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        "lesson": {
            "entry": LESSON_ENTRY,
            "sha256": lesson_sha256,
            "categories": bundle.categories.len(),
            "items": bundle.items.len(),
            "entries": bundle.entries.len(),
        },
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(LESSON_ENTRY, opts)
        .context("failed to start lesson entry")?;
    zip.write_all(&lesson_bytes)
        .context("failed to write lesson entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        lesson_sha256,
    })
}

/// Reads a bundle, rejecting unknown formats and payloads whose checksum does not match.
pub fn read_bundle(in_path: &Path) -> anyhow::Result<LessonBundle> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("not a lesson bundle (invalid zip)")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }
    let expected_sha = manifest
        .get("lesson")
        .and_then(|d| d.get("sha256"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("manifest.json has no lesson checksum"))?
        .to_string();

    let mut lesson_bytes = Vec::new();
    archive
        .by_name(LESSON_ENTRY)
        .context("bundle missing lesson.json")?
        .read_to_end(&mut lesson_bytes)
        .context("failed to extract lesson entry")?;

    let actual = sha256_hex(&lesson_bytes);
    if !actual.eq_ignore_ascii_case(&expected_sha) {
        return Err(anyhow!(
            "lesson checksum mismatch: manifest {} vs bundle {}",
            expected_sha,
            actual
        ));
    }

    serde_json::from_slice(&lesson_bytes).context("lesson.json does not describe a lesson")
}
