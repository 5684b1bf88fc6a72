use crate::db::DB_FILE;
use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/placement.sqlite3";
pub const BUNDLE_FORMAT_V1: &str = "placementd-workspace-v1";
const RAW_SQLITE_FORMAT: &str = "sqlite3";

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    format: String,
    app_version: String,
    exported_at: String,
    db_sha256: String,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("no workspace database at {}", db_path.display()))?;
    let manifest = BundleManifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: chrono::Utc::now().to_rfc3339(),
        db_sha256: sha256_hex(&db_bytes),
    };

    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("cannot create bundle {}", out_path.display()))?;
    let mut zip = ZipWriter::new(file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let manifest_json = serde_json::to_vec_pretty(&manifest)?;
    for (name, bytes) in [(MANIFEST_ENTRY, &manifest_json), (DB_ENTRY, &db_bytes)] {
        zip.start_file(name, opts)?;
        zip.write_all(bytes)
            .with_context(|| format!("writing bundle entry {}", name))?;
    }
    zip.finish()?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        entry_count: 2,
        sha256: manifest.db_sha256,
    })
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> anyhow::Result<Vec<u8>> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("bundle has no {}", name))?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Checks the manifest and returns the database bytes it vouches for.
fn unpack_bundle(path: &Path) -> anyhow::Result<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(path)?).context("not a readable zip bundle")?;
    let manifest: BundleManifest = serde_json::from_slice(&read_entry(&mut archive, MANIFEST_ENTRY)?)
        .context("bundle manifest is malformed")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        bail!("unsupported bundle format: {}", manifest.format);
    }
    let db_bytes = read_entry(&mut archive, DB_ENTRY)?;
    let actual = sha256_hex(&db_bytes);
    if !actual.eq_ignore_ascii_case(&manifest.db_sha256) {
        bail!(
            "database checksum mismatch: manifest {}, bundle {}",
            manifest.db_sha256,
            actual
        );
    }
    Ok(db_bytes)
}

/// Writes next to the target and renames, so a failed restore leaves the old database.
fn replace_database(workspace: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::create_dir_all(workspace)?;
    let dst = workspace.join(DB_FILE);
    let staging = workspace.join(format!("{}.restoring", DB_FILE));
    std::fs::write(&staging, bytes)
        .with_context(|| format!("cannot stage {}", staging.display()))?;
    if dst.exists() {
        std::fs::remove_file(&dst)?;
    }
    std::fs::rename(&staging, &dst)
        .with_context(|| format!("cannot move restored database to {}", dst.display()))?;
    Ok(())
}

/// Restores a bundle, or a bare SQLite database file, over the workspace database.
/// Any open connection to it must be dropped first.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    let mut head = [0u8; 16];
    let n = File::open(in_path)
        .with_context(|| format!("cannot open {}", in_path.display()))?
        .read(&mut head)?;
    let head = &head[..n];

    let (format, db_bytes) = if head.starts_with(ZIP_MAGIC) {
        (BUNDLE_FORMAT_V1, unpack_bundle(in_path)?)
    } else if head.starts_with(SQLITE_MAGIC) {
        (RAW_SQLITE_FORMAT, std::fs::read(in_path)?)
    } else {
        return Err(anyhow!(
            "{} is neither a workspace bundle nor a SQLite database",
            in_path.display()
        ));
    };
    replace_database(workspace, &db_bytes)?;
    Ok(ImportSummary {
        bundle_format_detected: format.to_string(),
    })
}
