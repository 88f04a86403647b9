//! Health export discovery.
//!
//! Walks a directory and classifies every file into one of the supported
//! [`DataFormat`]s, by extension first and by content sniffing second.

use std::io::Read;
use std::path::{Path, PathBuf};

use health_core::error::{HealthError, Result};
use health_core::models::DataFormat;
use tracing::{debug, warn};

/// Bytes read from the head of a file when sniffing its format.
const SNIFF_LEN: usize = 4096;

/// A file that one of the parsers can handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub format: DataFormat,
}

/// Outcome of a directory scan.
#[derive(Debug, Clone, Default)]
pub struct Discovery {
    /// Supported files, sorted by path.
    pub files: Vec<DiscoveredFile>,
    /// One message per file or entry that was skipped.
    pub warnings: Vec<String>,
}

/// Find every supported file under `root`, sorted by path.
///
/// With `recursive == false` only the top level of `root` is scanned.
/// Unsupported files are skipped with a warning; hidden files are skipped
/// silently. Empty or corrupt files of a supported type are returned so that
/// their parser can report them.
pub fn discover_files(root: &Path, recursive: bool) -> Result<Discovery> {
    if !root.is_dir() {
        return Err(HealthError::DataPathNotFound(root.to_path_buf()));
    }

    let mut walker = walkdir::WalkDir::new(root).follow_links(true);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut discovery = Discovery::default();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let msg = format!("Skipping unreadable entry under {}: {}", root.display(), e);
                warn!("{}", msg);
                discovery.warnings.push(msg);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.into_path();
        if is_hidden(&path) {
            debug!("Skipping hidden file {}", path.display());
            continue;
        }

        match classify(&path) {
            Some(format) => {
                debug!("Discovered {} file {}", format, path.display());
                discovery.files.push(DiscoveredFile { path, format });
            }
            None => {
                let msg = format!("Unsupported file type: {}", path.display());
                warn!("{}", msg);
                discovery.warnings.push(msg);
            }
        }
    }

    discovery.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(discovery)
}

/// Decide which parser handles `path`, or `None` when no parser does.
///
/// `.xml` files holding a GPX document are reported as GPX; files with an
/// unknown extension are recognised by their content when possible.
pub fn classify(path: &Path) -> Option<DataFormat> {
    let ext = path.extension().and_then(|e| e.to_str());
    match ext.and_then(DataFormat::from_extension) {
        Some(DataFormat::Markup) => {
            let head = read_head(path).unwrap_or_default();
            if contains(&head, b"<gpx") {
                Some(DataFormat::Gpx)
            } else {
                Some(DataFormat::Markup)
            }
        }
        Some(format) => Some(format),
        None => read_head(path).and_then(|head| sniff(&head)),
    }
}

/// Recognise a format from the first bytes of a file.
pub fn sniff(head: &[u8]) -> Option<DataFormat> {
    if head.len() >= 12 && &head[8..12] == b".FIT" {
        return Some(DataFormat::Fit);
    }
    if contains(head, b"<gpx") {
        return Some(DataFormat::Gpx);
    }
    if contains(head, b"<HealthData") {
        return Some(DataFormat::Markup);
    }
    None
}

fn read_head(path: &Path) -> Option<Vec<u8>> {
    let file = std::fs::File::open(path).ok()?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.take(SNIFF_LEN as u64).read_to_end(&mut head).ok()?;
    Some(head)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
