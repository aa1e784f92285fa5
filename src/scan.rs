//! Directory scanning: builds the image catalog from the configured roots.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use config_model::SourcesConfig;
use rand::seq::SliceRandom;
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{SourceKind, SourceUnavailable};

/// Extensions accepted by the catalog (lowercase, without dot).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Ordered, de-duplicated list of image paths. Positions are stable until the
/// next rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImageCatalog {
    paths: Vec<PathBuf>,
}

impl ImageCatalog {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// Result of a catalog build: the catalog plus every root that was skipped.
#[derive(Debug, Default)]
pub struct CatalogScan {
    pub catalog: ImageCatalog,
    pub warnings: Vec<SourceUnavailable>,
}

/// Return `true` if `path` has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.iter().any(|e| *e == ext)
        })
}

/// Scan local paths first, then share mounts, keeping the first occurrence of
/// every file. Unreachable roots are reported, never fatal.
pub fn build_catalog(sources: &SourcesConfig) -> CatalogScan {
    let mut seen = HashSet::new();
    let mut paths = Vec::new();
    let mut warnings = Vec::new();

    let roots = sources
        .local_paths
        .iter()
        .map(|root| (root, SourceKind::LocalPath))
        .chain(
            sources
                .unraid_shares
                .iter()
                .map(|root| (root, SourceKind::Share)),
        );

    for (root, kind) in roots {
        match scan_root(root, &mut seen, &mut paths) {
            Ok(found) => debug!(root = %root.display(), %kind, found, "scanned image root"),
            Err(reason) => {
                let warning = SourceUnavailable {
                    root: root.clone(),
                    kind,
                    reason,
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }

    if sources.shuffle {
        let mut rng = match sources.shuffle_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        paths.shuffle(&mut rng);
    }

    info!(
        images = paths.len(),
        skipped_roots = warnings.len(),
        "image catalog built"
    );
    CatalogScan {
        catalog: ImageCatalog::new(paths),
        warnings,
    }
}

fn scan_root(
    root: &Path,
    seen: &mut HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
) -> Result<usize, String> {
    let metadata = fs::metadata(root).map_err(|err| err.to_string())?;
    if !metadata.is_dir() {
        return Err("not a directory".to_string());
    }

    let mut found = 0;
    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        // Skip hidden dot-directories *below* the root only.
        .filter_entry(|e| !should_skip_dir(e));
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        let path = entry.path();
        if entry.file_type().is_file() && is_supported_image(path) && seen.insert(path.to_path_buf())
        {
            out.push(path.to_path_buf());
            found += 1;
        }
    }
    Ok(found)
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 {
        return false;
    }
    if !entry.file_type().is_dir() {
        return false;
    }
    entry
        .file_name()
        .to_str()
        .is_some_and(|n| n.starts_with('.'))
}
