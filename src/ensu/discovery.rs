// Stage 1: finding the data files in the input directory.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::ensu::io_common::{relative_path, simplify_file_name};
use crate::ensu::*;

pub const DEFAULT_DATA_MARKERS: [&str; 3] = ["conjunto_de_datos", "ensu", "_cb_"];

/// Dictionaries, catalogues and archive metadata shipped next to the data.
pub const DEFAULT_EXCLUDE_MARKERS: [&str; 4] = ["diccionario", "catalogo", "metadatos", "__macosx"];

/// Lower-case substrings deciding which files are considered.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct FileMarkers {
    /// A file is kept if its path (below the input directory) contains one of them.
    /// An empty list keeps every CSV file.
    pub data: Vec<String>,
    /// A file is dropped if any component of its path contains one of them.
    pub exclude: Vec<String>,
}

impl Default for FileMarkers {
    fn default() -> Self {
        FileMarkers {
            data: DEFAULT_DATA_MARKERS.iter().map(|s| s.to_string()).collect(),
            exclude: DEFAULT_EXCLUDE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FileMarkers {
    pub fn accepts(&self, rel_path: &str) -> bool {
        let lower = rel_path.to_lowercase();
        if !lower.ends_with(".csv") {
            return false;
        }
        let components: Vec<&str> = lower.split('/').collect();
        if let Some(name) = components.last() {
            // AppleDouble files from archives.
            if name.starts_with("._") {
                return false;
            }
        }
        if components
            .iter()
            .any(|c| self.exclude.iter().any(|m| c.contains(m.as_str())))
        {
            return false;
        }
        self.data.is_empty() || self.data.iter().any(|m| lower.contains(m.as_str()))
    }
}

/// All the candidate data files below `root`, sorted by path.
///
/// Unreadable entries are logged and ignored.
pub fn discover_files(root: &Path, markers: &FileMarkers) -> Vec<PathBuf> {
    let mut res: Vec<PathBuf> = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("discover_files: ignoring unreadable entry: {}", e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_path(root, entry.path());
        if markers.accepts(&rel) {
            debug!("discover_files: {}", rel);
            res.push(entry.into_path());
        } else {
            debug!(
                "discover_files: ignoring {}",
                simplify_file_name(entry.path())
            );
        }
    }
    res.sort();
    res
}
