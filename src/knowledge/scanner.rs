//! Source tree scanner for the bulk build

use anyhow::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Python,
    Notebook,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
    pub kind: SourceKind,
}

#[derive(Debug, Deserialize)]
struct Notebook {
    #[serde(default)]
    cells: Vec<NotebookCell>,
}

#[derive(Debug, Deserialize)]
struct NotebookCell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

/// nbformat allows either a single string or a list of lines
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Lines(Vec<String>),
    Text(String),
}

impl Default for CellSource {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl CellSource {
    fn into_text(self) -> String {
        match self {
            Self::Lines(lines) => lines.concat(),
            Self::Text(text) => text,
        }
    }
}

/// Concatenated code cells of an .ipynb document
fn notebook_code(raw: &str) -> Result<String> {
    let notebook: Notebook = serde_json::from_str(raw)?;
    let cells: Vec<String> = notebook
        .cells
        .into_iter()
        .filter(|c| c.cell_type == "code")
        .map(|c| c.source.into_text())
        .filter(|s| !s.trim().is_empty())
        .collect();
    Ok(cells.join("\n\n"))
}

#[derive(Debug, Default, Clone)]
pub struct CodeScanner;

impl CodeScanner {
    pub fn new() -> Self {
        Self
    }

    /// Python files and notebooks under `root`, in path order.
    /// A missing directory yields nothing; unreadable files are skipped.
    pub fn scan(&self, root: &Path) -> Vec<SourceFile> {
        if !root.exists() {
            warn!("Scan root {} does not exist", root.display());
            return Vec::new();
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let kind = match path.extension().and_then(|e| e.to_str()) {
                Some("py") => SourceKind::Python,
                Some("ipynb") => SourceKind::Notebook,
                _ => continue,
            };

            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Error reading {}: {}", path.display(), e);
                    continue;
                }
            };

            let content = match kind {
                SourceKind::Python => raw,
                SourceKind::Notebook => match notebook_code(&raw) {
                    Ok(code) => code,
                    Err(e) => {
                        warn!("Skipping malformed notebook {}: {}", path.display(), e);
                        continue;
                    }
                },
            };

            if content.trim().is_empty() {
                continue;
            }

            debug!("Scanned {} ({} chars)", path.display(), content.len());
            files.push(SourceFile {
                path: path.to_path_buf(),
                content,
                kind,
            });
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_finds_python_and_notebooks() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("pkg")).unwrap();
        std::fs::write(dir.path().join("pkg/model.py"), "def fit(x):\n    return x\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "# readme").unwrap();
        std::fs::write(
            dir.path().join("analysis.ipynb"),
            r##"{"cells":[
                {"cell_type":"markdown","source":["# Title"]},
                {"cell_type":"code","source":["import math\n","x = math.pi"]},
                {"cell_type":"code","source":"print(x)"}
            ]}"##,
        )
        .unwrap();

        let files = CodeScanner::new().scan(dir.path());
        assert_eq!(files.len(), 2);

        assert_eq!(files[0].kind, SourceKind::Notebook);
        assert_eq!(files[0].content, "import math\nx = math.pi\n\nprint(x)");
        assert_eq!(files[1].kind, SourceKind::Python);
        assert!(files[1].content.contains("def fit"));
    }

    #[test]
    fn test_missing_root_is_empty() {
        assert!(CodeScanner::new().scan(Path::new("/no/such/tree")).is_empty());
    }

    #[test]
    fn test_malformed_notebook_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.ipynb"), "{not json").unwrap();
        assert!(CodeScanner::new().scan(dir.path()).is_empty());
    }
}
