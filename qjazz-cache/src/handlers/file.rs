//!
//! File protocol handler
//!
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use url::Url;

use crate::errors::{Error, Result};
use crate::metadata::ProjectMetadata;

use super::ProtocolHandler;

/// Allowed suffixes for project files
pub const PROJECT_SUFFIXES: [&str; 2] = ["qgs", "qgz"];

fn file_metadata(path: &Path) -> Result<ProjectMetadata> {
    let st = fs::metadata(path).map_err(|_| Error::NotFound(path.display().to_string()))?;
    let last_modified = st
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    Ok(ProjectMetadata {
        uri: path.display().to_string(),
        name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        scheme: "file".into(),
        storage: "file".into(),
        last_modified,
    })
}

fn has_project_suffix(path: &Path) -> bool {
    path.extension()
        .map(|ext| PROJECT_SUFFIXES.iter().any(|sfx| ext.eq_ignore_ascii_case(sfx)))
        .unwrap_or(false)
}

// Recursively collect project files under a directory
fn collect_project_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            log::warn!("Cannot read directory {}: {err}", dir.display());
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_project_files(&path, out);
        } else if has_project_suffix(&path) {
            out.push(path);
        }
    }
}

/// Handle `file` scheme urls
#[derive(Debug, Clone, Default)]
pub struct FileHandler;

impl ProtocolHandler for FileHandler {
    fn validate_rooturl(&self, url: &Url) -> Result<()> {
        let path = Path::new(url.path());
        if !path.is_absolute() {
            return Err(Error::InvalidRootUrl(
                url.to_string(),
                "file path must be absolute".into(),
            ));
        }
        Ok(())
    }

    fn resolve_uri(&self, url: &Url) -> Result<String> {
        let path = PathBuf::from(url.path());
        if has_project_suffix(&path) {
            return Ok(path.display().to_string());
        }
        // Probe the allowed suffixes; keep the last candidate
        // so that a missing project still resolves to a stable uri.
        let mut candidate = path.clone();
        for sfx in PROJECT_SUFFIXES {
            candidate = path.with_extension(sfx);
            if candidate.is_file() {
                break;
            }
        }
        Ok(candidate.display().to_string())
    }

    fn public_path(&self, uri: &str, location: &str, rooturl: &Url) -> String {
        let root = rooturl.path().trim_end_matches('/');
        let relative = uri.strip_prefix(root).unwrap_or(uri);
        format!(
            "{}/{}",
            location.trim_end_matches('/'),
            relative.trim_start_matches('/')
        )
    }

    fn project_metadata(&self, uri: &str) -> Result<ProjectMetadata> {
        file_metadata(Path::new(uri))
    }

    fn projects(&self, rooturl: &Url) -> Result<Vec<ProjectMetadata>> {
        let path = PathBuf::from(rooturl.path());
        if !path.exists() {
            log::warn!("{} does not exists", path.display());
            return Ok(vec![]);
        }
        if path.is_dir() {
            let mut files = Vec::new();
            collect_project_files(&path, &mut files);
            files.iter().map(|p| file_metadata(p)).collect()
        } else {
            Ok(vec![file_metadata(&path)?])
        }
    }
}

// =======================
// Tests
// =======================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_resolve_uri_probe_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("france_parts.qgs");
        File::create(&project).unwrap();

        let handler = FileHandler;
        let url = Url::parse(&format!("file:{}/france_parts", dir.path().display())).unwrap();
        let uri = handler.resolve_uri(&url).unwrap();
        assert_eq!(uri, project.display().to_string());
        // Idempotent
        let url = Url::parse(&format!("file:{uri}")).unwrap();
        assert_eq!(handler.resolve_uri(&url).unwrap(), uri);
    }

    #[test]
    fn test_public_path_roundtrip() {
        let handler = FileHandler;
        let rooturl = Url::parse("file:/data/france/").unwrap();
        assert_eq!(
            handler.public_path("/data/france/france_parts.qgs", "/france", &rooturl),
            "/france/france_parts.qgs"
        );
    }

    #[test]
    fn test_projects_listing() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("one.qgs")).unwrap();
        File::create(dir.path().join("two.qgz")).unwrap();
        File::create(dir.path().join("ignored.txt")).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        File::create(dir.path().join("sub/three.qgs")).unwrap();

        let handler = FileHandler;
        let url = Url::parse(&format!("file:{}", dir.path().display())).unwrap();
        let mds = handler.projects(&url).unwrap();
        assert_eq!(mds.len(), 3);
        assert!(mds.iter().all(|md| md.storage == "file"));
    }
}
