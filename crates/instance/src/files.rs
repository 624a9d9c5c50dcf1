//! Instance knowledge files — plain text files under a tenant's `files/`
//! directory, injected into the context prefix with per-file and total
//! character caps.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::InstanceFilesSettings;

#[derive(Debug, Clone)]
pub struct InstanceFile {
    pub name: String,
    pub content: String,
}

/// Load the tenant's knowledge files, sorted by name, applying caps.
/// Files beyond the total budget are dropped rather than split.
pub fn load_instance_files(tenant_dir: &Path, settings: &InstanceFilesSettings) -> Vec<InstanceFile> {
    if !settings.enabled {
        return Vec::new();
    }
    let files_dir = tenant_dir.join("files");
    let Ok(entries) = fs::read_dir(&files_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".txt") || name.ends_with(".md"))
        .collect();
    names.sort();

    let mut loaded = Vec::new();
    let mut total = 0usize;
    for name in names {
        let Ok(content) = fs::read_to_string(files_dir.join(&name)) else {
            continue;
        };
        let content = truncate_chars(content.trim(), settings.max_file_chars);
        if content.is_empty() {
            continue;
        }
        if total + content.chars().count() > settings.max_total_chars {
            debug!(%name, "instance file dropped: total character cap reached");
            break;
        }
        total += content.chars().count();
        loaded.push(InstanceFile { name, content });
    }
    loaded
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn settings(max_file: usize, max_total: usize) -> InstanceFilesSettings {
        InstanceFilesSettings {
            enabled: true,
            max_file_chars: max_file,
            max_total_chars: max_total,
        }
    }

    #[test]
    fn loads_sorted_text_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("files");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("b.txt"), "segundo").unwrap();
        fs::write(files.join("a.txt"), "primero").unwrap();
        fs::write(files.join("ignorado.pdf"), "binario").unwrap();

        let loaded = load_instance_files(dir.path(), &settings(100, 1000));
        let names: Vec<&str> = loaded.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn per_file_cap_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("files");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("grande.txt"), "x".repeat(500)).unwrap();

        let loaded = load_instance_files(dir.path(), &settings(100, 1000));
        assert_eq!(loaded[0].content.chars().count(), 100);
    }

    #[test]
    fn total_cap_drops_remaining_files() {
        let dir = tempfile::tempdir().unwrap();
        let files = dir.path().join("files");
        fs::create_dir_all(&files).unwrap();
        fs::write(files.join("a.txt"), "x".repeat(80)).unwrap();
        fs::write(files.join("b.txt"), "y".repeat(80)).unwrap();

        let loaded = load_instance_files(dir.path(), &settings(100, 100));
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "a.txt");
    }

    #[test]
    fn disabled_or_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_instance_files(dir.path(), &settings(10, 10)).is_empty());

        let off = InstanceFilesSettings { enabled: false, ..settings(10, 10) };
        assert!(load_instance_files(dir.path(), &off).is_empty());
    }
}
