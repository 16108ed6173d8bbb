// src/executor/patch.rs

//! Applying unified diffs to a source tree
//!
//! Multi-file diffs are split on their `---`/`+++` headers and each file
//! section is applied with `diffy`. Paths are resolved against the tree
//! after stripping `strip` leading components, as `patch -pN` does.
//! `/dev/null` on either side creates or deletes the file.

use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// A diff that could not be applied
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("malformed diff: {0}")]
    Malformed(String),

    #[error("{path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

struct FileSection {
    old: Option<String>,
    new: Option<String>,
    hunks: String,
}

/// Apply `diff` under `dir`, returning the files touched
pub fn apply_patch(dir: &Path, diff: &str, strip: u32) -> Result<Vec<PathBuf>, PatchError> {
    let sections = split_sections(diff)?;
    if sections.is_empty() {
        return Err(PatchError::Malformed("no file sections found".to_string()));
    }

    let mut touched = Vec::with_capacity(sections.len());
    for section in sections {
        let name = section
            .new
            .as_deref()
            .or(section.old.as_deref())
            .ok_or_else(|| PatchError::Malformed("both sides are /dev/null".to_string()))?;
        let relative = strip_components(name, strip)?;
        let target = dir.join(&relative);

        if section.new.is_none() {
            fs::remove_file(&target)?;
            debug!("Patch removed {}", relative.display());
            touched.push(target);
            continue;
        }

        let original = if section.old.is_none() {
            String::new()
        } else {
            fs::read_to_string(&target).map_err(|e| PatchError::Rejected {
                path: relative.display().to_string(),
                reason: e.to_string(),
            })?
        };

        let parsed = diffy::Patch::from_str(&section.hunks).map_err(|e| PatchError::Rejected {
            path: relative.display().to_string(),
            reason: e.to_string(),
        })?;
        let patched = diffy::apply(&original, &parsed).map_err(|e| PatchError::Rejected {
            path: relative.display().to_string(),
            reason: e.to_string(),
        })?;

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, patched)?;
        debug!("Patched {}", relative.display());
        touched.push(target);
    }
    Ok(touched)
}

fn split_sections(diff: &str) -> Result<Vec<FileSection>, PatchError> {
    let lines: Vec<&str> = diff.lines().collect();
    let mut sections: Vec<FileSection> = Vec::new();
    let mut in_hunks = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(old) = line.strip_prefix("--- ")
            && let Some(new) = lines.get(i + 1).and_then(|l| l.strip_prefix("+++ "))
        {
            sections.push(FileSection {
                old: header_path(old),
                new: header_path(new),
                hunks: String::new(),
            });
            in_hunks = false;
            i += 2;
            continue;
        }

        if let Some(section) = sections.last_mut() {
            if line.starts_with("@@") {
                in_hunks = true;
            }
            if in_hunks {
                match line.chars().next() {
                    Some('@' | ' ' | '+' | '-' | '\\') => section.hunks.push_str(line),
                    // Some editors strip the space from blank context lines
                    None => section.hunks.push(' '),
                    // `diff --git`, `index` and similar between sections
                    Some(_) => in_hunks = false,
                }
                if in_hunks {
                    section.hunks.push('\n');
                }
            }
        }
        i += 1;
    }

    if let Some(empty) = sections.iter().find(|s| s.hunks.is_empty()) {
        let name = empty.new.as_deref().or(empty.old.as_deref()).unwrap_or("?");
        return Err(PatchError::Malformed(format!("no hunks for {}", name)));
    }
    Ok(sections)
}

fn header_path(header: &str) -> Option<String> {
    let path = header.split('\t').next().unwrap_or(header).trim();
    (path != "/dev/null").then(|| path.to_string())
}

fn strip_components(path: &str, strip: u32) -> Result<PathBuf, PatchError> {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    if parts.len() <= strip as usize {
        return Err(PatchError::Malformed(format!(
            "cannot strip {} components from {}",
            strip, path
        )));
    }
    let relative: PathBuf = parts[strip as usize..].iter().collect();
    if relative
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
    {
        return Err(PatchError::Malformed(format!("{} escapes the source tree", path)));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TWO_FILES: &str = "\
diff --git a/src/main.c b/src/main.c
index 1111111..2222222 100644
--- a/src/main.c
+++ b/src/main.c
@@ -1,3 +1,3 @@
 int main(void) {
-    return 1;
+    return 0;
 }
--- /dev/null
+++ b/NOTES
@@ -0,0 +1 @@
+patched
";

    #[test]
    fn test_apply_multi_file_patch() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(
            tmp.path().join("src/main.c"),
            "int main(void) {\n    return 1;\n}\n",
        )
        .unwrap();

        let touched = apply_patch(tmp.path(), TWO_FILES, 1).unwrap();
        assert_eq!(touched.len(), 2);
        assert_eq!(
            fs::read_to_string(tmp.path().join("src/main.c")).unwrap(),
            "int main(void) {\n    return 0;\n}\n"
        );
        assert_eq!(fs::read_to_string(tmp.path().join("NOTES")).unwrap(), "patched\n");
    }

    #[test]
    fn test_context_mismatch_rejected() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("src")).unwrap();
        fs::write(tmp.path().join("src/main.c"), "something else entirely\n").unwrap();

        let err = apply_patch(tmp.path(), TWO_FILES, 1).unwrap_err();
        assert!(matches!(err, PatchError::Rejected { .. }));
    }

    #[test]
    fn test_strip_levels() {
        assert_eq!(strip_components("a/b/c.txt", 1).unwrap(), PathBuf::from("b/c.txt"));
        assert_eq!(strip_components("c.txt", 0).unwrap(), PathBuf::from("c.txt"));
        assert!(strip_components("c.txt", 1).is_err());
        assert!(strip_components("a/../../etc/passwd", 1).is_err());
    }

    #[test]
    fn test_header_path_drops_timestamp() {
        assert_eq!(
            header_path("a/Makefile\t2024-01-01 00:00:00"),
            Some("a/Makefile".to_string())
        );
        assert_eq!(header_path("/dev/null"), None);
    }

    #[test]
    fn test_not_a_diff() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            apply_patch(tmp.path(), "hello\n", 1),
            Err(PatchError::Malformed(_))
        ));
    }
}
