//! Template store: the upload directory holding templates and filled outputs.
//!
//! File names are the store keys. Names must be plain file names; anything
//! that could resolve outside the directory is rejected as invalid input.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::error::FormError;
use crate::models::{TemplateFormat, TemplateHandle};

/// Substring marking a file as a filled output rather than a template.
pub const FILLED_MARKER: &str = "-filled";

/// Upper bound on timestamp bumps when two fills land on the same millisecond.
const MAX_NAME_ATTEMPTS: i64 = 1000;

#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    /// Opens the store, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, FormError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all templates, sorted. Filled outputs and files with
    /// unsupported extensions are left out.
    pub async fn list(&self) -> Result<Vec<String>, FormError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if is_template_name(&name) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Writes `bytes` under `name`, replacing any existing file.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<(), FormError> {
        validate_name(name)?;
        if TemplateFormat::from_filename(name).is_none() {
            return Err(FormError::InvalidInput(format!(
                "unsupported file type: {} (expected .xlsx or .docx)",
                name
            )));
        }
        tokio::fs::write(self.dir.join(name), bytes).await?;
        Ok(())
    }

    pub async fn read(&self, name: &str) -> Result<TemplateHandle, FormError> {
        validate_name(name)?;
        let bytes = match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FormError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(TemplateHandle {
            name: name.to_string(),
            format: TemplateFormat::from_filename(name),
            bytes,
        })
    }

    /// Stores a filled copy of `source` and returns the generated name.
    ///
    /// The name embeds `timestamp_ms`; if that name is taken the timestamp is
    /// bumped until a free one is found, so concurrent fills never overwrite
    /// each other.
    pub async fn save_filled(
        &self,
        source: &str,
        timestamp_ms: i64,
        bytes: &[u8],
    ) -> Result<String, FormError> {
        validate_name(source)?;
        for bump in 0..MAX_NAME_ATTEMPTS {
            let name = filled_name(source, timestamp_ms + bump);
            let open = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.dir.join(&name))
                .await;
            match open {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(FormError::Storage(
            std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!("no free output name for {}", source),
            )
            .into(),
        ))
    }
}

/// Whether a directory entry should appear in template listings.
pub fn is_template_name(name: &str) -> bool {
    TemplateFormat::from_filename(name).is_some() && !name.contains(FILLED_MARKER)
}

/// `form.xlsx` + 1700000000000 → `form-filled-1700000000000.xlsx`.
pub fn filled_name(source: &str, timestamp_ms: i64) -> String {
    let stem = match TemplateFormat::from_filename(source) {
        Some(format) => &source[..source.len() - format.extension().len()],
        None => source,
    };
    format!("{}{}-{}.xlsx", stem, FILLED_MARKER, timestamp_ms)
}

/// Rejects names that are empty, relative-path components, or contain path
/// separators.
pub fn validate_name(name: &str) -> Result<(), FormError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if bad {
        return Err(FormError::InvalidInput(format!(
            "invalid file name: '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn listing_filter() {
        assert!(is_template_name("a.xlsx"));
        assert!(is_template_name("letter.docx"));
        assert!(is_template_name("UPPER.XLSX"));
        assert!(!is_template_name("a-filled-1700000000000.xlsx"));
        assert!(!is_template_name("notes.txt"));
    }

    #[test]
    fn filled_name_replaces_extension() {
        assert_eq!(filled_name("a.xlsx", 42), "a-filled-42.xlsx");
        assert_eq!(
            filled_name("sample_v2_form.xlsx", 1_700_000_000_000),
            "sample_v2_form-filled-1700000000000.xlsx"
        );
    }

    #[test]
    fn traversal_names_rejected() {
        for name in ["", ".", "..", "../a.xlsx", "dir/a.xlsx", "c:\\a.xlsx"] {
            assert!(
                matches!(validate_name(name), Err(FormError::InvalidInput(_))),
                "accepted {:?}",
                name
            );
        }
        assert!(validate_name("a b.xlsx").is_ok());
    }

    #[tokio::test]
    async fn list_excludes_filled_outputs() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path()).await.unwrap();
        store.save("a.xlsx", b"template").await.unwrap();
        store
            .save_filled("a.xlsx", 1_690_000_000_000, b"filled")
            .await
            .unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "x").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a.xlsx".to_string()]);
    }

    #[tokio::test]
    async fn save_overwrites_existing() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path()).await.unwrap();
        store.save("a.xlsx", b"one").await.unwrap();
        store.save("a.xlsx", b"two").await.unwrap();
        assert_eq!(store.read("a.xlsx").await.unwrap().bytes, b"two");
    }

    #[tokio::test]
    async fn save_rejects_unsupported_extension() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path()).await.unwrap();
        let err = store.save("script.sh", b"#!").await.unwrap_err();
        assert!(matches!(err, FormError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path()).await.unwrap();
        let err = store.read("missing.xlsx").await.unwrap_err();
        assert!(matches!(err, FormError::NotFound(_)));
    }

    #[tokio::test]
    async fn same_millisecond_fills_get_distinct_names() {
        let tmp = TempDir::new().unwrap();
        let store = TemplateStore::open(tmp.path()).await.unwrap();
        let first = store.save_filled("a.xlsx", 5, b"1").await.unwrap();
        let second = store.save_filled("a.xlsx", 5, b"2").await.unwrap();
        assert_eq!(first, "a-filled-5.xlsx");
        assert_eq!(second, "a-filled-6.xlsx");
        assert_eq!(std::fs::read(tmp.path().join(&first)).unwrap(), b"1");
    }
}
