//! Read-only access to files under a base directory.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use kbchat_shared::{KbChatError, Result};

use crate::{Arguments, Capability, CapabilityProvider, required_str};

/// Characters of file content returned before truncation.
const MAX_FILE_CHARS: usize = 2000;

/// Serves `read_file` and `list_directory` relative to `base_path`.
pub struct FileProvider {
    base_path: PathBuf,
}

impl FileProvider {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Join `relative` onto the base path, refusing anything that could
    /// escape it.
    fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(KbChatError::validation(format!(
                "path must stay inside the base directory: {relative}"
            )));
        }
        Ok(self.base_path.join(rel))
    }

    async fn read_file(&self, args: &Arguments) -> Result<String> {
        let relative = required_str(args, "file_path")?;
        let path = self.resolve(relative)?;
        if !is_kind(&path, |m| m.is_file()).await {
            return Err(KbChatError::not_found(relative));
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| KbChatError::io(&path, e))?;
        let mut shown: String = content.chars().take(MAX_FILE_CHARS).collect();
        if content.chars().count() > MAX_FILE_CHARS {
            shown.push_str("\n\n... [content truncated]");
        }
        Ok(format!("File: {relative}\n\n{shown}"))
    }

    async fn list_directory(&self, args: &Arguments) -> Result<String> {
        let relative = args
            .get("dir_path")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("");
        let path = self.resolve(relative)?;
        if !is_kind(&path, |m| m.is_dir()).await {
            return Err(KbChatError::not_found(relative));
        }

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| KbChatError::io(&path, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KbChatError::io(&path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type().await {
                Ok(ft) if ft.is_dir() => dirs.push(format!("{name}/")),
                Ok(ft) if ft.is_file() => files.push(name),
                _ => {}
            }
        }
        dirs.sort();
        files.sort();

        let label = if relative.is_empty() { "." } else { relative };
        let mut out = format!("Directory: {label}\n");
        if !dirs.is_empty() {
            out.push_str("\nDirectories:\n");
            for d in &dirs {
                out.push_str(&format!("  {d}\n"));
            }
        }
        if !files.is_empty() {
            out.push_str("\nFiles:\n");
            for f in &files {
                out.push_str(&format!("  {f}\n"));
            }
        }
        Ok(out.trim_end().to_string())
    }
}

/// Whether `path` exists and its metadata satisfies `kind`.
async fn is_kind(path: &Path, kind: impl Fn(&std::fs::Metadata) -> bool) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| kind(&m))
}

#[async_trait]
impl CapabilityProvider for FileProvider {
    fn name(&self) -> &str {
        "files"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::new("read_file", "Read the contents of a file"),
            Capability::new("list_directory", "List the contents of a directory"),
        ]
    }

    async fn execute(&self, capability: &str, args: &Arguments) -> Result<String> {
        match capability {
            "read_file" => self.read_file(args).await,
            "list_directory" => self.list_directory(args).await,
            other => Err(KbChatError::unknown_capability(other)),
        }
    }
}
