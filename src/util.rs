use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_directory(parent)?;
        }
    }
    Ok(())
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_directory(path)?;

    let data = serde_json::to_vec(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Writes one compact JSON object per line.
pub fn write_jsonl<T: Serialize>(path: &Path, values: &[T]) -> Result<()> {
    ensure_parent_directory(path)?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create jsonl file: {}", path.display()))?;

    for value in values {
        let line = serde_json::to_vec(value)
            .with_context(|| format!("failed to serialize jsonl record: {}", path.display()))?;
        file.write_all(&line)
            .with_context(|| format!("failed to write jsonl file: {}", path.display()))?;
        file.write_all(b"\n")
            .with_context(|| format!("failed to write jsonl file: {}", path.display()))?;
    }

    Ok(())
}
