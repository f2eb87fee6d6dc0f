use anyhow::{Context, Result};
use std::path::Path;

/// 页分隔符（pdftotext 等工具的输出格式）
const PAGE_BREAK: char = '\x0c';

/// The document the user is asking questions about.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub text: String,
    pub page_count: usize,
}

impl Document {
    /// Load extracted document text. Pages are separated by form feeds.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read document '{}'", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_text(name, &raw)
    }

    pub fn from_text(name: String, raw: &str) -> Result<Self> {
        let mut pages: Vec<String> = raw
            .split(PAGE_BREAK)
            .map(|page| page.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        // 末尾的分页符会留下一个空页
        if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
            pages.pop();
        }

        if pages.iter().all(|p| p.is_empty()) {
            anyhow::bail!("Document '{}' contains no text", name);
        }

        let text = pages
            .iter()
            .enumerate()
            .map(|(i, page)| format!("[Page {}]\n{}\n\n", i + 1, page))
            .collect::<String>();

        Ok(Self {
            name,
            page_count: pages.len(),
            text,
        })
    }
}
