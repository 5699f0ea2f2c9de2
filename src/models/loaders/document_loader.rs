use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 可以直接读取的文本格式（PDF 需先在外部提取为文本）
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

/// 读取已提取的作业文本
///
/// 文本中可以包含 `--- Page N ---` 分页标记，分块时会按页切分
pub async fn load_document(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("无法读取文档: {}", path.display()))?;

    if content.trim().is_empty() {
        anyhow::bail!("文档内容为空: {}", path.display());
    }

    Ok(content)
}

/// 从文件夹中加载所有文本文档，返回 (路径, 内容) 列表
pub async fn load_all_documents(folder_path: &str) -> Result<Vec<(PathBuf, String)>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut documents = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext));
        if !is_text {
            continue;
        }

        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_document(&path).await {
            Ok(content) => {
                tracing::info!("成功加载 {} 个字符", content.chars().count());
                documents.push((path, content));
            }
            Err(e) => {
                tracing::warn!("加载文件失败 {}: {}", path.display(), e);
            }
        }
    }

    documents.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("secure_evaluator_loader_{}", uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_load_all_documents_skips_other_files() {
        let dir = temp_dir();
        std::fs::write(dir.join("a.txt"), "first document").unwrap();
        std::fs::write(dir.join("b.md"), "second document").unwrap();
        std::fs::write(dir.join("c.pdf"), "binary").unwrap();
        std::fs::write(dir.join("d.txt"), "   ").unwrap();

        let docs = load_all_documents(dir.to_str().unwrap()).await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].1, "first document");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_missing_folder_is_error() {
        assert!(load_all_documents("/definitely/not/here").await.is_err());
    }
}
