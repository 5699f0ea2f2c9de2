//! 作业存储 - 基础设施层
//!
//! 按作业 ID 存取文档内容，只暴露存取能力，不关心问答流程

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, FileError};
use crate::models::{Assignment, AssignmentId};

/// 作业存储能力
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn insert(&self, assignment: Assignment) -> AppResult<()>;

    async fn get(&self, id: &AssignmentId) -> AppResult<Option<Arc<Assignment>>>;

    /// 删除作业，返回是否存在
    async fn delete(&self, id: &AssignmentId) -> AppResult<bool>;

    /// 删除超过保留期限的作业，返回被删除的 ID
    async fn purge_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<AssignmentId>>;
}

/// 内存存储
#[derive(Default)]
pub struct MemoryAssignmentStore {
    assignments: RwLock<HashMap<AssignmentId, Arc<Assignment>>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn insert(&self, assignment: Assignment) -> AppResult<()> {
        self.assignments
            .write()
            .await
            .insert(assignment.id.clone(), Arc::new(assignment));
        Ok(())
    }

    async fn get(&self, id: &AssignmentId) -> AppResult<Option<Arc<Assignment>>> {
        Ok(self.assignments.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &AssignmentId) -> AppResult<bool> {
        Ok(self.assignments.write().await.remove(id).is_some())
    }

    async fn purge_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<AssignmentId>> {
        let mut map = self.assignments.write().await;
        let expired: Vec<AssignmentId> = map
            .values()
            .filter(|a| a.is_expired(retention, now))
            .map(|a| a.id.clone())
            .collect();
        for id in &expired {
            map.remove(id);
        }
        Ok(expired)
    }
}

/// 文件存储
///
/// 每个作业一个 JSON 文件，文件名是 ID 的 sha256，目录里看不出 ID 本身
pub struct FileAssignmentStore {
    dir: PathBuf,
}

impl FileAssignmentStore {
    pub async fn open(dir: impl Into<PathBuf>) -> AppResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::file_write_failed(dir.display().to_string(), e))?;
        debug!("作业存储目录: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, id: &AssignmentId) -> PathBuf {
        self.dir.join(format!("{}.json", id.storage_digest()))
    }

    /// 读取作业文件，文件不存在时返回 None
    async fn read_file(path: &Path) -> AppResult<Option<Assignment>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AppError::file_read_failed(path.display().to_string(), e)),
        };
        serde_json::from_str(&content).map(Some).map_err(|e| {
            AppError::File(FileError::JsonParseFailed {
                path: path.display().to_string(),
                source: e,
            })
        })
    }
}

#[async_trait]
impl AssignmentStore for FileAssignmentStore {
    async fn insert(&self, assignment: Assignment) -> AppResult<()> {
        let path = self.path_for(&assignment.id);
        let content = serde_json::to_string(&assignment)?;
        fs::write(&path, content)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        debug!("作业已写入: {}", path.display());
        Ok(())
    }

    async fn get(&self, id: &AssignmentId) -> AppResult<Option<Arc<Assignment>>> {
        let assignment = Self::read_file(&self.path_for(id)).await?;
        Ok(assignment.map(Arc::new))
    }

    async fn delete(&self, id: &AssignmentId) -> AppResult<bool> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::File(FileError::DeleteFailed {
                path: path.display().to_string(),
                source: e,
            })),
        }
    }

    async fn purge_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> AppResult<Vec<AssignmentId>> {
        let mut expired = Vec::new();
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| AppError::file_read_failed(self.dir.display().to_string(), e))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            match Self::read_file(&path).await {
                Ok(Some(assignment)) if assignment.is_expired(retention, now) => {
                    if self.delete(&assignment.id).await? {
                        info!("作业已过期并删除: {}", assignment.id);
                        expired.push(assignment.id);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("跳过无法读取的作业文件 {}: {}", path.display(), e),
            }
        }

        Ok(expired)
    }
}
