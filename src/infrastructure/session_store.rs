//! 会话存储 - 基础设施层
//!
//! 持有所有评估会话，只暴露"按键取会话"的能力。
//! 每个会话有自己的锁：同一评估者的请求串行，不同评估者互不影响。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::{AssignmentId, Session, SessionKey};

pub type SharedSession = Arc<tokio::sync::Mutex<Session>>;

/// 会话存储
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, SharedSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, SharedSession>> {
        // 表锁只在插入/查找时短暂持有，被毒化时数据仍然一致
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 获取会话，不存在则创建
    pub fn session(&self, key: &SessionKey) -> SharedSession {
        let mut map = self.map();
        map.entry(key.clone())
            .or_insert_with(|| {
                debug!("{} 创建新会话", key);
                Arc::new(tokio::sync::Mutex::new(Session::new(key.clone())))
            })
            .clone()
    }

    /// 获取已存在的会话
    pub fn get(&self, key: &SessionKey) -> Option<SharedSession> {
        self.map().get(key).cloned()
    }

    /// 删除某个作业的所有会话，返回删除数量
    pub fn remove_assignment(&self, assignment_id: &AssignmentId) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|key, _| &key.assignment_id != assignment_id);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
