//! 记忆与目标持久化
//!
//! 快照（空间记忆 + 目标列表）按 session_id 保存；启动时加载，运行期定时保存。
//! 后端：JSON 文件、SQLite（rusqlite）、Noop（不持久化）。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MemorySection;
use crate::decision::Goal;
use crate::memory::MemoryData;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Background task failed: {0}")]
    Join(String),
}

/// 跨进程保存的 Agent 状态
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSnapshot {
    pub memory: MemoryData,
    pub goals: Vec<Goal>,
    /// 毫秒时间戳
    pub saved_at: i64,
}

/// 快照存储接口
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 加载会话快照；不存在时返回 None
    async fn load(&self, session_id: &str) -> Result<Option<AgentSnapshot>, StoreError>;

    async fn save(&self, session_id: &str, snapshot: &AgentSnapshot) -> Result<(), StoreError>;
}

/// 不做持久化
#[derive(Debug, Default)]
pub struct NoopStore;

#[async_trait]
impl SnapshotStore for NoopStore {
    async fn load(&self, _session_id: &str) -> Result<Option<AgentSnapshot>, StoreError> {
        Ok(None)
    }

    async fn save(&self, _session_id: &str, _snapshot: &AgentSnapshot) -> Result<(), StoreError> {
        Ok(())
    }
}

/// JSON 文件存储：目录下每个会话一个 `<session_id>.json`
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn file_for(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(session_id)))
    }
}

#[async_trait]
impl SnapshotStore for JsonFileStore {
    async fn load(&self, session_id: &str) -> Result<Option<AgentSnapshot>, StoreError> {
        let path = self.file_for(session_id);
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// 父目录不存在时自动创建；先写临时文件再 rename
    async fn save(&self, session_id: &str, snapshot: &AgentSnapshot) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.file_for(session_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_string_pretty(snapshot)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// SQLite 存储：单表 agent_snapshots(session_id, data, updated_at)
pub struct SqliteStore {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = rusqlite::Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(rusqlite::Connection::open_in_memory()?)
    }

    fn init(conn: rusqlite::Connection) -> Result<Self, StoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS agent_snapshots (
                session_id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn load(&self, session_id: &str) -> Result<Option<AgentSnapshot>, StoreError> {
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        let raw = tokio::task::spawn_blocking(move || -> Result<Option<String>, StoreError> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let mut stmt =
                conn.prepare("SELECT data FROM agent_snapshots WHERE session_id = ?1")?;
            let mut rows = stmt.query([&session_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;

        match raw {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, session_id: &str, snapshot: &AgentSnapshot) -> Result<(), StoreError> {
        let data = serde_json::to_string(snapshot)?;
        let conn = Arc::clone(&self.conn);
        let session_id = session_id.to_string();
        let updated_at = snapshot.saved_at;
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            conn.execute(
                "INSERT INTO agent_snapshots (session_id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(session_id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                rusqlite::params![session_id, data, updated_at],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))??;
        Ok(())
    }
}

/// 根据 [memory] 配置创建存储后端
pub fn create_store(cfg: &MemorySection) -> Result<Arc<dyn SnapshotStore>, StoreError> {
    let store: Arc<dyn SnapshotStore> = match cfg.backend.as_str() {
        "sqlite" => Arc::new(SqliteStore::open(&cfg.path)?),
        "none" => Arc::new(NoopStore),
        _ => Arc::new(JsonFileStore::new(&cfg.path)),
    };
    tracing::info!(backend = %cfg.backend, path = %cfg.path.display(), "snapshot store ready");
    Ok(store)
}

fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{GoalKind, GoalPriority};
    use crate::world::Vec3;

    fn sample() -> AgentSnapshot {
        let mut memory = crate::memory::SpatialMemory::new();
        memory.save_location("base", Vec3::new(1.0, 64.0, 2.0), "base");
        memory.mark_dangerous(Vec3::new(20.5, 63.0, 20.5));
        memory.set_home(Vec3::new(1.0, 64.0, 2.0));
        let goal = Goal::new(GoalKind::Gather, GoalPriority::High)
            .with_param("item", "cobblestone")
            .with_param("count", 100);
        AgentSnapshot {
            memory: memory.data().clone(),
            goals: vec![goal],
            saved_at: 42,
        }
    }

    #[tokio::test]
    async fn test_json_store_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        assert!(store.load("s1").await.unwrap().is_none());

        let snap = sample();
        store.save("s1", &snap).await.unwrap();
        let loaded = store.load("s1").await.unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[tokio::test]
    async fn test_sqlite_store_overwrites_by_session() {
        let store = SqliteStore::in_memory().unwrap();
        let mut snap = sample();
        store.save("s1", &snap).await.unwrap();
        snap.memory.has_shelter = true;
        store.save("s1", &snap).await.unwrap();

        let loaded = store.load("s1").await.unwrap().unwrap();
        assert!(loaded.memory.has_shelter);
        assert!(store.load("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_noop_store() {
        let store = NoopStore;
        store.save("s", &sample()).await.unwrap();
        assert!(store.load("s").await.unwrap().is_none());
    }

    #[test]
    fn test_sanitize_session_id() {
        assert_eq!(sanitize("bot/../x y"), "bot____x_y");
    }
}
