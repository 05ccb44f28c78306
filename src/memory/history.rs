//! 会话历史存储
//!
//! 每轮结束后追加一条 ChatTurn；下一轮构建状态时按 session 读出最近若干轮，展开为 user/assistant 消息。
//! InMemoryChatHistory 用于测试与无持久化运行；SqliteChatHistory 落盘到 `chat_turns` 表。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::AgentError;
use crate::memory::Message;

/// 一轮问答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub message_id: String,
    pub user_id: Option<String>,
    pub query: String,
    pub answer: String,
    pub intent_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn messages(&self) -> [Message; 2] {
        [
            Message::user(self.query.clone()),
            Message::assistant(self.answer.clone()),
        ]
    }
}

/// 把最近 max_turns 轮展开为消息序列（时间正序）
pub fn turns_to_messages(turns: &[ChatTurn], max_turns: usize) -> Vec<Message> {
    let start = turns.len().saturating_sub(max_turns);
    turns[start..].iter().flat_map(|t| t.messages()).collect()
}

#[async_trait]
pub trait ChatHistoryStore: Send + Sync {
    /// 读出 session 的全部轮次（时间正序）
    async fn load(&self, session_id: &str) -> Result<Vec<ChatTurn>, AgentError>;

    async fn append(&self, session_id: &str, turn: ChatTurn) -> Result<(), AgentError>;
}

#[derive(Default)]
pub struct InMemoryChatHistory {
    sessions: RwLock<HashMap<String, Vec<ChatTurn>>>,
}

impl InMemoryChatHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatHistoryStore for InMemoryChatHistory {
    async fn load(&self, session_id: &str) -> Result<Vec<ChatTurn>, AgentError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, session_id: &str, turn: ChatTurn) -> Result<(), AgentError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(turn);
        Ok(())
    }
}

/// SQLite 会话历史
pub struct SqliteChatHistory {
    conn: Mutex<Connection>,
}

impl SqliteChatHistory {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::StorageError(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_turns (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                user_id TEXT,
                query TEXT NOT NULL,
                answer TEXT NOT NULL,
                intent_type TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chat_turns_session ON chat_turns(session_id, id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn
            .lock()
            .map_err(|_| AgentError::StorageError("history connection poisoned".to_string()))
    }
}

#[async_trait]
impl ChatHistoryStore for SqliteChatHistory {
    async fn load(&self, session_id: &str) -> Result<Vec<ChatTurn>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, user_id, query, answer, intent_type, created_at
             FROM chat_turns WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            let created_at: String = row.get(5)?;
            Ok(ChatTurn {
                message_id: row.get(0)?,
                user_id: row.get(1)?,
                query: row.get(2)?,
                answer: row.get(3)?,
                intent_type: row.get(4)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        let turns = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(turns)
    }

    async fn append(&self, session_id: &str, turn: ChatTurn) -> Result<(), AgentError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_turns (session_id, message_id, user_id, query, answer, intent_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id,
                turn.message_id,
                turn.user_id,
                turn.query,
                turn.answer,
                turn.intent_type,
                turn.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}
