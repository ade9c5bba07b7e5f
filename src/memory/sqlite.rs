//! SQLite 记忆存储
//!
//! memories 表保存快照（JSON 文本），memory_tags 表保存标签；写入在单个事务内完成，
//! 因此不会出现只写了一半的记录。时间戳以微秒整数存储以便排序。

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use chrono::DateTime;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::core::AgentError;
use crate::memory::{MemoryFilter, MemoryRecord, MemoryStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    memory_id        TEXT PRIMARY KEY,
    owning_component TEXT NOT NULL,
    session_id       TEXT NOT NULL,
    ts_micros        INTEGER NOT NULL,
    task_json        TEXT NOT NULL,
    result_json      TEXT NOT NULL,
    context_json     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS memory_tags (
    memory_id TEXT NOT NULL REFERENCES memories(memory_id) ON DELETE CASCADE,
    tag       TEXT NOT NULL,
    PRIMARY KEY (memory_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_memory_tags_tag ON memory_tags(tag);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
";

const COLUMNS: &str =
    "memory_id, owning_component, session_id, ts_micros, task_json, result_json, context_json";

pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::Memory(format!("create {}: {e}", parent.display())))?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, AgentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AgentError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn write_record(conn: &mut Connection, record: &MemoryRecord, replace: bool) -> Result<(), AgentError> {
        let tx = conn.transaction()?;
        if replace {
            let n = tx.execute("DELETE FROM memories WHERE memory_id = ?1", params![record.memory_id])?;
            if n == 0 {
                return Err(AgentError::Memory(format!("memory {} not found", record.memory_id)));
            }
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO memories (memory_id, owning_component, session_id, ts_micros, task_json, result_json, context_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.memory_id,
                record.owning_component,
                record.session_id,
                record.timestamp.timestamp_micros(),
                serde_json::to_string(&record.task_snapshot)?,
                serde_json::to_string(&record.result_snapshot)?,
                serde_json::to_string(&record.context_snapshot)?,
            ],
        )?;
        if inserted == 0 {
            return Err(AgentError::Memory(format!("memory {} already exists", record.memory_id)));
        }
        for tag in &record.tags {
            tx.execute(
                "INSERT INTO memory_tags (memory_id, tag) VALUES (?1, ?2)",
                params![record.memory_id, tag],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn load_tags(conn: &Connection, memory_id: &str) -> Result<Vec<String>, AgentError> {
        let mut stmt = conn.prepare_cached("SELECT tag FROM memory_tags WHERE memory_id = ?1")?;
        let tags = stmt
            .query_map(params![memory_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    fn hydrate(conn: &Connection, raw: RawRow) -> Result<MemoryRecord, AgentError> {
        let timestamp = DateTime::from_timestamp_micros(raw.ts_micros)
            .ok_or_else(|| AgentError::Memory(format!("bad timestamp {}", raw.ts_micros)))?;
        let tags = Self::load_tags(conn, &raw.memory_id)?;
        Ok(MemoryRecord {
            owning_component: raw.owning_component,
            session_id: raw.session_id,
            timestamp,
            task_snapshot: serde_json::from_str(&raw.task_json)?,
            result_snapshot: serde_json::from_str(&raw.result_json)?,
            context_snapshot: serde_json::from_str(&raw.context_json)?,
            tags: tags.into_iter().collect(),
            memory_id: raw.memory_id,
        })
    }

    fn select(conn: &Connection, sql: &str, args: &[String]) -> Result<Vec<MemoryRecord>, AgentError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), RawRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(|raw| Self::hydrate(conn, raw)).collect()
    }
}

struct RawRow {
    memory_id: String,
    owning_component: String,
    session_id: String,
    ts_micros: i64,
    task_json: String,
    result_json: String,
    context_json: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            memory_id: row.get(0)?,
            owning_component: row.get(1)?,
            session_id: row.get(2)?,
            ts_micros: row.get(3)?,
            task_json: row.get(4)?,
            result_json: row.get(5)?,
            context_json: row.get(6)?,
        })
    }
}

impl MemoryStore for SqliteMemoryStore {
    fn store(&self, record: MemoryRecord) -> Result<String, AgentError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::write_record(&mut conn, &record, false)?;
        Ok(record.memory_id)
    }

    fn get(&self, memory_id: &str) -> Result<Option<MemoryRecord>, AgentError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM memories WHERE memory_id = ?1"),
                params![memory_id],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(|r| Self::hydrate(&conn, r)).transpose()
    }

    fn query(&self, filter: &MemoryFilter, limit: usize) -> Result<Vec<MemoryRecord>, AgentError> {
        let mut clauses = Vec::new();
        let mut args = Vec::new();
        if let Some(ref s) = filter.session_id {
            args.push(s.clone());
            clauses.push(format!("session_id = ?{}", args.len()));
        }
        if let Some(ref c) = filter.owning_component {
            args.push(c.clone());
            clauses.push(format!("owning_component = ?{}", args.len()));
        }
        if !filter.tags.is_empty() {
            let mut placeholders = Vec::new();
            for tag in &filter.tags {
                args.push(tag.clone());
                placeholders.push(format!("?{}", args.len()));
            }
            clauses.push(format!(
                "memory_id IN (SELECT memory_id FROM memory_tags WHERE tag IN ({}) \
                 GROUP BY memory_id HAVING COUNT(DISTINCT tag) = {})",
                placeholders.join(", "),
                filter.tags.iter().collect::<std::collections::HashSet<_>>().len()
            ));
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!("SELECT {COLUMNS} FROM memories {where_sql} ORDER BY ts_micros DESC, memory_id ASC");

        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hits = Self::select(&conn, &sql, &args)?;
        // 关键词在反序列化后的快照上匹配，与内存实现一致
        hits.retain(|r| filter.matches(r));
        hits.truncate(limit);
        Ok(hits)
    }

    fn replace(&self, record: MemoryRecord) -> Result<(), AgentError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::write_record(&mut conn, &record, true)
    }

    fn delete(&self, memory_id: &str) -> Result<bool, AgentError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let n = conn.execute("DELETE FROM memories WHERE memory_id = ?1", params![memory_id])?;
        Ok(n > 0)
    }

    fn all(&self) -> Result<Vec<MemoryRecord>, AgentError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Self::select(
            &conn,
            &format!("SELECT {COLUMNS} FROM memories ORDER BY ts_micros DESC, memory_id ASC"),
            &[],
        )
    }

    fn len(&self) -> Result<usize, AgentError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}
