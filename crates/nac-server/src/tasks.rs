//! VLAN task queue
//!
//! A successful authentication asks the switch configuration workers to put
//! the port in the assigned VLAN. The request is a JSON task pushed onto a
//! list; the workers are outside this service.

use crate::config::TaskQueueConfig;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Invalid task queue configuration: {0}")]
    Config(String),
    #[error("Task queue connection error: {0}")]
    Connection(String),
    #[error("Task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Port as sent to the workers: the last path segment as an integer when
/// numeric (`GigabitEthernet1/0/12` gives `12`), the raw string otherwise
pub fn strip_port(port: &str) -> Value {
    let last = port.rsplit('/').next().unwrap_or(port);
    match last.trim().parse::<i64>() {
        Ok(number) => Value::from(number),
        Err(_) => Value::from(port),
    }
}

/// "Move this port to this VLAN"
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VlanTask {
    pub task: &'static str,
    pub nas: String,
    pub port: Value,
    pub vlan: u16,
}

impl VlanTask {
    pub fn create(nas: impl Into<String>, port: &str, vlan: u16) -> Self {
        VlanTask {
            task: "create",
            nas: nas.into(),
            port: strip_port(port),
            vlan,
        }
    }
}

/// Destination of VLAN tasks
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn push(&self, task: &VlanTask) -> Result<(), TaskError>;
}

/// Drops every task
#[derive(Debug, Clone, Default)]
pub struct NoopTaskQueue;

#[async_trait]
impl TaskQueue for NoopTaskQueue {
    async fn push(&self, task: &VlanTask) -> Result<(), TaskError> {
        debug!(nas = %task.nas, vlan = task.vlan, "No task queue configured, dropping task");
        Ok(())
    }
}

/// Keeps tasks in memory (tests, dry runs)
#[derive(Debug, Default)]
pub struct MemoryTaskQueue {
    tasks: Mutex<Vec<VlanTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> Vec<VlanTask> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn push(&self, task: &VlanTask) -> Result<(), TaskError> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task.clone());
        Ok(())
    }
}

/// Pushes tasks onto a Redis list with `RPUSH`
#[derive(Clone)]
pub struct RedisTaskQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisTaskQueue {
    /// Connect to the configured Redis server
    pub async fn new(config: &TaskQueueConfig) -> Result<Self, TaskError> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| TaskError::Config(format!("Invalid Redis URL: {}", e)))?;

        // Reconnects on its own after connection loss
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| TaskError::Connection(format!("Failed to connect to Redis: {}", e)))?;

        Ok(RedisTaskQueue {
            conn,
            key: config.key.clone(),
        })
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn push(&self, task: &VlanTask) -> Result<(), TaskError> {
        let payload = serde_json::to_string(task)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.key, payload)
            .await
            .map_err(|e| TaskError::Connection(e.to_string()))?;
        debug!(key = %self.key, nas = %task.nas, vlan = task.vlan, "Pushed VLAN task");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("GigabitEthernet1/0/12"), Value::from(12));
        assert_eq!(strip_port("7"), Value::from(7));
        assert_eq!(strip_port("wlan0"), Value::from("wlan0"));
        assert_eq!(strip_port("Gi1/0/uplink"), Value::from("Gi1/0/uplink"));
    }

    #[test]
    fn test_task_payload() {
        let task = VlanTask::create("10.10.3.1", "GigabitEthernet1/0/12", 1393);
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(json, r#"{"task":"create","nas":"10.10.3.1","port":12,"vlan":1393}"#);
    }

    #[tokio::test]
    async fn test_memory_queue() {
        let queue = MemoryTaskQueue::new();
        queue.push(&VlanTask::create("10.10.3.1", "3", 1393)).await.unwrap();
        NoopTaskQueue.push(&VlanTask::create("10.10.3.1", "3", 1393)).await.unwrap();

        let tasks = queue.tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].port, Value::from(3));
    }

    #[tokio::test]
    async fn test_invalid_redis_url() {
        let config = TaskQueueConfig {
            url: "not a url".to_string(),
            key: "queue:tasks".to_string(),
        };
        assert!(matches!(RedisTaskQueue::new(&config).await, Err(TaskError::Config(_))));
    }
}
