//! Delay queue for delivery tasks.
//!
//! Redis layout:
//! - `delivery:queue`: sorted set, member = JSON `QueuedTask`, score = due
//!   time in epoch milliseconds
//! - `delivery:processing`: hash, task id -> JSON `QueuedTask`, for tasks a
//!   worker has claimed and not yet settled
//! - `delivery:dead`: list of tasks that exhausted their attempts
//!
//! A claim moves the member from the sorted set into the processing hash in
//! one script call, and only the caller whose `ZREM` removed it owns the task.
//! Settling (reschedule, dead-letter, acknowledge) clears the hash entry in
//! the same transaction that writes the task elsewhere, so a task is always in
//! at least one of the three keys. Entries left in the hash by a crashed
//! worker are moved back to the queue by `recover_in_flight`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use boardwatch_common::error::AppError;
use boardwatch_common::types::DeliveryTask;
use boardwatch_engine::dispatcher::TaskQueue;

pub const QUEUE_KEY: &str = "delivery:queue";
pub const PROCESSING_KEY: &str = "delivery:processing";
pub const DEAD_LETTER_KEY: &str = "delivery:dead";

const CLAIM_SCRIPT: &str = r"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 1 then
    redis.call('HSET', KEYS[2], ARGV[2], ARGV[1])
    return 1
end
return 0
";

/// A task as stored in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: Uuid,
    pub task: DeliveryTask,
    /// Failed delivery attempts so far.
    pub attempts: u32,
}

impl QueuedTask {
    pub fn new(task: DeliveryTask) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            attempts: 0,
        }
    }
}

/// Worker-side queue operations.
///
/// A claimed task stays in flight until it is acknowledged, rescheduled or
/// dead-lettered.
#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Claim up to `limit` tasks due at or before `now`, oldest first.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>, AppError>;

    /// Put a task (back) on the queue, due at `due`.
    async fn schedule(&self, task: QueuedTask, due: DateTime<Utc>) -> Result<(), AppError>;

    /// Park a task that will not be retried.
    async fn dead_letter(&self, task: QueuedTask) -> Result<(), AppError>;

    /// Drop a delivered task.
    async fn acknowledge(&self, task: &QueuedTask) -> Result<(), AppError>;

    /// Return every in-flight task to the queue, due at `now`.
    async fn recover_in_flight(&self, now: DateTime<Utc>) -> Result<usize, AppError>;
}

fn due_after(delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Redis sorted-set delay queue.
#[derive(Clone)]
pub struct RedisTaskQueue {
    redis: ConnectionManager,
    queue_key: String,
    processing_key: String,
    dead_letter_key: String,
}

impl RedisTaskQueue {
    pub fn new(redis: ConnectionManager) -> Self {
        Self::with_keys(redis, QUEUE_KEY, PROCESSING_KEY, DEAD_LETTER_KEY)
    }

    pub fn with_keys(
        redis: ConnectionManager,
        queue_key: impl Into<String>,
        processing_key: impl Into<String>,
        dead_letter_key: impl Into<String>,
    ) -> Self {
        Self {
            redis,
            queue_key: queue_key.into(),
            processing_key: processing_key.into(),
            dead_letter_key: dead_letter_key.into(),
        }
    }

    /// Move an undecodable member straight to the dead letters.
    async fn bury(&self, raw: &str) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(&self.queue_key)
            .arg(raw)
            .ignore()
            .cmd("RPUSH")
            .arg(&self.dead_letter_key)
            .arg(raw)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    async fn enqueue(&self, task: DeliveryTask, delay: Duration) -> Result<(), AppError> {
        let queued = QueuedTask::new(task);
        tracing::debug!(task_id = %queued.id, delay_ms = delay.as_millis() as u64, "Enqueuing delivery task");

        let member = serde_json::to_string(&queued)?;
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.queue_key)
            .arg(due_after(delay).timestamp_millis())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TaskSource for RedisTaskQueue {
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>, AppError> {
        let mut conn = self.redis.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&self.queue_key)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let script = redis::Script::new(CLAIM_SCRIPT);
        let mut claimed = Vec::with_capacity(members.len());
        for member in members {
            let task = match serde_json::from_str::<QueuedTask>(&member) {
                Ok(task) => task,
                Err(e) => {
                    tracing::error!(error = %e, "Undecodable queue entry, moving to dead letters");
                    self.bury(&member).await?;
                    continue;
                }
            };

            let owned: i64 = script
                .key(&self.queue_key)
                .key(&self.processing_key)
                .arg(&member)
                .arg(task.id.to_string())
                .invoke_async(&mut conn)
                .await?;
            if owned == 1 {
                claimed.push(task);
            }
        }

        Ok(claimed)
    }

    async fn schedule(&self, task: QueuedTask, due: DateTime<Utc>) -> Result<(), AppError> {
        let member = serde_json::to_string(&task)?;
        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("ZADD")
            .arg(&self.queue_key)
            .arg(due.timestamp_millis())
            .arg(member)
            .ignore()
            .cmd("HDEL")
            .arg(&self.processing_key)
            .arg(task.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn dead_letter(&self, task: QueuedTask) -> Result<(), AppError> {
        let raw = serde_json::to_string(&task)?;
        let mut conn = self.redis.clone();
        let _: () = redis::pipe()
            .atomic()
            .cmd("RPUSH")
            .arg(&self.dead_letter_key)
            .arg(raw)
            .ignore()
            .cmd("HDEL")
            .arg(&self.processing_key)
            .arg(task.id.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn acknowledge(&self, task: &QueuedTask) -> Result<(), AppError> {
        let mut conn = self.redis.clone();
        let _: i64 = redis::cmd("HDEL")
            .arg(&self.processing_key)
            .arg(task.id.to_string())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover_in_flight(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let mut conn = self.redis.clone();
        let in_flight: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&self.processing_key)
            .query_async(&mut conn)
            .await?;

        for (id, member) in &in_flight {
            let _: () = redis::pipe()
                .atomic()
                .cmd("ZADD")
                .arg(&self.queue_key)
                .arg(now.timestamp_millis())
                .arg(member)
                .ignore()
                .cmd("HDEL")
                .arg(&self.processing_key)
                .arg(id)
                .ignore()
                .query_async(&mut conn)
                .await?;
        }

        Ok(in_flight.len())
    }
}

/// Process-local delay queue with the same claim semantics.
#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    scheduled: Mutex<Vec<(DateTime<Utc>, QueuedTask)>>,
    in_flight: Mutex<HashMap<Uuid, QueuedTask>>,
    dead: Mutex<Vec<QueuedTask>>,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheduled tasks with their due time, soonest first.
    pub fn pending(&self) -> Vec<(DateTime<Utc>, QueuedTask)> {
        let mut pending = lock(&self.scheduled).clone();
        pending.sort_by_key(|(due, _)| *due);
        pending
    }

    /// Claimed tasks not yet settled.
    pub fn in_flight(&self) -> Vec<QueuedTask> {
        lock(&self.in_flight).values().cloned().collect()
    }

    pub fn dead_letters(&self) -> Vec<QueuedTask> {
        lock(&self.dead).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task: DeliveryTask, delay: Duration) -> Result<(), AppError> {
        lock(&self.scheduled).push((due_after(delay), QueuedTask::new(task)));
        Ok(())
    }
}

#[async_trait]
impl TaskSource for InMemoryTaskQueue {
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueuedTask>, AppError> {
        let mut scheduled = lock(&self.scheduled);
        // Stable sort keeps insertion order between equal due times.
        scheduled.sort_by_key(|(due, _)| *due);

        let due_count = scheduled
            .iter()
            .take_while(|(due, _)| *due <= now)
            .count()
            .min(limit);
        let claimed: Vec<QueuedTask> = scheduled.drain(..due_count).map(|(_, task)| task).collect();

        let mut in_flight = lock(&self.in_flight);
        for task in &claimed {
            in_flight.insert(task.id, task.clone());
        }
        Ok(claimed)
    }

    async fn schedule(&self, task: QueuedTask, due: DateTime<Utc>) -> Result<(), AppError> {
        lock(&self.in_flight).remove(&task.id);
        lock(&self.scheduled).push((due, task));
        Ok(())
    }

    async fn dead_letter(&self, task: QueuedTask) -> Result<(), AppError> {
        lock(&self.in_flight).remove(&task.id);
        lock(&self.dead).push(task);
        Ok(())
    }

    async fn acknowledge(&self, task: &QueuedTask) -> Result<(), AppError> {
        lock(&self.in_flight).remove(&task.id);
        Ok(())
    }

    async fn recover_in_flight(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let recovered: Vec<QueuedTask> = lock(&self.in_flight).drain().map(|(_, task)| task).collect();
        let count = recovered.len();
        lock(&self.scheduled).extend(recovered.into_iter().map(|task| (now, task)));
        Ok(count)
    }
}
