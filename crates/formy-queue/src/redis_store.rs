//! Redis-backed task store.
//!
//! Layout under the configured prefix:
//! - `{prefix}:job:{id}` hash with the job record
//! - `{prefix}:queue` sorted set of ready job ids, scored by ready-at (ms)
//! - `{prefix}:inflight` sorted set of claimed job ids, scored by claimed-at (ms)
//!
//! Every status change runs as one Lua script so it is atomic across workers.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use tracing::{debug, info, warn};
use uuid::Uuid;

use formy_models::{Job, JobError, JobId, JobStatus, Lease, NewJob};

use crate::config::QueueConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{JobUpdate, TaskStore, UpdateOutcome};

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], unpack(ARGV, 3))
redis.call('ZADD', KEYS[2], ARGV[1], ARGV[2])
return 1
"#;

const CLAIM_SCRIPT: &str = r#"
while true do
    local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
    if #ids == 0 then
        return false
    end
    local id = ids[1]
    redis.call('ZREM', KEYS[1], id)
    local key = ARGV[4] .. id
    if redis.call('HGET', key, 'status') == 'queued' then
        redis.call('HINCRBY', key, 'attempt_count', 1)
        redis.call('HSET', key, 'status', 'processing', 'lease_token', ARGV[2],
            'claimed_at', ARGV[3], 'progress', 0, 'updated_at', ARGV[3])
        redis.call('HDEL', key, 'current_step')
        redis.call('ZADD', KEYS[2], ARGV[1], id)
        return redis.call('HGETALL', key)
    end
end
"#;

const UPDATE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status == ARGV[2] then
    return 'unchanged'
end
if status ~= 'processing' then
    return 'invalid:' .. status
end
if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[1] then
    return 'lease_lost'
end
redis.call('HSET', KEYS[1], 'status', ARGV[2], ARGV[3], ARGV[4], 'updated_at', ARGV[5])
if ARGV[2] == 'succeeded' then
    redis.call('HSET', KEYS[1], 'progress', 100)
end
redis.call('HDEL', KEYS[1], 'lease_token', 'claimed_at')
if tonumber(ARGV[6]) > 0 then
    redis.call('EXPIRE', KEYS[1], ARGV[6])
end
return 'ok'
"#;

const REQUEUE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status ~= 'processing' then
    return 'invalid:' .. status
end
if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[1] then
    return 'lease_lost'
end
redis.call('HSET', KEYS[1], 'status', 'queued', 'last_error', ARGV[2], 'updated_at', ARGV[5])
redis.call('HDEL', KEYS[1], 'lease_token', 'claimed_at')
redis.call('ZREM', KEYS[3], ARGV[4])
redis.call('ZADD', KEYS[2], ARGV[3], ARGV[4])
return 'ok'
"#;

const RECLAIM_SCRIPT: &str = r#"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1])
local reclaimed = {}
for _, id in ipairs(ids) do
    local key = ARGV[5] .. id
    if redis.call('HGET', key, 'status') == 'processing' then
        redis.call('HSET', key, 'lease_token', ARGV[4] .. ':' .. id,
            'claimed_at', ARGV[3], 'updated_at', ARGV[3])
        redis.call('ZADD', KEYS[1], ARGV[2], id)
        table.insert(reclaimed, id)
    else
        redis.call('ZREM', KEYS[1], id)
    end
end
return reclaimed
"#;

const PROGRESS_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return 'missing'
end
if status ~= 'processing' then
    return 'invalid:' .. status
end
if redis.call('HGET', KEYS[1], 'lease_token') ~= ARGV[1] then
    return 'lease_lost'
end
redis.call('HSET', KEYS[1], 'progress', ARGV[2], 'current_step', ARGV[3], 'updated_at', ARGV[4])
return 'ok'
"#;

struct Scripts {
    enqueue: Script,
    claim: Script,
    update: Script,
    requeue: Script,
    reclaim: Script,
    progress: Script,
}

impl Scripts {
    fn load() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_SCRIPT),
            claim: Script::new(CLAIM_SCRIPT),
            update: Script::new(UPDATE_SCRIPT),
            requeue: Script::new(REQUEUE_SCRIPT),
            reclaim: Script::new(RECLAIM_SCRIPT),
            progress: Script::new(PROGRESS_SCRIPT),
        }
    }
}

/// Result of a guarded write script.
#[derive(Debug, PartialEq)]
enum WriteReply {
    Ok,
    Unchanged,
}

fn parse_write_reply(job_id: &JobId, to: JobStatus, reply: &str) -> StoreResult<WriteReply> {
    match reply {
        "ok" => Ok(WriteReply::Ok),
        "unchanged" => Ok(WriteReply::Unchanged),
        "missing" => Err(StoreError::JobNotFound(job_id.to_string())),
        "lease_lost" => Err(StoreError::LeaseLost(job_id.to_string())),
        other => match other.strip_prefix("invalid:") {
            Some(from) => Err(StoreError::InvalidTransition {
                job_id: job_id.to_string(),
                from: from
                    .parse()
                    .map_err(|e: String| StoreError::corrupt(job_id.as_str(), e))?,
                to,
            }),
            None => Err(StoreError::corrupt(
                job_id.as_str(),
                format!("unexpected script reply '{other}'"),
            )),
        },
    }
}

/// Task store backed by Redis.
pub struct RedisTaskStore {
    client: redis::Client,
    config: QueueConfig,
    scripts: Scripts,
}

impl RedisTaskStore {
    /// Create a new store. Does not connect until the first operation.
    pub fn new(config: QueueConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            scripts: Scripts::load(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(QueueConfig::from_env()?)
    }

    fn job_key_prefix(&self) -> String {
        format!("{}:job:", self.config.key_prefix)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.job_key_prefix(), job_id)
    }

    fn queue_key(&self) -> String {
        format!("{}:queue", self.config.key_prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}:inflight", self.config.key_prefix)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Number of jobs in the ready queue, including delayed ones.
    pub async fn ready_len(&self) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(self.queue_key()).await?;
        Ok(len)
    }

    pub async fn inflight_len(&self) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let len: u64 = conn.zcard(self.inflight_key()).await?;
        Ok(len)
    }
}

fn parse_time(job_id: &str, field: &str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(job_id, format!("{field}: {e}")))
}

fn parse_json_field<T: serde::de::DeserializeOwned>(
    job_id: &str,
    fields: &HashMap<String, String>,
    field: &str,
) -> StoreResult<Option<T>> {
    fields
        .get(field)
        .filter(|raw| !raw.is_empty())
        .map(|raw| serde_json::from_str(raw))
        .transpose()
        .map_err(|e| StoreError::corrupt(job_id, format!("{field}: {e}")))
}

/// Read the lease of a record without decoding anything else.
fn lease_from_fields(fields: &HashMap<String, String>) -> Option<Lease> {
    let token = fields.get("lease_token").filter(|t| !t.is_empty())?;
    let claimed_at = fields
        .get("claimed_at")
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map_or_else(Utc::now, |t| t.with_timezone(&Utc));
    Some(Lease {
        token: token.clone(),
        claimed_at,
    })
}

/// Rebuild a job from its hash fields.
///
/// A record that fails to decode is reported as [`StoreError::Undecodable`]
/// with whatever lease it carries, so a claimed job can still be failed.
fn job_from_fields(fields: HashMap<String, String>) -> StoreResult<Job> {
    let id = fields
        .get("id")
        .cloned()
        .ok_or_else(|| StoreError::corrupt("?", "missing id"))?;

    decode_job(&id, &fields).map_err(|e| {
        let reason = match e {
            StoreError::Corrupt { reason, .. } => reason,
            other => other.to_string(),
        };
        StoreError::Undecodable {
            lease: lease_from_fields(&fields),
            job_id: id.clone(),
            reason,
        }
    })
}

fn decode_job(id: &str, fields: &HashMap<String, String>) -> StoreResult<Job> {
    let required = |field: &str| {
        fields
            .get(field)
            .map(String::as_str)
            .ok_or_else(|| StoreError::corrupt(id, format!("missing {field}")))
    };

    let status: JobStatus = required("status")?
        .parse()
        .map_err(|e: String| StoreError::corrupt(id, e))?;
    let attempt_count = required("attempt_count")?
        .parse()
        .map_err(|_| StoreError::corrupt(id, "attempt_count is not a number"))?;
    let progress = fields
        .get("progress")
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let created_at = parse_time(id, "created_at", required("created_at")?)?;
    let updated_at = parse_time(id, "updated_at", required("updated_at")?)?;

    let lease = match (fields.get("lease_token"), fields.get("claimed_at")) {
        (Some(token), Some(claimed_at)) => Some(Lease {
            token: token.clone(),
            claimed_at: parse_time(id, "claimed_at", claimed_at)?,
        }),
        _ => None,
    };

    Ok(Job {
        id: JobId::from_string(id),
        job_type: required("job_type")?.to_string(),
        parameters: parse_json_field(id, fields, "parameters")?.unwrap_or_default(),
        status,
        attempt_count,
        result: parse_json_field(id, fields, "result")?,
        error: parse_json_field(id, fields, "error")?,
        last_error: parse_json_field(id, fields, "last_error")?,
        lease,
        progress,
        current_step: fields.get("current_step").cloned(),
        created_at,
        updated_at,
    })
}

fn delay_ms(delay: Duration) -> i64 {
    i64::try_from(delay.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl TaskStore for RedisTaskStore {
    async fn enqueue(&self, new_job: NewJob) -> StoreResult<JobId> {
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let job = Job::from_new(new_job, now);

        let fields = [
            ("id", job.id.to_string()),
            ("job_type", job.job_type.clone()),
            ("parameters", serde_json::to_string(&job.parameters)?),
            ("status", job.status.as_str().to_string()),
            ("attempt_count", "0".to_string()),
            ("progress", "0".to_string()),
            ("created_at", now.to_rfc3339()),
            ("updated_at", now.to_rfc3339()),
        ];

        let mut invocation = self.scripts.enqueue.key(self.job_key(&job.id));
        invocation
            .key(self.queue_key())
            .arg(now.timestamp_millis())
            .arg(job.id.as_str());
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let created: i32 = invocation.invoke_async(&mut conn).await?;
        if created == 0 {
            warn!(job_id = %job.id, "Duplicate job rejected");
            return Err(StoreError::DuplicateJob(job.id.to_string()));
        }

        info!(job_id = %job.id, job_type = %job.job_type, "Enqueued job");
        Ok(job.id)
    }

    async fn claim_next(&self) -> StoreResult<Option<Job>> {
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let token = Uuid::new_v4().to_string();

        let fields: Option<HashMap<String, String>> = self
            .scripts
            .claim
            .key(self.queue_key())
            .key(self.inflight_key())
            .arg(now.timestamp_millis())
            .arg(&token)
            .arg(now.to_rfc3339())
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        match fields {
            Some(fields) if !fields.is_empty() => {
                let job = job_from_fields(fields)?;
                debug!(job_id = %job.id, attempt = job.attempt_count, "Claimed job");
                Ok(Some(job))
            }
            _ => Ok(None),
        }
    }

    async fn update(
        &self,
        job_id: &JobId,
        lease: &Lease,
        update: JobUpdate,
    ) -> StoreResult<UpdateOutcome> {
        let mut conn = self.connection().await?;
        let to = update.status();
        let (field, payload) = match &update {
            JobUpdate::Succeeded(result) => ("result", serde_json::to_string(result)?),
            JobUpdate::Failed(error) => ("error", serde_json::to_string(error)?),
        };

        let reply: String = self
            .scripts
            .update
            .key(self.job_key(job_id))
            .arg(&lease.token)
            .arg(to.as_str())
            .arg(field)
            .arg(payload)
            .arg(Utc::now().to_rfc3339())
            .arg(self.config.job_retention.as_secs())
            .invoke_async(&mut conn)
            .await?;

        match parse_write_reply(job_id, to, &reply)? {
            WriteReply::Ok => Ok(UpdateOutcome::Applied),
            WriteReply::Unchanged => Ok(UpdateOutcome::Unchanged),
        }
    }

    async fn requeue(
        &self,
        job_id: &JobId,
        lease: &Lease,
        delay: Duration,
        error: JobError,
    ) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let ready_at = now.timestamp_millis().saturating_add(delay_ms(delay));

        let reply: String = self
            .scripts
            .requeue
            .key(self.job_key(job_id))
            .key(self.queue_key())
            .key(self.inflight_key())
            .arg(&lease.token)
            .arg(serde_json::to_string(&error)?)
            .arg(ready_at)
            .arg(job_id.as_str())
            .arg(now.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        parse_write_reply(job_id, JobStatus::Queued, &reply)?;
        debug!(job_id = %job_id, delay_ms = delay_ms(delay), "Requeued job");
        Ok(())
    }

    async fn acknowledge(&self, job_id: &JobId) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        conn.zrem::<_, _, ()>(self.inflight_key(), job_id.as_str())
            .await?;
        Ok(())
    }

    async fn reclaim_stale(&self, lease_duration: Duration) -> StoreResult<Vec<JobId>> {
        let mut conn = self.connection().await?;
        let now = Utc::now();
        let cutoff = now.timestamp_millis().saturating_sub(delay_ms(lease_duration));

        let ids: Vec<String> = self
            .scripts
            .reclaim
            .key(self.inflight_key())
            .arg(cutoff)
            .arg(now.timestamp_millis())
            .arg(now.to_rfc3339())
            .arg(Uuid::new_v4().to_string())
            .arg(self.job_key_prefix())
            .invoke_async(&mut conn)
            .await?;

        Ok(ids.into_iter().map(JobId::from_string).collect())
    }

    async fn report_progress(
        &self,
        job_id: &JobId,
        lease: &Lease,
        progress: u8,
        step: &str,
    ) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let reply: String = self
            .scripts
            .progress
            .key(self.job_key(job_id))
            .arg(&lease.token)
            .arg(u32::from(progress.min(100)))
            .arg(step)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        parse_write_reply(job_id, JobStatus::Processing, &reply)?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(job_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(fields).map(Some)
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::connection_failed(e.to_string()))?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
