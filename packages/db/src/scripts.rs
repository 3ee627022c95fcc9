//! Lua scripts for the transitions that must be atomic on the server.

/// Pop the queue head and lease it.
///
/// KEYS: queued list, leased zset. ARGV: now, record key prefix.
/// Replies `{'empty'}`, `{'corrupt', id}` or
/// `{'leased', id, json, retry_count, queued_at}`.
pub(crate) const LEASE_NEXT: &str = r#"
local id = redis.call('LPOP', KEYS[1])
if not id then
  return {'empty'}
end
local record = ARGV[2] .. id
local json = redis.call('HGET', record, 'json')
if not json then
  return {'corrupt', id}
end
redis.call('ZADD', KEYS[2], ARGV[1], id)
redis.call('HSET', record, 'state', 'leased', 'leased_at', ARGV[1])
local retries = redis.call('HGET', record, 'retry_count') or '0'
local queued_at = redis.call('HGET', record, 'queued_at') or ARGV[1]
return {'leased', id, json, retries, queued_at}
"#;

/// Move a leased job to processing.
///
/// KEYS: leased zset, processing zset, progress zset, record hash.
/// ARGV: job id, now. Replies 1 when moved, 0 when the job was not leased.
pub(crate) const ACCEPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('ZADD', KEYS[2], ARGV[2], ARGV[1])
redis.call('ZADD', KEYS[3], 0, ARGV[1])
redis.call('HSET', KEYS[4], 'state', 'processing', 'processing_at', ARGV[2])
return 1
"#;

/// Refresh a heartbeat and overwrite the progress score.
///
/// KEYS: leased zset, processing zset, progress zset.
/// ARGV: job id, now, progress. Replies 0 without writing anything when
/// neither state set holds the job.
pub(crate) const REPORT_PROGRESS: &str = r#"
local held = nil
if redis.call('ZSCORE', KEYS[2], ARGV[1]) then
  held = KEYS[2]
elseif redis.call('ZSCORE', KEYS[1], ARGV[1]) then
  held = KEYS[1]
end
if not held then
  return 0
end
redis.call('ZADD', held, ARGV[2], ARGV[1])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
"#;

/// Upsert an idle announcement unless a newer one is stored.
///
/// KEYS: idle zset. ARGV: worker id, timestamp.
pub(crate) const RECORD_IDLE: &str = r#"
local current = redis.call('ZSCORE', KEYS[1], ARGV[1])
if current and tonumber(current) > tonumber(ARGV[2]) then
  return 0
end
redis.call('ZADD', KEYS[1], ARGV[2], ARGV[1])
return 1
"#;

/// Reclaim leases whose heartbeat is older than the cutoff.
///
/// KEYS: queued list, leased zset, processing zset, progress zset.
/// ARGV: cutoff (exclusive), max retries (-1 for unlimited), now, record key
/// prefix. Replies a flat list of `id, outcome, retry_count` triples where
/// outcome is `requeued`, `failed` or `orphaned`.
pub(crate) const RECLAIM_STALLED: &str = r#"
local results = {}
local limit = tonumber(ARGV[2])

local function reclaim(from, other)
  local stalled = redis.call('ZRANGEBYSCORE', from, '-inf', '(' .. ARGV[1])
  for _, id in ipairs(stalled) do
    if redis.call('ZREM', from, id) == 1 then
      redis.call('ZREM', other, id)
      redis.call('ZREM', KEYS[4], id)
      local record = ARGV[4] .. id
      if redis.call('HEXISTS', record, 'json') == 0 then
        table.insert(results, id)
        table.insert(results, 'orphaned')
        table.insert(results, '0')
      else
        local retries = redis.call('HINCRBY', record, 'retry_count', 1)
        local outcome = 'requeued'
        redis.call('HDEL', record, 'leased_at', 'processing_at')
        if limit >= 0 and retries > limit then
          redis.call('HSET', record, 'state', 'failed', 'failed_at', ARGV[3])
          outcome = 'failed'
        else
          redis.call('HSET', record, 'state', 'queued')
          redis.call('RPUSH', KEYS[1], id)
        end
        table.insert(results, id)
        table.insert(results, outcome)
        table.insert(results, tostring(retries))
      end
    end
  end
end

reclaim(KEYS[2], KEYS[3])
reclaim(KEYS[3], KEYS[2])
return results
"#;

/// Unregister a queue that holds no jobs.
///
/// KEYS: queued list, leased zset, processing zset, registry set.
/// ARGV: queue name. Replies 1 when removed, 0 otherwise.
pub(crate) const PRUNE_QUEUE: &str = r#"
if redis.call('LLEN', KEYS[1]) > 0
  or redis.call('ZCARD', KEYS[2]) > 0
  or redis.call('ZCARD', KEYS[3]) > 0 then
  return 0
end
return redis.call('SREM', KEYS[4], ARGV[1])
"#;
