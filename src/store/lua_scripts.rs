/// Lua script for recording an event in a sliding window
///
/// Purge, count and conditional insert run as one atomic unit inside Redis,
/// so two concurrent requests can never both observe a count under the limit
/// when only one slot is left.
///
/// KEYS[1] = the window key (sorted set, scores are unix millis)
/// ARGV[1] = current timestamp (millis)
/// ARGV[2] = window duration (millis)
/// ARGV[3] = maximum events per window
/// ARGV[4] = unique member for this event
///
/// Returns: [recorded (0/1), count before insert, oldest score or -1]
pub const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

-- Entries at or before now - window are outside the window
redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)

local count = redis.call('ZCARD', key)
local recorded = 0

if count < limit then
    redis.call('ZADD', key, now, member)
    recorded = 1
end

redis.call('PEXPIRE', key, window * 2)

local oldest = -1
local first = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if first[2] then
    oldest = tonumber(first[2])
end

return {recorded, count, oldest}
"#;
