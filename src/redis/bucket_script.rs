use std::sync::LazyLock;

use redis::Script;

/// Hash field holding the token count.
pub(crate) const TOKENS_FIELD: &str = "tokens";

/// Hash field holding the last exact instant, in nanoseconds.
pub(crate) const TIMESTAMP_FIELD: &str = "timestamp";

/// The refill-and-consume script, shared by every store in the process.
///
/// `Script` caches the SHA1 digest, so invocations go through `EVALSHA` and fall back to
/// `EVAL` when the server does not know the script yet.
pub(crate) static BUCKET_SCRIPT: LazyLock<Script> =
    LazyLock::new(|| Script::new(BUCKET_SCRIPT_SOURCE));

// Lua numbers are doubles, exact only up to 2^53. Nanosecond epoch timestamps are far
// above that, so they are handled as (seconds, nanoseconds) pairs parsed from and written
// back to decimal strings. `math.fmod` is exact, plain division and `%` are not.
const BUCKET_SCRIPT_SOURCE: &str = r#"
local key = KEYS[1]

local rate = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local init_tokens = tonumber(ARGV[3])
local now = ARGV[4]
local request = tonumber(ARGV[5])

local NS_PER_SEC = 1000000000
local MAX_EXACT = 9007199254740991

local function split_ns(value)
    if not value or not string.match(value, "^%d+$") then
        return nil, nil
    end

    local len = string.len(value)
    if len <= 9 then
        return 0, tonumber(value)
    end

    return tonumber(string.sub(value, 1, len - 9)), tonumber(string.sub(value, len - 8))
end

local function join_ns(sec, nsec)
    if sec == 0 then
        return string.format("%d", nsec)
    end

    return string.format("%d%09d", sec, nsec)
end

local now_sec, now_nsec = split_ns(now)

local bucket = redis.call("HMGET", key, "tokens", "timestamp")
local tokens = tonumber(bucket[1])
local ts_sec, ts_nsec = split_ns(bucket[2])

if not tokens or not ts_sec then
    tokens = init_tokens
    ts_sec = now_sec
    ts_nsec = now_nsec
end

local delta = (now_sec - ts_sec) * NS_PER_SEC + (now_nsec - ts_nsec)
if delta < 0 then
    delta = 0
end

local progress = math.fmod(delta, rate)
local fill = (delta - progress) / rate

tokens = math.min(tokens + fill, limit)

local advanced = ts_nsec + (delta - progress)
local carry_nsec = math.fmod(advanced, NS_PER_SEC)
ts_sec = ts_sec + (advanced - carry_nsec) / NS_PER_SEC
ts_nsec = carry_nsec

local allowed = 0
local retry_after = 0

if tokens >= request then
    tokens = tokens - request
    allowed = 1
elseif request <= limit then
    retry_after = (request - tokens) * rate
    if retry_after > MAX_EXACT then
        retry_after = MAX_EXACT
    else
        retry_after = retry_after - progress
    end
else
    retry_after = -1
end

redis.call("HSET", key, "tokens", string.format("%d", tokens), "timestamp", join_ns(ts_sec, ts_nsec))
redis.call("PEXPIRE", key, ARGV[6])

return {allowed, tokens, retry_after}
"#;
