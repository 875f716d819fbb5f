use std::time::{Duration, Instant};

use tracing::debug;

use crate::resp::Frame;
use crate::store::{Keyspace, ListEnd, StoreError};

#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(&'static str),
    #[error("ERR unknown command '{0}'")]
    Unknown(String),
    #[error("ERR {0}")]
    InvalidArgument(&'static str),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<CommandError> for Frame {
    fn from(e: CommandError) -> Self {
        Frame::Error(e.to_string())
    }
}

type Reply = Result<Frame, CommandError>;

fn parse_i64(raw: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidArgument("value is not an integer or out of range"))
}

fn parse_count(raw: &[u8]) -> Result<usize, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidArgument("value is out of range, must be positive"))
}

/// BLPOP timeouts are seconds and may be fractional; zero blocks forever.
fn parse_timeout(raw: &[u8]) -> Result<Option<Duration>, CommandError> {
    let secs: f64 = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|v: &f64| v.is_finite())
        .ok_or(CommandError::InvalidArgument("timeout is not a float or out of range"))?;
    if secs < 0.0 {
        return Err(CommandError::InvalidArgument("timeout is negative"));
    }
    if secs == 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(secs)
        .map(Some)
        .map_err(|_| CommandError::InvalidArgument("timeout is not a float or out of range"))
}

fn cmd_ping(args: &[Vec<u8>]) -> Reply {
    match args {
        [_] => Ok(Frame::simple("PONG")),
        [_, message] => Ok(Frame::bulk(message.clone())),
        _ => Err(CommandError::WrongArity("ping")),
    }
}

fn cmd_echo(args: &[Vec<u8>]) -> Reply {
    match args {
        [_, message] => Ok(Frame::bulk(message.clone())),
        _ => Err(CommandError::WrongArity("echo")),
    }
}

async fn cmd_set(args: &[Vec<u8>], store: &Keyspace) -> Reply {
    match args {
        [_, key, value] => store.set_string(key, value.clone()).await,
        [_, key, value, _option, millis] => {
            // A malformed expiry leaves the key untouched but still acks.
            match std::str::from_utf8(millis).ok().and_then(|s| s.parse::<u64>().ok()) {
                Some(ms) => {
                    store
                        .set_string_with_expiry(key, value.clone(), Duration::from_millis(ms))
                        .await
                }
                None => debug!(
                    key = %String::from_utf8_lossy(key),
                    millis = %String::from_utf8_lossy(millis),
                    "SET ignored: malformed expiry"
                ),
            }
        }
        _ => return Err(CommandError::WrongArity("set")),
    }
    Ok(Frame::ok())
}

async fn cmd_get(args: &[Vec<u8>], store: &Keyspace) -> Reply {
    let [_, key] = args else {
        return Err(CommandError::WrongArity("get"));
    };
    Ok(store.get_string(key).await.map_or(Frame::Null, Frame::Bulk))
}

async fn cmd_push(args: &[Vec<u8>], store: &Keyspace, end: ListEnd) -> Reply {
    let name = match end {
        ListEnd::Front => "lpush",
        ListEnd::Back => "rpush",
    };
    let [_, key, values @ ..] = args else {
        return Err(CommandError::WrongArity(name));
    };
    if values.is_empty() {
        return Err(CommandError::WrongArity(name));
    }
    match store.push(key, values.to_vec(), end).await {
        Ok(len) => Ok(Frame::integer(len)),
        // Pushing onto a string replies with a null rather than WRONGTYPE.
        Err(StoreError::WrongType) => Ok(Frame::Null),
    }
}

async fn cmd_lrange(args: &[Vec<u8>], store: &Keyspace) -> Reply {
    let [_, key, start, end] = args else {
        return Err(CommandError::WrongArity("lrange"));
    };
    let (start, end) = (parse_i64(start)?, parse_i64(end)?);
    Ok(Frame::bulk_array(store.range(key, start, end).await?))
}

async fn cmd_llen(args: &[Vec<u8>], store: &Keyspace) -> Reply {
    let [_, key] = args else {
        return Err(CommandError::WrongArity("llen"));
    };
    Ok(Frame::integer(store.list_len(key).await?))
}

async fn cmd_pop(args: &[Vec<u8>], store: &Keyspace, end: ListEnd) -> Reply {
    let name = match end {
        ListEnd::Front => "lpop",
        ListEnd::Back => "rpop",
    };
    match args {
        [_, key] => {
            let popped = match end {
                ListEnd::Front => store.pop_front(key).await?,
                ListEnd::Back => store.pop_back(key).await?,
            };
            Ok(popped.map_or(Frame::Null, Frame::Bulk))
        }
        [_, key, count] => {
            let count = parse_count(count)?;
            Ok(store
                .pop_many(key, count, end)
                .await?
                .map_or(Frame::Null, Frame::bulk_array))
        }
        _ => Err(CommandError::WrongArity(name)),
    }
}

async fn cmd_blpop(args: &[Vec<u8>], store: &Keyspace) -> Reply {
    let [_, key, timeout] = args else {
        return Err(CommandError::WrongArity("blpop"));
    };
    let timeout = parse_timeout(timeout)?;
    Ok(match store.blocking_pop_front(key, timeout).await? {
        Some(value) => Frame::bulk_array([key.clone(), value]),
        None => Frame::Null,
    })
}

/// Route one request to its handler. The flag asks the caller to close the
/// connection after writing the reply.
pub async fn dispatch(args: &[Vec<u8>], store: &Keyspace) -> (Frame, bool) {
    let Some(name) = args.first() else {
        return (CommandError::Unknown(String::new()).into(), false);
    };
    let cmd = String::from_utf8_lossy(name).to_ascii_lowercase();
    let start = Instant::now();
    let (label, reply) = match cmd.as_str() {
        "ping" => ("ping", cmd_ping(args)),
        "echo" => ("echo", cmd_echo(args)),
        "quit" => return (Frame::ok(), true),
        "set" => ("set", cmd_set(args, store).await),
        "get" => ("get", cmd_get(args, store).await),
        "rpush" => ("rpush", cmd_push(args, store, ListEnd::Back).await),
        "lpush" => ("lpush", cmd_push(args, store, ListEnd::Front).await),
        "lrange" => ("lrange", cmd_lrange(args, store).await),
        "llen" => ("llen", cmd_llen(args, store).await),
        "lpop" => ("lpop", cmd_pop(args, store, ListEnd::Front).await),
        "rpop" => ("rpop", cmd_pop(args, store, ListEnd::Back).await),
        "blpop" => ("blpop", cmd_blpop(args, store).await),
        _ => (
            "unknown",
            Err(CommandError::Unknown(String::from_utf8_lossy(name).into_owned())),
        ),
    };
    metrics::histogram!("kvq_command_duration_seconds", "command" => label)
        .record(start.elapsed().as_secs_f64());
    let frame = reply.unwrap_or_else(|e| {
        debug!(command = label, error = %e, "command failed");
        e.into()
    });
    (frame, false)
}
