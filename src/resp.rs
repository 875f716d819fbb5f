use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::config::{
    DEFAULT_MAX_RESP_ARGS, DEFAULT_MAX_RESP_BULK_LEN, DEFAULT_MAX_RESP_DEPTH,
    DEFAULT_MAX_RESP_LINE_LEN,
};

/// A RESP2 value, used both for decoded requests and for encoded replies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Array(Vec<Frame>),
    Null,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The peer closed the stream between two top-level values.
    #[error("stream closed")]
    StreamClosed,
    #[error("{0}")]
    Frame(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct RespLimits {
    pub max_array_len: usize,
    pub max_bulk_len: usize,
    pub max_line_len: usize,
    pub max_depth: usize,
}

impl Default for RespLimits {
    fn default() -> Self {
        Self {
            max_array_len: DEFAULT_MAX_RESP_ARGS,
            max_bulk_len: DEFAULT_MAX_RESP_BULK_LEN,
            max_line_len: DEFAULT_MAX_RESP_LINE_LEN,
            max_depth: DEFAULT_MAX_RESP_DEPTH,
        }
    }
}

fn frame_err(msg: impl Into<String>) -> DecodeError {
    DecodeError::Frame(msg.into())
}

/// Short reads inside a value are framing errors, not clean disconnects.
fn mid_value_io(e: std::io::Error) -> DecodeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        frame_err("unexpected end of stream")
    } else {
        DecodeError::Io(e)
    }
}

fn parse_i64(bytes: &[u8], err_msg: &'static str) -> Result<i64, DecodeError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| frame_err(err_msg))
}

/// Read one CRLF-terminated line into `buf` and return it without the
/// terminator.
async fn read_resp_line<'a, R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &'a mut Vec<u8>,
    max_line_len: usize,
) -> Result<&'a [u8], DecodeError> {
    buf.clear();
    loop {
        let chunk = reader.fill_buf().await.map_err(mid_value_io)?;
        if chunk.is_empty() {
            return Err(frame_err("unexpected end of stream"));
        }
        if let Some(pos) = chunk.iter().position(|&b| b == b'\n') {
            let take = pos + 1;
            if buf.len().saturating_add(take) > max_line_len.saturating_add(2) {
                return Err(frame_err("line too long"));
            }
            buf.extend_from_slice(&chunk[..take]);
            reader.consume(take);
            break;
        }
        if buf.len().saturating_add(chunk.len()) > max_line_len.saturating_add(2) {
            return Err(frame_err("line too long"));
        }
        let take = chunk.len();
        buf.extend_from_slice(chunk);
        reader.consume(take);
    }
    match buf.strip_suffix(b"\r\n") {
        Some(line) => Ok(line),
        None => Err(frame_err("expected CRLF line terminator")),
    }
}

/// Decode the next top-level value from `reader`.
///
/// Returns [`DecodeError::StreamClosed`] when the stream ends exactly at a
/// value boundary; running out of input anywhere else is a framing error.
pub async fn read_frame<R>(reader: &mut R, limits: RespLimits) -> Result<Frame, DecodeError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if reader.fill_buf().await?.is_empty() {
        return Err(DecodeError::StreamClosed);
    }
    read_value(reader, limits, 0).await
}

type DecodeFuture<'a> = Pin<Box<dyn Future<Output = Result<Frame, DecodeError>> + Send + 'a>>;

fn read_value<'a, R>(reader: &'a mut R, limits: RespLimits, depth: usize) -> DecodeFuture<'a>
where
    R: AsyncBufRead + Unpin + Send,
{
    Box::pin(async move {
        let tag = reader.read_u8().await.map_err(mid_value_io)?;
        let mut line = Vec::new();
        let rest = read_resp_line(reader, &mut line, limits.max_line_len).await?;

        match tag {
            b'+' => Ok(Frame::Simple(String::from_utf8_lossy(rest).into_owned())),
            b'-' => Ok(Frame::Error(String::from_utf8_lossy(rest).into_owned())),
            b':' => parse_i64(rest, "bad integer").map(Frame::Integer),
            b'$' => {
                let len = parse_i64(rest, "bad bulk length")?;
                if len == -1 {
                    return Ok(Frame::Null);
                }
                let len = usize::try_from(len).map_err(|_| frame_err("bad bulk length"))?;
                if len > limits.max_bulk_len {
                    return Err(frame_err("bulk string too large"));
                }
                let mut buf = vec![0u8; len];
                reader.read_exact(&mut buf).await.map_err(mid_value_io)?;
                let mut crlf = [0u8; 2];
                reader.read_exact(&mut crlf).await.map_err(mid_value_io)?;
                if &crlf != b"\r\n" {
                    return Err(frame_err("bulk string missing CRLF terminator"));
                }
                Ok(Frame::Bulk(buf))
            }
            b'*' => {
                let count = parse_i64(rest, "bad array length")?;
                if count == -1 {
                    return Ok(Frame::Null);
                }
                let count = usize::try_from(count).map_err(|_| frame_err("bad array length"))?;
                if count > limits.max_array_len {
                    return Err(frame_err("too many array elements"));
                }
                if depth >= limits.max_depth {
                    return Err(frame_err("array nesting too deep"));
                }
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(read_value(&mut *reader, limits, depth + 1).await?);
                }
                Ok(Frame::Array(items))
            }
            other => Err(frame_err(format!(
                "unknown type tag {:?}",
                char::from(other)
            ))),
        }
    })
}

impl Frame {
    pub fn simple(text: impl Into<String>) -> Self {
        Frame::Simple(text.into())
    }

    pub fn ok() -> Self {
        Frame::Simple("OK".to_owned())
    }

    pub fn bulk(data: impl Into<Vec<u8>>) -> Self {
        Frame::Bulk(data.into())
    }

    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Vec<u8>>,
    {
        Frame::Array(items.into_iter().map(|v| Frame::Bulk(v.into())).collect())
    }

    pub fn integer(n: usize) -> Self {
        Frame::Integer(i64::try_from(n).unwrap_or(i64::MAX))
    }

    /// Split a client request into its argument vector. Requests must be an
    /// array whose elements are all bulk strings.
    pub fn into_args(self) -> Result<Vec<Vec<u8>>, DecodeError> {
        let Frame::Array(items) = self else {
            return Err(frame_err("expected array of bulk strings"));
        };
        items
            .into_iter()
            .map(|item| match item {
                Frame::Bulk(bytes) => Ok(bytes),
                _ => Err(frame_err("expected array of bulk strings")),
            })
            .collect()
    }

    /// Append this value's wire encoding to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(text) => append_line(out, b'+', text.as_bytes()),
            Frame::Error(text) => append_line(out, b'-', text.as_bytes()),
            Frame::Integer(n) => append_int(out, *n),
            Frame::Bulk(data) => append_bulk(out, data),
            Frame::Null => append_null(out),
            Frame::Array(items) => {
                append_array_header(out, items.len());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

// ── RESP2 encoders ────────────────────────────────────────────────────────────

/// Simple strings and errors cannot carry a line break, so CR and LF are
/// written as spaces.
fn append_line(out: &mut Vec<u8>, tag: u8, text: &[u8]) {
    out.push(tag);
    out.extend(text.iter().map(|&b| if b == b'\r' || b == b'\n' { b' ' } else { b }));
    out.extend_from_slice(b"\r\n");
}

pub(crate) fn append_array_header(out: &mut Vec<u8>, len: usize) {
    out.push(b'*');
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub(crate) fn append_int(out: &mut Vec<u8>, n: i64) {
    out.push(b':');
    out.extend_from_slice(n.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

pub(crate) fn append_null(out: &mut Vec<u8>) {
    out.extend_from_slice(b"$-1\r\n");
}

pub(crate) fn append_bulk(out: &mut Vec<u8>, data: &[u8]) {
    out.push(b'$');
    out.extend_from_slice(data.len().to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn decode(data: &[u8]) -> Result<Frame, DecodeError> {
        let mut r = BufReader::new(data);
        read_frame(&mut r, RespLimits::default()).await
    }

    fn assert_frame_error(result: Result<Frame, DecodeError>) {
        match result {
            Err(DecodeError::Frame(_)) => {}
            other => panic!("expected frame error, got {other:?}"),
        }
    }

    // ── Decoding requests ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn parse_array_set_command() {
        let data = b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n";
        let args = decode(data).await.unwrap().into_args().unwrap();
        assert_eq!(args, vec![b"SET".to_vec(), b"foo".to_vec(), b"bar".to_vec()]);
    }

    #[tokio::test]
    async fn bulk_payload_is_binary_safe() {
        let data = b"*1\r\n$6\r\na\r\nb\0c\r\n";
        let frame = decode(data).await.unwrap();
        assert_eq!(frame, Frame::Array(vec![Frame::Bulk(b"a\r\nb\0c".to_vec())]));
    }

    #[tokio::test]
    async fn parse_null_bulk_string() {
        assert_eq!(decode(b"$-1\r\n").await.unwrap(), Frame::Null);
        assert_eq!(decode(b"*-1\r\n").await.unwrap(), Frame::Null);
    }

    #[tokio::test]
    async fn parse_empty_array() {
        assert_eq!(decode(b"*0\r\n").await.unwrap(), Frame::Array(vec![]));
    }

    #[tokio::test]
    async fn consecutive_frames_share_a_reader() {
        let data = b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n";
        let mut r = BufReader::new(&data[..]);
        let first = read_frame(&mut r, RespLimits::default()).await.unwrap();
        let second = read_frame(&mut r, RespLimits::default()).await.unwrap();
        assert_eq!(first.into_args().unwrap(), vec![b"PING".to_vec()]);
        assert_eq!(second.into_args().unwrap(), vec![b"ECHO".to_vec(), b"hi".to_vec()]);
        assert!(matches!(
            read_frame(&mut r, RespLimits::default()).await,
            Err(DecodeError::StreamClosed)
        ));
    }

    #[tokio::test]
    async fn eof_at_boundary_is_stream_closed() {
        assert!(matches!(decode(b"").await, Err(DecodeError::StreamClosed)));
    }

    #[tokio::test]
    async fn eof_mid_value_is_frame_error() {
        assert_frame_error(decode(b"*2\r\n$3\r\nGET\r\n").await);
        assert_frame_error(decode(b"$5\r\nhel").await);
        assert_frame_error(decode(b"*1\r\n$3").await);
        assert_frame_error(decode(b"*").await);
    }

    #[tokio::test]
    async fn unknown_tag_is_frame_error() {
        assert_frame_error(decode(b"PING\r\n").await);
        assert_frame_error(decode(b"*1\r\n!3\r\nfoo\r\n").await);
    }

    #[tokio::test]
    async fn bad_length_token_is_frame_error() {
        assert_frame_error(decode(b"*x\r\n").await);
        assert_frame_error(decode(b"$abc\r\nfoo\r\n").await);
        assert_frame_error(decode(b"$-2\r\n").await);
        assert_frame_error(decode(b"*-5\r\n").await);
    }

    #[tokio::test]
    async fn missing_terminators_are_frame_errors() {
        assert_frame_error(decode(b"*1\n$1\r\na\r\n").await);
        assert_frame_error(decode(b"$3\r\nfooXY").await);
    }

    #[tokio::test]
    async fn non_bulk_request_is_rejected_by_into_args() {
        let frame = decode(b"*1\r\n:1\r\n").await.unwrap();
        assert!(matches!(frame.into_args(), Err(DecodeError::Frame(_))));
        assert!(matches!(Frame::simple("PING").into_args(), Err(DecodeError::Frame(_))));
    }

    #[tokio::test]
    async fn parse_rejects_too_many_elements() {
        let data = b"*2\r\n$4\r\nPING\r\n$4\r\nPONG\r\n";
        let mut r = BufReader::new(&data[..]);
        let limits = RespLimits {
            max_array_len: 1,
            ..RespLimits::default()
        };
        assert_frame_error(read_frame(&mut r, limits).await);
    }

    #[tokio::test]
    async fn parse_rejects_oversized_bulk_string() {
        let data = b"*1\r\n$4\r\nPING\r\n";
        let mut r = BufReader::new(&data[..]);
        let limits = RespLimits {
            max_bulk_len: 3,
            ..RespLimits::default()
        };
        assert_frame_error(read_frame(&mut r, limits).await);
    }

    #[tokio::test]
    async fn parse_rejects_oversized_header_line() {
        let data = b"*00000000001\r\n$1\r\na\r\n";
        let mut r = BufReader::new(&data[..]);
        let limits = RespLimits {
            max_line_len: 4,
            ..RespLimits::default()
        };
        assert_frame_error(read_frame(&mut r, limits).await);
    }

    #[tokio::test]
    async fn parse_rejects_excessive_nesting() {
        let data = b"*1\r\n*1\r\n*1\r\n:1\r\n";
        let mut r = BufReader::new(&data[..]);
        let limits = RespLimits {
            max_depth: 2,
            ..RespLimits::default()
        };
        assert_frame_error(read_frame(&mut r, limits).await);
    }

    // ── Encoding replies ──────────────────────────────────────────────────────

    #[test]
    fn encodes_each_variant() {
        assert_eq!(Frame::simple("PONG").to_bytes(), b"+PONG\r\n");
        assert_eq!(Frame::Error("ERR boom".into()).to_bytes(), b"-ERR boom\r\n");
        assert_eq!(Frame::Integer(-42).to_bytes(), b":-42\r\n");
        assert_eq!(Frame::bulk("hello").to_bytes(), b"$5\r\nhello\r\n");
        assert_eq!(Frame::bulk("").to_bytes(), b"$0\r\n\r\n");
        assert_eq!(Frame::Null.to_bytes(), b"$-1\r\n");
        assert_eq!(Frame::Array(vec![]).to_bytes(), b"*0\r\n");
    }

    #[test]
    fn encodes_bulk_array() {
        let frame = Frame::bulk_array([b"a".to_vec(), b"bc".to_vec()]);
        assert_eq!(frame.to_bytes(), b"*2\r\n$1\r\na\r\n$2\r\nbc\r\n");
    }

    #[test]
    fn line_breaks_in_simple_and_error_text_become_spaces() {
        assert_eq!(Frame::Error("ERR a\r\nb".into()).to_bytes(), b"-ERR a  b\r\n");
        assert_eq!(Frame::simple("x\ny").to_bytes(), b"+x y\r\n");
    }

    #[test]
    fn integer_from_usize_saturates() {
        assert_eq!(Frame::integer(7), Frame::Integer(7));
        assert_eq!(Frame::integer(usize::MAX), Frame::Integer(i64::MAX));
    }

    // ── Round trip ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn every_variant_survives_encode_then_decode() {
        let frame = Frame::Array(vec![
            Frame::simple("OK"),
            Frame::Error("WRONGTYPE nope".into()),
            Frame::Integer(i64::MIN),
            Frame::bulk(b"bin\r\nary".to_vec()),
            Frame::Null,
            Frame::Array(vec![
                Frame::Integer(1),
                Frame::Array(vec![Frame::Array(vec![Frame::bulk("deep")]), Frame::Null]),
            ]),
        ]);
        let bytes = frame.to_bytes();
        assert_eq!(decode(&bytes).await.unwrap(), frame);
    }
}
