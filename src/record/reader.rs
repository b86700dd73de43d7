//! Sequential reader for one recorded HTTP exchange.
//!
//! A record is a single stream: an optional JSON context line, the request
//! head and body, then the response head and body. Both messages share the
//! stream, so the response can only be parsed once the request body has been
//! read to its end.

use log::trace;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use super::types::{HeaderMap, HttpVersion, RecordContext, RequestHead, ResponseHead};
use crate::error_handling::types::RecordError;

/// Upper bound for a single request or response head.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;
/// Upper bound for the JSON context line.
pub const MAX_CONTEXT_SIZE: usize = 64 * 1024;
/// Upper bound for a chunk-size or trailer line.
const MAX_CHUNK_LINE: usize = 4 * 1024;
const MAX_HEADERS: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers(usize),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Empty,
    Length(u64),
    Chunked(ChunkState),
    UntilEof,
}

#[derive(Debug)]
enum ReadState {
    Start,
    RequestBody(Framing),
    RequestDrained,
    ResponseBody(Framing),
    Done,
}

/// Lazily parsed request/response pair backed by one byte stream.
pub struct RecordedMessage<R> {
    reader: Option<BufReader<R>>,
    state: ReadState,
    context: Option<RecordContext>,
    request: Option<RequestHead>,
    response: Option<ResponseHead>,
}

impl<R: AsyncRead + Unpin> RecordedMessage<R> {
    pub fn new(record: R) -> Self {
        Self {
            reader: Some(BufReader::new(record)),
            state: ReadState::Start,
            context: None,
            request: None,
            response: None,
        }
    }

    /// Parses the context line and the request head on first call.
    ///
    /// After this returns the stream is positioned at the start of the
    /// request body; read it with [`read_body`](Self::read_body).
    pub async fn request(&mut self) -> Result<&RequestHead, RecordError> {
        if self.request.is_none() {
            let reader = self
                .reader
                .as_mut()
                .ok_or(RecordError::OutOfOrder("record is closed"))?;

            let context = read_context(reader).await?;
            let head = read_head(reader).await?;
            let mut request = parse_request(&head)?;
            if let Some(conn) = context.as_ref().and_then(|c| c.connection.as_ref()) {
                request.remote_addr = Some(conn.client.addr());
            }
            let framing = request_framing(&request)?;
            trace!(
                "parsed request head: {} {} ({:?})",
                request.method,
                request.target,
                framing
            );

            self.state = ReadState::RequestBody(framing);
            self.context = context;
            self.request = Some(request);
        }
        self.request.as_ref().ok_or(RecordError::IncompleteHead)
    }

    /// Parses the response head on first call.
    ///
    /// Fails with [`RecordError::OutOfOrder`] unless the request body has been
    /// read to its end.
    pub async fn response(&mut self) -> Result<&ResponseHead, RecordError> {
        if self.response.is_none() {
            match self.state {
                ReadState::Start => {
                    return Err(RecordError::OutOfOrder("request has not been read"))
                }
                ReadState::RequestBody(_) => {
                    return Err(RecordError::OutOfOrder(
                        "request body has not been fully consumed",
                    ))
                }
                _ => {}
            }
            let reader = self
                .reader
                .as_mut()
                .ok_or(RecordError::OutOfOrder("record is closed"))?;

            let head = read_head(reader).await?;
            let response = parse_response(&head)?;
            let method = self
                .request
                .as_ref()
                .map(|r| r.method.as_str())
                .unwrap_or("GET");
            let framing = response_framing(&response, method)?;
            trace!("parsed response head: {} ({:?})", response.status, framing);

            self.state = ReadState::ResponseBody(framing);
            self.response = Some(response);
        }
        self.response.as_ref().ok_or(RecordError::IncompleteHead)
    }

    /// Reads the next piece of the current message body into `buf`.
    ///
    /// Returns `Ok(0)` once the body is exhausted; this is what marks the
    /// request as drained and unlocks [`response`](Self::response).
    pub async fn read_body(&mut self, buf: &mut [u8]) -> Result<usize, RecordError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(0),
        };
        let framing = match &mut self.state {
            ReadState::Start => {
                return Err(RecordError::OutOfOrder("request has not been read"))
            }
            ReadState::RequestBody(framing) | ReadState::ResponseBody(framing) => framing,
            ReadState::RequestDrained | ReadState::Done => return Ok(0),
        };

        let n = read_framed(reader, framing, buf).await?;
        if n == 0 {
            self.state = match self.state {
                ReadState::RequestBody(_) => ReadState::RequestDrained,
                _ => ReadState::Done,
            };
        }
        Ok(n)
    }

    /// Capture-time metadata, available once the request has been parsed.
    pub fn context(&self) -> Option<&RecordContext> {
        self.context.as_ref()
    }

    pub fn request_head(&self) -> Option<&RequestHead> {
        self.request.as_ref()
    }

    pub fn response_head(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    /// Releases the underlying stream. Safe to call more than once.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            trace!("record stream released");
        }
        self.state = ReadState::Done;
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

async fn read_context<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Option<RecordContext>, RecordError> {
    let starts_with_object = reader.fill_buf().await?.first() == Some(&b'{');
    if !starts_with_object {
        return Ok(None);
    }
    let mut line = Vec::new();
    if !read_until_limited(reader, &mut line, MAX_CONTEXT_SIZE).await? {
        return Err(RecordError::MalformedContext(format!(
            "context line exceeds {} bytes",
            MAX_CONTEXT_SIZE
        )));
    }
    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| RecordError::MalformedContext(e.to_string()))
}

async fn read_head<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<Vec<u8>, RecordError> {
    let mut head = Vec::new();
    loop {
        let start = head.len();
        if !read_until_limited(reader, &mut head, MAX_HEAD_SIZE).await? {
            return Err(RecordError::HeadTooLarge(MAX_HEAD_SIZE));
        }
        if head.len() == start {
            return Err(RecordError::IncompleteHead);
        }
        let line = &head[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // blank separator lines between messages
                head.clear();
                continue;
            }
            return Ok(head);
        }
    }
}

/// Appends up to and including the next `\n` to `buf`.
///
/// Returns `false` once `buf` would grow past `limit` bytes; at most one byte
/// beyond the limit is consumed from the stream.
async fn read_until_limited<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<bool, RecordError> {
    let budget = (limit + 1).saturating_sub(buf.len()) as u64;
    (&mut *reader).take(budget).read_until(b'\n', buf).await?;
    Ok(buf.len() <= limit)
}

async fn read_line<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
) -> Result<String, RecordError> {
    let mut line = Vec::new();
    if !read_until_limited(reader, &mut line, MAX_CHUNK_LINE).await? {
        return Err(RecordError::MalformedChunk(format!(
            "line exceeds {} bytes",
            MAX_CHUNK_LINE
        )));
    }
    if line.last() != Some(&b'\n') {
        return Err(RecordError::TruncatedBody);
    }
    while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_framed<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    framing: &mut Framing,
    buf: &mut [u8],
) -> Result<usize, RecordError> {
    loop {
        match framing {
            Framing::Empty | Framing::Length(0) => return Ok(0),
            Framing::Length(remaining) => {
                let want = (*remaining).min(buf.len() as u64) as usize;
                let n = reader.read(&mut buf[..want]).await?;
                if n == 0 {
                    return Err(RecordError::TruncatedBody);
                }
                *remaining -= n as u64;
                return Ok(n);
            }
            Framing::UntilEof => return Ok(reader.read(buf).await?),
            Framing::Chunked(state) => match *state {
                ChunkState::Size => {
                    let line = read_line(reader).await?;
                    let size = line.split(';').next().unwrap_or_default().trim();
                    let size = u64::from_str_radix(size, 16).map_err(|_| {
                        RecordError::MalformedChunk(format!("invalid chunk size {:?}", size))
                    })?;
                    *state = if size == 0 {
                        ChunkState::Trailers(0)
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    let want = remaining.min(buf.len() as u64) as usize;
                    let n = reader.read(&mut buf[..want]).await?;
                    if n == 0 {
                        return Err(RecordError::TruncatedBody);
                    }
                    let left = remaining - n as u64;
                    *state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Ok(n);
                }
                ChunkState::DataEnd => {
                    if !read_line(reader).await?.is_empty() {
                        return Err(RecordError::MalformedChunk(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    *state = ChunkState::Size;
                }
                ChunkState::Trailers(seen) => {
                    let line = read_line(reader).await?;
                    let seen = seen + line.len() + 2;
                    *state = if line.is_empty() {
                        ChunkState::Done
                    } else if seen > MAX_HEAD_SIZE {
                        return Err(RecordError::HeadTooLarge(MAX_HEAD_SIZE));
                    } else {
                        ChunkState::Trailers(seen)
                    };
                }
                ChunkState::Done => return Ok(0),
            },
        }
    }
}

fn collect_headers(raw: &[httparse::Header<'_>]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for h in raw {
        headers.append(h.name, String::from_utf8_lossy(h.value).into_owned());
    }
    headers
}

fn lift_transfer_encoding(headers: &mut HeaderMap) -> Vec<String> {
    headers
        .remove_all("Transfer-Encoding")
        .iter()
        .flat_map(|v| v.split(','))
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn parse_request(head: &[u8]) -> Result<RequestHead, RecordError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw);
    match req.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(RecordError::IncompleteHead),
        Err(e) => return Err(RecordError::MalformedHead(e.to_string())),
    }

    let method = req
        .method
        .ok_or_else(|| RecordError::MalformedHead("missing method".to_string()))?
        .to_string();
    let target = req
        .path
        .ok_or_else(|| RecordError::MalformedHead("missing request target".to_string()))?
        .to_string();
    let minor = req
        .version
        .ok_or_else(|| RecordError::MalformedHead("missing version".to_string()))?;

    let mut headers = collect_headers(req.headers);
    let host = headers.remove_all("Host").into_iter().next();
    let transfer_encoding = lift_transfer_encoding(&mut headers);

    Ok(RequestHead {
        method,
        target,
        version: HttpVersion { major: 1, minor },
        headers,
        host,
        transfer_encoding,
        remote_addr: None,
    })
}

fn parse_response(head: &[u8]) -> Result<ResponseHead, RecordError> {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut res = httparse::Response::new(&mut raw);
    match res.parse(head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(RecordError::IncompleteHead),
        Err(e) => return Err(RecordError::MalformedHead(e.to_string())),
    }

    let status = res
        .code
        .ok_or_else(|| RecordError::MalformedHead("missing status code".to_string()))?;
    let minor = res
        .version
        .ok_or_else(|| RecordError::MalformedHead("missing version".to_string()))?;
    let reason = res.reason.unwrap_or_default().to_string();

    let mut headers = collect_headers(res.headers);
    let transfer_encoding = lift_transfer_encoding(&mut headers);

    Ok(ResponseHead {
        status,
        reason,
        version: HttpVersion { major: 1, minor },
        headers,
        transfer_encoding,
    })
}

fn content_length(headers: &HeaderMap) -> Result<Option<u64>, RecordError> {
    match headers.get("Content-Length") {
        Some(v) => v.trim().parse::<u64>().map(Some).map_err(|_| {
            RecordError::MalformedHead(format!("invalid content-length {:?}", v))
        }),
        None => Ok(None),
    }
}

fn is_chunked(transfer_encoding: &[String]) -> bool {
    transfer_encoding.last().map(String::as_str) == Some("chunked")
}

fn request_framing(request: &RequestHead) -> Result<Framing, RecordError> {
    if is_chunked(&request.transfer_encoding) {
        return Ok(Framing::Chunked(ChunkState::Size));
    }
    Ok(match content_length(&request.headers)? {
        Some(0) | None => Framing::Empty,
        Some(n) => Framing::Length(n),
    })
}

fn response_framing(response: &ResponseHead, method: &str) -> Result<Framing, RecordError> {
    let bodiless = method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&response.status)
        || response.status == 204
        || response.status == 304;
    if bodiless {
        return Ok(Framing::Empty);
    }
    if is_chunked(&response.transfer_encoding) {
        return Ok(Framing::Chunked(ChunkState::Size));
    }
    Ok(match content_length(&response.headers)? {
        Some(0) => Framing::Empty,
        Some(n) => Framing::Length(n),
        None => Framing::UntilEof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    async fn drain<R: AsyncRead + Unpin>(msg: &mut RecordedMessage<R>) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            let n = msg.read_body(&mut buf).await.expect("body read");
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_get_then_json_response() {
        let record: &[u8] = b"GET /items?id=1 HTTP/1.1\r\nHost: shop.test\r\nAccept: */*\r\n\r\n\
HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        let mut msg = RecordedMessage::new(record);

        let req = msg.request().await.unwrap().clone();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/items?id=1");
        assert_eq!(req.host.as_deref(), Some("shop.test"));
        assert!(!req.headers.contains("Host"));
        assert_eq!(req.version.proto(), "HTTP/1.1");
        assert!(drain(&mut msg).await.is_empty());

        let res = msg.response().await.unwrap();
        assert_eq!(res.status, 200);
        assert_eq!(res.reason, "OK");
        assert_eq!(drain(&mut msg).await, b"{\"a\":1}");
        assert!(msg.context().is_none());
    }

    #[tokio::test]
    async fn test_fragmented_chunked_request() {
        let mock = Builder::new()
            .read(b"POST /up HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: ")
            .read(b"chunked\r\n\r\n5\r\nhel")
            .read(b"lo\r\n6;ext=1\r\n world\r\n0\r\nX-Trailer: 1\r\n\r\n")
            .read(b"HTTP/1.0 204 No Content\r\n\r\n")
            .build();
        let mut msg = RecordedMessage::new(mock);

        let req = msg.request().await.unwrap();
        assert_eq!(req.transfer_encoding, vec!["chunked".to_string()]);
        assert!(!req.headers.contains("Transfer-Encoding"));
        assert_eq!(drain(&mut msg).await, b"hello world");

        let res = msg.response().await.unwrap();
        assert_eq!(res.status, 204);
        assert_eq!(res.version, HttpVersion::HTTP_10);
        assert!(drain(&mut msg).await.is_empty());
    }

    #[tokio::test]
    async fn test_context_line_and_body_until_eof() {
        let record: &[u8] = b"{\"id\":\"rec-1\",\"connection\":{\"client\":{\"ip\":\"203.0.113.7\",\"port\":4711}},\"credential\":{\"username\":\"alice\"}}\n\
POST /login HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc\r\n\
HTTP/1.1 500 Internal Server Error\r\n\r\nstack trace";
        let mut msg = RecordedMessage::new(record);

        let req = msg.request().await.unwrap();
        assert_eq!(req.remote_addr.as_deref(), Some("203.0.113.7:4711"));
        let ctx = msg.context().unwrap();
        assert_eq!(ctx.id.as_deref(), Some("rec-1"));
        assert_eq!(ctx.credential.as_ref().unwrap().username, "alice");

        assert_eq!(drain(&mut msg).await, b"abc");
        assert_eq!(msg.response().await.unwrap().status, 500);
        assert_eq!(drain(&mut msg).await, b"stack trace");
    }

    #[tokio::test]
    async fn test_response_before_request_drained_is_framing_error() {
        let record: &[u8] =
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody\r\nHTTP/1.1 200 OK\r\n\r\n";
        let mut msg = RecordedMessage::new(record);

        assert!(matches!(
            msg.response().await,
            Err(RecordError::OutOfOrder(_))
        ));
        msg.request().await.unwrap();
        assert!(matches!(
            msg.response().await,
            Err(RecordError::OutOfOrder(_))
        ));

        let mut buf = [0u8; 2];
        assert_eq!(msg.read_body(&mut buf).await.unwrap(), 2);
        assert!(msg.response().await.is_err());
        drain(&mut msg).await;
        assert_eq!(msg.response().await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_head_response_has_no_body() {
        let record: &[u8] =
            b"HEAD / HTTP/1.1\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 1024\r\n\r\n";
        let mut msg = RecordedMessage::new(record);
        msg.request().await.unwrap();
        drain(&mut msg).await;
        msg.response().await.unwrap();
        assert!(drain(&mut msg).await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_records() {
        let mut msg = RecordedMessage::new(&b"NOT AN HTTP HEAD\r\n\r\n"[..]);
        assert!(matches!(
            msg.request().await,
            Err(RecordError::MalformedHead(_))
        ));

        let mut msg = RecordedMessage::new(&b"GET / HTTP/1.1\r\nHost: a\r\n"[..]);
        assert!(matches!(msg.request().await, Err(RecordError::IncompleteHead)));

        let mut msg = RecordedMessage::new(&b"{not json\nGET / HTTP/1.1\r\n\r\n"[..]);
        assert!(matches!(
            msg.request().await,
            Err(RecordError::MalformedContext(_))
        ));

        let mut msg =
            RecordedMessage::new(&b"POST / HTTP/1.1\r\nContent-Length: ten\r\n\r\n"[..]);
        assert!(matches!(
            msg.request().await,
            Err(RecordError::MalformedHead(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_and_bad_chunked_bodies() {
        let mut msg =
            RecordedMessage::new(&b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort"[..]);
        msg.request().await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(msg.read_body(&mut buf).await.unwrap(), 5);
        assert!(matches!(
            msg.read_body(&mut buf).await,
            Err(RecordError::TruncatedBody)
        ));

        let mut msg = RecordedMessage::new(
            &b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n"[..],
        );
        msg.request().await.unwrap();
        assert!(matches!(
            msg.read_body(&mut buf).await,
            Err(RecordError::MalformedChunk(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_head_stops_at_limit() {
        let mut record = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        record.resize(8 * 1024 * 1024, b'a');
        record.extend_from_slice(b"\r\n\r\n");
        let mut source: &[u8] = &record;

        let mut msg = RecordedMessage::new(&mut source);
        assert!(matches!(
            msg.request().await,
            Err(RecordError::HeadTooLarge(MAX_HEAD_SIZE))
        ));
        drop(msg);
        assert!(source.len() > record.len() - 2 * MAX_HEAD_SIZE);
    }

    #[tokio::test]
    async fn test_endless_streams_fail() {
        let mut msg = RecordedMessage::new(tokio::io::repeat(b'A'));
        assert!(matches!(
            msg.request().await,
            Err(RecordError::HeadTooLarge(MAX_HEAD_SIZE))
        ));

        let mut msg = RecordedMessage::new((&b"{"[..]).chain(tokio::io::repeat(b' ')));
        assert!(matches!(
            msg.request().await,
            Err(RecordError::MalformedContext(_))
        ));

        let head: &[u8] = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        let mut msg = RecordedMessage::new(head.chain(tokio::io::repeat(b'0')));
        msg.request().await.unwrap();
        let mut buf = [0u8; 64];
        assert!(matches!(
            msg.read_body(&mut buf).await,
            Err(RecordError::MalformedChunk(_))
        ));

        let mut record = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n".to_vec();
        for _ in 0..10_000 {
            record.extend_from_slice(b"X-T: 1\r\n");
        }
        let mut msg = RecordedMessage::new(&record[..]);
        msg.request().await.unwrap();
        assert!(matches!(
            msg.read_body(&mut buf).await,
            Err(RecordError::HeadTooLarge(MAX_HEAD_SIZE))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut msg = RecordedMessage::new(&b"GET / HTTP/1.1\r\n\r\n"[..]);
        msg.request().await.unwrap();
        msg.close();
        msg.close();
        assert!(msg.is_closed());
        let mut buf = [0u8; 4];
        assert_eq!(msg.read_body(&mut buf).await.unwrap(), 0);
        assert!(msg.response().await.is_err());
    }
}
