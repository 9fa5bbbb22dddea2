//! HTTP/1.1 request encoding and response decoding.
//!
//! Every request is sent with `Connection: close`, so one exchange owns one
//! connection and the body may be delimited by connection close.

use crate::{Result, TransportError};
use url::Url;

/// Response heads larger than this without a terminating blank line are rejected.
const MAX_HEAD_LEN: usize = 64 * 1024;

/// Request headers that never follow a redirect to another origin.
const CREDENTIAL_HEADERS: [&str; 2] = ["authorization", "cookie"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Owned description of a request; the body is copied at issue time.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// POST with `Content-Type` first, then the extra headers in order.
    pub fn post(url: Url, body: &[u8], content_type: &str, extra_headers: &[(&str, &str)]) -> Self {
        let mut headers = Vec::with_capacity(extra_headers.len() + 1);
        headers.push(("Content-Type".to_string(), content_type.to_string()));
        headers.extend(
            extra_headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string())),
        );
        Self {
            method: Method::Post,
            url,
            headers,
            body: body.to_vec(),
        }
    }

    /// Serialize the request line, headers and body.
    pub fn encode(&self, user_agent: &str) -> Vec<u8> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nAccept: */*\r\nConnection: close\r\n",
            self.method.as_str(),
            request_target(&self.url),
            host_header(&self.url),
            user_agent,
        );
        for (name, value) in &self.headers {
            head.push_str(name);
            head.push_str(": ");
            head.push_str(value);
            head.push_str("\r\n");
        }
        if self.method == Method::Post || !self.body.is_empty() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        head.push_str("\r\n");

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Path and query as sent on the request line.
pub(crate) fn request_target(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// `Host` header value; the port is only included when it is not the default.
pub(crate) fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Parsed status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
}

impl ResponseHead {
    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn has_token(&self, name: &str, token: &str) -> bool {
        self.headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, value)| value.split(','))
            .any(|part| part.trim().eq_ignore_ascii_case(token))
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.has_token("transfer-encoding", "chunked")
    }

    pub(crate) fn connection_upgrade(&self) -> bool {
        self.has_token("connection", "upgrade")
    }
}

/// Find the position of `\r\n\r\n` in data, returns index of the first `\r`.
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(3)).find(|&i| {
        data[i] == b'\r' && data[i + 1] == b'\n' && data[i + 2] == b'\r' && data[i + 3] == b'\n'
    })
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    (0..data.len().saturating_sub(1)).find(|&i| data[i] == b'\r' && data[i + 1] == b'\n')
}

/// Parse HTTP/1.1 response headers (everything before `\r\n\r\n`).
pub(crate) fn parse_response_head(data: &[u8]) -> Result<ResponseHead> {
    let text = std::str::from_utf8(data)
        .map_err(|_| TransportError::Http("response head is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(TransportError::Http(format!(
            "unexpected status line: {:?}",
            status_line
        )));
    }
    let status: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| TransportError::Http(format!("invalid status line: {:?}", status_line)))?;
    let reason = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(ResponseHead {
        status,
        reason,
        headers,
    })
}

/// Remove and parse a complete response head from the front of `input`.
pub(crate) fn take_head(input: &mut Vec<u8>) -> Result<Option<ResponseHead>> {
    match find_header_end(input) {
        Some(end) => {
            let head = parse_response_head(&input[..end])?;
            input.drain(..end + 4);
            Ok(Some(head))
        }
        None if input.len() > MAX_HEAD_LEN => Err(TransportError::Http(format!(
            "response head exceeds {} bytes",
            MAX_HEAD_LEN
        ))),
        None => Ok(None),
    }
}

enum ChunkResult<'a> {
    Complete {
        data: &'a [u8],
        consumed: usize,
        is_last: bool,
    },
    NeedMore,
}

/// Decode one chunk from chunked transfer encoding.
fn decode_chunk(data: &[u8]) -> Result<ChunkResult<'_>> {
    let crlf = match find_crlf(data) {
        Some(pos) => pos,
        None => return Ok(ChunkResult::NeedMore),
    };

    let size_line = std::str::from_utf8(&data[..crlf])
        .map_err(|_| TransportError::Http("chunk size line is not valid UTF-8".to_string()))?;

    // Strip chunk extensions (;key=value).
    let size_hex = size_line.split(';').next().unwrap_or_default().trim();
    let size = usize::from_str_radix(size_hex, 16)
        .map_err(|_| TransportError::Http(format!("invalid chunk size: {:?}", size_hex)))?;

    if size == 0 {
        return Ok(ChunkResult::Complete {
            data: &[],
            consumed: crlf + 2,
            is_last: true,
        });
    }

    let chunk_start = crlf + 2;
    let (chunk_end, total) = match chunk_start
        .checked_add(size)
        .and_then(|end| end.checked_add(2).map(|total| (end, total)))
    {
        Some(bounds) => bounds,
        None => return Err(TransportError::Http("invalid chunk size".to_string())),
    };

    if data.len() < total {
        return Ok(ChunkResult::NeedMore);
    }

    Ok(ChunkResult::Complete {
        data: &data[chunk_start..chunk_end],
        consumed: total,
        is_last: false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Length(usize),
    Chunked,
    UntilClose,
    Done,
}

/// Incremental body decoder for one response.
#[derive(Debug)]
pub(crate) struct BodyDecoder {
    framing: Framing,
}

impl BodyDecoder {
    pub(crate) fn for_response(head: &ResponseHead) -> Result<Self> {
        let framing = if head.status == 204 || head.status == 304 || head.status < 200 {
            Framing::Done
        } else if head.is_chunked() {
            Framing::Chunked
        } else if let Some(length) = head.header("content-length") {
            match length.parse::<usize>() {
                Ok(0) => Framing::Done,
                Ok(length) => Framing::Length(length),
                Err(_) => {
                    return Err(TransportError::Http(format!(
                        "invalid Content-Length: {:?}",
                        length
                    )))
                }
            }
        } else {
            Framing::UntilClose
        };
        Ok(Self { framing })
    }

    pub(crate) fn is_done(&self) -> bool {
        self.framing == Framing::Done
    }

    pub(crate) fn ends_at_close(&self) -> bool {
        self.framing == Framing::UntilClose
    }

    /// Consume body bytes from `input`, handing decoded data to `emit`.
    pub(crate) fn decode(
        &mut self,
        input: &mut Vec<u8>,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<()> {
        match self.framing {
            Framing::Length(remaining) => {
                let take = remaining.min(input.len());
                if take > 0 {
                    emit(&input[..take])?;
                    input.drain(..take);
                }
                self.framing = if remaining == take {
                    Framing::Done
                } else {
                    Framing::Length(remaining - take)
                };
            }
            Framing::Chunked => loop {
                let (consumed, is_last) = match decode_chunk(input)? {
                    ChunkResult::NeedMore => break,
                    ChunkResult::Complete {
                        data,
                        consumed,
                        is_last,
                    } => {
                        if !data.is_empty() {
                            emit(data)?;
                        }
                        (consumed, is_last)
                    }
                };
                input.drain(..consumed);
                if is_last {
                    // Trailers are ignored; the connection is closed anyway
                    self.framing = Framing::Done;
                    break;
                }
            },
            Framing::UntilClose => {
                if !input.is_empty() {
                    emit(input)?;
                    input.clear();
                }
            }
            Framing::Done => {}
        }
        Ok(())
    }
}

/// Outcome of feeding bytes to an exchange.
#[derive(Debug)]
pub(crate) enum HttpStep {
    Pending,
    Complete(u16),
    Redirect { location: Url, status: u16 },
}

/// One request/response exchange, including its redirect chain.
#[derive(Debug)]
pub(crate) struct HttpExchange {
    spec: RequestSpec,
    redirects: usize,
    head: Option<ResponseHead>,
    body: Option<BodyDecoder>,
}

impl HttpExchange {
    pub(crate) fn new(spec: RequestSpec) -> Self {
        Self {
            spec,
            redirects: 0,
            head: None,
            body: None,
        }
    }

    pub(crate) fn url(&self) -> &Url {
        &self.spec.url
    }

    pub(crate) fn request_bytes(&self, user_agent: &str) -> Vec<u8> {
        self.spec.encode(user_agent)
    }

    /// Process buffered input. `eof` reports that the peer closed its side.
    pub(crate) fn advance(
        &mut self,
        input: &mut Vec<u8>,
        eof: bool,
        max_redirects: usize,
        emit: &mut dyn FnMut(&[u8]) -> Result<()>,
    ) -> Result<HttpStep> {
        while self.head.is_none() {
            let head = match take_head(input)? {
                Some(head) => head,
                None if eof => {
                    return Err(TransportError::Http(
                        "connection closed before response headers".to_string(),
                    ))
                }
                None => return Ok(HttpStep::Pending),
            };

            // Interim responses (100 Continue, 103 Early Hints) carry no body
            if (100..200).contains(&head.status) {
                continue;
            }

            if let Some(location) = self.redirect_target(&head, max_redirects)? {
                return Ok(HttpStep::Redirect {
                    location,
                    status: head.status,
                });
            }

            self.body = Some(BodyDecoder::for_response(&head)?);
            self.head = Some(head);
        }

        let status = self.head.as_ref().map(|head| head.status).unwrap_or_default();
        let Some(body) = self.body.as_mut() else {
            return Ok(HttpStep::Pending);
        };

        body.decode(input, emit)?;

        if body.is_done() {
            return Ok(HttpStep::Complete(status));
        }
        if eof {
            if body.ends_at_close() {
                return Ok(HttpStep::Complete(status));
            }
            return Err(TransportError::Http(
                "connection closed before response body complete".to_string(),
            ));
        }
        Ok(HttpStep::Pending)
    }

    fn redirect_target(&self, head: &ResponseHead, max_redirects: usize) -> Result<Option<Url>> {
        if max_redirects == 0 || !matches!(head.status, 301 | 302 | 303 | 307 | 308) {
            return Ok(None);
        }
        let Some(location) = head.header("location") else {
            return Ok(None);
        };
        if self.redirects >= max_redirects {
            return Err(TransportError::TooManyRedirects(max_redirects));
        }
        let next = self
            .spec
            .url
            .join(location)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", location, e)))?;
        if self.spec.url.scheme() == "https" && next.scheme() != "https" {
            return Err(TransportError::Http(format!(
                "refusing redirect from https to {}",
                next
            )));
        }
        Ok(Some(next))
    }

    /// Re-target the exchange at `next`, rewriting the method where required.
    pub(crate) fn follow(&mut self, next: Url, status: u16) {
        let to_get = status == 303 || (matches!(status, 301 | 302) && self.spec.method == Method::Post);
        if to_get {
            self.spec.method = Method::Get;
            self.spec.body.clear();
            self.spec
                .headers
                .retain(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
        }
        if !same_origin(&self.spec.url, &next) {
            self.spec.headers.retain(|(name, _)| {
                !CREDENTIAL_HEADERS
                    .iter()
                    .any(|credential| name.eq_ignore_ascii_case(credential))
            });
        }
        self.spec.url = next;
        self.redirects += 1;
        self.head = None;
        self.body = None;
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme()
        && a.host_str() == b.host_str()
        && a.port_or_known_default() == b.port_or_known_default()
}
