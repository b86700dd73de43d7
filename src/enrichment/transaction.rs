//! One inspection: a recorded exchange driven through one engine transaction.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, trace};
use tokio::io::AsyncRead;
use uuid::Uuid;

use super::document::{assemble, BodySummary, DocumentParts};
use super::mime_sniffer::MimeSniffer;
use super::threat::{extract_threats, scores_from};
use super::truncated_buffer::TruncatedBuffer;
use crate::configuration::Config;
use crate::ecs::{Document, Scores};
use crate::engine::transaction::Transaction;
use crate::error_handling::types::{InspectionError, Phase};
use crate::lookup::{GeoLookup, UserAgentParser};
use crate::record::RecordedMessage;

const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Per-inspection limits, fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub struct InspectionSettings {
    pub request_body_limit: usize,
    pub response_body_limit: usize,
    pub sniff_window: usize,
    pub read_timeout: Option<Duration>,
}

impl InspectionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_body_limit: config.engine.request_body_limit,
            response_body_limit: config.engine.response_body_limit,
            sniff_window: config.inspection.sniff_window,
            read_timeout: config.read_timeout(),
        }
    }
}

impl Default for InspectionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Retained bytes of one body and its sniffed content type.
#[derive(Debug)]
pub struct CapturedBody {
    pub buffer: TruncatedBuffer,
    pub mime: String,
}

impl CapturedBody {
    fn summary(&self) -> BodySummary<'_> {
        BodySummary {
            mime: &self.mime,
            bytes: self.buffer.as_bytes(),
        }
    }
}

/// Inspection session over one recorded exchange.
///
/// Phases must run in order: [`process_request`](Self::process_request),
/// then [`process_response`](Self::process_response). The session is closed
/// exactly once, either explicitly or when dropped.
pub struct EnricherTransaction<R: AsyncRead + Unpin> {
    id: Uuid,
    tx: Box<dyn Transaction>,
    message: RecordedMessage<R>,
    settings: InspectionSettings,
    request_body: Option<CapturedBody>,
    response_body: Option<CapturedBody>,
    request_done: bool,
    response_done: bool,
    closed: bool,
}

impl<R: AsyncRead + Unpin> EnricherTransaction<R> {
    pub fn new(tx: Box<dyn Transaction>, record: R, settings: InspectionSettings) -> Self {
        let id = Uuid::new_v4();
        debug!("[{}] Inspection started", id);
        Self {
            id,
            tx,
            message: RecordedMessage::new(record),
            settings,
            request_body: None,
            response_body: None,
            request_done: false,
            response_done: false,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Connection, URI, request headers and request body phases.
    pub async fn process_request(&mut self) -> Result<(), InspectionError> {
        let request = self
            .message
            .request()
            .await
            .map_err(|e| InspectionError::from_record(Phase::Connection, e))?
            .clone();

        let peer = request.remote_addr.clone().or_else(|| {
            request
                .headers
                .get("x-forwarded-for")
                .and_then(|xff| xff.split(',').next())
                .map(|first| first.trim().to_string())
        });
        let (client, port) = split_address(peer.as_deref().unwrap_or(""));
        trace!("[{}] connection from {}:{}", self.id, client, port);
        self.tx.process_connection(&client, port, "", 0);

        self.tx
            .process_uri(&request.target, &request.method, &request.version.proto());

        for (name, value) in request.headers.iter() {
            self.tx.add_request_header(name, value);
        }
        if let Some(host) = &request.host {
            self.tx.add_request_header("Host", host);
        }
        if !request.transfer_encoding.is_empty() {
            self.tx
                .add_request_header("Transfer-Encoding", &request.transfer_encoding.join(","));
        }
        self.tx.process_request_headers();

        let (captured, copied) = self
            .copy_body(Phase::RequestBody, self.settings.request_body_limit)
            .await;
        self.request_body = Some(captured);
        copied?;

        self.tx
            .process_request_body()
            .map_err(|e| InspectionError::Engine(Phase::RequestBody, e))?;
        self.request_done = true;
        debug!("[{}] Request processed: {} {}", self.id, request.method, request.target);
        Ok(())
    }

    /// Response headers and response body phases.
    pub async fn process_response(&mut self) -> Result<(), InspectionError> {
        let response = self
            .message
            .response()
            .await
            .map_err(|e| InspectionError::from_record(Phase::ResponseHeaders, e))?
            .clone();

        for (name, value) in response.headers.iter() {
            self.tx.add_response_header(name, value);
        }
        if !response.transfer_encoding.is_empty() {
            self.tx
                .add_response_header("Transfer-Encoding", &response.transfer_encoding.join(","));
        }
        self.tx
            .process_response_headers(response.status, &response.version.proto());

        let (captured, copied) = self
            .copy_body(Phase::ResponseBody, self.settings.response_body_limit)
            .await;
        self.response_body = Some(captured);
        copied?;

        if self.tx.is_processable_response_body() {
            self.tx
                .process_response_body()
                .map_err(|e| InspectionError::Engine(Phase::ResponseBody, e))?;
        } else {
            debug!("[{}] Response body not processable, evaluation skipped", self.id);
        }
        self.response_done = true;
        debug!("[{}] Response processed: {}", self.id, response.status);
        Ok(())
    }

    /// Streams the current body into the buffer, the sniffer and the engine.
    ///
    /// The captured body is returned even when the copy fails.
    async fn copy_body(
        &mut self,
        phase: Phase,
        limit: usize,
    ) -> (CapturedBody, Result<u64, InspectionError>) {
        let mut buffer = TruncatedBuffer::new(limit);
        let mut sniffer = MimeSniffer::spawn(self.settings.sniff_window);
        let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
        let mut total = 0u64;

        let result = loop {
            let n = match self.message.read_body(&mut chunk).await {
                Ok(0) => break Ok(total),
                Ok(n) => n,
                Err(e) => break Err(InspectionError::from_record(phase, e)),
            };
            let piece = &chunk[..n];
            buffer.write(piece);
            sniffer.write(piece).await;

            let sink = match phase {
                Phase::RequestBody => self.tx.request_body_writer(),
                _ => self.tx.response_body_writer(),
            };
            if let Err(e) = sink.write_all(piece) {
                break Err(InspectionError::Io(phase, e));
            }
            total += n as u64;
            trace!("[{}] {}: copied {} bytes ({} total)", self.id, phase, n, total);
        };

        let mime = sniffer.close().await.to_string();
        trace!("[{}] {}: sniffed {:?}, retained {} bytes", self.id, phase, mime, buffer.len());
        (CapturedBody { buffer, mime }, result)
    }

    pub fn request_body(&self) -> Option<&CapturedBody> {
        self.request_body.as_ref()
    }

    pub fn response_body(&self) -> Option<&CapturedBody> {
        self.response_body.as_ref()
    }

    pub fn scores(&self) -> Scores {
        scores_from(self.tx.as_ref())
    }

    /// Builds the document; both phases must have completed and the session
    /// must still be open.
    pub fn to_document(
        &self,
        geo: Option<&dyn GeoLookup>,
        user_agent: Option<&dyn UserAgentParser>,
    ) -> Result<Document, InspectionError> {
        if !self.request_done || !self.response_done || self.closed {
            return Err(InspectionError::NotProcessed);
        }
        let request = self.message.request_head().ok_or(InspectionError::NotProcessed)?;
        let response = self.message.response_head().ok_or(InspectionError::NotProcessed)?;
        let request_body = self.request_body.as_ref().ok_or(InspectionError::NotProcessed)?;
        let response_body = self.response_body.as_ref().ok_or(InspectionError::NotProcessed)?;

        Ok(assemble(DocumentParts {
            context: self.message.context(),
            request,
            response,
            request_body: request_body.summary(),
            response_body: response_body.summary(),
            threats: extract_threats(self.tx.matched_rules()),
            scores: self.scores(),
            geo,
            user_agent,
        }))
    }

    /// Releases the record, flushes the engine audit log and clears engine
    /// state. Only the first call has an effect.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.message.close();
        self.tx.process_logging();
        self.tx.clean();
        debug!("[{}] Inspection closed", self.id);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<R: AsyncRead + Unpin> Drop for EnricherTransaction<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Splits a peer address into IP and port.
///
/// Accepts `ip:port`, `[v6]:port` and a bare IP; an unparsable port is 0.
pub fn split_address(addr: &str) -> (String, u16) {
    let addr = addr.trim();
    if addr.parse::<IpAddr>().is_ok() {
        return (addr.to_string(), 0);
    }
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((ip, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse().ok())
                .unwrap_or(0);
            return (ip.to_string(), port);
        }
    }
    match addr.rsplit_once(':') {
        Some((ip, port)) => (ip.to_string(), port.parse().unwrap_or(0)),
        None => (addr.to_string(), 0),
    }
}
