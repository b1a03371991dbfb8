//! HTTP connection codec.
//!
//! Reads a request into a fixed read buffer in three phases (header, body,
//! complete), hands it to the [`HttpHandler`] and queues the handler's bytes
//! in a fixed write buffer. Every phase resumes where it stopped when the
//! socket would block.

use crate::protocols::http::parser::{self, find_header_end, parse_content_length, parse_head};
use crate::protocols::http::request::HttpRequest;
use crate::protocols::http::response::HttpResponse;
use crate::runtime::{ConnFactory, Connection, ReadStatus, WriteStatus};
use bytes::Bytes;
use std::io::{self, Read, Write};
use std::os::unix::io::RawFd;
use tracing::{debug, trace, warn};

/// Largest request or response, in bytes.
pub const MAX_MESSAGE: usize = 8 * 1024 * 1024;

/// Largest request header block, in bytes.
pub const MAX_HEADER: usize = 64 * 1024;

/// Handles one fully parsed request.
///
/// Runs on the reactor thread and must not block. Whatever ends up in
/// `response.content` is sent back verbatim.
pub trait HttpHandler {
    fn deal_message(&mut self, request: &HttpRequest, response: &mut HttpResponse);
}

impl<F> HttpHandler for F
where
    F: FnMut(&HttpRequest, &mut HttpResponse),
{
    fn deal_message(&mut self, request: &HttpRequest, response: &mut HttpResponse) {
        self(request, response)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnStatus {
    Header,
    Packet,
    Complete,
}

/// Per-connection HTTP state.
pub struct HttpConn<H> {
    fd: RawFd,
    peer: String,
    rbuf: Box<[u8]>,
    rbuf_pos: usize,
    wbuf: Box<[u8]>,
    wbuf_len: usize,
    wbuf_pos: usize,
    status: ConnStatus,
    /// One past the header terminator.
    header_len: usize,
    content_len: usize,
    /// Body bytes still expected; negative when the read overshot the body.
    remain_packet_len: i64,
    is_reply: bool,
    request: HttpRequest,
    response: HttpResponse,
    handler: H,
}

impl<H: HttpHandler> HttpConn<H> {
    pub fn new(fd: RawFd, peer: &str, handler: H) -> Self {
        Self {
            fd,
            peer: peer.to_string(),
            rbuf: vec![0u8; MAX_MESSAGE].into_boxed_slice(),
            rbuf_pos: 0,
            wbuf: vec![0u8; MAX_MESSAGE].into_boxed_slice(),
            wbuf_len: 0,
            wbuf_pos: 0,
            status: ConnStatus::Header,
            header_len: 0,
            content_len: 0,
            remain_packet_len: 0,
            is_reply: false,
            request: HttpRequest::new(),
            response: HttpResponse::new(),
            handler,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// The most recently parsed request.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// Bytes queued for sending.
    pub fn pending_reply(&self) -> &[u8] {
        &self.wbuf[self.wbuf_pos..self.wbuf_len]
    }

    /// Bytes currently held in the read buffer.
    pub fn buffered(&self) -> usize {
        self.rbuf_pos
    }

    fn build_request_header(&mut self) -> Result<(), parser::ParseError> {
        self.request.clear();
        parse_head(&self.rbuf[..self.header_len], &mut self.request)?;
        self.content_len = parse_content_length(&self.request.headers)?;

        let overshoot = (self.rbuf_pos - self.header_len) as i64;
        self.remain_packet_len = self.content_len as i64 - overshoot;
        Ok(())
    }

    fn build_request_body(&mut self) {
        let body = &self.rbuf[self.header_len..self.header_len + self.content_len];
        if self.request.method == "POST" {
            parser::parse_parameters(body, &mut self.request.query_params);
        }
        self.request.content = Bytes::copy_from_slice(body);
    }

    fn handle_message(&mut self) {
        self.response.clear();
        self.handler.deal_message(&self.request, &mut self.response);
        self.is_reply = true;
        self.wbuf_len = self.response.serialize_to(&mut self.wbuf);
        self.wbuf_pos = 0;
        if self.response.content.len() > self.wbuf_len {
            warn!(
                fd = self.fd,
                size = self.response.content.len(),
                "Response truncated to {} bytes",
                MAX_MESSAGE
            );
        }
    }

    /// Drop the handled request, keeping any bytes that follow it.
    fn consume_request(&mut self) {
        let used = self.header_len + self.content_len;
        if used < self.rbuf_pos {
            self.rbuf.copy_within(used..self.rbuf_pos, 0);
            self.rbuf_pos -= used;
        } else {
            self.rbuf_pos = 0;
        }
        self.header_len = 0;
        self.content_len = 0;
        self.remain_packet_len = 0;
        self.status = ConnStatus::Header;
    }
}

impl<H: HttpHandler> Connection for HttpConn<H> {
    fn get_request<R: Read>(&mut self, stream: &mut R) -> ReadStatus {
        loop {
            match self.status {
                ConnStatus::Header => {
                    if let Some(header_len) = find_header_end(&self.rbuf[..self.rbuf_pos]) {
                        self.header_len = header_len;
                        if let Err(e) = self.build_request_header() {
                            warn!(fd = self.fd, peer = %self.peer, error = %e, "Bad request header");
                            return ReadStatus::ReadError;
                        }
                        trace!(
                            fd = self.fd,
                            method = %self.request.method,
                            path = %self.request.path,
                            "Parsed request header"
                        );
                        self.status = ConnStatus::Packet;
                        continue;
                    }
                    if self.rbuf_pos >= MAX_HEADER {
                        warn!(fd = self.fd, peer = %self.peer, "Request header too large");
                        return ReadStatus::ReadError;
                    }
                    match stream.read(&mut self.rbuf[self.rbuf_pos..MAX_HEADER]) {
                        Ok(0) => return ReadStatus::ReadClose,
                        Ok(n) => self.rbuf_pos += n,
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                            return ReadStatus::ReadHalf
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                        Err(e) => {
                            debug!(fd = self.fd, error = %e, "Read failed");
                            return ReadStatus::ReadClose;
                        }
                    }
                }
                ConnStatus::Packet => {
                    if self.remain_packet_len > (MAX_MESSAGE - self.rbuf_pos) as i64 {
                        warn!(
                            fd = self.fd,
                            peer = %self.peer,
                            content_length = self.content_len,
                            "Request body too large"
                        );
                        return ReadStatus::ReadError;
                    }
                    if self.remain_packet_len > 0 {
                        let end = self.rbuf_pos + self.remain_packet_len as usize;
                        match stream.read(&mut self.rbuf[self.rbuf_pos..end]) {
                            Ok(0) => return ReadStatus::ReadClose,
                            Ok(n) => {
                                self.rbuf_pos += n;
                                self.remain_packet_len -= n as i64;
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                                return ReadStatus::ReadHalf
                            }
                            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                            Err(e) => {
                                debug!(fd = self.fd, error = %e, "Read failed");
                                return ReadStatus::ReadClose;
                            }
                        }
                    }
                    if self.remain_packet_len <= 0 {
                        self.build_request_body();
                        self.status = ConnStatus::Complete;
                    }
                }
                ConnStatus::Complete => {
                    self.handle_message();
                    self.consume_request();
                    return ReadStatus::ReadAll;
                }
            }
        }
    }

    fn send_reply<W: Write>(&mut self, stream: &mut W) -> WriteStatus {
        while self.wbuf_pos < self.wbuf_len {
            match stream.write(&self.wbuf[self.wbuf_pos..self.wbuf_len]) {
                Ok(0) => return WriteStatus::WriteError,
                Ok(n) => self.wbuf_pos += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return WriteStatus::WriteHalf
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(fd = self.fd, error = %e, "Write failed");
                    return WriteStatus::WriteError;
                }
            }
        }
        self.wbuf_len = 0;
        self.wbuf_pos = 0;
        WriteStatus::WriteAll
    }

    fn is_reply(&self) -> bool {
        self.is_reply
    }

    fn set_is_reply(&mut self, is_reply: bool) {
        self.is_reply = is_reply;
    }

    fn has_buffered_input(&self) -> bool {
        self.rbuf_pos > 0
    }
}

/// Builds an [`HttpConn`] per accepted socket, each with its own copy of
/// the handler.
#[derive(Debug, Clone)]
pub struct HttpConnFactory<H> {
    handler: H,
}

impl<H> HttpConnFactory<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

impl<H: HttpHandler + Clone> ConnFactory for HttpConnFactory<H> {
    type Conn = HttpConn<H>;

    fn new_conn(&mut self, fd: RawFd, peer: &str) -> HttpConn<H> {
        HttpConn::new(fd, peer, self.handler.clone())
    }
}
