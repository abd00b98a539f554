//! Control channel: line-framed request/response over loopback TCP.
//!
//! The parent side is [`RemoteProxy`], which makes a worker's capability look
//! like a local one. The worker side is [`serve`], which answers exactly one
//! session against a local capability instance.

use super::protocol::{PROTOCOL_VERSION, Request, Response};
use crate::component::{Capability, ComponentKind, JobCall, JobOutput};
use crate::error::{PoolError, Result};
use crate::settings::JobSettings;
use serde::Serialize;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

/// Buffer size for channel I/O (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Buffered line reader.
pub struct LineReader<R> {
    reader: BufReader<R>,
    line_buffer: String,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::with_capacity(BUFFER_SIZE, inner),
            line_buffer: String::with_capacity(4096),
        }
    }

    /// Read a line without its terminator. Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(None);
        }
        if self.line_buffer.ends_with('\n') {
            self.line_buffer.pop();
        }
        if self.line_buffer.ends_with('\r') {
            self.line_buffer.pop();
        }
        Ok(Some(&self.line_buffer))
    }
}

/// Buffered line writer.
pub struct LineWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> LineWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(BUFFER_SIZE, inner),
        }
    }

    /// Write a line (appends newline if not present) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }

    /// Serialize `message` straight into the buffer as one line and flush.
    /// Large payloads are never held as a whole JSON string.
    pub fn write_message<T: Serialize>(&mut self, message: &T) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, message)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

fn transport(context: &str, e: impl std::fmt::Display) -> PoolError {
    PoolError::Transport(format!("{}: {}", context, e))
}

/// Parent-side proxy for a worker's capability.
pub struct RemoteProxy {
    reader: LineReader<TcpStream>,
    writer: LineWriter<TcpStream>,
    kind: ComponentKind,
    port: u16,
}

impl RemoteProxy {
    /// Connect to a worker and look up its exported capability.
    pub fn connect(host: &str, port: u16, kind: ComponentKind) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .map_err(|e| transport(&format!("connect to {}:{}", host, port), e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| transport("set_nodelay", e))?;
        let read_half = stream.try_clone().map_err(|e| transport("clone stream", e))?;

        let mut proxy = Self {
            reader: LineReader::new(read_half),
            writer: LineWriter::new(stream),
            kind,
            port,
        };

        let lookup = proxy.call(&Request::Lookup {
            kind,
            version: PROTOCOL_VERSION,
        });
        match lookup {
            Err(PoolError::RemoteInvocation { message }) => Err(PoolError::Transport(format!(
                "worker on port {} rejected lookup: {}",
                port, message
            ))),
            Err(e) => Err(e),
            Ok(Response::Bound { kind: bound }) if bound == kind => Ok(proxy),
            Ok(Response::Bound { kind: bound }) => Err(PoolError::Transport(format!(
                "worker on port {} serves {} but {} was requested",
                port, bound, kind
            ))),
            Ok(other) => Err(unexpected("lookup", &other)),
        }
    }

    /// Replace the worker's settings with `settings`.
    pub fn copy_settings(&mut self, settings: &JobSettings) -> Result<()> {
        match self.call(&Request::CopySettings {
            settings: settings.clone(),
        })? {
            Response::Done => Ok(()),
            other => Err(unexpected("copy_settings", &other)),
        }
    }

    /// Run a job in the worker and return its output.
    pub fn invoke(&mut self, call: &JobCall<'_>) -> Result<JobOutput> {
        let request = match *call {
            JobCall::Analyze { item } => Request::Analyze { item: item.clone() },
            JobCall::Render {
                item,
                begin_page,
                end_page,
            } => Request::Render {
                item: item.clone(),
                begin_page,
                end_page,
            },
            JobCall::Convert { item } => Request::Convert { item: item.clone() },
        };

        match self.call(&request)? {
            Response::Findings { result } => Ok(JobOutput::Findings(result)),
            Response::Pages { result } => Ok(JobOutput::Pages(result)),
            Response::Converted { data } => Ok(JobOutput::Converted(data)),
            other => Err(unexpected(request.name(), &other)),
        }
    }

    /// End the session. Best effort: the worker is stopped regardless.
    pub fn close(mut self) {
        let _ = self.writer.write_message(&Request::Exit);
        let _ = self.reader.reader.get_ref().shutdown(Shutdown::Both);
    }

    /// Send one request and read its response. `Failed` and `Fault` are
    /// turned into errors here.
    fn call(&mut self, request: &Request) -> Result<Response> {
        let start = Instant::now();
        self.writer
            .write_message(request)
            .map_err(|e| transport(&format!("send {}", request.name()), e))?;

        let response = match self
            .reader
            .read_line()
            .map_err(|e| transport(&format!("receive {}", request.name()), e))?
        {
            Some(line) => Response::from_line(line)
                .map_err(|e| transport("invalid worker response", e))?,
            None => {
                return Err(PoolError::Transport(format!(
                    "worker on port {} closed the channel during {}",
                    self.port,
                    request.name()
                )));
            }
        };

        tracing::trace!(
            kind = %self.kind,
            port = self.port,
            request = request.name(),
            round_trip_ms = start.elapsed().as_millis(),
            "Control channel round trip"
        );

        match response {
            Response::Failed { error } => Err(PoolError::Job(error)),
            Response::Fault { message } => Err(PoolError::RemoteInvocation { message }),
            other => Ok(other),
        }
    }
}

fn unexpected(during: &str, response: &Response) -> PoolError {
    PoolError::Transport(format!("unexpected response to {}: {:?}", during, response))
}

/// Worker-side accounting for a served session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Connections closed without sending anything (readiness probes).
    pub probes: usize,
    /// Requests answered, including lookup and settings.
    pub requests: usize,
    /// Whether a job request was served.
    pub job_served: bool,
}

/// Serve one session on `listener` against `capability`.
///
/// Connections that close before sending a request are readiness probes and
/// are skipped. The first connection that sends a request is the session;
/// when it ends (`Exit` or EOF) this returns.
pub fn serve(listener: &TcpListener, capability: &dyn Capability) -> io::Result<SessionSummary> {
    let mut summary = SessionSummary::default();

    loop {
        let (stream, peer) = listener.accept()?;
        let read_half = stream.try_clone()?;
        let mut reader = LineReader::new(read_half);
        let mut writer = LineWriter::new(stream);

        let first = match reader.read_line() {
            Ok(Some(line)) => line.to_string(),
            Ok(None) | Err(_) => {
                summary.probes += 1;
                tracing::trace!(%peer, "Readiness probe");
                continue;
            }
        };

        tracing::debug!(%peer, kind = %capability.kind(), "Session opened");
        let mut session = Session {
            capability,
            bound: false,
            summary: &mut summary,
        };

        let mut next = Some(first);
        while let Some(line) = next.take() {
            let request = match Request::from_line(&line) {
                Ok(request) => request,
                Err(e) => {
                    let resp = Response::fault(format!("Invalid request: {}", e));
                    writer.write_message(&resp)?;
                    next = reader.read_line()?.map(String::from);
                    continue;
                }
            };

            if matches!(request, Request::Exit) {
                break;
            }
            let response = session.handle(request);
            writer.write_message(&response)?;
            next = reader.read_line()?.map(String::from);
        }

        tracing::debug!(%peer, requests = summary.requests, "Session closed");
        return Ok(summary);
    }
}

struct Session<'a> {
    capability: &'a dyn Capability,
    bound: bool,
    summary: &'a mut SessionSummary,
}

impl Session<'_> {
    fn handle(&mut self, request: Request) -> Response {
        self.summary.requests += 1;
        let served = self.capability.kind();

        match request {
            Request::Lookup { kind, version } => {
                if version != PROTOCOL_VERSION {
                    return Response::fault(format!(
                        "protocol version {} not supported (worker speaks {})",
                        version, PROTOCOL_VERSION
                    ));
                }
                if kind != served {
                    return Response::fault(format!("no {} exported here, only {}", kind, served));
                }
                self.bound = true;
                Response::Bound { kind: served }
            }
            _ if !self.bound => Response::fault("lookup required before any other request"),
            Request::CopySettings { settings } => {
                tracing::debug!(entries = settings.len(), "Settings copied from parent");
                self.capability.copy_settings(settings);
                Response::Done
            }
            Request::Analyze { item } => self.run(JobCall::Analyze { item: &item }),
            Request::Render {
                item,
                begin_page,
                end_page,
            } => self.run(JobCall::Render {
                item: &item,
                begin_page,
                end_page,
            }),
            Request::Convert { item } => self.run(JobCall::Convert { item: &item }),
            Request::Exit => Response::Done,
        }
    }

    fn run(&mut self, call: JobCall<'_>) -> Response {
        if self.summary.job_served {
            return Response::fault("this worker has already served its job");
        }
        self.summary.job_served = true;

        let capability = self.capability;
        match catch_unwind(AssertUnwindSafe(|| capability.invoke(&call))) {
            Ok(Ok(JobOutput::Findings(result))) => Response::Findings { result },
            Ok(Ok(JobOutput::Pages(result))) => Response::Pages { result },
            Ok(Ok(JobOutput::Converted(data))) => Response::Converted { data },
            Ok(Err(PoolError::Job(error))) => Response::Failed { error },
            Ok(Err(other)) => Response::fault(other.to_string()),
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Response::fault(format!("engine panicked: {}", message))
            }
        }
    }
}
