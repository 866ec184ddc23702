// ABOUTME: Minimal Language Server Protocol client used as a diagnostic source
// ABOUTME: Frames JSON-RPC over stdio and collects pull or published diagnostics per document

use crate::source::{extension_matches, DiagnosticSource, SourceOutcome};
use anyhow::Result;
use async_trait::async_trait;
use errorgraph_core::{ErrorGraphError, RawDiagnostic, SourceConfig, SourceKind};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

#[cfg(unix)]
use nix::fcntl::{fcntl, FcntlArg, OFlag};
#[cfg(unix)]
use std::os::fd::AsFd;

/// Wraps a JSON-RPC body in a `Content-Length` frame.
pub fn frame_message(body: &str) -> Vec<u8> {
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}

/// Incremental decoder for the stdio byte stream of a language server.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Pops the next complete body, leaving partial frames buffered.
    pub fn next_frame(&mut self) -> Result<Option<String>> {
        const SEPARATOR: &[u8] = b"\r\n\r\n";
        let Some(split) = self
            .pending
            .windows(SEPARATOR.len())
            .position(|w| w == SEPARATOR)
        else {
            return Ok(None);
        };

        let header = std::str::from_utf8(&self.pending[..split])?;
        let length = header
            .lines()
            .filter_map(|h| h.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .ok_or_else(|| anyhow::anyhow!("frame header has no usable Content-Length"))?;

        let body_at = split + SEPARATOR.len();
        if self.pending.len() < body_at + length {
            return Ok(None);
        }
        let body = String::from_utf8(self.pending[body_at..body_at + length].to_vec())?;
        self.pending.drain(..body_at + length);
        Ok(Some(body))
    }
}

/// A decoded server-to-client message.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response {
        id: u64,
        outcome: std::result::Result<JsonValue, JsonValue>,
    },
    Notification { method: String, params: JsonValue },
    /// Server-initiated requests and anything else the client ignores.
    Other,
}

impl Incoming {
    pub fn parse(body: &str) -> Result<Self> {
        let mut value: JsonValue = serde_json::from_str(body)?;
        let method = value.get("method").and_then(|m| m.as_str()).map(str::to_string);
        let id = value.get("id").and_then(|i| i.as_u64());
        Ok(match (id, method) {
            (Some(id), None) => {
                let outcome = match value.get_mut("error").map(JsonValue::take) {
                    Some(error) => Err(error),
                    None => Ok(value.get_mut("result").map(JsonValue::take).unwrap_or_default()),
                };
                Incoming::Response { id, outcome }
            }
            (None, Some(method)) => Incoming::Notification {
                method,
                params: value.get_mut("params").map(JsonValue::take).unwrap_or_default(),
            },
            _ => Incoming::Other,
        })
    }
}

/// Converts a 0-based UTF-16 offset on 0-based `line` of `text` into a 1-based character
/// column. Offsets past the end of the line keep their overshoot.
pub fn utf16_to_column(text: &str, line: u32, utf16_offset: u32) -> u32 {
    let Some(line_text) = text.split('\n').nth(line as usize) else {
        return utf16_offset + 1;
    };
    let mut units: u32 = 0;
    let mut column: u32 = 1;
    for ch in line_text.chars() {
        if units >= utf16_offset {
            break;
        }
        units += ch.encode_utf16(&mut [0u16; 2]).len() as u32;
        column += 1;
    }
    column + utf16_offset.saturating_sub(units)
}

/// Converts one LSP `Diagnostic` (0-based line, UTF-16 character offsets) into a 1-based
/// raw diagnostic. Without the document text, offsets are taken as character counts.
pub fn lsp_diagnostic_to_raw(
    file_path: &str,
    diagnostic: &JsonValue,
    text: Option<&str>,
) -> Option<RawDiagnostic> {
    let to_column = |line: u32, offset: u32| match text {
        Some(text) => utf16_to_column(text, line, offset),
        None => offset + 1,
    };
    let range = diagnostic.get("range")?;
    let start = range.get("start")?;
    let line = start.get("line")?.as_u64()? as u32;
    let character = start.get("character").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let end = range.get("end");
    let end_line = end
        .and_then(|e| e.get("line"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);
    let end_character = end
        .and_then(|e| e.get("character"))
        .and_then(|v| v.as_u64())
        .map(|v| v as u32);
    let message = diagnostic.get("message")?.as_str()?;

    let severity_text = match diagnostic.get("severity").and_then(|v| v.as_u64()) {
        Some(1) => "error",
        Some(2) | None => "warning",
        Some(3) => "information",
        Some(_) => "hint",
    };
    let code = match diagnostic.get("code") {
        Some(JsonValue::String(s)) => Some(s.clone()),
        Some(JsonValue::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Some(RawDiagnostic {
        file_path: file_path.to_string(),
        line: line + 1,
        column: to_column(line, character),
        severity_text: severity_text.to_string(),
        message: message.to_string(),
        code,
        end_line: end_line.map(|l| l + 1),
        end_column: end_line
            .zip(end_character)
            .map(|(l, c)| to_column(l, c))
            .or_else(|| end_character.map(|c| c + 1)),
    })
}

/// A running language server driven over stdio. Reads are non-blocking and polled.
pub struct LspProcess {
    child: Child,
    writer: ChildStdin,
    reader: ChildStdout,
    stderr: Option<ChildStderr>,
    decoder: FrameDecoder,
    request_seq: u64,
    /// Most recent `textDocument/publishDiagnostics` payload per document uri.
    pushed: HashMap<String, Vec<JsonValue>>,
    /// Cancelled when the caller gives up; every wait loop checks it.
    abort: CancellationToken,
}

impl LspProcess {
    /// Spawns the server and completes the `initialize` handshake.
    pub fn start(
        command: &Path,
        args: &[String],
        root_uri: &str,
        timeout: Duration,
        abort: CancellationToken,
    ) -> Result<Self> {
        let began = Instant::now();
        info!(server = %command.display(), root_uri, "spawning language server");

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let (Some(writer), Some(reader)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            anyhow::bail!("language server stdio was not captured");
        };
        let stderr = child.stderr.take();
        let mut process = Self::from_parts(child, writer, reader, stderr)?;
        process.set_abort(abort);
        process.initialize(root_uri, timeout, began)
    }

    fn from_parts(
        child: Child,
        writer: ChildStdin,
        reader: ChildStdout,
        stderr: Option<ChildStderr>,
    ) -> Result<Self> {
        #[cfg(unix)]
        make_nonblocking(&reader)?;
        Ok(Self {
            child,
            writer,
            reader,
            stderr,
            decoder: FrameDecoder::default(),
            request_seq: 0,
            pushed: HashMap::new(),
            abort: CancellationToken::new(),
        })
    }

    /// Replaces the token that aborts in-flight waits.
    pub fn set_abort(&mut self, abort: CancellationToken) {
        self.abort = abort;
    }

    fn initialize(mut self, root_uri: &str, timeout: Duration, began: Instant) -> Result<Self> {
        let capabilities = serde_json::json!({
            "textDocument": {
                "publishDiagnostics": { "relatedInformation": false },
                "diagnostic": { "dynamicRegistration": false }
            }
        });
        self.call(
            "initialize",
            serde_json::json!({
                "processId": std::process::id(),
                "rootUri": root_uri,
                "capabilities": capabilities,
            }),
            timeout,
        )?;
        self.notify("initialized", serde_json::json!({}))?;
        debug!(elapsed = ?began.elapsed(), "language server ready");
        Ok(self)
    }

    pub fn notify(&mut self, method: &str, params: JsonValue) -> Result<()> {
        self.send(&serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }

    /// Sends a request and blocks until its response arrives or `timeout` elapses.
    /// Notifications received meanwhile are recorded.
    pub fn call(&mut self, method: &str, params: JsonValue, timeout: Duration) -> Result<JsonValue> {
        self.request_seq += 1;
        let id = self.request_seq;
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if let Err(e) = self.send(&request) {
            self.ensure_running()?;
            return Err(e);
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            match self.poll(deadline)? {
                Some(Incoming::Response { id: got, outcome }) if got == id => {
                    return outcome
                        .map_err(|error| anyhow::anyhow!("{} rejected by server: {}", method, error));
                }
                Some(other) => self.record(other),
                None => self.idle()?,
            }
        }
        anyhow::bail!("{} timed out after {:?} (request {})", method, timeout, id)
    }

    /// Waits for pushed diagnostics for `uri` until `deadline`.
    pub fn await_pushed(&mut self, uri: &str, deadline: Instant) -> Result<Option<Vec<JsonValue>>> {
        loop {
            if let Some(items) = self.pushed.remove(uri) {
                return Ok(Some(items));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.poll(deadline)? {
                Some(message) => self.record(message),
                None => self.idle()?,
            }
        }
    }

    /// Opens the document, asks for diagnostics (pull model first, push as fallback),
    /// and closes it again.
    pub fn document_diagnostics(
        &mut self,
        uri: &str,
        language_id: &str,
        text: &str,
        timeout: Duration,
    ) -> Result<Vec<JsonValue>> {
        let deadline = Instant::now() + timeout;
        self.pushed.remove(uri);
        let document = serde_json::json!({ "uri": uri });
        self.notify(
            "textDocument/didOpen",
            serde_json::json!({
                "textDocument": { "uri": uri, "languageId": language_id, "version": 1, "text": text }
            }),
        )?;

        let remaining = deadline.saturating_duration_since(Instant::now());
        let items = match self.call(
            "textDocument/diagnostic",
            serde_json::json!({ "textDocument": document }),
            remaining,
        ) {
            Ok(report) => report
                .get("items")
                .and_then(JsonValue::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, uri, "no pull diagnostics, falling back to published ones");
                match self.await_pushed(uri, deadline)? {
                    Some(items) => items,
                    None => anyhow::bail!("diagnostics for {} timed out", uri),
                }
            }
        };

        self.notify(
            "textDocument/didClose",
            serde_json::json!({ "textDocument": document }),
        )?;
        Ok(items)
    }

    fn record(&mut self, message: Incoming) {
        if let Incoming::Notification { method, mut params } = message {
            if method != "textDocument/publishDiagnostics" {
                return;
            }
            let Some(uri) = params.get("uri").and_then(JsonValue::as_str).map(str::to_string) else {
                return;
            };
            let items = match params.get_mut("diagnostics").map(JsonValue::take) {
                Some(JsonValue::Array(items)) => items,
                _ => Vec::new(),
            };
            self.pushed.insert(uri, items);
        }
    }

    /// Reads whatever is available and returns the next complete message, if any.
    fn poll(&mut self, deadline: Instant) -> Result<Option<Incoming>> {
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(body) = self.decoder.next_frame()? {
                return Incoming::parse(&body).map(Some);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(None),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn idle(&mut self) -> Result<()> {
        if self.abort.is_cancelled() {
            anyhow::bail!("language server exchange cancelled");
        }
        self.ensure_running()?;
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    }

    fn ensure_running(&mut self) -> Result<()> {
        let Some(status) = self.child.try_wait().ok().flatten() else {
            return Ok(());
        };
        let mut captured = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            let _ = stderr.read_to_string(&mut captured);
        }
        match captured.trim() {
            "" => anyhow::bail!("language server exited with {}", status),
            text => anyhow::bail!("language server exited with {}: {}", status, text),
        }
    }

    fn send(&mut self, message: &JsonValue) -> Result<()> {
        let frame = frame_message(&serde_json::to_string(message)?);
        self.writer.write_all(&frame)?;
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for LspProcess {
    fn drop(&mut self) {
        if self.child.kill().is_ok() {
            let _ = self.child.wait();
        }
    }
}

#[cfg(unix)]
fn make_nonblocking(reader: &ChildStdout) -> Result<()> {
    let current = fcntl(reader.as_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(current) | OFlag::O_NONBLOCK;
    fcntl(reader.as_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

/// Looks up an executable in a `PATH`-style list of directories.
pub fn find_tool_on_path(tool: &str, path_env: &str) -> Option<PathBuf> {
    let names: Vec<String> = if cfg!(windows) {
        vec![tool.to_string(), format!("{}.exe", tool)]
    } else {
        vec![tool.to_string()]
    };
    std::env::split_paths(path_env)
        .flat_map(|dir| names.iter().map(move |n| dir.join(n)))
        .find(|candidate| candidate.is_file())
}

/// Diagnostic source backed by a long-lived language server. The server is started on the
/// first scan and restarted after it dies. Scans share one connection and run one at a time;
/// each scan's timeout starts once it holds the connection.
pub struct LspSource {
    name: String,
    command: String,
    args: Vec<String>,
    language_id: String,
    extensions: Vec<String>,
    timeout: Duration,
    process: Arc<Mutex<Option<LspProcess>>>,
}

impl LspSource {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
        language_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args,
            language_id: language_id.into(),
            extensions: Vec::new(),
            timeout,
            process: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn from_config(config: &SourceConfig, timeout: Duration) -> errorgraph_core::Result<Self> {
        if config.kind != SourceKind::Lsp {
            return Err(ErrorGraphError::Config(format!(
                "source '{}' is not a language server source",
                config.name
            )));
        }
        Ok(Self::new(
            config.name.clone(),
            config.command.clone(),
            config.args.clone(),
            config.language_id.clone().unwrap_or_else(|| "python".to_string()),
            timeout,
        )
        .with_extensions(config.extensions.clone()))
    }

    fn resolve_command(&self) -> Option<PathBuf> {
        let path = Path::new(&self.command);
        if path.components().count() > 1 {
            return path.is_file().then(|| path.to_path_buf());
        }
        let path_env = std::env::var("PATH").unwrap_or_default();
        find_tool_on_path(&self.command, &path_env)
    }
}

#[async_trait]
impl DiagnosticSource for LspSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles(&self, file_path: &str) -> bool {
        extension_matches(&self.extensions, file_path)
    }

    fn times_itself(&self) -> bool {
        true
    }

    async fn scan(&self, root: &Path, file_path: &str) -> SourceOutcome {
        let Some(command) = self.resolve_command() else {
            return SourceOutcome::Unavailable(format!("{} not found on PATH", self.command));
        };

        let abs = root.join(file_path);
        let text = match tokio::fs::read_to_string(&abs).await {
            Ok(text) => text,
            Err(e) => return SourceOutcome::Unavailable(format!("cannot read {}: {}", file_path, e)),
        };
        let (Ok(root_uri), Ok(uri)) = (Url::from_directory_path(root), Url::from_file_path(&abs))
        else {
            return SourceOutcome::Unavailable(format!(
                "{} needs absolute paths, got root {}",
                self.name,
                root.display()
            ));
        };

        let args = self.args.clone();
        let language_id = self.language_id.clone();
        let timeout = self.timeout;
        let file = file_path.to_string();
        let root_uri = root_uri.to_string();
        let uri = uri.to_string();

        let mut guard = self.process.clone().lock_owned().await;
        // Dropping this future (timeout, cancellation) aborts the blocking exchange, which
        // then releases the connection.
        let abort = CancellationToken::new();
        let abort_on_drop = abort.clone().drop_guard();

        let joined = tokio::task::spawn_blocking(move || {
            if guard.is_none() {
                *guard = Some(LspProcess::start(&command, &args, &root_uri, timeout, abort.clone())?);
            }
            let Some(proc) = guard.as_mut() else {
                return Err(anyhow::anyhow!("language server not running"));
            };
            proc.set_abort(abort);
            let result = proc.document_diagnostics(&uri, &language_id, &text, timeout);
            if result.is_err() {
                // A failed exchange leaves the stream in an unknown state.
                *guard = None;
            }
            result.map(|items| (items, text))
        })
        .await;
        abort_on_drop.disarm();

        match joined {
            Ok(Ok((items, text))) => SourceOutcome::Ok(
                items
                    .iter()
                    .filter_map(|d| lsp_diagnostic_to_raw(&file, d, Some(&text)))
                    .collect(),
            ),
            Ok(Err(e)) => {
                let reason = format!("{e:#}");
                if reason.contains("timed out") || reason.contains("cancelled") {
                    SourceOutcome::Timeout
                } else {
                    SourceOutcome::Unavailable(reason)
                }
            }
            Err(e) => SourceOutcome::Unavailable(format!("language server task failed: {e}")),
        }
    }

    async fn shutdown(&self) {
        let mut guard = self.process.clone().lock_owned().await;
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(mut proc) = guard.take() {
                let _ = proc.call("shutdown", JsonValue::Null, Duration::from_secs(2));
                let _ = proc.notify("exit", JsonValue::Null);
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_split_and_back_to_back_frames() {
        let first = r#"{"jsonrpc":"2.0","id":1,"result":{"capabilities":{}}}"#;
        let second = r#"{"jsonrpc":"2.0","method":"window/logMessage","params":{"message":"hi"}}"#;
        let mut stream = frame_message(first);
        stream.extend(frame_message(second));

        let mut decoder = FrameDecoder::default();
        decoder.push(&stream[..10]);
        assert_eq!(decoder.next_frame().unwrap(), None);
        decoder.push(&stream[10..]);
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(first));
        assert_eq!(decoder.next_frame().unwrap().as_deref(), Some(second));
        assert_eq!(decoder.buffered(), 0);

        let mut broken = FrameDecoder::default();
        broken.push(b"X-Other: 1\r\n\r\n{}");
        assert!(broken.next_frame().is_err());
    }

    #[test]
    fn incoming_messages_are_classified() {
        let ok = Incoming::parse(r#"{"jsonrpc":"2.0","id":3,"result":{"items":[]}}"#).unwrap();
        assert!(matches!(ok, Incoming::Response { id: 3, outcome: Ok(_) }));

        let failed =
            Incoming::parse(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32601}}"#).unwrap();
        assert!(matches!(failed, Incoming::Response { id: 4, outcome: Err(_) }));

        let pushed = Incoming::parse(
            r#"{"jsonrpc":"2.0","method":"textDocument/publishDiagnostics","params":{"uri":"file:///a.py","diagnostics":[]}}"#,
        )
        .unwrap();
        assert!(matches!(pushed, Incoming::Notification { ref method, .. } if method == "textDocument/publishDiagnostics"));

        let server_request =
            Incoming::parse(r#"{"jsonrpc":"2.0","id":9,"method":"workspace/configuration"}"#)
                .unwrap();
        assert_eq!(server_request, Incoming::Other);
    }

    #[test]
    fn converts_zero_based_positions() {
        let diag = serde_json::json!({
            "range": {
                "start": { "line": 2, "character": 0 },
                "end": { "line": 2, "character": 9 }
            },
            "severity": 1,
            "code": "reportUndefinedVariable",
            "message": "\"np\" is not defined"
        });
        let raw = lsp_diagnostic_to_raw("a.py", &diag, None).unwrap();
        assert_eq!((raw.line, raw.column), (3, 1));
        assert_eq!((raw.end_line, raw.end_column), (Some(3), Some(10)));
        assert_eq!(raw.severity_text, "error");
        assert_eq!(raw.code.as_deref(), Some("reportUndefinedVariable"));

        let numeric = serde_json::json!({
            "range": { "start": { "line": 0, "character": 4 } },
            "severity": 4,
            "code": 6133,
            "message": "unused"
        });
        let raw = lsp_diagnostic_to_raw("b.py", &numeric, None).unwrap();
        assert_eq!(raw.code.as_deref(), Some("6133"));
        assert_eq!(raw.severity_text, "hint");
    }

    #[test]
    fn utf16_offsets_become_character_columns() {
        // "é" is one UTF-16 unit, "😀" is two; both are one character.
        let text = "import os\ns = \"é😀\" + missing\n";
        let diag = serde_json::json!({
            "range": {
                "start": { "line": 1, "character": 12 },
                "end": { "line": 1, "character": 19 }
            },
            "message": "\"missing\" is not defined"
        });
        let raw = lsp_diagnostic_to_raw("a.py", &diag, Some(text)).unwrap();
        assert_eq!((raw.line, raw.column), (2, 12));
        assert_eq!(raw.end_column, Some(19));
        let line = text.lines().nth(1).unwrap();
        let start: String = line.chars().skip(raw.column as usize - 1).take(7).collect();
        assert_eq!(start, "missing");

        assert_eq!(utf16_to_column("abc", 0, 1), 2);
        assert_eq!(utf16_to_column("abc", 0, 5), 6);
        assert_eq!(utf16_to_column("abc", 4, 2), 3);
    }

    #[cfg(unix)]
    #[test]
    fn silent_server_times_out() {
        let mut child = Command::new("sh")
            .args(["-c", "cat >/dev/null"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let writer = child.stdin.take().unwrap();
        let reader = child.stdout.take().unwrap();
        let stderr = child.stderr.take();
        let mut server = LspProcess::from_parts(child, writer, reader, stderr).unwrap();

        let err = server
            .call("initialize", serde_json::json!({}), Duration::from_millis(50))
            .unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
    }

    #[cfg(unix)]
    #[test]
    fn exited_server_reports_stderr() {
        let mut child = Command::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap();
        let writer = child.stdin.take().unwrap();
        let reader = child.stdout.take().unwrap();
        let stderr = child.stderr.take();
        let mut server = LspProcess::from_parts(child, writer, reader, stderr).unwrap();
        std::thread::sleep(Duration::from_millis(100));

        let err = server
            .call("initialize", serde_json::json!({}), Duration::from_secs(2))
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(!message.contains("timed out"), "{message}");
    }

    #[tokio::test]
    async fn missing_server_is_unavailable() {
        let source = LspSource::new(
            "pyright",
            "errorgraph-no-such-language-server",
            Vec::new(),
            "python",
            Duration::from_secs(1),
        );
        let dir = std::env::temp_dir();
        let outcome = source.scan(&dir, "a.py").await;
        assert!(matches!(outcome, SourceOutcome::Unavailable(_)));
    }

    #[test]
    fn tool_search_returns_none_for_empty_path() {
        assert_eq!(find_tool_on_path("pyright-langserver", ""), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abandoned_scan_releases_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\n").unwrap();
        // Never answers `initialize`.
        let source = LspSource::new(
            "silent",
            "sh",
            vec!["-c".to_string(), "cat >/dev/null".to_string()],
            "python",
            Duration::from_secs(30),
        );

        let abandoned =
            tokio::time::timeout(Duration::from_millis(100), source.scan(dir.path(), "a.py")).await;
        assert!(abandoned.is_err());

        let guard = tokio::time::timeout(Duration::from_secs(2), source.process.lock())
            .await
            .expect("connection still held by the abandoned exchange");
        assert!(guard.is_none());
    }
}
