//! Compiler process adapter
//!
//! Owns the external compiler child process and the single reader task that
//! drains its stdout. Outbound commands are framed by [`transport`] and
//! written to the child's stdin; everything the child prints comes back
//! through a [`MarkupReader`] and is handed to the [`Dispatcher`]. Plain
//! output outside any markup unit is compiler chatter and is only forwarded
//! when the config asks for it.

pub mod transport;

pub use transport::{LocationRequest, MoveDirection};

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::engine::{
    AbortReason, BufferSource, Dispatcher, EditorSink, RequestOutcome, RequestTable,
};
use crate::error::{EngineError, EngineResult};
use crate::markup::{MarkupReader, ReadItem};
use crate::models::{CompileResult, RequestId, Span};

pub struct PolyProcess {
    config: EngineConfig,
    table: Arc<RequestTable>,
    dispatcher: Dispatcher,
    sink: Arc<dyn EditorSink>,
    process: Mutex<Option<tokio::process::Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    terminated: AtomicBool,
    /// Bumped on every start/restart/stop so a reader from a dead session
    /// cannot tear down the live one.
    session: AtomicU64,
}

impl PolyProcess {
    pub fn new(
        config: EngineConfig,
        buffers: Arc<dyn BufferSource>,
        sink: Arc<dyn EditorSink>,
    ) -> Arc<Self> {
        let table = Arc::new(RequestTable::new());
        let dispatcher = Dispatcher::new(Arc::clone(&table), buffers, Arc::clone(&sink));
        Arc::new(Self {
            config,
            table,
            dispatcher,
            sink,
            process: Mutex::new(None),
            stdin: Mutex::new(None),
            terminated: AtomicBool::new(true),
            session: AtomicU64::new(0),
        })
    }

    pub fn table(&self) -> &Arc<RequestTable> {
        &self.table
    }

    /// Spawn the compiler and start draining its output. A no-op when the
    /// process is already running.
    pub async fn start(self: &Arc<Self>) -> EngineResult<()> {
        if self.is_running().await {
            return Ok(());
        }

        let argv = self.config.command_line();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| EngineError::ProcessStart("compiler command is empty".to_string()))?;

        tracing::info!("Starting compiler: {} {:?}", program, args);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::ProcessStart(format!("{}: {}", program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::ProcessStart("failed to open stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::ProcessStart("failed to open stdout".to_string()))?;

        *self.process.lock().await = Some(child);
        *self.stdin.lock().await = Some(stdin);
        self.terminated.store(false, Ordering::Release);

        let generation = self.session.fetch_add(1, Ordering::AcqRel) + 1;
        let reader = Arc::clone(self);
        tokio::spawn(async move {
            reader.read_markup(stdout, generation).await;
        });
        Ok(())
    }

    /// Kill the current process and spawn a fresh one. Every pending request
    /// fails with `ProcessRestarted` before the new process accepts work, and
    /// all parse ids from the old session are forgotten.
    pub async fn restart(self: &Arc<Self>) -> EngineResult<()> {
        tracing::info!("Restarting compiler process");
        self.session.fetch_add(1, Ordering::AcqRel);
        self.table.abort_all(AbortReason::Restarted);

        self.stdin.lock().await.take();
        if let Some(mut child) = self.process.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.terminated.store(true, Ordering::Release);
        self.start().await
    }

    /// Shut the compiler down: close stdin, give it a moment to exit, then
    /// kill it. Pending requests fail with `ProcessTerminated`.
    pub async fn stop(&self) {
        self.session.fetch_add(1, Ordering::AcqRel);
        self.stdin.lock().await.take();

        if let Some(mut child) = self.process.lock().await.take() {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("Compiler exited: {}", status),
                Ok(Err(e)) => tracing::warn!("Error waiting for compiler exit: {}", e),
                Err(_) => {
                    tracing::warn!("Compiler did not exit in time, killing");
                    let _ = child.kill().await;
                }
            }
        }
        self.terminated.store(true, Ordering::Release);
        self.table.abort_all(AbortReason::Terminated);
    }

    pub async fn is_running(&self) -> bool {
        let mut guard = self.process.lock().await;
        match guard.as_mut() {
            // try_wait returns Ok(None) while the child is still alive
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    async fn read_markup(self: Arc<Self>, mut stdout: ChildStdout, generation: u64) {
        let mut reader = MarkupReader::new();
        let mut buf = [0u8; 8192];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    reader.push(&buf[..n]);
                    loop {
                        match reader.next() {
                            Ok(Some(ReadItem::Unit(tree))) => self.dispatcher.dispatch(&tree),
                            Ok(Some(ReadItem::Output(text))) => self.on_output(&text),
                            Ok(None) => break,
                            Err(err) => tracing::warn!("Skipping malformed markup: {}", err),
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Error reading compiler output: {}", e);
                    break;
                }
            }
        }

        // Only the reader of the live session reports termination; stale
        // readers exit quietly after a restart or stop.
        if self.session.load(Ordering::Acquire) == generation {
            tracing::warn!("Compiler process closed its output stream");
            self.terminated.store(true, Ordering::Release);
            self.table.abort_all(AbortReason::Terminated);
        }
    }

    fn on_output(&self, text: &str) {
        let trimmed = text.trim_end();
        if trimmed.is_empty() {
            return;
        }
        tracing::debug!("compiler: {}", trimmed);
        if self.config.echo_process_output {
            self.sink.log(trimmed);
        }
    }

    async fn send(&self, bytes: &[u8]) -> EngineResult<()> {
        if self.terminated.load(Ordering::Acquire) {
            return Err(EngineError::ProcessTerminated);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(EngineError::NotConnected)?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Submit `source` for compilation as the current contents of `file`.
    /// Returns the request id to wait on; the result also reaches the editor
    /// sink as a diagnostics replacement when it arrives.
    pub async fn compile(&self, file: &str, source: &str) -> EngineResult<RequestId> {
        let id = self.table.allocate(file);
        tracing::debug!("Compile request {} for {}", id, file);
        match self.send(&transport::encode_compile(id, file, source)).await {
            Ok(()) => Ok(id),
            Err(err) => {
                self.table.remove(id);
                Err(err)
            }
        }
    }

    /// Compile and block until the result arrives. `timeout` falls back to
    /// the configured compile timeout; the record is consumed either way.
    pub async fn compile_and_wait(
        &self,
        file: &str,
        source: &str,
        timeout: Option<Duration>,
    ) -> EngineResult<CompileResult> {
        let id = self.compile(file, source).await?;
        let timeout = timeout.or_else(|| Some(self.config.compile_timeout()));
        let outcome = self.table.wait(id, timeout).await;
        self.table.remove(id);
        match outcome?.as_compile() {
            Some(result) => Ok(result.clone()),
            None => Err(EngineError::MalformedMarkup {
                kind: 'R',
                detail: "compile request resolved to a non-compile response".to_string(),
            }),
        }
    }

    /// Properties of the parse-tree node covering `span` in `file`.
    pub async fn properties_at(&self, file: &str, span: Span) -> EngineResult<RequestId> {
        self.query(file, |id, parse_id| {
            transport::encode_properties(id, parse_id, span)
        })
        .await
    }

    /// Type of the value at `span` in `file`.
    pub async fn type_at(&self, file: &str, span: Span) -> EngineResult<RequestId> {
        self.query(file, |id, parse_id| {
            transport::encode_type_query(id, parse_id, span)
        })
        .await
    }

    /// Where the identifier at `span` was declared.
    pub async fn declaration_at(&self, file: &str, span: Span) -> EngineResult<RequestId> {
        self.location(LocationRequest::Declared, file, span).await
    }

    /// Where the structure enclosing `span` was opened.
    pub async fn open_location_at(&self, file: &str, span: Span) -> EngineResult<RequestId> {
        self.location(LocationRequest::WhereOpened, file, span).await
    }

    /// Location of the parent structure of the entity at `span`.
    pub async fn parent_structure_at(&self, file: &str, span: Span) -> EngineResult<RequestId> {
        self.location(LocationRequest::ParentStructure, file, span)
            .await
    }

    async fn location(
        &self,
        req: LocationRequest,
        file: &str,
        span: Span,
    ) -> EngineResult<RequestId> {
        self.query(file, |id, parse_id| {
            transport::encode_location(req, id, parse_id, span)
        })
        .await
    }

    /// Move the caret through the parse tree relative to `span`.
    pub async fn move_caret(
        &self,
        direction: MoveDirection,
        file: &str,
        span: Span,
    ) -> EngineResult<RequestId> {
        self.query(file, |id, parse_id| {
            transport::encode_move(direction, id, parse_id, span)
        })
        .await
    }

    async fn query(
        &self,
        file: &str,
        encode: impl FnOnce(RequestId, &str) -> Vec<u8>,
    ) -> EngineResult<RequestId> {
        let parse_id = self
            .table
            .last_parse_for(file)
            .ok_or_else(|| EngineError::NotCompiled {
                file: file.to_string(),
            })?;
        let id = self.table.allocate(file);
        match self.send(&encode(id, &parse_id)).await {
            Ok(()) => Ok(id),
            Err(err) => {
                self.table.remove(id);
                Err(err)
            }
        }
    }

    /// Block on a previously issued request. `timeout` falls back to the
    /// configured query timeout; the record is consumed on success or abort.
    pub async fn wait(
        &self,
        id: RequestId,
        timeout: Option<Duration>,
    ) -> EngineResult<Arc<RequestOutcome>> {
        let timeout = timeout.or_else(|| Some(self.config.query_timeout()));
        let outcome = self.table.wait(id, timeout).await;
        if !matches!(outcome, Err(EngineError::Timeout { .. })) {
            self.table.remove(id);
        }
        outcome
    }
}

impl Drop for PolyProcess {
    fn drop(&mut self) {
        // kill_on_drop handles the child; this only covers the case where
        // the runtime is still alive and the lock is free.
        if let Ok(mut guard) = self.process.try_lock()
            && let Some(child) = guard.as_mut()
        {
            let _ = child.start_kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryBuffers, RecordingSink};
    use std::io::Write;

    fn harness(command: &str) -> (Arc<PolyProcess>, Arc<RecordingSink>) {
        let config = EngineConfig {
            command: command.to_string(),
            ..Default::default()
        };
        let buffers = Arc::new(
            MemoryBuffers::new()
                .with_file("a.ml", "val x = 1;\n")
                .with_active("a.ml"),
        );
        let sink = Arc::new(RecordingSink::new());
        let process = PolyProcess::new(config, buffers, Arc::clone(&sink) as Arc<dyn EditorSink>);
        (process, sink)
    }

    #[tokio::test]
    async fn test_send_without_start_fails_and_releases_record() {
        let (process, _sink) = harness("cat");
        let err = process.compile("a.ml", "val x = 1;").await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessTerminated));
        assert!(process.table().is_empty());
    }

    #[tokio::test]
    async fn test_query_before_compile_fails() {
        let (process, _sink) = harness("cat");
        process.start().await.unwrap();

        let err = process
            .type_at("a.ml", Span::new(4, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotCompiled { .. }));

        process.stop().await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_aborts_pending() {
        let (process, _sink) = harness("cat");
        process.start().await.unwrap();
        process.start().await.unwrap();
        assert!(process.is_running().await);

        let id = process.compile("a.ml", "val x = 1;").await.unwrap();
        process.stop().await;
        assert!(!process.is_running().await);

        let err = process.wait(id, None).await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessTerminated));
    }

    #[tokio::test]
    async fn test_restart_aborts_with_restart_reason() {
        let (process, _sink) = harness("cat");
        process.start().await.unwrap();

        let id = process.compile("a.ml", "val x = 1;").await.unwrap();
        let waiter = {
            let process = Arc::clone(&process);
            tokio::spawn(async move { process.wait(id, None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        process.restart().await.unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, EngineError::ProcessRestarted));
        assert!(process.is_running().await);

        process.stop().await;
    }

    #[tokio::test]
    async fn test_compile_result_from_scripted_compiler() {
        // Fake compiler that answers the first compile request (id 1) with a
        // clean result for parse id p1, then lingers so the reader stays up.
        let mut script = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            script,
            "printf '\\033R1\\033,p1\\033,S\\033r'\nsleep 2"
        )
        .unwrap();

        let (process, _sink) = harness(&format!("sh {}", script.path().display()));
        process.start().await.unwrap();

        let result = process
            .compile_and_wait("a.ml", "val x = 1;", Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(result.request_id, RequestId(1));
        assert_eq!(result.parse_id, "p1");
        assert!(result.is_clean());
        assert_eq!(process.table().last_parse_for("a.ml").as_deref(), Some("p1"));
        assert!(process.table().is_empty());

        process.stop().await;
    }

    #[tokio::test]
    async fn test_reader_eof_terminates_session() {
        // "true" exits immediately, so the reader sees EOF at once.
        let (process, _sink) = harness("true");
        process.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = process.compile("a.ml", "val x = 1;").await.unwrap_err();
        assert!(matches!(err, EngineError::ProcessTerminated));
    }
}
