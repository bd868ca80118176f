//! Collaborator boundary between the engine and its host editor
//!
//! The engine never touches editor state directly. It reads buffer contents
//! through `BufferSource` and delivers typed events through `EditorSink`;
//! both must be fast and non-blocking, since they are called from the
//! delivery path that unblocks every waiting request.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use crate::models::{Diagnostic, LinePos, Span};

/// Read-only view of the host's buffers.
pub trait BufferSource: Send + Sync {
    /// File shown in the active viewing context, if any.
    fn active_file(&self) -> Option<String>;

    /// Text of `span` within `file`, when the file is available.
    fn read_span(&self, file: &str, span: Span) -> Option<String>;

    /// Line/column of a byte offset within `file`.
    fn line_at(&self, file: &str, offset: u64) -> Option<LinePos>;
}

/// Consumer of the engine's typed events.
pub trait EditorSink: Send + Sync {
    /// Install a full replacement diagnostic set for `file`.
    fn replace_diagnostics(&self, file: &str, diagnostics: Vec<Diagnostic>);

    /// Add one diagnostic-style annotation without clearing existing ones.
    fn append_diagnostic(&self, file: &str, diagnostic: Diagnostic);

    /// Move the selection to `span` in `file`.
    fn set_selection(&self, file: &str, span: Span);

    fn log(&self, message: &str);
}

/// Serializable form of every sink call, used by the CLI output and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ReplaceDiagnostics {
        file: String,
        diagnostics: Vec<Diagnostic>,
    },
    AppendDiagnostic {
        file: String,
        diagnostic: Diagnostic,
    },
    SetSelection {
        file: String,
        span: Span,
    },
    Log {
        message: String,
    },
}

/// In-memory `BufferSource` over a fixed set of files. Serves the CLI (which
/// loads the files it was asked about) and the dispatcher tests.
#[derive(Debug, Default)]
pub struct MemoryBuffers {
    files: HashMap<String, String>,
    active: Mutex<Option<String>>,
}

impl MemoryBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.insert(name.into(), content.into());
        self
    }

    pub fn with_active(self, name: impl Into<String>) -> Self {
        self.set_active(Some(name.into()));
        self
    }

    pub fn set_active(&self, name: Option<String>) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = name;
    }
}

impl BufferSource for MemoryBuffers {
    fn active_file(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn read_span(&self, file: &str, span: Span) -> Option<String> {
        let content = self.files.get(file)?;
        let start = (span.start as usize).min(content.len());
        let end = (span.end as usize).min(content.len()).max(start);
        content.get(start..end).map(str::to_string)
    }

    fn line_at(&self, file: &str, offset: u64) -> Option<LinePos> {
        let content = self.files.get(file)?;
        let offset = (offset as usize).min(content.len());
        let mut line = 0u32;
        let mut line_start = 0usize;
        for (i, b) in content.bytes().take(offset).enumerate() {
            if b == b'\n' {
                line += 1;
                line_start = i + 1;
            }
        }
        Some(LinePos::new(line, (offset - line_start) as u32))
    }
}

/// `EditorSink` that records every event, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn record(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl EditorSink for RecordingSink {
    fn replace_diagnostics(&self, file: &str, diagnostics: Vec<Diagnostic>) {
        self.record(Event::ReplaceDiagnostics {
            file: file.to_string(),
            diagnostics,
        });
    }

    fn append_diagnostic(&self, file: &str, diagnostic: Diagnostic) {
        self.record(Event::AppendDiagnostic {
            file: file.to_string(),
            diagnostic,
        });
    }

    fn set_selection(&self, file: &str, span: Span) {
        self.record(Event::SetSelection {
            file: file.to_string(),
            span,
        });
    }

    fn log(&self, message: &str) {
        tracing::debug!("{}", message);
        self.record(Event::Log {
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_buffers_line_at() {
        let buffers = MemoryBuffers::new().with_file("a.ml", "val x = 1;\nval y = x + true;\n");

        let pos = buffers.line_at("a.ml", 0).unwrap();
        assert_eq!((pos.line, pos.column), (0, 0));

        // offset 11 is the start of the second line
        let pos = buffers.line_at("a.ml", 11).unwrap();
        assert_eq!((pos.line, pos.column), (1, 0));

        let pos = buffers.line_at("a.ml", 15).unwrap();
        assert_eq!((pos.line, pos.column), (1, 4));

        assert!(buffers.line_at("missing.ml", 0).is_none());
    }

    #[test]
    fn test_memory_buffers_read_span() {
        let buffers = MemoryBuffers::new().with_file("a.ml", "val x = 1;");
        assert_eq!(
            buffers.read_span("a.ml", Span::new(4, 5)).as_deref(),
            Some("x")
        );
        // out-of-range spans clamp instead of failing
        assert_eq!(
            buffers.read_span("a.ml", Span::new(8, 999)).as_deref(),
            Some("1;")
        );
        assert!(buffers.read_span("missing.ml", Span::new(0, 1)).is_none());
    }

    #[test]
    fn test_active_file_tracking() {
        let buffers = MemoryBuffers::new().with_file("a.ml", "").with_active("a.ml");
        assert_eq!(buffers.active_file().as_deref(), Some("a.ml"));
        buffers.set_active(None);
        assert_eq!(buffers.active_file(), None);
    }

    #[test]
    fn test_recording_sink_orders_events() {
        let sink = RecordingSink::new();
        sink.set_selection("a.ml", Span::new(1, 2));
        sink.log("hello");

        let events = sink.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::SetSelection { .. }));
        assert!(matches!(events[1], Event::Log { .. }));
        assert!(sink.events().is_empty());
    }
}
