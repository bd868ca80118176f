//! Single-consumer dispatch of incoming markup units
//!
//! One unit at a time: read the kind tag, extract the positional fields that
//! family expects, resolve the originating request, complete it and emit the
//! typed event. Everything here must stay non-blocking — this is the only
//! path that can complete records, so stalling it stalls every waiter.
//!
//! Correlation keys are fixed per family: compile results resolve by request
//! id; property, type, navigation and location responses resolve their
//! target file by parse id (they may arrive long after the compile that
//! produced the parse). Unknown ids are an expected, recoverable condition.

use std::sync::Arc;

use crate::engine::events::{BufferSource, EditorSink};
use crate::engine::requests::{RequestOutcome, RequestTable};
use crate::markup::{MarkupKind, MarkupNode, MarkupTree};
use crate::models::{
    CompileResult, Diagnostic, LinePos, RemoteLocation, RequestId, Severity, Span,
};

pub struct Dispatcher {
    table: Arc<RequestTable>,
    buffers: Arc<dyn BufferSource>,
    sink: Arc<dyn EditorSink>,
}

/// Why a unit was dropped instead of dispatched.
#[derive(Debug)]
enum Discard {
    Malformed {
        file: Option<String>,
        detail: String,
    },
    UnknownRequest(RequestId),
    UnknownParse(String),
    UnknownKind(char),
}

impl Dispatcher {
    pub fn new(
        table: Arc<RequestTable>,
        buffers: Arc<dyn BufferSource>,
        sink: Arc<dyn EditorSink>,
    ) -> Self {
        Self {
            table,
            buffers,
            sink,
        }
    }

    pub fn table(&self) -> &Arc<RequestTable> {
        &self.table
    }

    /// Route one markup unit. Never fails outward: a bad unit is reported
    /// and dropped, and the delivery path keeps going.
    pub fn dispatch(&self, tree: &MarkupTree) {
        let tag = tree.kind.tag();
        match self.dispatch_unit(tree) {
            Ok(()) => {}
            Err(Discard::Malformed { file, detail }) => {
                tracing::warn!("Malformed '{}' unit: {}", tag, detail);
                match file {
                    Some(file) => {
                        let diag = Diagnostic::new(
                            Span::new(0, 0),
                            Severity::Error,
                            format!("Internal protocol error: {}", detail),
                        );
                        self.sink.append_diagnostic(&file, diag);
                    }
                    None => {
                        self.sink
                            .log(&format!("Internal protocol error in '{}' unit: {}", tag, detail));
                    }
                }
            }
            Err(Discard::UnknownRequest(id)) => {
                // Expected for duplicate or stale responses; not a user error.
                tracing::debug!(
                    "Dropping '{}' unit for unknown request id {} (already consumed?)",
                    tag,
                    id
                );
            }
            Err(Discard::UnknownParse(parse_id)) => {
                tracing::debug!(
                    "Dropping '{}' unit for unknown parse id '{}' (stale session?)",
                    tag,
                    parse_id
                );
            }
            Err(Discard::UnknownKind(kind)) => {
                tracing::warn!("Dropping unit with unrecognized kind tag '{}'", kind);
            }
        }
    }

    fn dispatch_unit(&self, tree: &MarkupTree) -> Result<(), Discard> {
        match tree.kind {
            MarkupKind::Compile => self.on_compile(tree),
            MarkupKind::Properties
            | MarkupKind::MoveFirstChild
            | MarkupKind::MoveNext
            | MarkupKind::MovePrevious
            | MarkupKind::MoveParent => self.on_selection(tree),
            MarkupKind::TypeInfo => self.on_type_info(tree),
            MarkupKind::LocDeclared
            | MarkupKind::LocWhereOpened
            | MarkupKind::LocParentStructure => self.on_location(tree),
            MarkupKind::Error => Err(Discard::Malformed {
                file: None,
                detail: "error block outside a compile result".into(),
            }),
            MarkupKind::Unknown(c) => Err(Discard::UnknownKind(c)),
        }
    }

    /// Compile family: request id, parse id, status, then nested error
    /// blocks. Completes the record (waking waiters) and installs a full
    /// replacement diagnostic set for the target file.
    fn on_compile(&self, tree: &MarkupTree) -> Result<(), Discard> {
        let mut fields = Fields::new(tree);
        let request_id = fields
            .request_id()
            .map_err(|detail| Discard::Malformed { file: None, detail })?;

        let file = self
            .table
            .lookup(request_id)
            .map(|r| r.target_file().to_string());
        let ctx = |detail: String| Discard::Malformed {
            file: file.clone(),
            detail,
        };

        let parse_id = fields.text("parse id").map_err(&ctx)?.to_string();
        let status = fields.text("status").map_err(&ctx)?;
        let is_failure = status.trim() == "F";

        let mut diagnostics = Vec::new();
        for block in fields.error_blocks().map_err(&ctx)? {
            diagnostics.push(parse_error_block(block).map_err(&ctx)?);
        }

        let Some(file) = file else {
            return Err(Discard::UnknownRequest(request_id));
        };

        let result = CompileResult {
            request_id,
            parse_id: parse_id.clone(),
            is_failure,
            diagnostics: diagnostics.clone(),
        };

        self.table.bind_parse(parse_id, &file);
        self.table
            .complete(request_id, RequestOutcome::Compile(result));

        // Diagnostics are a full replacement per compile, never accumulated.
        let installed = if is_failure {
            vec![Diagnostic::new(
                Span::new(0, 0),
                Severity::Error,
                "Compiler failed to process this file",
            )]
        } else {
            diagnostics
        };
        let installed = installed
            .into_iter()
            .map(|d| {
                let position = self.position_of(&file, d.span);
                Diagnostic { position, ..d }
            })
            .collect();
        self.sink.replace_diagnostics(&file, installed);
        Ok(())
    }

    /// Properties and navigation families: select the answered span, but
    /// only when the request's file is still the one on display.
    fn on_selection(&self, tree: &MarkupTree) -> Result<(), Discard> {
        let loc = QueryFields::parse(tree)?;
        let file = self
            .table
            .file_for_parse(&loc.parse_id)
            .ok_or_else(|| Discard::UnknownParse(loc.parse_id.clone()))?;

        if self.buffers.active_file().as_deref() == Some(file.as_str()) {
            self.sink.set_selection(&file, loc.span);
        }
        if let Some(id) = loc.request_id {
            self.table.complete(id, RequestOutcome::Selection(loc.span));
        }
        Ok(())
    }

    /// Type-info family: selection plus an annotation carrying the type
    /// string, or a "not a value" note when the trailing child is absent.
    fn on_type_info(&self, tree: &MarkupTree) -> Result<(), Discard> {
        let mut loc = QueryFields::parse(tree)?;
        let file = self
            .table
            .file_for_parse(&loc.parse_id)
            .ok_or_else(|| Discard::UnknownParse(loc.parse_id.clone()))?;
        let type_desc = loc.trailing_text();

        if self.buffers.active_file().as_deref() == Some(file.as_str()) {
            self.sink.set_selection(&file, loc.span);

            let text = self.buffers.read_span(&file, loc.span).unwrap_or_default();
            let message = match &type_desc {
                Some(ty) => format!("`{}` is the type of: `{}`", ty, text),
                None => format!("Not a value, so no type: `{}`", text),
            };
            let diag = Diagnostic {
                position: self.position_of(&file, loc.span),
                ..Diagnostic::new(loc.span, Severity::Info, message)
            };
            self.sink.append_diagnostic(&file, diag);
        }
        if let Some(id) = loc.request_id {
            self.table.complete(
                id,
                RequestOutcome::TypeInfo {
                    span: loc.span,
                    type_desc,
                },
            );
        }
        Ok(())
    }

    /// Location families: annotate at the remote location when it exists,
    /// otherwise report "no declaration" at the original span. Absent
    /// trailing children are the protocol's way of saying "no data".
    fn on_location(&self, tree: &MarkupTree) -> Result<(), Discard> {
        let mut loc = QueryFields::parse(tree)?;
        let src_file = self
            .table
            .file_for_parse(&loc.parse_id)
            .ok_or_else(|| Discard::UnknownParse(loc.parse_id.clone()))?;
        let remote = loc.remote_location().map_err(|detail| Discard::Malformed {
            file: Some(src_file.clone()),
            detail,
        })?;

        let src_text = self
            .buffers
            .read_span(&src_file, loc.span)
            .unwrap_or_default();

        match &remote {
            Some(remote) => {
                let diag = Diagnostic {
                    position: self.position_of(&remote.file, remote.span),
                    ..Diagnostic::new(
                        remote.span,
                        Severity::Warning,
                        format!("Location of: `{}`", src_text),
                    )
                };
                self.sink.append_diagnostic(&remote.file, diag);
            }
            None => {
                let diag = Diagnostic {
                    position: self.position_of(&src_file, loc.span),
                    ..Diagnostic::new(
                        loc.span,
                        Severity::Warning,
                        format!("No declaration found for: `{}`", src_text),
                    )
                };
                self.sink.append_diagnostic(&src_file, diag);
            }
        }
        if let Some(id) = loc.request_id {
            self.table.complete(
                id,
                RequestOutcome::Location {
                    span: loc.span,
                    remote,
                },
            );
        }
        Ok(())
    }

    /// Line/column of a span against the live buffer, with an end column
    /// only when the span ends on the same line.
    fn position_of(&self, file: &str, span: Span) -> Option<LinePos> {
        let start = self.buffers.line_at(file, span.start)?;
        match self.buffers.line_at(file, span.end) {
            Some(end) if end.line == start.line => Some(start.with_end(end.column)),
            _ => Some(start),
        }
    }
}

/// Positional cursor over a unit's children. Field order is fixed per
/// family; a nested block or non-numeric text where a number is expected is
/// a malformed unit, while running out of optional trailing children is not.
struct Fields<'a> {
    iter: std::iter::Peekable<std::slice::Iter<'a, MarkupNode>>,
}

impl<'a> Fields<'a> {
    fn new(tree: &'a MarkupTree) -> Self {
        Self {
            iter: tree.children.iter().peekable(),
        }
    }

    fn text(&mut self, what: &str) -> Result<&'a str, String> {
        match self.iter.next() {
            Some(MarkupNode::Text(s)) => Ok(s),
            Some(MarkupNode::Node(n)) => Err(format!(
                "expected text for {}, found nested '{}' block",
                what,
                n.kind.tag()
            )),
            None => Err(format!("missing {} field", what)),
        }
    }

    fn number(&mut self, what: &str) -> Result<u64, String> {
        let text = self.text(what)?;
        text.trim()
            .parse()
            .map_err(|_| format!("expected number for {}, found '{}'", what, text))
    }

    fn request_id(&mut self) -> Result<RequestId, String> {
        self.number("request id").map(RequestId)
    }

    fn has_more(&mut self) -> bool {
        self.iter.peek().is_some()
    }

    /// Next child as text, if any children remain.
    fn opt_text(&mut self) -> Option<&'a str> {
        match self.iter.peek() {
            Some(MarkupNode::Text(_)) => self.iter.next().and_then(MarkupNode::as_text),
            _ => None,
        }
    }

    /// Remaining children as nested error blocks.
    fn error_blocks(&mut self) -> Result<Vec<&'a MarkupTree>, String> {
        let mut blocks = Vec::new();
        for child in &mut self.iter {
            match child {
                MarkupNode::Node(tree) if tree.kind == MarkupKind::Error => blocks.push(tree),
                MarkupNode::Node(tree) => {
                    return Err(format!(
                        "expected error block, found nested '{}' block",
                        tree.kind.tag()
                    ));
                }
                MarkupNode::Text(text) => {
                    return Err(format!("expected error block, found text '{}'", text));
                }
            }
        }
        Ok(blocks)
    }
}

/// Shared prefix of every query-family unit: request id, parse id, span.
struct QueryFields<'a> {
    request_id: Option<RequestId>,
    parse_id: String,
    span: Span,
    rest: Fields<'a>,
}

impl<'a> QueryFields<'a> {
    fn parse(tree: &'a MarkupTree) -> Result<Self, Discard> {
        let mut fields = Fields::new(tree);
        let ctx = |detail: String| Discard::Malformed { file: None, detail };

        // The request id is opaque on this path; resolution goes through the
        // parse id, so a non-numeric id only disables waiter completion.
        let request_id = fields.text("request id").map_err(ctx)?.trim().parse().ok();
        let parse_id = fields.text("parse id").map_err(ctx)?.to_string();
        let start = fields.number("start offset").map_err(ctx)?;
        let end = fields.number("end offset").map_err(ctx)?;

        Ok(Self {
            request_id: request_id.map(RequestId),
            parse_id,
            span: Span::new(start, end),
            rest: fields,
        })
    }

    fn trailing_text(&mut self) -> Option<String> {
        self.rest.opt_text().map(str::to_string)
    }

    /// Optional remote-location suffix: file, line, start, end. Absence
    /// means "no such location"; a partial suffix is malformed.
    fn remote_location(&mut self) -> Result<Option<RemoteLocation>, String> {
        if !self.rest.has_more() {
            return Ok(None);
        }
        let file = self.rest.text("location file")?.to_string();
        let line = self.rest.number("location line")?;
        let start = self.rest.number("location start")?;
        let end = self.rest.number("location end")?;
        Ok(Some(RemoteLocation {
            file,
            line,
            span: Span::new(start, end),
        }))
    }
}

fn parse_error_block(tree: &MarkupTree) -> Result<Diagnostic, String> {
    let mut fields = Fields::new(tree);
    let severity = Severity::from_tag(fields.text("severity")?);
    let start = fields.number("error start")?;
    let end = fields.number("error end")?;
    let message = fields.text("error message")?.to_string();
    Ok(Diagnostic::new(Span::new(start, end), severity, message))
}
