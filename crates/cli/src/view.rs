//! Terminal rendering of the transcript.

use std::collections::HashSet;
use std::io::Write;

use gateway::TranscriptView;
use parking_lot::Mutex;
use proto::{ConnectionStatus, EntryId, TranscriptEntry};

/// Prints transcript entries as they arrive.
///
/// The terminal cannot take lines back, so only the ids of provisional
/// entries still on screen are tracked; the reply that follows a removal
/// makes the outcome visible.
pub struct TerminalView {
    out: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<HashSet<EntryId>>,
}

impl TerminalView {
    /// View writing to stdout.
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(std::io::stdout()))
    }

    /// View writing to an arbitrary sink.
    pub fn with_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Prints a connection status change.
    pub fn status_changed(&self, status: ConnectionStatus) {
        let marker = if status.is_connected() { "●" } else { "○" };
        self.write_line(&format!("{marker} {status}"));
    }

    /// Prints a local notice that is not part of the transcript.
    pub fn notice(&self, text: &str) {
        self.write_line(text);
    }

    /// Provisional entries printed and not yet removed.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn write_line(&self, line: &str) {
        let mut out = self.out.lock();
        // A closed stdout leaves nothing useful to report to.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl TranscriptView for TerminalView {
    fn append(&self, entry: TranscriptEntry) {
        self.write_line(&format_entry(&entry));
        if entry.provisional {
            self.pending.lock().insert(entry.id);
        }
    }

    fn remove(&self, id: &EntryId) -> bool {
        self.pending.lock().remove(id)
    }

    fn gate_rejected(&self) {
        self.write_line("🔒 Session is locked.");
    }
}

/// One terminal line (or block) for an entry.
///
/// Pre-rendered markup is flattened to text. Everything else is printed as
/// typed, minus control characters.
pub fn format_entry(entry: &TranscriptEntry) -> String {
    let body = if entry.is_pre_rendered {
        markup_to_plain(&entry.text)
    } else {
        strip_controls(&entry.text)
    };
    let time = entry.created_at.format("%H:%M");
    let direction = if entry.is_own { "›" } else { "‹" };
    if body.contains('\n') {
        let indented = body
            .lines()
            .map(|line| format!("    {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "[{time}] {direction} {} {}:\n{indented}",
            entry.avatar, entry.sender
        )
    } else {
        format!(
            "[{time}] {direction} {} {}: {body}",
            entry.avatar, entry.sender
        )
    }
}

/// Flattens sanitized HTML to terminal text.
///
/// Tags are dropped (block ends become line breaks, list items get a bullet)
/// and entities are decoded. Escaped text has no tags, so it comes back
/// verbatim.
pub fn markup_to_plain(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut chars = markup.chars();
    while let Some(c) = chars.next() {
        if c != '<' {
            out.push(c);
            continue;
        }
        let tag: String = chars.by_ref().take_while(|&c| c != '>').collect();
        let name = tag
            .split(|c: char| c.is_whitespace() || c == '/')
            .find(|s| !s.is_empty())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let closing = tag.starts_with('/');
        match (name.as_str(), closing) {
            ("br", _) | ("hr", _) => out.push('\n'),
            ("li", false) => out.push_str("• "),
            ("p" | "li" | "pre" | "blockquote" | "tr" | "ul" | "ol" | "table", true) => {
                out.push('\n')
            }
            (h, true) if h.len() == 2 && h.starts_with('h') => out.push('\n'),
            ("td" | "th", true) => out.push_str(" | "),
            _ => {}
        }
    }
    let decoded = decode_entities(&out);
    collapse_blank_lines(decoded.trim_end())
}

/// Drops terminal control characters (escape sequences included), keeping
/// line breaks and tabs.
fn strip_controls(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out
}
