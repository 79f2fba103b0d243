use std::sync::Arc;

use kls_core::{Position, Range};
use thiserror::Error;

/// An LSP-style content change: `None` range replaces the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChange {
    pub range: Option<Range>,
    pub text: String,
}

impl ContentChange {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            range: None,
            text: text.into(),
        }
    }

    pub fn replace(range: Range, text: impl Into<String>) -> Self {
        Self {
            range: Some(range),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("invalid range")]
    InvalidRange,
}

/// An in-memory editor buffer with versioning and incremental edits.
///
/// Content is kept free of `\r`: full replacements are normalized on entry
/// and inserted fragments are normalized per edit, so positions always agree
/// with the stored text.
#[derive(Debug, Clone)]
pub struct Document {
    text: Arc<String>,
    version: i32,
    line_offsets: Vec<usize>,
}

impl Document {
    pub fn new(text: impl Into<String>, version: i32) -> Self {
        let text = normalize_line_endings(&text.into());
        let line_offsets = compute_line_offsets(&text);
        Self {
            text: Arc::new(text),
            version,
            line_offsets,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_arc(&self) -> Arc<String> {
        Arc::clone(&self.text)
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Applies incremental changes in order and bumps the version.
    pub fn apply_changes(
        &mut self,
        new_version: i32,
        changes: &[ContentChange],
    ) -> Result<(), DocumentError> {
        for change in changes {
            self.apply_change(change)?;
        }
        self.version = new_version;
        Ok(())
    }

    fn apply_change(&mut self, change: &ContentChange) -> Result<(), DocumentError> {
        let replacement = normalize_line_endings(&change.text);
        let (start, end) = match change.range {
            Some(range) => {
                let start = self.position_to_offset(range.start);
                let end = self.position_to_offset(range.end);
                if start > end || end > self.text.len() {
                    return Err(DocumentError::InvalidRange);
                }
                (start, end)
            }
            None => (0, self.text.len()),
        };

        let text = Arc::make_mut(&mut self.text);
        text.replace_range(start..end, &replacement);
        self.line_offsets = compute_line_offsets(text);
        Ok(())
    }

    pub fn position_to_offset(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.line_offsets.len() {
            return self.text.len();
        }

        let line_start = self.line_offsets[line];
        let mut line_end = if line + 1 < self.line_offsets.len() {
            self.line_offsets[line + 1]
        } else {
            self.text.len()
        };
        // LSP positions are defined over the line text, excluding `\n`.
        if line_end > line_start && self.text.as_bytes()[line_end - 1] == b'\n' {
            line_end -= 1;
        }

        let line_slice = &self.text[line_start..line_end];
        line_start + utf16_column_to_byte_offset_clamped(line_slice, position.character)
    }
}

/// Replaces `\r\n` and bare `\r` with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    if !text.contains('\r') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

fn compute_line_offsets(text: &str) -> Vec<usize> {
    let mut offsets = vec![0];
    for (idx, byte) in text.bytes().enumerate() {
        if byte == b'\n' {
            offsets.push(idx + 1);
        }
    }
    offsets
}

/// Converts a UTF-16 column into a byte offset into `line`, clamping past
/// the line end and onto character starts.
fn utf16_column_to_byte_offset_clamped(line: &str, column_utf16: u32) -> usize {
    let mut col: u32 = 0;
    for (idx, ch) in line.char_indices() {
        if col >= column_utf16 {
            return idx;
        }
        let ch_len = ch.len_utf16() as u32;
        if col + ch_len > column_utf16 {
            return idx;
        }
        col = col.saturating_add(ch_len);
    }
    line.len()
}
