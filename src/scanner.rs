//! Scan Engine - Single-Pass Template Conversion
//!
//! The engine walks the input text once, character by character. At every
//! position each registered strategy is offered the cursor, in registration
//! order; the first match wins, so more specific strategies must be
//! registered before more general ones. Matched strategies live on a stack
//! while their construct is open, which is what makes nested constructs work:
//! the scan loop keeps matching inside an open construct while the outer
//! strategy stays suspended below.
//!
//! Input the engine does not recognize is copied through verbatim. The engine
//! itself never fails; errors come from strategies that started consuming a
//! construct and found it malformed.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attributes::{self, AttributeList};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Malformed {construct} at line {line}: {message}")]
    MalformedConstruct {
        construct: &'static str,
        line: usize,
        message: String,
    },
}

/// Kind of a template unit. Tags and layouts are reusable; templates are the
/// top-level entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Template,
    Tag,
    Layout,
}

/// A reference to another template unit, recorded while scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub name: String,
    pub kind: UnitKind,
    pub line: usize,
}

/// Everything one scan produced: the generated source (imports already
/// spliced in), the references it touched, the declared parameters in order,
/// and any hoisted binary text chunks.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub source: String,
    pub references: Vec<Reference>,
    pub params: Vec<String>,
    pub binary_chunks: Vec<Vec<u8>>,
}

/// A lexical construct currently open on the strategy stack. Pushed by
/// strategies that span a body (layouts), inspected and closed by the
/// strategies that terminate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructFrame {
    pub construct: &'static str,
    pub closed: bool,
}

impl ConstructFrame {
    pub fn new(construct: &'static str) -> Self {
        Self {
            construct,
            closed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// Width of one indentation level in the template source.
    #[serde(default = "default_indentation_width")]
    pub indentation_width: usize,
    /// The character indentation is made of.
    #[serde(default = "default_indentation_char")]
    pub indentation_char: char,
    /// Verbatim segments at least this long are hoisted into a binary side
    /// chunk instead of the generated source. Zero disables hoisting.
    #[serde(default = "default_binary_text_threshold")]
    pub binary_text_threshold: usize,
    /// File extension of template sources, used when building reference names.
    #[serde(default = "default_template_extension")]
    pub template_extension: String,
}

fn default_indentation_width() -> usize {
    4
}
fn default_indentation_char() -> char {
    ' '
}
fn default_binary_text_threshold() -> usize {
    1024
}
fn default_template_extension() -> String {
    "stc".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            indentation_width: default_indentation_width(),
            indentation_char: default_indentation_char(),
            binary_text_threshold: default_binary_text_threshold(),
            template_extension: default_template_extension(),
        }
    }
}

/// A pluggable recognizer/transformer for one syntactic construct.
///
/// Lifecycle: `matches` is asked on the registered prototype; on a match the
/// engine calls `new_instance` and pushes the fresh instance, so recursive
/// occurrences of the same construct never share state. `advance` is called
/// once per scanned position while the instance is the innermost active one
/// and returns true when the construct has been fully consumed.
pub trait Strategy: Send + Sync {
    fn matches(&self, scan: &Scan) -> bool;

    fn new_instance(&self) -> Box<dyn Strategy>;

    /// Called once when this instance becomes active. May consume input.
    fn on_pushed(&mut self, _scan: &mut Scan) -> Result<(), ScanError> {
        Ok(())
    }

    fn advance(&mut self, scan: &mut Scan) -> Result<bool, ScanError>;

    /// Called once on removal; used for closing actions.
    fn on_popped(&mut self, _scan: &mut Scan) -> Result<(), ScanError> {
        Ok(())
    }
}

/// Per-run scan state: the cursor over the input, the output buffer, and the
/// cross-cutting collections strategies write into.
pub struct Scan<'a> {
    content: &'a str,
    index: usize,
    watermark: usize,
    output: String,
    import_index: usize,
    imports: BTreeSet<String>,
    references: Vec<Reference>,
    params: Vec<String>,
    binary_chunks: Vec<Vec<u8>>,
    skip_indentations: usize,
    frames: Vec<ConstructFrame>,
    unit_kind: UnitKind,
    config: &'a ScanConfig,
}

impl<'a> Scan<'a> {
    fn new(
        content: &'a str,
        prologue: Option<&str>,
        unit_kind: UnitKind,
        config: &'a ScanConfig,
    ) -> Self {
        let output = prologue.unwrap_or("").to_string();
        let import_index = output.len();
        Self {
            content,
            index: 0,
            watermark: 0,
            output,
            import_index,
            imports: BTreeSet::new(),
            references: Vec::new(),
            params: Vec::new(),
            binary_chunks: Vec::new(),
            skip_indentations: 0,
            frames: Vec::new(),
            unit_kind,
            config,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn unit_kind(&self) -> UnitKind {
        self.unit_kind
    }

    pub fn template_extension(&self) -> &str {
        &self.config.template_extension
    }

    /// 1-based line number at the cursor.
    pub fn line(&self) -> usize {
        self.content[..self.index]
            .bytes()
            .filter(|&b| b == b'\n')
            .count()
            + 1
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    fn at_end(&self) -> bool {
        self.index >= self.content.len()
    }

    pub fn current_char(&self) -> Option<char> {
        self.content[self.index..].chars().next()
    }

    /// Does the input at the cursor start with `token`?
    pub fn starts_with(&self, token: &str) -> bool {
        self.content[self.index..].starts_with(token)
    }

    /// Does the input immediately before the cursor end with `token`?
    pub fn ends_with(&self, token: &str) -> bool {
        self.content[..self.index].ends_with(token)
    }

    /// Whitespace-skipping lookahead: is `token` the next non-whitespace text
    /// after `offset` bytes from the cursor?
    pub fn has_next_token(&self, token: &str, offset: usize) -> bool {
        let start = self.index + offset;
        if start > self.content.len() {
            return false;
        }
        for (i, c) in self.content[start..].char_indices() {
            if c.is_whitespace() {
                continue;
            }
            return self.content[start + i..].starts_with(token);
        }
        false
    }

    pub fn slice(&self, begin: usize, end: usize) -> &str {
        &self.content[begin..end]
    }

    pub fn slice_from(&self, begin: usize) -> &str {
        &self.content[begin..]
    }

    /// Advance the cursor by `bytes`, capped at end of input.
    pub fn advance_by(&mut self, bytes: usize) {
        self.index = (self.index + bytes).min(self.content.len());
    }

    /// Step back one character.
    pub fn retreat(&mut self) {
        if self.index == 0 {
            return;
        }
        self.index -= 1;
        while self.index > 0 && !self.content.is_char_boundary(self.index) {
            self.index -= 1;
        }
    }

    /// Advance until `delimiter`, skipping only whitespace along the way.
    /// Gives up on non-whitespace content: the cursor is backed off one
    /// character so the main loop re-tests the offending position, and
    /// callers must re-check what they are looking at.
    pub fn advance_after(&mut self, delimiter: char) {
        while let Some(c) = self.current_char() {
            if c == delimiter {
                return;
            }
            if !c.is_whitespace() {
                self.retreat();
                return;
            }
            self.step();
        }
    }

    pub(crate) fn step(&mut self) {
        let width = self
            .content[self.index..]
            .chars()
            .next()
            .map_or(1, char::len_utf8);
        self.advance_by(width);
    }

    /// Set the watermark to the cursor: input before it counts as consumed.
    pub fn mark_watermark(&mut self) {
        self.watermark = self.index;
    }

    /// Set the watermark one character past the cursor.
    pub fn mark_watermark_past(&mut self) {
        let width = self
            .content[self.index..]
            .chars()
            .next()
            .map_or(0, char::len_utf8);
        self.watermark = (self.index + width).min(self.content.len());
    }

    /// Copy input between the watermark and the cursor into the output,
    /// applying the indentation-skip rule while active, and hoisting long
    /// verbatim segments into a binary chunk.
    pub fn flush(&mut self) {
        let end = self.index.min(self.content.len());
        if self.watermark >= end {
            return;
        }
        let segment = &self.content[self.watermark..end];

        let copied = if self.skip_indentations > 0 {
            let per_line = self.skip_indentations * self.config.indentation_width;
            let mut to_skip = 0usize;
            if self.watermark > 0 && self.content.as_bytes()[self.watermark - 1] == b'\n' {
                to_skip = per_line;
            }
            let mut out = String::with_capacity(segment.len());
            for c in segment.chars() {
                if to_skip > 0 && c == self.config.indentation_char {
                    to_skip -= 1;
                } else {
                    out.push(c);
                    to_skip = 0;
                }
                if c == '\n' {
                    to_skip = per_line;
                }
            }
            out
        } else {
            segment.to_string()
        };

        if self.config.binary_text_threshold > 0
            && copied.len() >= self.config.binary_text_threshold
        {
            let chunk = self.binary_chunks.len();
            self.binary_chunks.push(copied.into_bytes());
            self.output.push_str(&format!("@text({})", chunk));
        } else {
            self.output.push_str(&copied);
        }
        self.watermark = end;
    }

    /// Append generated text to the output buffer.
    pub fn write(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    /// Remove indentation characters already written to the end of the
    /// output. Used to collapse a whitespace-only line before a construct
    /// that supplies its own line break.
    pub fn remove_trailing_spaces(&mut self) {
        let keep = self
            .output
            .trim_end_matches(self.config.indentation_char)
            .len();
        self.output.truncate(keep);
    }

    /// Collect an import/using statement; duplicates are dropped and the set
    /// is spliced once, in sorted order, at the recorded insertion point.
    pub fn add_import(&mut self, statement: &str) {
        self.imports.insert(statement.to_string());
    }

    pub fn add_param(&mut self, param: &str) {
        self.params.push(param.to_string());
    }

    pub fn add_reference(&mut self, name: String, kind: UnitKind, line: usize) {
        self.references.push(Reference { name, kind, line });
    }

    /// Sub-parse a bracketed attribute list starting `offset` bytes past the
    /// cursor. On success the cursor moves one past the closing parenthesis
    /// and the watermark follows it.
    pub fn parse_attributes(&mut self, offset: usize) -> Result<AttributeList, ScanError> {
        let line = self.line();
        let list = attributes::parse_attribute_list(self.content, self.index + offset).map_err(
            |message| ScanError::MalformedConstruct {
                construct: "attribute list",
                line,
                message,
            },
        )?;
        self.index = list.end_index();
        self.mark_watermark();
        Ok(list)
    }

    pub fn increment_skip_indentation(&mut self) {
        self.skip_indentations += 1;
    }

    pub fn decrement_skip_indentation(&mut self) {
        self.skip_indentations = self.skip_indentations.saturating_sub(1);
    }

    pub fn push_frame(&mut self, construct: &'static str) {
        self.frames.push(ConstructFrame::new(construct));
    }

    pub fn pop_frame(&mut self) -> Option<ConstructFrame> {
        self.frames.pop()
    }

    /// Innermost open construct frame.
    pub fn top_frame(&self) -> Option<&ConstructFrame> {
        self.frames.last()
    }

    /// The frame enclosing the innermost one.
    pub fn parent_frame(&self) -> Option<&ConstructFrame> {
        let len = self.frames.len();
        if len < 2 {
            return None;
        }
        self.frames.get(len - 2)
    }

    /// Mark the innermost frame closed; its owner pops itself on the next
    /// advance.
    pub fn close_top_frame(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.closed = true;
        }
    }

    fn finish(&mut self) {
        self.index = self.content.len();
        self.flush();
    }

    fn into_outcome(mut self) -> ScanOutcome {
        if !self.imports.is_empty() {
            let mut block = self
                .imports
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            block.push('\n');
            self.output.insert_str(self.import_index, &block);
        }
        ScanOutcome {
            source: self.output,
            references: self.references,
            params: self.params,
            binary_chunks: self.binary_chunks,
        }
    }
}

/// The single-pass scan driver. Owns the registered strategy prototypes and
/// the scan configuration; one engine can run any number of scans, but one
/// scan is strictly sequential.
pub struct ScanEngine {
    strategies: Vec<Box<dyn Strategy>>,
    config: ScanConfig,
}

impl ScanEngine {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            strategies: Vec::new(),
            config,
        }
    }

    /// Register a strategy prototype. Registration order is the match
    /// tie-break: register more specific strategies first.
    pub fn register(&mut self, strategy: Box<dyn Strategy>) {
        self.strategies.push(strategy);
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Convert template text to generated source, optionally seeded with a
    /// prologue. The prologue's end is the import insertion point.
    pub fn convert(&self, input: &str, prologue: Option<&str>) -> Result<String, ScanError> {
        Ok(self.scan_unit(input, prologue, UnitKind::Template)?.source)
    }

    /// Full scan of one unit, returning the generated source together with
    /// the recorded references, parameters and binary chunks.
    pub fn scan_unit(
        &self,
        input: &str,
        prologue: Option<&str>,
        kind: UnitKind,
    ) -> Result<ScanOutcome, ScanError> {
        let mut scan = Scan::new(input, prologue, kind, &self.config);
        let mut stack: Vec<Box<dyn Strategy>> = Vec::new();

        while !scan.at_end() {
            for prototype in &self.strategies {
                if prototype.matches(&scan) {
                    scan.flush();
                    let mut instance = prototype.new_instance();
                    instance.on_pushed(&mut scan)?;
                    stack.push(instance);
                    break;
                }
            }

            while let Some(active) = stack.last_mut() {
                if !active.advance(&mut scan)? {
                    break;
                }
                if let Some(mut done) = stack.pop() {
                    done.on_popped(&mut scan)?;
                }
            }

            scan.step();
        }

        scan.finish();

        // Input ended with constructs still open. Run their closing actions
        // so the output is at least well formed.
        while let Some(mut active) = stack.pop() {
            active.on_popped(&mut scan)?;
        }

        Ok(scan.into_outcome())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ScanEngine {
        ScanEngine::new(ScanConfig::default())
    }

    #[test]
    fn test_no_constructs_is_identity() {
        let input = "plain text\nwith lines\n";
        let out = engine().convert(input, None).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn test_prologue_is_prefixed() {
        let out = engine().convert("body", Some("@module m\n")).unwrap();
        assert_eq!(out, "@module m\nbody");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(engine().convert("", None).unwrap(), "");
    }

    #[test]
    fn test_unicode_copied_through() {
        let input = "héllo — wörld ✓";
        assert_eq!(engine().convert(input, None).unwrap(), input);
    }

    /// Matches `!N` and swallows N extra characters; counts its own advances
    /// so instance independence is observable.
    struct Swallow {
        advanced: usize,
    }

    impl Strategy for Swallow {
        fn matches(&self, scan: &Scan) -> bool {
            scan.starts_with("!")
        }

        fn new_instance(&self) -> Box<dyn Strategy> {
            Box::new(Swallow { advanced: 0 })
        }

        fn advance(&mut self, scan: &mut Scan) -> Result<bool, ScanError> {
            self.advanced += 1;
            scan.mark_watermark_past();
            Ok(self.advanced >= 2)
        }
    }

    #[test]
    fn test_new_instance_yields_independent_state() {
        let prototype = Swallow { advanced: 0 };
        let mut a = prototype.new_instance();
        let mut b = prototype.new_instance();

        let config = ScanConfig::default();
        let mut scan = Scan::new("!x", None, UnitKind::Template, &config);
        a.advance(&mut scan).unwrap();

        // Mutating `a` must not leak into `b`: a fresh sibling still needs
        // two advances to complete.
        let mut scan_b = Scan::new("!y", None, UnitKind::Template, &config);
        assert!(!b.advance(&mut scan_b).unwrap());
    }

    #[test]
    fn test_strategy_consumes_and_rest_is_copied() {
        let mut e = engine();
        e.register(Box::new(Swallow { advanced: 0 }));
        // "!x" swallowed, remainder copied verbatim.
        assert_eq!(e.convert("a!xb", None).unwrap(), "ab");
    }

    #[test]
    fn test_has_next_token_skips_whitespace() {
        let config = ScanConfig::default();
        let scan = Scan::new("@tag  \n  (x)", None, UnitKind::Template, &config);
        assert!(scan.has_next_token("(", 4));
        assert!(!scan.has_next_token(")", 4));
    }

    #[test]
    fn test_advance_after_stops_on_delimiter() {
        let config = ScanConfig::default();
        let mut scan = Scan::new("  \n rest", None, UnitKind::Template, &config);
        scan.advance_after('\n');
        assert_eq!(scan.current_char(), Some('\n'));
    }

    #[test]
    fn test_advance_after_backs_off_on_content() {
        let config = ScanConfig::default();
        let mut scan = Scan::new(" x \n", None, UnitKind::Template, &config);
        scan.advance_after('\n');
        // Backed off one position before the 'x' so the caller re-tests it.
        assert_eq!(scan.index(), 0);
    }

    #[test]
    fn test_remove_trailing_spaces() {
        let config = ScanConfig::default();
        let mut scan = Scan::new("", None, UnitKind::Template, &config);
        scan.write("line\n    ");
        scan.remove_trailing_spaces();
        assert_eq!(scan.output(), "line\n");
    }

    #[test]
    fn test_imports_spliced_at_insertion_point() {
        struct Import;
        impl Strategy for Import {
            fn matches(&self, scan: &Scan) -> bool {
                scan.starts_with("%use ")
            }
            fn new_instance(&self) -> Box<dyn Strategy> {
                Box::new(Import)
            }
            fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
                let start = scan.index() + 5;
                let end = scan
                    .slice_from(start)
                    .find('\n')
                    .map(|n| start + n)
                    .unwrap_or(scan.len());
                let statement = scan.slice(start, end).trim().to_string();
                scan.add_import(&statement);
                scan.advance_by(end - scan.index());
                scan.mark_watermark_past();
                Ok(())
            }
            fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
                Ok(true)
            }
        }

        let mut e = engine();
        e.register(Box::new(Import));
        let out = e
            .convert("%use b\ntext\n%use a\n%use b\n", Some("HEAD\n"))
            .unwrap();
        // Sorted, deduplicated, exactly once, right after the prologue.
        assert_eq!(out, "HEAD\na\nb\ntext\n");
    }

    #[test]
    fn test_indentation_skip_strips_depth_times_width() {
        let config = ScanConfig::default();
        let mut scan = Scan::new("\n        deep\n  short\n", None, UnitKind::Template, &config);
        scan.increment_skip_indentation();
        scan.increment_skip_indentation();
        scan.index = scan.content.len();
        scan.flush();
        // depth 2 * width 4 = 8 stripped; a shorter line loses all of its
        // indentation but no other characters.
        assert_eq!(scan.output(), "\ndeep\nshort\n");
    }

    #[test]
    fn test_indentation_skip_inactive_is_verbatim() {
        let config = ScanConfig::default();
        let mut scan = Scan::new("\n    kept\n", None, UnitKind::Template, &config);
        scan.index = scan.content.len();
        scan.flush();
        assert_eq!(scan.output(), "\n    kept\n");
    }

    #[test]
    fn test_binary_text_hoisting() {
        let config = ScanConfig {
            binary_text_threshold: 8,
            ..ScanConfig::default()
        };
        let mut scan = Scan::new("0123456789", None, UnitKind::Template, &config);
        scan.index = scan.content.len();
        scan.flush();
        assert_eq!(scan.output(), "@text(0)");
        assert_eq!(scan.binary_chunks, vec![b"0123456789".to_vec()]);
    }

    #[test]
    fn test_frames_parent_inspection() {
        let config = ScanConfig::default();
        let mut scan = Scan::new("", None, UnitKind::Layout, &config);
        scan.push_frame("layout");
        scan.push_frame("layout");
        assert_eq!(scan.parent_frame().map(|f| f.construct), Some("layout"));
        scan.close_top_frame();
        assert!(scan.top_frame().map(|f| f.closed).unwrap_or(false));
        assert!(!scan.parent_frame().map(|f| f.closed).unwrap_or(true));
    }
}
