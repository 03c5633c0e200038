//! Conversion Strategy Catalog
//!
//! The constructs of the templating language, each as one strategy:
//!
//! - `@import <path>` - hoisted into the import block
//! - `@param <name>` - ordered parameter declaration
//! - `${ expr }` - expression interpolation, whitespace-normalized
//! - `@tag.<name>(...)` - tag call, rewritten to `@include(...)`
//! - `@layout.<name>(...)` ... `@endlayout` - layout wrapping, rewritten to
//!   `@begin(...)` ... `@end`, body indentation normalized
//! - `@content` - the content slot inside a layout definition, rewritten to
//!   `@slot`
//!
//! Registration order matters: the engine takes the first match, so the
//! catalog lists the more specific `@...` forms before the general ones.

use crate::scanner::{Scan, ScanEngine, ScanError, Strategy, UnitKind};

/// A scan engine with the full catalog registered in canonical order.
pub fn standard_engine(config: crate::scanner::ScanConfig) -> ScanEngine {
    let mut engine = ScanEngine::new(config);
    for strategy in default_strategies() {
        engine.register(strategy);
    }
    engine
}

pub fn default_strategies() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(ImportStrategy),
        Box::new(ParamStrategy),
        Box::new(EndLayoutStrategy),
        Box::new(LayoutStrategy::prototype()),
        Box::new(TagStrategy::prototype()),
        Box::new(ContentStrategy),
        Box::new(ExpressionStrategy),
    ]
}

/// Consume the rest of the current line, starting `skip` bytes past the
/// cursor. Leaves the cursor on the terminating newline (or at end of input)
/// with the watermark moved past it, so the line vanishes from the output.
fn take_rest_of_line(scan: &mut Scan, skip: usize) -> String {
    let start = scan.index() + skip;
    let end = scan
        .slice_from(start)
        .find('\n')
        .map(|n| start + n)
        .unwrap_or(scan.len());
    let text = scan.slice(start, end).trim().to_string();
    scan.advance_by(end - scan.index());
    scan.mark_watermark_past();
    text
}

/// Parse the `<name>(<attrs>)` part of a call construct. On success the
/// cursor sits on the closing parenthesis with the watermark one past it.
fn parse_call(
    scan: &mut Scan,
    construct: &'static str,
    prefix_len: usize,
) -> Result<(String, crate::attributes::AttributeList), ScanError> {
    let line = scan.line();
    let name_start = scan.index() + prefix_len;
    let name_len = scan
        .slice_from(name_start)
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .count();
    if name_len == 0 {
        return Err(ScanError::MalformedConstruct {
            construct,
            line,
            message: "missing name".to_string(),
        });
    }
    let name = scan.slice(name_start, name_start + name_len).to_string();

    let paren = name_start + name_len;
    if !scan.slice_from(paren).starts_with('(') {
        return Err(ScanError::MalformedConstruct {
            construct,
            line,
            message: format!("expected '(' after '{}'", name),
        });
    }

    let attrs = scan.parse_attributes(paren - scan.index())?;
    scan.retreat();
    Ok((name, attrs))
}

fn write_call(scan: &mut Scan, keyword: &str, target: &str, attrs: &crate::attributes::AttributeList) {
    if attrs.is_empty() {
        scan.write(&format!("@{}({})", keyword, target));
    } else {
        scan.write(&format!("@{}({}, {})", keyword, target, attrs.canonical()));
    }
}

/// `@import <path>` - collected into the import set, line dropped from the
/// body.
pub struct ImportStrategy;

impl Strategy for ImportStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("@import ")
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(ImportStrategy)
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        let statement = take_rest_of_line(scan, "@import ".len());
        scan.add_import(&statement);
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}

/// `@param <name>` - recorded in declaration order for the unit's positional
/// calling convention, line dropped from the body.
pub struct ParamStrategy;

impl Strategy for ParamStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("@param ")
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(ParamStrategy)
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        let param = take_rest_of_line(scan, "@param ".len());
        if !param.is_empty() {
            scan.add_param(&param);
        }
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}

/// `${ expr }` - rewritten with the inner expression trimmed. Braces inside
/// the expression may nest; an unterminated interpolation is malformed.
pub struct ExpressionStrategy;

impl Strategy for ExpressionStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("${")
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(ExpressionStrategy)
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        let line = scan.line();
        let start = scan.index();
        let mut depth = 0usize;
        let mut close = None;
        for (i, c) in scan.slice_from(start + 2).char_indices() {
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => {
                    close = Some(start + 2 + i);
                    break;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        let close = close.ok_or_else(|| ScanError::MalformedConstruct {
            construct: "expression",
            line,
            message: "unterminated ${ interpolation".to_string(),
        })?;

        let inner = scan.slice(start + 2, close).trim().to_string();
        scan.write(&format!("${{{}}}", inner));
        scan.advance_by(close - start);
        scan.mark_watermark_past();
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}

/// `@tag.<name>(<attrs>)` - rewritten to `@include(tag/<name>.<ext>, ...)`;
/// records the tag as a dependency with the line of the call.
pub struct TagStrategy {
    line: usize,
}

impl TagStrategy {
    fn prototype() -> Self {
        Self { line: 0 }
    }
}

impl Strategy for TagStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("@tag.")
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(TagStrategy::prototype())
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        self.line = scan.line();
        let (name, attrs) = parse_call(scan, "tag call", "@tag.".len())?;
        let target = format!("tag/{}.{}", name, scan.template_extension());
        scan.add_reference(target.clone(), UnitKind::Tag, self.line);
        write_call(scan, "include", &target, &attrs);
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}

/// `@layout.<name>(<attrs>)` ... `@endlayout` - the opening half. Emits
/// `@begin(layout/<name>.<ext>, ...)`, opens a construct frame, and turns on
/// indentation skipping for the body. Stays on the stack until
/// [`EndLayoutStrategy`] closes the frame.
pub struct LayoutStrategy {
    line: usize,
}

impl LayoutStrategy {
    fn prototype() -> Self {
        Self { line: 0 }
    }
}

impl Strategy for LayoutStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("@layout.")
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(LayoutStrategy::prototype())
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        self.line = scan.line();
        let (name, attrs) = parse_call(scan, "layout", "@layout.".len())?;
        let target = format!("layout/{}.{}", name, scan.template_extension());
        scan.add_reference(target.clone(), UnitKind::Layout, self.line);
        write_call(scan, "begin", &target, &attrs);
        scan.push_frame("layout");
        scan.increment_skip_indentation();
        Ok(())
    }

    fn advance(&mut self, scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(scan.top_frame().map_or(true, |frame| frame.closed))
    }

    fn on_popped(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        scan.write("@end");
        scan.pop_frame();
        scan.decrement_skip_indentation();
        Ok(())
    }
}

/// `@endlayout` - the closing half. Consumes the token and closes the
/// innermost construct frame; the suspended [`LayoutStrategy`] notices on its
/// next advance and emits `@end` as it pops.
pub struct EndLayoutStrategy;

impl Strategy for EndLayoutStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        scan.starts_with("@endlayout") && scan.top_frame().is_some()
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(EndLayoutStrategy)
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        scan.remove_trailing_spaces();
        scan.advance_by("@endlayout".len() - 1);
        scan.mark_watermark_past();
        scan.close_top_frame();
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}

/// `@content` - only meaningful while scanning a layout definition, where it
/// marks the slot the caller's body is rendered into. Anywhere else it does
/// not match and is copied through as literal text.
pub struct ContentStrategy;

impl Strategy for ContentStrategy {
    fn matches(&self, scan: &Scan) -> bool {
        if scan.unit_kind() != UnitKind::Layout || !scan.starts_with("@content") {
            return false;
        }
        // Word boundary: "@contents" is not the slot marker.
        scan.slice_from(scan.index() + "@content".len())
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_')
    }

    fn new_instance(&self) -> Box<dyn Strategy> {
        Box::new(ContentStrategy)
    }

    fn on_pushed(&mut self, scan: &mut Scan) -> Result<(), ScanError> {
        scan.write("@slot");
        scan.advance_by("@content".len() - 1);
        scan.mark_watermark_past();
        Ok(())
    }

    fn advance(&mut self, _scan: &mut Scan) -> Result<bool, ScanError> {
        Ok(true)
    }
}
