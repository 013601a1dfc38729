// Zero-argument define collection and fixed-point textual expansion.
//
// A dedicated pre-pass scans the whole source for `.def` lines, then every
// line is rescanned and spliced until no define name remains. Expansion is
// line-local and bounded, so self-referential or mutually-recursive
// defines become a diagnostic instead of a hang.

use std::collections::HashMap;
use std::fmt;

use crate::scanner::{split_line, Token};
use crate::symbol_table::SymbolTable;

/// Per-line and whole-source expansion bound.
pub const DEFINE_EXPAND_MAX_DEPTH: usize = 32;

#[derive(Debug, Clone)]
pub struct DefineError {
    message: String,
    line: Option<u32>,
}

impl DefineError {
    fn new(message: impl Into<String>, line: Option<u32>) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }
}

impl fmt::Display for DefineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DefineError {}

/// A zero-argument textual macro. Immutable once created.
#[derive(Debug, Clone)]
pub struct Define {
    name: String,
    body: Vec<Token>,
}

impl Define {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &[Token] {
        &self.body
    }

    /// The splice text: each body token rendered with a trailing space so
    /// adjacent tokens stay separated after substitution.
    fn body_text(&self) -> String {
        let mut text = String::new();
        for token in &self.body {
            text.push_str(&format!("{token} "));
        }
        text
    }
}

#[derive(Debug, Default)]
pub struct Preprocessor {
    defines: HashMap<String, Define>,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            defines: HashMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defines.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Define> {
        self.defines.get(name)
    }

    /// Predefine a macro from the command line. The body text is lexed
    /// like source.
    pub fn predefine(
        &mut self,
        name: &str,
        text: &str,
        symbols: &mut SymbolTable,
    ) -> Result<(), DefineError> {
        let nodes =
            split_line(text, symbols).map_err(|err| DefineError::new(err.message(), None))?;
        let body = nodes.into_iter().map(|node| node.token).collect();
        self.insert(
            Define {
                name: name.to_string(),
                body,
            },
            symbols,
            None,
        )
    }

    fn insert(
        &mut self,
        define: Define,
        symbols: &mut SymbolTable,
        line: Option<u32>,
    ) -> Result<(), DefineError> {
        if self.defines.contains_key(define.name()) {
            return Err(DefineError::new(
                format!("Define already defined: {}", define.name()),
                line,
            ));
        }
        symbols
            .bind_define(define.name())
            .map_err(|err| DefineError::new(err.message(), line))?;
        self.defines.insert(define.name().to_string(), define);
        Ok(())
    }

    /// Build the define table and expand every line to a fixed point.
    pub fn process(
        &mut self,
        lines: &mut [String],
        symbols: &mut SymbolTable,
    ) -> Result<(), DefineError> {
        let mut depth = 0;
        loop {
            if depth >= DEFINE_EXPAND_MAX_DEPTH {
                return Err(DefineError::new("Cannot resolve defines", None));
            }
            self.collect(lines, symbols)?;
            if !self.expand(lines, symbols)? {
                return Ok(());
            }
            depth += 1;
        }
    }

    /// Scan for `.def name() body` lines; every other line is ignored.
    fn collect(&mut self, lines: &[String], symbols: &mut SymbolTable) -> Result<(), DefineError> {
        for (idx, line) in lines.iter().enumerate() {
            let line_num = idx as u32 + 1;
            let nodes = split_line(line, symbols)
                .map_err(|err| DefineError::new(err.message(), Some(line_num)))?;
            if nodes.first().map(|node| &node.token) != Some(&Token::DotDef) {
                continue;
            }
            if nodes.len() < 5 {
                return Err(DefineError::new("Invalid .def syntax", Some(line_num)));
            }
            let name = match &nodes[1].token {
                Token::Ident(name) => name.clone(),
                other => {
                    return Err(DefineError::new(
                        format!("Expected a name after .def, found: {other}"),
                        Some(line_num),
                    ))
                }
            };
            if nodes[2].token != Token::LParen || nodes[3].token != Token::RParen {
                return Err(DefineError::new(
                    "Only zero-argument defines are supported",
                    Some(line_num),
                ));
            }
            let body: Vec<Token> = nodes[4..].iter().map(|node| node.token.clone()).collect();
            self.insert(Define { name, body }, symbols, Some(line_num))?;
        }
        Ok(())
    }

    /// One expansion sweep over all lines. Returns whether anything
    /// changed. Each substitution rescans its line from the top so the
    /// recorded token offsets stay exact.
    fn expand(
        &mut self,
        lines: &mut [String],
        symbols: &mut SymbolTable,
    ) -> Result<bool, DefineError> {
        let mut changed = false;
        for (idx, line) in lines.iter_mut().enumerate() {
            let line_num = idx as u32 + 1;
            let mut depth = 0;
            loop {
                if depth >= DEFINE_EXPAND_MAX_DEPTH {
                    return Err(DefineError::new("Cannot resolve defines", Some(line_num)));
                }
                let nodes = split_line(line, symbols)
                    .map_err(|err| DefineError::new(err.message(), Some(line_num)))?;

                let mut hit: Option<(usize, String)> = None;
                for node in &nodes {
                    if let Token::Ident(name) = &node.token {
                        if self.defines.contains_key(name) {
                            hit = Some((node.offset, name.clone()));
                            break;
                        }
                    }
                }
                let Some((offset, name)) = hit else {
                    break;
                };

                changed = true;
                if nodes.first().map(|node| &node.token) == Some(&Token::DotDef) {
                    // A define name on its own defining line: neutralize
                    // the line instead of expanding it into itself.
                    line.insert(0, ';');
                    break;
                }

                let body = self.defines[&name].body_text();
                splice(line, offset, name.len(), &body);
                depth += 1;
            }
        }
        Ok(changed)
    }
}

/// Overwrite the define name's characters with blanks, preserving the
/// offsets of everything after it, then insert the body text in place.
fn splice(line: &mut String, offset: usize, len: usize, body: &str) {
    let mut bytes = line.clone().into_bytes();
    for byte in bytes.iter_mut().skip(offset).take(len) {
        *byte = b' ';
    }
    let mut out = String::from_utf8_lossy(&bytes).to_string();
    out.insert_str(offset, body);
    *line = out;
}

#[cfg(test)]
mod tests {
    use super::{Preprocessor, DEFINE_EXPAND_MAX_DEPTH};
    use crate::symbol_table::SymbolTable;

    fn process(lines: &[&str]) -> Result<Vec<String>, String> {
        let mut symbols = SymbolTable::new();
        let mut owned: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
        let mut pp = Preprocessor::new();
        pp.process(&mut owned, &mut symbols)
            .map_err(|err| err.message().to_string())?;
        Ok(owned)
    }

    fn normalize(line: &str) -> String {
        line.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn expands_a_define_in_place() {
        let lines = process(&[".def count() 5", "  .dw count"]).expect("process");
        assert_eq!(normalize(&lines[1]), ".dw 5");
    }

    #[test]
    fn defining_line_is_neutralized_not_expanded() {
        let lines = process(&[".def count() 5"]).expect("process");
        assert!(lines[0].starts_with(';'));
    }

    #[test]
    fn expansion_reaches_a_fixed_point_through_chains() {
        let lines = process(&[
            ".def outer() inner + 1",
            ".def inner() 41",
            "  .dw outer",
        ])
        .expect("process");
        assert_eq!(normalize(&lines[2]), ".dw 41 + 1");
    }

    #[test]
    fn expansion_is_idempotent_once_fixed() {
        let mut symbols = SymbolTable::new();
        let mut lines: Vec<String> =
            vec![".def count() 5".to_string(), "  .dw count".to_string()];
        let mut pp = Preprocessor::new();
        pp.process(&mut lines, &mut symbols).expect("first");
        let after_first = lines.clone();
        pp.process(&mut lines, &mut symbols).expect("second");
        assert_eq!(lines, after_first);
    }

    #[test]
    fn self_referential_define_is_a_bounded_error() {
        let err = process(&[".def loop() loop", "  loop"]).expect_err("self reference");
        assert!(err.contains("Cannot resolve defines"));
    }

    #[test]
    fn mutually_recursive_defines_are_a_bounded_error() {
        let err = process(&[".def a() b", ".def b() a", "  a"]).expect_err("mutual recursion");
        assert!(err.contains("Cannot resolve defines"));
    }

    #[test]
    fn duplicate_define_is_an_error() {
        let err = process(&[".def twice() 1", ".def twice() 2"]).expect_err("duplicate");
        assert!(err.contains("already defined"));
    }

    #[test]
    fn zero_argument_parens_are_required() {
        let err = process(&[".def broken(x) 1"]).expect_err("argument list");
        assert!(err.contains("zero-argument"));
    }

    #[test]
    fn comment_lines_are_left_alone() {
        let lines = process(&[".def count() 5", "; count stays here"]).expect("process");
        assert_eq!(lines[1], "; count stays here");
    }

    #[test]
    fn expansion_preserves_following_token_offsets_before_rescan() {
        // Two uses on one line: the first substitution blanks exactly the
        // name's characters, so the second name is still found on rescan.
        let lines = process(&[".def n() 7", "  .dw n, n"]).expect("process");
        assert_eq!(normalize(&lines[1]), ".dw 7 , 7");
    }

    #[test]
    fn depth_bound_is_generous_enough_for_long_chains() {
        let mut source = Vec::new();
        for idx in 0..(DEFINE_EXPAND_MAX_DEPTH / 2) {
            source.push(format!(".def d{idx}() d{} + 1", idx + 1));
        }
        source.push(format!(".def d{}() 0", DEFINE_EXPAND_MAX_DEPTH / 2));
        source.push("  .dw d0".to_string());
        let lines: Vec<&str> = source.iter().map(|s| s.as_str()).collect();
        let expanded = process(&lines).expect("deep chain");
        assert!(expanded.last().expect("line").contains('0'));
    }
}
