// Constant-expression evaluation over the scanner's token stream.
//
// All binary operators share a single precedence level and apply strictly
// left to right; parentheses are the only grouping construct. Arithmetic
// is signed 64-bit with native wraparound.

use std::fmt;

use crate::scanner::{Scanner, Token};
use crate::symbol_table::{SymRole, SymbolTable};

#[derive(Debug, Clone)]
pub struct EvalError {
    message: String,
    line: u32,
}

impl EvalError {
    fn new(message: impl Into<String>, line: u32) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> u32 {
        self.line
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

/// Evaluates one expression starting at the scanner's pending token and
/// leaves the first token past the expression pending.
pub struct ExprEvaluator<'a> {
    scanner: &'a mut Scanner,
    symbols: &'a mut SymbolTable,
    addr: i64,
}

impl<'a> ExprEvaluator<'a> {
    pub fn new(scanner: &'a mut Scanner, symbols: &'a mut SymbolTable, addr: i64) -> Self {
        Self {
            scanner,
            symbols,
            addr,
        }
    }

    pub fn eval(&mut self) -> Result<i64, EvalError> {
        let mut ret = match self.scanner.raw() {
            Token::Minus => {
                self.lex()?;
                self.factor()?.wrapping_neg()
            }
            Token::Plus => {
                self.lex()?;
                self.factor()?
            }
            _ => self.factor()?,
        };

        loop {
            match self.scanner.raw().clone() {
                Token::Plus => {
                    self.lex()?;
                    ret = ret.wrapping_add(self.factor()?);
                }
                Token::Minus => {
                    self.lex()?;
                    ret = ret.wrapping_sub(self.factor()?);
                }
                Token::Star => {
                    self.lex()?;
                    ret = ret.wrapping_mul(self.factor()?);
                }
                Token::Slash => {
                    self.lex()?;
                    let rhs = self.factor()?;
                    if rhs == 0 {
                        return Err(self.error("Division by zero"));
                    }
                    ret = ret.wrapping_div(rhs);
                }
                Token::Amp => {
                    self.lex()?;
                    ret &= self.factor()?;
                }
                Token::Pipe => {
                    self.lex()?;
                    ret |= self.factor()?;
                }
                Token::Caret => {
                    self.lex()?;
                    ret ^= self.factor()?;
                }
                Token::Shl => {
                    self.lex()?;
                    ret = ret.wrapping_shl(self.factor()? as u32);
                }
                Token::Shr => {
                    self.lex()?;
                    ret = ret.wrapping_shr(self.factor()? as u32);
                }
                _ => break,
            }
        }

        Ok(ret)
    }

    fn factor(&mut self) -> Result<i64, EvalError> {
        match self.scanner.raw().clone() {
            Token::Num(value) => {
                self.lex()?;
                Ok(value)
            }
            Token::Ident(name) => {
                let (role, value) = match self.symbols.get(&name) {
                    Some(sym) => (sym.role, sym.value),
                    None => (SymRole::Other, 0),
                };
                match role {
                    SymRole::Label | SymRole::Equate | SymRole::Other => {
                        self.lex()?;
                        Ok(value)
                    }
                    SymRole::Define => {
                        Err(self.error(&format!("Cannot use a define in an expression: {name}")))
                    }
                    SymRole::Macro => {
                        Err(self.error(&format!("Cannot use a macro in an expression: {name}")))
                    }
                    _ => Err(self.error(&format!("Cannot use this name in an expression: {name}"))),
                }
            }
            Token::LParen => {
                self.lex()?;
                let value = self.eval()?;
                if self.scanner.raw() != &Token::RParen {
                    return Err(self.error(&format!(
                        "Expected ')', found: {}",
                        self.scanner.raw()
                    )));
                }
                self.lex()?;
                Ok(value)
            }
            Token::Period => {
                self.lex()?;
                Ok(self.addr)
            }
            other => Err(self.error(&format!(
                "Expected a numeral, identifier, or '(', found: {other}"
            ))),
        }
    }

    fn lex(&mut self) -> Result<(), EvalError> {
        self.scanner
            .lex(self.symbols)
            .map_err(|err| EvalError::new(err.message(), err.line()))
    }

    fn error(&self, message: &str) -> EvalError {
        EvalError::new(message, self.scanner.line())
    }
}
