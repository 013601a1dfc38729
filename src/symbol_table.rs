// Symbol roles and tables shared across assembly passes.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};

use crate::instructions::INSTRUCTION_TABLE;
use crate::scanner::Token;

/// Semantic role of a name. `Other` is the not-yet-assigned state; the
/// remaining roles are terminal and transitions between them are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymRole {
    Register,
    Instruction,
    Label,
    Equate,
    Define,
    Macro,
    Other,
}

impl fmt::Display for SymRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SymRole::Register => "REG",
            SymRole::Instruction => "INSTR",
            SymRole::Label => "LABEL",
            SymRole::Equate => "EQU",
            SymRole::Define => "DEF",
            SymRole::Macro => "MACRO",
            SymRole::Other => "?",
        };
        write!(f, "{text}")
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub role: SymRole,
    pub value: i64,
    pub token: Token,
}

#[derive(Debug, Clone)]
pub struct SymError {
    message: String,
}

impl SymError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SymError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for SymError {}

/// Name-to-symbol map. Used twice: once for the pre-seeded builtin table
/// (registers, special registers, instruction mnemonics) and once for the
/// user table the passes mutate. A spelling may live in both, which is
/// what lets `flags` be a plain label in one lane and a register in the
/// other.
#[derive(Debug, Default)]
pub struct SymbolTable {
    map: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    /// Builtin table, seeded before any source is read. Never mutated.
    pub fn builtins() -> Self {
        let mut table = Self::new();
        for num in 0..16u8 {
            table.insert(&format!("r{num}"), SymRole::Register, num as i64, Token::Reg(num));
        }
        table.insert("lr", SymRole::Register, 14, Token::Reg(14));
        table.insert("sp", SymRole::Register, 15, Token::Reg(15));
        table.insert("pc", SymRole::Register, -1, Token::RegPc);
        table.insert("ira", SymRole::Register, -1, Token::RegIra);
        table.insert("flags", SymRole::Register, -1, Token::RegFlags);
        for instr in INSTRUCTION_TABLE {
            if !table.contains(instr.mnemonic) {
                table.insert(
                    instr.mnemonic,
                    SymRole::Instruction,
                    -1,
                    Token::Instr(instr.mnemonic.to_string()),
                );
            }
        }
        table
    }

    fn insert(&mut self, name: &str, role: SymRole, value: i64, token: Token) {
        self.map.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                role,
                value,
                token,
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.map.get(name)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Enter an identifier on first lexical sighting: role `Other`, value 0.
    pub fn intern(&mut self, name: &str) {
        if !self.map.contains_key(name) {
            self.insert(name, SymRole::Other, 0, Token::Ident(name.to_string()));
        }
    }

    /// Special-lane classification for a spelling, if it names a builtin.
    pub fn special_token(&self, name: &str) -> Option<Token> {
        self.map
            .get(name)
            .filter(|sym| matches!(sym.role, SymRole::Register | SymRole::Instruction))
            .map(|sym| sym.token.clone())
    }

    /// Bind `name` as a label at `addr`. Returns whether the value changed
    /// relative to the previous pass; the first binding is not a change.
    pub fn bind_label(&mut self, name: &str, addr: i64) -> Result<bool, SymError> {
        self.intern(name);
        let sym = self
            .map
            .get_mut(name)
            .ok_or_else(|| SymError::new("Symbol table corrupted"))?;
        match sym.role {
            SymRole::Other => {
                sym.role = SymRole::Label;
                sym.value = addr;
                Ok(false)
            }
            SymRole::Label => {
                let changed = sym.value != addr;
                sym.value = addr;
                Ok(changed)
            }
            SymRole::Equate => Err(SymError::new(format!(
                "Equate name cannot be used as a label: {name}"
            ))),
            _ => Err(SymError::new(format!(
                "Name cannot be used as a label: {name}"
            ))),
        }
    }

    /// Bind `name` as an equate. The role binding is permanent; the value
    /// is rewritten when the directive re-runs on a later pass.
    pub fn bind_equate(&mut self, name: &str, value: i64) -> Result<(), SymError> {
        self.intern(name);
        let sym = self
            .map
            .get_mut(name)
            .ok_or_else(|| SymError::new("Symbol table corrupted"))?;
        match sym.role {
            SymRole::Other => {
                sym.role = SymRole::Equate;
                sym.value = value;
                Ok(())
            }
            SymRole::Equate => {
                sym.value = value;
                Ok(())
            }
            SymRole::Label => Err(SymError::new(format!(
                "Label cannot be redefined as an equate: {name}"
            ))),
            _ => Err(SymError::new(format!(
                "Name cannot be used as an equate: {name}"
            ))),
        }
    }

    /// Bind `name` as a define name. Duplicate definitions are caught by
    /// the define table; re-binding an existing define role is a no-op.
    pub fn bind_define(&mut self, name: &str) -> Result<(), SymError> {
        self.intern(name);
        let sym = self
            .map
            .get_mut(name)
            .ok_or_else(|| SymError::new("Symbol table corrupted"))?;
        match sym.role {
            SymRole::Other | SymRole::Define => {
                sym.role = SymRole::Define;
                Ok(())
            }
            _ => Err(SymError::new(format!(
                "Name cannot be used as a define: {name}"
            ))),
        }
    }

    /// Dump labels and equates for the listing footer, sorted by name.
    pub fn dump<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let mut symbols: Vec<&Symbol> = self
            .map
            .values()
            .filter(|sym| matches!(sym.role, SymRole::Label | SymRole::Equate))
            .collect();
        symbols.sort_by(|a, b| a.name.cmp(&b.name));
        for sym in symbols {
            writeln!(
                out,
                "{:<24} {:<5} {:08X}",
                sym.name,
                sym.role,
                sym.value as u32
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{SymRole, SymbolTable};
    use crate::scanner::Token;

    #[test]
    fn builtins_cover_registers_and_aliases() {
        let builtins = SymbolTable::builtins();
        assert_eq!(builtins.special_token("r0"), Some(Token::Reg(0)));
        assert_eq!(builtins.special_token("r15"), Some(Token::Reg(15)));
        assert_eq!(builtins.special_token("lr"), Some(Token::Reg(14)));
        assert_eq!(builtins.special_token("sp"), Some(Token::Reg(15)));
        assert_eq!(builtins.special_token("pc"), Some(Token::RegPc));
        assert_eq!(builtins.special_token("ira"), Some(Token::RegIra));
        assert_eq!(builtins.special_token("flags"), Some(Token::RegFlags));
        assert_eq!(
            builtins.special_token("add"),
            Some(Token::Instr("add".to_string()))
        );
        assert_eq!(builtins.special_token("target"), None);
    }

    #[test]
    fn first_label_binding_is_not_a_change() {
        let mut table = SymbolTable::new();
        assert_eq!(table.bind_label("loop", 0x10).expect("bind"), false);
        assert_eq!(table.get("loop").expect("sym").role, SymRole::Label);
        assert_eq!(table.get("loop").expect("sym").value, 0x10);
    }

    #[test]
    fn label_rebinding_reports_value_changes() {
        let mut table = SymbolTable::new();
        table.bind_label("loop", 0x10).expect("bind");
        assert_eq!(table.bind_label("loop", 0x10).expect("same"), false);
        assert_eq!(table.bind_label("loop", 0x20).expect("moved"), true);
    }

    #[test]
    fn equate_name_can_never_become_a_label() {
        let mut table = SymbolTable::new();
        table.bind_equate("five", 5).expect("equate");
        let err = table.bind_label("five", 0).expect_err("role conflict");
        assert!(err.message().contains("Equate name"));
    }

    #[test]
    fn label_can_never_become_an_equate() {
        let mut table = SymbolTable::new();
        table.bind_label("here", 2).expect("label");
        let err = table.bind_equate("here", 5).expect_err("role conflict");
        assert!(err.message().contains("Label"));
    }

    #[test]
    fn equate_value_rewrites_on_later_passes() {
        let mut table = SymbolTable::new();
        table.bind_equate("five", 0).expect("pass 1");
        table.bind_equate("five", 5).expect("pass 2");
        assert_eq!(table.get("five").expect("sym").value, 5);
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        table.intern("name");
        table.bind_label("name", 7).expect("label");
        table.intern("name");
        assert_eq!(table.get("name").expect("sym").role, SymRole::Label);
    }

    #[test]
    fn dump_lists_labels_and_equates_only() {
        let mut table = SymbolTable::new();
        table.bind_label("zulu", 1).expect("label");
        table.bind_equate("alpha", 2).expect("equate");
        table.intern("unused");
        let mut out = Vec::new();
        table.dump(&mut out).expect("dump");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("alpha"));
        assert!(lines[1].starts_with("zulu"));
    }
}
