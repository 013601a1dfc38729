// frost32 assembler: CLI, pass driver, line processing, and speculative
// instruction matching.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::expr::ExprEvaluator;
use crate::imagestore::ImageStore;
use crate::instructions::{self, Instr, Slot};
use crate::preprocess::Preprocessor;
use crate::scanner::{Lane, Scanner, Token};
use crate::symbol_table::SymbolTable;

const VERSION: &str = "1.0";

/// Resolution passes allowed before an unresolvable or oscillating
/// forward reference becomes fatal.
const MAX_PASSES: usize = 16;

const LONG_ABOUT: &str = "frost32 Assembler with expressions, directives and zero-argument defines.

Outputs are opt-in: specify at least one of -l/--list, -x/--hex, or -b/--bin.
Use -o/--outfile to set the output base name when filenames are omitted.";

#[derive(Parser, Debug)]
#[command(
    name = "asmf32",
    version = VERSION,
    about = "frost32 Assembler with expressions, directives and zero-argument defines",
    long_about = LONG_ABOUT
)]
struct Cli {
    #[arg(value_name = "FILE", help = "Input assembly file. Must end with .asm")]
    infile: PathBuf,
    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a listing file. FILE is optional; when omitted, the output base is used and a .lst extension is added."
    )]
    list_name: Option<String>,
    #[arg(
        short = 'x',
        long = "hex",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit an Intel Hex file. FILE is optional; when omitted, the output base is used and a .hex extension is added."
    )]
    hex_name: Option<String>,
    #[arg(
        short = 'b',
        long = "bin",
        value_name = "FILE",
        num_args = 0..=1,
        default_missing_value = "",
        long_help = "Emit a raw binary covering the emitted address range. FILE is optional; when omitted, the output base is used and a .bin extension is added."
    )]
    bin_name: Option<String>,
    #[arg(
        short = 'o',
        long = "outfile",
        value_name = "BASE",
        long_help = "Output filename base when -l/-x/-b omit filenames. Defaults to the input base."
    )]
    outfile: Option<String>,
    #[arg(
        short = 'f',
        long = "fill",
        value_name = "hh",
        long_help = "Fill byte for -b output (2 hex digits). Defaults to FF."
    )]
    fill_byte: Option<String>,
    #[arg(
        short = 'D',
        long = "define",
        value_name = "NAME[=VAL]",
        action = ArgAction::Append,
        long_help = "Predefine a zero-argument macro (repeatable). If VAL is omitted, defaults to 1."
    )]
    defines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Cli,
    Convergence,
    Define,
    Directive,
    Expression,
    Instruction,
    Io,
    Scanner,
    Symbol,
    Syntax,
}

#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    fn new(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        let message = match param {
            Some(param) => format!("{msg}: {param}"),
            None => msg.to_string(),
        };
        Self { kind, message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    line: u32,
    severity: Severity,
    error: AsmError,
}

impl Diagnostic {
    fn new(line: u32, severity: Severity, error: AsmError) -> Self {
        Self {
            line,
            severity,
            error,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn error(&self) -> &AsmError {
        &self.error
    }

    pub fn format(&self) -> String {
        let sev = match self.severity {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        format!("{}: {} - {}", self.line, sev, self.error.message())
    }
}

/// A fatal condition: the whole run aborts after one diagnostic.
#[derive(Debug)]
pub struct AsmRunError {
    diagnostic: Diagnostic,
}

impl AsmRunError {
    fn new(diagnostic: Diagnostic) -> Self {
        Self { diagnostic }
    }

    pub fn diagnostic(&self) -> &Diagnostic {
        &self.diagnostic
    }
}

impl fmt::Display for AsmRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.diagnostic.format())
    }
}

impl std::error::Error for AsmRunError {}

pub struct AsmRunReport {
    warnings: Vec<Diagnostic>,
}

impl AsmRunReport {
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}

pub fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = Cli::parse();

    let asm_name = cli.infile.to_string_lossy().to_string();
    let file_name = cli
        .infile
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| cli_error("Invalid input file name", None))?;
    if !file_name.ends_with(".asm") {
        return Err(cli_error("Input file must end with .asm", None));
    }
    let input_base = file_name.strip_suffix(".asm").unwrap_or(file_name);

    if cli.list_name.is_none() && cli.hex_name.is_none() && cli.bin_name.is_none() {
        return Err(cli_error(
            "No outputs selected. Specify at least one of -l/--list, -x/--hex, or -b/--bin",
            None,
        ));
    }

    let fill_byte = match cli.fill_byte.as_deref() {
        Some(fill) => {
            if cli.bin_name.is_none() {
                return Err(cli_error("-f/--fill requires binary output (-b/--bin)", None));
            }
            if fill.len() != 2 || !fill.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(cli_error("Invalid -f/--fill byte; must be 2 hex digits", None));
            }
            u8::from_str_radix(fill, 16).unwrap_or(0xff)
        }
        None => 0xff,
    };

    let out_base = cli.outfile.as_deref().unwrap_or(input_base);
    let list_path = resolve_output_path(out_base, cli.list_name.clone(), "lst");
    let hex_path = resolve_output_path(out_base, cli.hex_name.clone(), "hex");
    let bin_path = resolve_output_path(out_base, cli.bin_name.clone(), "bin");

    let source = fs::read_to_string(&asm_name)
        .map_err(|_| io_error("Cannot read file", Some(&asm_name)))?;

    let mut assembler = Assembler::new();
    for def in &cli.defines {
        if let Some((name, value)) = def.split_once('=') {
            assembler.predefine(name, value)?;
        } else {
            assembler.predefine(def, "1")?;
        }
    }

    let mut list_output: Box<dyn Write> = match &list_path {
        Some(path) => Box::new(
            File::create(path)
                .map_err(|_| io_error("Error opening file for write", Some(path)))?,
        ),
        None => Box::new(io::sink()),
    };
    let mut listing = ListingWriter::new(&mut *list_output);

    assembler.assemble(&source, &mut listing)?;

    if let Some(path) = &hex_path {
        let mut hex_file = File::create(path)
            .map_err(|_| io_error("Error opening file for write", Some(path)))?;
        assembler
            .image()
            .write_hex_file(&mut hex_file)
            .map_err(|err| io_error(&err.to_string(), None))?;
    }

    if let Some(path) = &bin_path {
        let mut bin_file = File::create(path)
            .map_err(|_| io_error("Error opening file for write", Some(path)))?;
        if let Some((start, end)) = assembler.image().output_range() {
            assembler
                .image()
                .write_bin_file(&mut bin_file, start, end, fill_byte)
                .map_err(|err| io_error(&err.to_string(), None))?;
        }
    }

    Ok(AsmRunReport {
        warnings: assembler.take_warnings(),
    })
}

fn cli_error(msg: &str, param: Option<&str>) -> AsmRunError {
    AsmRunError::new(Diagnostic::new(
        0,
        Severity::Error,
        AsmError::new(AsmErrorKind::Cli, msg, param),
    ))
}

fn io_error(msg: &str, param: Option<&str>) -> AsmRunError {
    AsmRunError::new(Diagnostic::new(
        0,
        Severity::Error,
        AsmError::new(AsmErrorKind::Io, msg, param),
    ))
}

fn resolve_output_path(base: &str, name: Option<String>, extension: &str) -> Option<String> {
    let name = name?;
    if name.is_empty() {
        return Some(format!("{base}.{extension}"));
    }
    let mut path = PathBuf::from(&name);
    if path.extension().is_none() {
        path = PathBuf::from(format!("{name}.{extension}"));
    }
    Some(path.to_string_lossy().to_string())
}

/// One `.if` nesting level. `active` reflects whether lines inside the
/// level assemble; `taken` remembers whether any branch matched yet.
#[derive(Debug, Clone, Copy)]
struct CondFrame {
    active: bool,
    taken: bool,
    seen_else: bool,
}

/// Matched operand values for one instruction variant: register fields in
/// rA, rB, rC order plus the expression value, if any.
struct Operands {
    regs: Vec<u8>,
    imm: i64,
}

/// The pass driver and line processor. Owns the shared mutable state:
/// user symbol table, define table, location counter, and change flag.
pub struct Assembler {
    builtins: SymbolTable,
    symbols: SymbolTable,
    preprocessor: Preprocessor,
    image: ImageStore,
    warnings: Vec<Diagnostic>,
    lines: Vec<String>,
    addr: i64,
    pass: u8,
    changed: bool,
    emitting: bool,
    cond_stack: Vec<CondFrame>,
}

impl Assembler {
    pub fn new() -> Self {
        Self {
            builtins: SymbolTable::builtins(),
            symbols: SymbolTable::new(),
            preprocessor: Preprocessor::new(),
            image: ImageStore::new(),
            warnings: Vec::new(),
            lines: Vec::new(),
            addr: 0,
            pass: 0,
            changed: false,
            emitting: false,
            cond_stack: Vec::new(),
        }
    }

    pub fn image(&self) -> &ImageStore {
        &self.image
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.warnings)
    }

    /// Resolution passes run before the emission pass.
    pub fn resolution_passes(&self) -> u8 {
        self.pass.saturating_sub(1)
    }

    /// Predefine a zero-argument macro before assembly (CLI `-D`).
    pub fn predefine(&mut self, name: &str, value: &str) -> Result<(), AsmRunError> {
        self.preprocessor
            .predefine(name, value, &mut self.symbols)
            .map_err(|err| {
                AsmRunError::new(Diagnostic::new(
                    err.line().unwrap_or(0),
                    Severity::Error,
                    AsmError::new(AsmErrorKind::Define, err.message(), None),
                ))
            })
    }

    /// Run define expansion, resolution passes to a fixed point, and one
    /// final emission pass.
    pub fn assemble<W: Write>(
        &mut self,
        source: &str,
        listing: &mut ListingWriter<W>,
    ) -> Result<(), AsmRunError> {
        self.lines = source.lines().map(|s| s.to_string()).collect();
        self.preprocessor
            .process(&mut self.lines, &mut self.symbols)
            .map_err(|err| {
                AsmRunError::new(Diagnostic::new(
                    err.line().unwrap_or(0),
                    Severity::Error,
                    AsmError::new(AsmErrorKind::Define, err.message(), None),
                ))
            })?;

        let text = self.lines.join("\n");
        let mut scanner = Scanner::new(&text);

        let mut passes = 0;
        loop {
            passes += 1;
            if passes > MAX_PASSES {
                return Err(self.fail(
                    scanner.line(),
                    AsmErrorKind::Convergence,
                    "Cannot resolve references",
                    None,
                ));
            }
            self.pass = passes as u8;
            self.emitting = false;
            self.begin_pass(&mut scanner);
            self.run_pass(&mut scanner, listing)?;
            if !self.changed {
                break;
            }
        }

        self.pass = self.pass.saturating_add(1);
        self.emitting = true;
        self.begin_pass(&mut scanner);
        listing
            .header()
            .map_err(|err| io_error(&err.to_string(), None))?;
        self.run_pass(&mut scanner, listing)?;
        listing
            .footer(self.lines.len() as u32, self.warnings.len() as u32, &self.symbols)
            .map_err(|err| io_error(&err.to_string(), None))?;
        Ok(())
    }

    fn begin_pass(&mut self, scanner: &mut Scanner) {
        scanner.rewind();
        self.addr = 0;
        self.changed = false;
        self.cond_stack.clear();
        if self.emitting {
            self.image = ImageStore::new();
        }
    }

    fn run_pass<W: Write>(
        &mut self,
        scanner: &mut Scanner,
        listing: &mut ListingWriter<W>,
    ) -> Result<(), AsmRunError> {
        self.lex(scanner)?;
        loop {
            if scanner.raw() == &Token::Eof {
                break;
            }
            let line_num = scanner.tok_line();
            let start_addr = self.addr;
            let warnings_before = self.warnings.len();
            let bytes = self.process_line(scanner)?;
            if self.emitting {
                if !bytes.is_empty() {
                    self.image.store_slice(start_addr as u32, &bytes);
                }
                let source = self
                    .lines
                    .get(line_num as usize - 1)
                    .map(|s| s.as_str())
                    .unwrap_or("");
                listing
                    .write_line(start_addr as u32, &bytes, line_num, source)
                    .map_err(|err| io_error(&err.to_string(), None))?;
                for diag in &self.warnings[warnings_before..] {
                    listing
                        .write_diagnostic(&diag.format())
                        .map_err(|err| io_error(&err.to_string(), None))?;
                }
            }
        }
        if !self.cond_stack.is_empty() {
            return Err(self.fail(
                scanner.line(),
                AsmErrorKind::Directive,
                "Found .if without .endif",
                None,
            ));
        }
        Ok(())
    }

    /// Process one logical line. On entry the line's first token is
    /// pending; on return the next line's first token is pending. Returns
    /// the bytes the line emits.
    fn process_line(&mut self, scanner: &mut Scanner) -> Result<Vec<u8>, AsmRunError> {
        let bytes = Vec::new();

        // Inside a false conditional branch only the conditional
        // directives themselves are interpreted.
        if self.cond_skipping() {
            match scanner.raw() {
                Token::DotIf => {
                    self.lex(scanner)?;
                    self.cond_stack.push(CondFrame {
                        active: false,
                        taken: true,
                        seen_else: false,
                    });
                    self.skip_line(scanner)?;
                }
                Token::DotElse => {
                    self.do_else(scanner)?;
                    self.end_line(scanner)?;
                }
                Token::DotEndIf => {
                    self.do_endif(scanner)?;
                    self.end_line(scanner)?;
                }
                _ => self.skip_line(scanner)?,
            }
            return Ok(bytes);
        }

        match scanner.raw() {
            Token::Eof => return Ok(bytes),
            Token::Newline | Token::Comment => {
                self.end_line(scanner)?;
                return Ok(bytes);
            }
            _ => {}
        }

        // A leading identifier followed by ':' is a label; anything else
        // rolls back and is interpreted as a mnemonic.
        let mut label: Option<String> = None;
        if let Token::Ident(name) = scanner.raw().clone() {
            let snapshot = scanner.state();
            self.lex(scanner)?;
            if scanner.raw() == &Token::Colon {
                self.lex(scanner)?;
                label = Some(name);
            } else {
                scanner.restore(snapshot);
            }
        }

        if scanner.raw() == &Token::DotEquate {
            self.do_equate(scanner, label)?;
            self.end_line(scanner)?;
            return Ok(bytes);
        }

        if let Some(name) = label.as_deref() {
            let line = scanner.tok_line();
            let name = name.to_string();
            match self.symbols.bind_label(&name, self.addr) {
                Ok(changed) => {
                    if changed {
                        self.changed = true;
                    }
                }
                Err(err) => {
                    return Err(self.fail(line, AsmErrorKind::Symbol, err.message(), None));
                }
            }
        }

        match scanner.raw().clone() {
            Token::Newline | Token::Comment | Token::Eof => {
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotOrg => {
                self.lex(scanner)?;
                let target = self.eval_expr(scanner)?;
                // The origin expression may name symbols that are not
                // bound until later lines, so the first pass only marks
                // the layout as provisional.
                if self.pass == 1 {
                    self.changed = true;
                } else {
                    self.addr = target;
                }
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotDb => {
                let bytes = self.do_data(scanner, 1)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotDw => {
                let bytes = self.do_data(scanner, 4)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotDef => {
                // Consumed exclusively by the define pre-pass.
                self.skip_line(scanner)?;
                Ok(bytes)
            }
            Token::DotIf => {
                self.do_if(scanner)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotElse => {
                self.do_else(scanner)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
            Token::DotEndIf => {
                self.do_endif(scanner)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
            _ => {
                let bytes = self.do_instruction(scanner)?;
                self.end_line(scanner)?;
                Ok(bytes)
            }
        }
    }

    fn do_equate(
        &mut self,
        scanner: &mut Scanner,
        label: Option<String>,
    ) -> Result<(), AsmRunError> {
        let line = scanner.tok_line();
        self.lex(scanner)?;
        let name = match label {
            Some(name) => name,
            None => match scanner.raw().clone() {
                Token::Ident(name) => {
                    self.lex(scanner)?;
                    name
                }
                other => {
                    return Err(self.fail(
                        line,
                        AsmErrorKind::Directive,
                        "Expected a name for .equate, found",
                        Some(&other.to_string()),
                    ));
                }
            },
        };
        let value = self.eval_expr(scanner)?;
        self.symbols
            .bind_equate(&name, value)
            .map_err(|err| self.fail(line, AsmErrorKind::Symbol, err.message(), None))?;
        Ok(())
    }

    fn do_data(&mut self, scanner: &mut Scanner, size: usize) -> Result<Vec<u8>, AsmRunError> {
        self.lex(scanner)?;
        let mut bytes = Vec::new();
        loop {
            let value = self.eval_expr(scanner)?;
            if size == 1 {
                bytes.push(value as u8);
            } else {
                bytes.extend_from_slice(&(value as u32).to_be_bytes());
            }
            self.addr += size as i64;
            if scanner.raw() != &Token::Comma {
                break;
            }
            self.lex(scanner)?;
        }
        Ok(bytes)
    }

    fn do_if(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        self.lex(scanner)?;
        let value = self.eval_expr(scanner)?;
        let cond = value != 0;
        // Condition values are provisional until the symbol table
        // stabilizes.
        if self.pass == 1 {
            self.changed = true;
        }
        self.cond_stack.push(CondFrame {
            active: cond,
            taken: cond,
            seen_else: false,
        });
        Ok(())
    }

    fn do_else(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        let line = scanner.tok_line();
        self.lex(scanner)?;
        if self.cond_stack.is_empty() {
            return Err(self.fail(
                line,
                AsmErrorKind::Directive,
                "Found .else without .if",
                None,
            ));
        }
        let parent_active = self.cond_stack[..self.cond_stack.len() - 1]
            .iter()
            .all(|frame| frame.active);
        let seen_else = self
            .cond_stack
            .last()
            .map(|frame| frame.seen_else)
            .unwrap_or(false);
        if seen_else {
            return Err(self.fail(line, AsmErrorKind::Directive, "Found .else after .else", None));
        }
        if let Some(frame) = self.cond_stack.last_mut() {
            frame.seen_else = true;
            frame.active = parent_active && !frame.taken;
            frame.taken = true;
        }
        Ok(())
    }

    fn do_endif(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        let line = scanner.tok_line();
        self.lex(scanner)?;
        if self.cond_stack.pop().is_none() {
            return Err(self.fail(
                line,
                AsmErrorKind::Directive,
                "Found .endif without .if",
                None,
            ));
        }
        Ok(())
    }

    /// Match the mnemonic's registered operand-pattern variants in order
    /// and encode the first one that fits the rest of the line.
    fn do_instruction(&mut self, scanner: &mut Scanner) -> Result<Vec<u8>, AsmRunError> {
        let line = scanner.tok_line();
        let mnemonic = match scanner.tok(Lane::Special, &self.builtins) {
            Token::Instr(name) => name,
            other => {
                return Err(self.fail(
                    line,
                    AsmErrorKind::Syntax,
                    "Expected a label, directive, or instruction, found",
                    Some(&other.to_string()),
                ));
            }
        };
        self.lex(scanner)?;

        let mut flag = false;
        if scanner.raw() == &Token::DotF {
            flag = true;
            self.lex(scanner)?;
        }

        for instr in instructions::variants_for(&mnemonic) {
            if flag && !instr.affects_flags {
                continue;
            }
            let snapshot = scanner.state();
            match self.match_variant(scanner, instr)? {
                Some(operands) => {
                    let size = instructions::group_size(instr.group);
                    let imm = if instr.pattern.pc_relative() {
                        operands.imm.wrapping_sub(self.addr).wrapping_sub(size)
                    } else {
                        operands.imm
                    };
                    if self.emitting && !instr.pattern.imm_fits(imm) {
                        let bits = instr.pattern.imm_bits().unwrap_or(0);
                        self.warnings.push(Diagnostic::new(
                            line,
                            Severity::Warning,
                            AsmError::new(
                                AsmErrorKind::Instruction,
                                &format!("Immediate out of range, masked to {bits} bits"),
                                Some(&imm.to_string()),
                            ),
                        ));
                    }
                    let bytes = instructions::encode(instr, flag, &operands.regs, imm);
                    self.addr += size;
                    return Ok(bytes);
                }
                None => scanner.restore(snapshot),
            }
        }

        if flag && instructions::variants_for(&mnemonic).all(|instr| !instr.affects_flags) {
            return Err(self.fail(
                line,
                AsmErrorKind::Instruction,
                "Instruction does not support the .f suffix",
                Some(&mnemonic),
            ));
        }
        Err(self.fail(
            line,
            AsmErrorKind::Instruction,
            "Invalid instruction arguments for",
            Some(&mnemonic),
        ))
    }

    /// Attempt one operand-pattern grammar against the token stream.
    /// `Ok(None)` means no match; the caller restores the scanner
    /// snapshot and tries the next variant.
    fn match_variant(
        &mut self,
        scanner: &mut Scanner,
        instr: &Instr,
    ) -> Result<Option<Operands>, AsmRunError> {
        let mut regs = Vec::new();
        let mut imm = 0i64;
        for slot in instr.pattern.grammar() {
            match slot {
                Slot::Reg => match scanner.tok(Lane::Special, &self.builtins) {
                    Token::Reg(num) => {
                        regs.push(num);
                        self.lex(scanner)?;
                    }
                    _ => return Ok(None),
                },
                Slot::Pc => {
                    if scanner.tok(Lane::Special, &self.builtins) != Token::RegPc {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::Ira => {
                    if scanner.tok(Lane::Special, &self.builtins) != Token::RegIra {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::Flags => {
                    if scanner.tok(Lane::Special, &self.builtins) != Token::RegFlags {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::Comma => {
                    if scanner.raw() != &Token::Comma {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::LBracket => {
                    if scanner.raw() != &Token::LBracket {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::RBracket => {
                    if scanner.raw() != &Token::RBracket {
                        return Ok(None);
                    }
                    self.lex(scanner)?;
                }
                Slot::Expr => {
                    let mut eval = ExprEvaluator::new(scanner, &mut self.symbols, self.addr);
                    match eval.eval() {
                        Ok(value) => imm = value,
                        // Not an expression here; let the next variant try.
                        Err(_) => return Ok(None),
                    }
                }
            }
        }
        if scanner.raw().is_end_of_line() {
            Ok(Some(Operands { regs, imm }))
        } else {
            Ok(None)
        }
    }

    fn eval_expr(&mut self, scanner: &mut Scanner) -> Result<i64, AsmRunError> {
        let mut eval = ExprEvaluator::new(scanner, &mut self.symbols, self.addr);
        eval.eval().map_err(|err| {
            AsmRunError::new(Diagnostic::new(
                err.line(),
                Severity::Error,
                AsmError::new(AsmErrorKind::Expression, err.message(), None),
            ))
        })
    }

    /// Require end of line and consume the newline, leaving the next
    /// line's first token pending.
    fn end_line(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        if scanner.raw() == &Token::Comment {
            self.lex(scanner)?;
        }
        match scanner.raw() {
            Token::Newline => self.lex(scanner),
            Token::Eof => Ok(()),
            other => {
                let found = other.to_string();
                Err(self.fail(
                    scanner.tok_line(),
                    AsmErrorKind::Syntax,
                    "Expected end of line, found",
                    Some(&found),
                ))
            }
        }
    }

    fn skip_line(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        loop {
            match scanner.raw() {
                Token::Eof => return Ok(()),
                Token::Newline => return self.lex(scanner),
                _ => self.lex(scanner)?,
            }
        }
    }

    fn cond_skipping(&self) -> bool {
        self.cond_stack.iter().any(|frame| !frame.active)
    }

    fn lex(&mut self, scanner: &mut Scanner) -> Result<(), AsmRunError> {
        scanner.lex(&mut self.symbols).map_err(|err| {
            AsmRunError::new(Diagnostic::new(
                err.line(),
                Severity::Error,
                AsmError::new(AsmErrorKind::Scanner, err.message(), None),
            ))
        })
    }

    fn fail(
        &self,
        line: u32,
        kind: AsmErrorKind,
        msg: &str,
        param: Option<&str>,
    ) -> AsmRunError {
        AsmRunError::new(Diagnostic::new(
            line,
            Severity::Error,
            AsmError::new(kind, msg, param),
        ))
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ListingWriter<W: Write> {
    out: W,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self) -> io::Result<()> {
        writeln!(self.out, "asmf32 frost32 Assembler v{VERSION}")?;
        writeln!(self.out, "ADDR      BYTES              LINE  SOURCE")?;
        writeln!(self.out, "--------  -----------------  ----  ------")?;
        Ok(())
    }

    pub fn write_line(
        &mut self,
        addr: u32,
        bytes: &[u8],
        line_num: u32,
        source: &str,
    ) -> io::Result<()> {
        let loc = if bytes.is_empty() {
            "--------".to_string()
        } else {
            format!("{addr:08X}")
        };
        writeln!(
            self.out,
            "{:<8}  {:<17}  {:>4}  {}",
            loc,
            format_bytes(bytes),
            line_num,
            source
        )
    }

    pub fn write_diagnostic(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")
    }

    pub fn footer(
        &mut self,
        lines: u32,
        warnings: u32,
        symbols: &SymbolTable,
    ) -> io::Result<()> {
        writeln!(self.out, "\nLines: {lines}  Warnings: {warnings}")?;
        writeln!(self.out, "\nSYMBOL TABLE\n")?;
        symbols.dump(&mut self.out)
    }
}

fn format_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}
