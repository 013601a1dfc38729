// Instruction descriptors, operand-pattern grammars, and the bit-level
// encoders for the four frost32 encoding groups.

/// One admissible operand shape for a mnemonic. Each pattern registers a
/// grammar (a fixed slot sequence) with the matcher; adding a shape means
/// adding a variant here and one grammar entry below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandPattern {
    NoArgs,
    UImm16,
    Imm32,
    Branch,
    Ra,
    RaUImm16,
    RaRb,
    RaRbUImm16,
    RaRbSImm16,
    RaRbImm32,
    RaRbRc,
    RaRbRcSImm12,
    LdStRaRb,
    LdStRaRbSImm12,
    LdStRaRbImm32,
    LdStRaRbRc,
    LdStRaRbRcSImm12,
    RaIra,
    IraRa,
    RaFlags,
    FlagsRa,
    RaPc,
}

/// Grammar elements an operand pattern is built from: a general-purpose
/// register, one of the special registers, literal punctuation, or an
/// expression production.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Reg,
    Pc,
    Ira,
    Flags,
    Comma,
    LBracket,
    RBracket,
    Expr,
}

impl OperandPattern {
    /// The fixed token shape this pattern matches.
    pub fn grammar(self) -> &'static [Slot] {
        use Slot::*;
        match self {
            OperandPattern::NoArgs => &[],
            OperandPattern::UImm16 | OperandPattern::Imm32 | OperandPattern::Branch => &[Expr],
            OperandPattern::Ra => &[Reg],
            OperandPattern::RaUImm16 => &[Reg, Comma, Expr],
            OperandPattern::RaRb => &[Reg, Comma, Reg],
            OperandPattern::RaRbUImm16
            | OperandPattern::RaRbSImm16
            | OperandPattern::RaRbImm32 => &[Reg, Comma, Reg, Comma, Expr],
            OperandPattern::RaRbRc => &[Reg, Comma, Reg, Comma, Reg],
            OperandPattern::RaRbRcSImm12 => &[Reg, Comma, Reg, Comma, Reg, Comma, Expr],
            OperandPattern::LdStRaRb => &[Reg, Comma, LBracket, Reg, RBracket],
            OperandPattern::LdStRaRbSImm12 | OperandPattern::LdStRaRbImm32 => {
                &[Reg, Comma, LBracket, Reg, Comma, Expr, RBracket]
            }
            OperandPattern::LdStRaRbRc => &[Reg, Comma, LBracket, Reg, Comma, Reg, RBracket],
            OperandPattern::LdStRaRbRcSImm12 => {
                &[Reg, Comma, LBracket, Reg, Comma, Reg, Comma, Expr, RBracket]
            }
            OperandPattern::RaIra => &[Reg, Comma, Ira],
            OperandPattern::IraRa => &[Ira, Comma, Reg],
            OperandPattern::RaFlags => &[Reg, Comma, Flags],
            OperandPattern::FlagsRa => &[Flags, Comma, Reg],
            OperandPattern::RaPc => &[Reg, Comma, Pc],
        }
    }

    /// Branch-shaped immediates encode the distance from the end of the
    /// instruction to the target.
    pub fn pc_relative(self) -> bool {
        matches!(self, OperandPattern::Branch)
    }

    /// Immediate field width in bits, if the pattern carries one.
    pub fn imm_bits(self) -> Option<u32> {
        match self {
            OperandPattern::UImm16
            | OperandPattern::Branch
            | OperandPattern::RaUImm16
            | OperandPattern::RaRbUImm16
            | OperandPattern::RaRbSImm16 => Some(16),
            OperandPattern::RaRbRcSImm12
            | OperandPattern::LdStRaRbSImm12
            | OperandPattern::LdStRaRbRcSImm12 => Some(12),
            OperandPattern::Imm32 | OperandPattern::RaRbImm32 | OperandPattern::LdStRaRbImm32 => {
                Some(32)
            }
            _ => None,
        }
    }

    /// Whether `value` fits this pattern's immediate field without masking.
    pub fn imm_fits(self, value: i64) -> bool {
        match self {
            OperandPattern::UImm16 | OperandPattern::RaUImm16 | OperandPattern::RaRbUImm16 => {
                (0..=0xffff).contains(&value)
            }
            OperandPattern::Branch | OperandPattern::RaRbSImm16 => {
                (-0x8000..=0x7fff).contains(&value)
            }
            OperandPattern::RaRbRcSImm12
            | OperandPattern::LdStRaRbSImm12
            | OperandPattern::LdStRaRbRcSImm12 => (-0x800..=0x7ff).contains(&value),
            OperandPattern::Imm32 | OperandPattern::RaRbImm32 | OperandPattern::LdStRaRbImm32 => {
                (-0x8000_0000..=0xffff_ffff).contains(&value)
            }
            _ => true,
        }
    }
}

/// One operand-pattern variant of a mnemonic. Variants for a mnemonic are
/// tried in table order; the first match wins.
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub mnemonic: &'static str,
    pub pattern: OperandPattern,
    pub group: u8,
    pub opcode: u8,
    pub affects_flags: bool,
}

const fn instr(
    mnemonic: &'static str,
    pattern: OperandPattern,
    group: u8,
    opcode: u8,
    affects_flags: bool,
) -> Instr {
    Instr {
        mnemonic,
        pattern,
        group,
        opcode,
        affects_flags,
    }
}

/// Total emitted size in bytes for an encoding group.
pub fn group_size(group: u8) -> i64 {
    match group {
        0 => 2,
        3 => 6,
        _ => 4,
    }
}

use OperandPattern as P;

pub const INSTRUCTION_TABLE: &[Instr] = &[
    // Group 0: one 16-bit word.
    instr("nop", P::NoArgs, 0, 0, false),
    instr("add", P::RaRb, 0, 1, true),
    instr("adc", P::RaRb, 0, 2, true),
    instr("sub", P::RaRb, 0, 3, true),
    instr("sbc", P::RaRb, 0, 4, true),
    instr("and", P::RaRb, 0, 5, true),
    instr("or", P::RaRb, 0, 6, true),
    instr("xor", P::RaRb, 0, 7, true),
    instr("lsl", P::RaRb, 0, 8, true),
    instr("lsr", P::RaRb, 0, 9, true),
    instr("asr", P::RaRb, 0, 10, true),
    instr("cpy", P::RaRb, 0, 11, true),
    instr("cpy", P::RaPc, 0, 15, false),
    instr("cpy", P::RaIra, 0, 16, false),
    instr("cpy", P::RaFlags, 0, 18, false),
    instr("cpy", P::IraRa, 0, 17, false),
    instr("cpy", P::FlagsRa, 0, 19, false),
    instr("cmp", P::RaRb, 0, 12, false),
    instr("jr", P::Ra, 0, 13, false),
    instr("reti", P::NoArgs, 0, 14, false),
    // Group 1: word plus 16-bit immediate.
    instr("cpyi", P::RaUImm16, 1, 0, false),
    instr("addi", P::RaRbSImm16, 1, 1, true),
    instr("subi", P::RaRbSImm16, 1, 2, true),
    instr("andi", P::RaRbUImm16, 1, 3, true),
    instr("ori", P::RaRbUImm16, 1, 4, true),
    instr("xori", P::RaRbUImm16, 1, 5, true),
    instr("cmpi", P::RaUImm16, 1, 6, false),
    instr("swi", P::UImm16, 1, 7, false),
    instr("jmp", P::Branch, 1, 8, false),
    instr("call", P::Branch, 1, 9, false),
    instr("beq", P::Branch, 1, 10, false),
    instr("bne", P::Branch, 1, 11, false),
    instr("blt", P::Branch, 1, 12, false),
    instr("bge", P::Branch, 1, 13, false),
    instr("bltu", P::Branch, 1, 14, false),
    instr("bgeu", P::Branch, 1, 15, false),
    // Group 2: word plus rC:4/imm12:12 word. Register-indexed forms come
    // before the expression forms so the register interpretation wins.
    instr("ldr", P::LdStRaRb, 2, 0, false),
    instr("ldr", P::LdStRaRbRc, 2, 0, false),
    instr("ldr", P::LdStRaRbRcSImm12, 2, 0, false),
    instr("ldr", P::LdStRaRbSImm12, 2, 0, false),
    instr("str", P::LdStRaRb, 2, 1, false),
    instr("str", P::LdStRaRbRc, 2, 1, false),
    instr("str", P::LdStRaRbRcSImm12, 2, 1, false),
    instr("str", P::LdStRaRbSImm12, 2, 1, false),
    instr("ldb", P::LdStRaRb, 2, 2, false),
    instr("ldb", P::LdStRaRbRc, 2, 2, false),
    instr("ldb", P::LdStRaRbRcSImm12, 2, 2, false),
    instr("ldb", P::LdStRaRbSImm12, 2, 2, false),
    instr("stb", P::LdStRaRb, 2, 3, false),
    instr("stb", P::LdStRaRbRc, 2, 3, false),
    instr("stb", P::LdStRaRbRcSImm12, 2, 3, false),
    instr("stb", P::LdStRaRbSImm12, 2, 3, false),
    instr("lea", P::RaRbRcSImm12, 2, 4, false),
    instr("add", P::RaRbRc, 2, 5, true),
    instr("sub", P::RaRbRc, 2, 6, true),
    instr("and", P::RaRbRc, 2, 7, true),
    instr("or", P::RaRbRc, 2, 8, true),
    instr("xor", P::RaRbRc, 2, 9, true),
    // Group 3: word plus 32-bit immediate.
    instr("jmpa", P::Imm32, 3, 0, false),
    instr("calla", P::Imm32, 3, 1, false),
    instr("addl", P::RaRbImm32, 3, 2, true),
    instr("ldrl", P::LdStRaRbImm32, 3, 3, false),
    instr("strl", P::LdStRaRbImm32, 3, 4, false),
];

/// Variants registered for a mnemonic, in registration order.
pub fn variants_for<'a>(mnemonic: &'a str) -> impl Iterator<Item = &'static Instr> + 'a {
    INSTRUCTION_TABLE
        .iter()
        .filter(move |instr| instr.mnemonic == mnemonic)
}

/// Encode one instruction. `regs` holds the matched register fields in
/// rA, rB, rC order; absent fields are zero. The immediate is masked to
/// the pattern's field width. Emission is big-endian, most-significant
/// byte first.
pub fn encode(instr: &Instr, flag: bool, regs: &[u8], imm: i64) -> Vec<u8> {
    let ra = regs.first().copied().unwrap_or(0) as u16;
    let rb = regs.get(1).copied().unwrap_or(0) as u16;
    let rc = regs.get(2).copied().unwrap_or(0) as u16;

    let word = ((instr.group as u16) << 14)
        | ((flag as u16) << 13)
        | (((instr.opcode as u16) & 0x1f) << 8)
        | ((ra & 0x0f) << 4)
        | (rb & 0x0f);

    let mut bytes = Vec::with_capacity(6);
    bytes.extend_from_slice(&word.to_be_bytes());
    match instr.group {
        1 => bytes.extend_from_slice(&(imm as u16).to_be_bytes()),
        2 => {
            let word2 = ((rc & 0x0f) << 12) | ((imm as u16) & 0x0fff);
            bytes.extend_from_slice(&word2.to_be_bytes());
        }
        3 => bytes.extend_from_slice(&(imm as u32).to_be_bytes()),
        _ => {}
    }
    bytes
}
