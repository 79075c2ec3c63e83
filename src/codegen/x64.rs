//! x86-64 instruction encoding.
//!
//! Only the handful of instructions the generator needs, on the eight legacy
//! general-purpose registers (no REX.R/REX.B extension is ever required).

use std::fmt;

/// Legacy general-purpose registers, numbered by their ModRM encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
}

impl Register {
    pub fn code(self) -> u8 {
        match self {
            Register::Rax => 0,
            Register::Rcx => 1,
            Register::Rdx => 2,
            Register::Rbx => 3,
            Register::Rsp => 4,
            Register::Rbp => 5,
            Register::Rsi => 6,
            Register::Rdi => 7,
        }
    }

    pub fn name64(self) -> &'static str {
        match self {
            Register::Rax => "rax",
            Register::Rcx => "rcx",
            Register::Rdx => "rdx",
            Register::Rbx => "rbx",
            Register::Rsp => "rsp",
            Register::Rbp => "rbp",
            Register::Rsi => "rsi",
            Register::Rdi => "rdi",
        }
    }

    pub fn name32(self) -> &'static str {
        match self {
            Register::Rax => "eax",
            Register::Rcx => "ecx",
            Register::Rdx => "edx",
            Register::Rbx => "ebx",
            Register::Rsp => "esp",
            Register::Rbp => "ebp",
            Register::Rsi => "esi",
            Register::Rdi => "edi",
        }
    }

    pub fn name16(self) -> &'static str {
        match self {
            Register::Rax => "ax",
            Register::Rcx => "cx",
            Register::Rdx => "dx",
            Register::Rbx => "bx",
            Register::Rsp => "sp",
            Register::Rbp => "bp",
            Register::Rsi => "si",
            Register::Rdi => "di",
        }
    }

    pub fn name8(self) -> &'static str {
        match self {
            Register::Rax => "al",
            Register::Rcx => "cl",
            Register::Rdx => "dl",
            Register::Rbx => "bl",
            Register::Rsp => "spl",
            Register::Rbp => "bpl",
            Register::Rsi => "sil",
            Register::Rdi => "dil",
        }
    }
}

/// REX prefix with only W set (64-bit operand size)
const REX_W: u8 = 0x48;
/// Bare REX prefix; selects spl/bpl/sil/dil instead of ah/ch/dh/bh
const REX: u8 = 0x40;

fn modrm_direct(reg: u8, rm: Register) -> u8 {
    0b1100_0000 | (reg << 3) | rm.code()
}

/// Encoding chosen to load an immediate into a 64-bit register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmediateForm {
    /// `mov r32, imm32` (B8+r id); the upper half is zeroed
    Imm32,
    /// `mov r64, simm32` (REX.W C7 /0 id); the immediate is sign-extended
    SignExtendedImm32,
    /// `movabs r64, imm64` (REX.W B8+r io)
    Imm64,
}

impl ImmediateForm {
    /// Narrowest form that materialises exactly `image` in a 64-bit register
    pub fn select(image: u64) -> Self {
        if image <= u64::from(u32::MAX) {
            ImmediateForm::Imm32
        } else if (image as i64) >= i64::from(i32::MIN) {
            ImmediateForm::SignExtendedImm32
        } else {
            ImmediateForm::Imm64
        }
    }

    /// Number of immediate bytes in the encoding
    pub fn width(self) -> usize {
        match self {
            ImmediateForm::Imm32 | ImmediateForm::SignExtendedImm32 => 4,
            ImmediateForm::Imm64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

impl AluOp {
    /// `op r/m64, r64` opcode
    fn opcode(self) -> u8 {
        match self {
            AluOp::Add => 0x01,
            AluOp::Sub => 0x29,
            AluOp::And => 0x21,
            AluOp::Or => 0x09,
            AluOp::Xor => 0x31,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            AluOp::Add => "add",
            AluOp::Sub => "sub",
            AluOp::And => "and",
            AluOp::Or => "or",
            AluOp::Xor => "xor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

impl ShiftOp {
    /// ModRM reg field of the D3 group
    fn extension(self) -> u8 {
        match self {
            ShiftOp::Shl => 4,
            ShiftOp::Shr => 5,
            ShiftOp::Sar => 7,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            ShiftOp::Shl => "shl",
            ShiftOp::Shr => "shr",
            ShiftOp::Sar => "sar",
        }
    }
}

/// One emitted instruction, kept for listings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub offset: usize,
    pub len: usize,
    pub text: String,
}

impl fmt::Display for ListingEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}  {}", self.offset, self.text)
    }
}

/// Append-only instruction buffer
#[derive(Debug, Default)]
pub struct Assembler {
    code: Vec<u8>,
    listing: Vec<ListingEntry>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the next instruction
    pub fn offset(&self) -> usize {
        self.code.len()
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn finish(self) -> (Vec<u8>, Vec<ListingEntry>) {
        (self.code, self.listing)
    }

    fn emit(&mut self, bytes: &[u8], text: String) {
        log::trace!("{:#06x}: {:02x?} {}", self.code.len(), bytes, text);
        self.listing.push(ListingEntry {
            offset: self.code.len(),
            len: bytes.len(),
            text,
        });
        self.code.extend_from_slice(bytes);
    }

    pub fn push(&mut self, reg: Register) {
        self.emit(&[0x50 + reg.code()], format!("push {}", reg.name64()));
    }

    pub fn pop(&mut self, reg: Register) {
        self.emit(&[0x58 + reg.code()], format!("pop {}", reg.name64()));
    }

    pub fn ret(&mut self) {
        self.emit(&[0xC3], "ret".to_string());
    }

    /// `mov dst, src` (64-bit)
    pub fn mov(&mut self, dst: Register, src: Register) {
        self.emit(
            &[REX_W, 0x89, modrm_direct(src.code(), dst)],
            format!("mov {}, {}", dst.name64(), src.name64()),
        );
    }

    /// Load `image` into `reg` with the narrowest exact encoding
    pub fn mov_imm(&mut self, reg: Register, image: u64) -> ImmediateForm {
        let form = ImmediateForm::select(image);
        match form {
            ImmediateForm::Imm32 => {
                let mut bytes = vec![0xB8 + reg.code()];
                bytes.extend_from_slice(&(image as u32).to_le_bytes());
                self.emit(&bytes, format!("mov {}, {:#x}", reg.name32(), image));
            }
            ImmediateForm::SignExtendedImm32 => {
                let mut bytes = vec![REX_W, 0xC7, modrm_direct(0, reg)];
                bytes.extend_from_slice(&(image as u32).to_le_bytes());
                self.emit(&bytes, format!("mov {}, {}", reg.name64(), image as i64));
            }
            ImmediateForm::Imm64 => {
                let mut bytes = vec![REX_W, 0xB8 + reg.code()];
                bytes.extend_from_slice(&image.to_le_bytes());
                self.emit(&bytes, format!("movabs {}, {:#x}", reg.name64(), image));
            }
        }
        form
    }

    /// `op dst, src` (64-bit)
    pub fn alu(&mut self, op: AluOp, dst: Register, src: Register) {
        self.emit(
            &[REX_W, op.opcode(), modrm_direct(src.code(), dst)],
            format!("{} {}, {}", op.mnemonic(), dst.name64(), src.name64()),
        );
    }

    /// `imul dst, src` (64-bit, low half of the product)
    pub fn imul(&mut self, dst: Register, src: Register) {
        self.emit(
            &[REX_W, 0x0F, 0xAF, modrm_direct(dst.code(), src)],
            format!("imul {}, {}", dst.name64(), src.name64()),
        );
    }

    pub fn neg(&mut self, reg: Register) {
        self.emit(&[REX_W, 0xF7, modrm_direct(3, reg)], format!("neg {}", reg.name64()));
    }

    pub fn not(&mut self, reg: Register) {
        self.emit(&[REX_W, 0xF7, modrm_direct(2, reg)], format!("not {}", reg.name64()));
    }

    /// `shl/shr/sar reg, cl`
    pub fn shift_cl(&mut self, op: ShiftOp, reg: Register) {
        self.emit(
            &[REX_W, 0xD3, modrm_direct(op.extension(), reg)],
            format!("{} {}, cl", op.mnemonic(), reg.name64()),
        );
    }

    /// `and r32, imm8` (sign-extended imm8; upper half zeroed)
    pub fn and_imm8(&mut self, reg: Register, imm: i8) {
        self.emit(
            &[0x83, modrm_direct(4, reg), imm as u8],
            format!("and {}, {:#x}", reg.name32(), imm),
        );
    }

    /// `movzx r32, r8`
    pub fn movzx8(&mut self, reg: Register) {
        let modrm = modrm_direct(reg.code(), reg);
        let text = format!("movzx {}, {}", reg.name32(), reg.name8());
        if reg.code() >= 4 {
            self.emit(&[REX, 0x0F, 0xB6, modrm], text);
        } else {
            self.emit(&[0x0F, 0xB6, modrm], text);
        }
    }

    /// `movzx r32, r16`
    pub fn movzx16(&mut self, reg: Register) {
        self.emit(
            &[0x0F, 0xB7, modrm_direct(reg.code(), reg)],
            format!("movzx {}, {}", reg.name32(), reg.name16()),
        );
    }

    /// `mov r32, r32`, which clears the upper half
    pub fn zero_extend32(&mut self, reg: Register) {
        self.emit(
            &[0x89, modrm_direct(reg.code(), reg)],
            format!("mov {}, {}", reg.name32(), reg.name32()),
        );
    }

    /// `movsx r64, r8`
    pub fn movsx8(&mut self, reg: Register) {
        self.emit(
            &[REX_W, 0x0F, 0xBE, modrm_direct(reg.code(), reg)],
            format!("movsx {}, {}", reg.name64(), reg.name8()),
        );
    }

    /// `movsx r64, r16`
    pub fn movsx16(&mut self, reg: Register) {
        self.emit(
            &[REX_W, 0x0F, 0xBF, modrm_direct(reg.code(), reg)],
            format!("movsx {}, {}", reg.name64(), reg.name16()),
        );
    }

    /// `movsxd r64, r32`
    pub fn movsxd(&mut self, reg: Register) {
        self.emit(
            &[REX_W, 0x63, modrm_direct(reg.code(), reg)],
            format!("movsxd {}, {}", reg.name64(), reg.name32()),
        );
    }
}
