/*!
Single-instruction x86/x86-64 encoding.

This crate turns one instruction description (opcode bytes, registers, an
optional memory operand, an optional immediate) into the exact byte sequence
the CPU expects, including the ModR/M and SIB addressing bytes and the
operand-size (`66h`), address-size (`67h`) and REX prefixes.

The entry point is [`Encoder::insn`], a builder over the full operand
surface, plus a set of named helpers (`push`, `pop`, `ret`, `inc`, `cmp`,
near jumps) so callers emitting common instructions never have to spell out
opcodes. Two encoding modes exist, selected at construction:

- [`Mode::Protected32`]: classic 32-bit encoding. No REX prefixes; the
  extended registers `R8`-`R15` are rejected.
- [`Mode::Long64`]: 64-bit encoding. REX prefixes are emitted when needed
  and a `67h` prefix selects 32-bit addressing.

```
use rxjit_x86::{Encoder, Mode, Reg, Size, opcode};

let enc = Encoder::new(Mode::Long64);
// mov rax, [rcx]
let bytes = enc.insn(&[opcode::MOV_R_RM])
    .reg(Reg::Eax)
    .base(Reg::Ecx)
    .size(Size::Qword)
    .call()?;
assert_eq!(bytes, [0x48, 0x8B, 0x01]);
# Ok::<(), rxjit_x86::EncodingError>(())
```

Register-direct operands go through `reg_mem`, memory operands through
`base`/`index`/`scale`/`disp` (or a prebuilt [`Mem`]). `reg` and `opex`
share the REG field of the ModR/M byte and are therefore mutually exclusive.
*/

use bitflags::bitflags;
use bon::bon;
use thiserror::Error;

/// General purpose register numbers as used in ModR/M, SIB and REX encoding.
///
/// The 32-bit names are used for all operand sizes; the operand size decides
/// whether `Eax` means `AL`, `AX`, `EAX` or `RAX`. `R8`-`R15` are only
/// available in [`Mode::Long64`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Reg {
    Eax = 0,
    Ecx = 1,
    Edx = 2,
    Ebx = 3,
    Esp = 4,
    Ebp = 5,
    Esi = 6,
    Edi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    /// Full 4-bit register number.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// The three bits that fit in a ModR/M or SIB field. The fourth bit
    /// travels in the REX prefix.
    pub fn low3(self) -> u8 {
        self as u8 & 0b111
    }

    /// `R8`-`R15`, reachable only through a REX prefix.
    pub fn is_extended(self) -> bool {
        self as u8 & 0b1000 != 0
    }
}

/// Operand size in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Size {
    Byte = 1,
    Word = 2,
    Dword = 4,
    Qword = 8,
}

impl Size {
    pub fn bytes(self) -> usize {
        self as usize
    }
}

/// Index scaling factor of a SIB byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Scale {
    Mul1 = 0b00,
    Mul2 = 0b01,
    Mul4 = 0b10,
    Mul8 = 0b11,
}

/// Semantic operand types used by the JIT's variable side table.
///
/// `Pointer` and `Long` follow the natural word size of the mode, the rest
/// are fixed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperandKind {
    Pointer,
    Long,
    Int,
    Short,
    Byte,
}

impl std::fmt::Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OperandKind::Pointer => "pointer",
            OperandKind::Long => "long",
            OperandKind::Int => "int",
            OperandKind::Short => "short",
            OperandKind::Byte => "byte",
        })
    }
}

/// Encoding mode, fixed per [`Encoder`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    Protected32,
    Long64,
}

impl Mode {
    /// Concrete size of a semantic operand type in this mode.
    pub fn operand_size(self, kind: OperandKind) -> Size {
        match kind {
            OperandKind::Pointer | OperandKind::Long => match self {
                Mode::Protected32 => Size::Dword,
                Mode::Long64 => Size::Qword,
            },
            OperandKind::Int => Size::Dword,
            OperandKind::Short => Size::Word,
            OperandKind::Byte => Size::Byte,
        }
    }
}

/// A memory operand: `[base + scale*index + disp]`, every part optional.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bon::Builder)]
pub struct Mem {
    pub base: Option<Reg>,
    pub index: Option<Reg>,
    #[builder(default = Scale::Mul1)]
    pub scale: Scale,
    #[builder(default)]
    pub disp: i32,
}

bitflags! {
    /// The four REX payload bits. The fixed `0100` high nibble is added when
    /// the byte is materialized.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Rex: u8 {
        /// 64-bit operand size.
        const W = 0b1000;
        /// Extends the ModR/M REG field.
        const R = 0b0100;
        /// Extends the SIB INDEX field.
        const X = 0b0010;
        /// Extends ModR/M R/M, SIB BASE or the opcode register.
        const B = 0b0001;
    }
}

impl Rex {
    pub fn byte(self) -> u8 {
        0x40 | self.bits()
    }
}

/// Opcode bytes used by this crate's helpers and by the JIT lowering passes.
pub mod opcode {
    pub const MOV_R_RM_8: u8 = 0x8A;
    pub const MOV_R_RM: u8 = 0x8B;
    pub const MOV_RM_R_8: u8 = 0x88;
    pub const MOV_RM_R: u8 = 0x89;
    pub const MOV_R_IMM_8: u8 = 0xB0;
    pub const MOV_R_IMM: u8 = 0xB8;
    pub const PUSH_R: u8 = 0x50;
    pub const POP_R: u8 = 0x58;
    pub const CMP_RM_IMM_8: u8 = 0x80;
    pub const CMP_RM_IMM_8_EX: u8 = 0x7;
    pub const CMP_RM_IMM: u8 = 0x81;
    pub const CMP_RM_IMM_EX: u8 = 0x7;
    pub const CMP_RM_R: u8 = 0x39;
    pub const CMP_AL_IMM_8: u8 = 0x3C;
    pub const CMP_EAX_IMM: u8 = 0x3D;
    pub const INC_R_X32: u8 = 0x40;
    pub const INC_RM_8: u8 = 0xFE;
    pub const INC_RM_8_EX: u8 = 0x0;
    pub const INC_RM: u8 = 0xFF;
    pub const INC_RM_EX: u8 = 0x0;
    pub const RET: u8 = 0xC3;
    pub const JMP_REL: u8 = 0xE9;
    pub const JE_REL_A: u8 = 0x0F;
    pub const JE_REL_B: u8 = 0x84;
    pub const JNE_REL_A: u8 = 0x0F;
    pub const JNE_REL_B: u8 = 0x85;

    pub const OVERRIDE_SIZE: u8 = 0x66;
    pub const OVERRIDE_ADDRESSING: u8 = 0x67;
}

/// An instruction description the encoder cannot express.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum EncodingError {
    /// `[base + scale*ESP]` has no encoding; the `ESP`/`R12` index code
    /// means "no index" in a SIB byte.
    #[error("ESP/R12 cannot be used as an addressing index")]
    IndexRegister,
    #[error("16-bit addressing is not supported")]
    AddressSize16,
    #[error("64-bit operands are not available in 32-bit mode")]
    QwordOperand,
    #[error("register {0:?} requires 64-bit mode")]
    ExtendedRegister(Reg),
    #[error("immediate {imm} does not fit in {size} byte(s)")]
    ImmediateOverflow { imm: i64, size: u8 },
}

/// A register or memory operand, for helpers that accept either.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Mem(Mem),
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl From<Mem> for Operand {
    fn from(mem: Mem) -> Self {
        Operand::Mem(mem)
    }
}

const MODRM_MOD_MEM: u8 = 0b00;
const MODRM_MOD_MEM_DISP8: u8 = 0b01;
const MODRM_MOD_MEM_DISP32: u8 = 0b10;
const MODRM_MOD_REG: u8 = 0b11;
const MODRM_RM_USE_SIB: u8 = 0b100;
const MODRM_RM_DISP32_ONLY_32: u8 = 0b101;
const SIB_INDEX_NONE: u8 = 0b100;
const SIB_BASE_NONE: u8 = 0b101;

fn modrm(mod_: u8, reg: u8, rm: u8) -> u8 {
    debug_assert!(mod_ <= 0b11 && reg <= 0b111 && rm <= 0b111);
    mod_ << 6 | reg << 3 | rm
}

fn sib(scale: u8, index: u8, base: u8) -> u8 {
    debug_assert!(scale <= 0b11 && index <= 0b111 && base <= 0b111);
    scale << 6 | index << 3 | base
}

/// The encoder proper. Cheap to construct, carries only the [`Mode`].
#[derive(Clone, Copy, Debug)]
pub struct Encoder {
    mode: Mode,
}

#[bon]
impl Encoder {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Encode one instruction.
    ///
    /// `opcode` is the raw opcode byte sequence. Everything else is
    /// optional:
    ///
    /// - `reg`: the register operand living in the ModR/M REG field.
    /// - `opex`: an opcode extension living in the same field. Mutually
    ///   exclusive with `reg`.
    /// - `reg_mem`: a register-direct R/M operand.
    /// - `base`/`index`/`scale`/`disp`, or `mem`: a memory R/M operand.
    /// - `imm`: an immediate, `imm_size` bytes wide (defaults to `size`).
    /// - `size`: operand size. Drives the `66h` prefix and `REX.W`.
    /// - `address_size`: address size. On 64-bit, 4 bytes emits `67h`.
    /// - `opcode_reg`: register added into the last opcode byte (`+rd`
    ///   forms such as `push`/`pop`/`mov r, imm`).
    #[builder]
    pub fn insn(
        &self,
        #[builder(start_fn)] opcode: &[u8],
        reg: Option<Reg>,
        opex: Option<u8>,
        reg_mem: Option<Reg>,
        base: Option<Reg>,
        index: Option<Reg>,
        scale: Option<Scale>,
        disp: Option<i32>,
        mem: Option<Mem>,
        imm: Option<i64>,
        size: Option<Size>,
        imm_size: Option<Size>,
        address_size: Option<Size>,
        opcode_reg: Option<Reg>,
    ) -> Result<Vec<u8>, EncodingError> {
        debug_assert!(reg.is_none() || opex.is_none());

        let (base, index, scale, disp) = match mem {
            Some(m) => (m.base, m.index, Some(m.scale), Some(m.disp)),
            None => (base, index, scale, disp),
        };

        if self.mode == Mode::Protected32 {
            for r in [reg, reg_mem, base, index, opcode_reg].into_iter().flatten() {
                if r.is_extended() {
                    return Err(EncodingError::ExtendedRegister(r));
                }
            }
        }

        let mut out = Vec::with_capacity(8);
        self.push_prefixes(
            &mut out,
            size,
            address_size,
            reg,
            reg_mem,
            index,
            base,
            opcode_reg,
        )?;

        if let Some((last, head)) = opcode.split_last() {
            out.extend_from_slice(head);
            out.push(last + opcode_reg.map_or(0, Reg::low3));
        }

        let has_rm = reg.is_some()
            || opex.is_some()
            || reg_mem.is_some()
            || base.is_some()
            || index.is_some()
            || disp.is_some();
        if has_rm {
            let reg_bits = reg.map(Reg::low3).or(opex).unwrap_or(0);
            self.push_modrm_sib(&mut out, reg_bits, reg_mem, base, index, scale, disp)?;
        }

        if let Some(imm) = imm {
            let width = imm_size.or(size).unwrap_or(Size::Dword);
            push_imm(&mut out, imm, width)?;
        }
        Ok(out)
    }

    /// `push r32`/`push r64`.
    pub fn push(&self, reg: Reg) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::PUSH_R]).opcode_reg(reg).call()
    }

    /// `pop r32`/`pop r64`.
    pub fn pop(&self, reg: Reg) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::POP_R]).opcode_reg(reg).call()
    }

    /// Near return.
    pub fn ret(&self) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::RET]).call()
    }

    /// `jmp rel32`, 5 bytes.
    pub fn jmp_near(&self, rel: i32) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::JMP_REL])
            .imm(rel.into())
            .size(Size::Dword)
            .call()
    }

    /// `je rel32`, 6 bytes.
    pub fn je_near(&self, rel: i32) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::JE_REL_A, opcode::JE_REL_B])
            .imm(rel.into())
            .size(Size::Dword)
            .call()
    }

    /// `jne rel32`, 6 bytes.
    pub fn jne_near(&self, rel: i32) -> Result<Vec<u8>, EncodingError> {
        self.insn(&[opcode::JNE_REL_A, opcode::JNE_REL_B])
            .imm(rel.into())
            .size(Size::Dword)
            .call()
    }

    /// Increment a register or memory operand.
    ///
    /// 32-bit mode uses the one-byte `inc r32` form where it exists; 64-bit
    /// mode always goes through `FF /0` because the short form became the
    /// REX prefix space.
    pub fn inc(
        &self,
        operand: impl Into<Operand>,
        size: Size,
    ) -> Result<Vec<u8>, EncodingError> {
        let operand = operand.into();
        match (size, operand) {
            (Size::Byte, Operand::Reg(reg)) => self
                .insn(&[opcode::INC_RM_8])
                .opex(opcode::INC_RM_8_EX)
                .reg_mem(reg)
                .size(size)
                .call(),
            (Size::Byte, Operand::Mem(mem)) => self
                .insn(&[opcode::INC_RM_8])
                .opex(opcode::INC_RM_8_EX)
                .mem(mem)
                .size(size)
                .call(),
            (_, Operand::Reg(reg)) if self.mode == Mode::Protected32 => self
                .insn(&[opcode::INC_R_X32])
                .opcode_reg(reg)
                .size(size)
                .call(),
            (_, Operand::Reg(reg)) => self
                .insn(&[opcode::INC_RM])
                .opex(opcode::INC_RM_EX)
                .reg_mem(reg)
                .size(size)
                .call(),
            (_, Operand::Mem(mem)) => self
                .insn(&[opcode::INC_RM])
                .opex(opcode::INC_RM_EX)
                .mem(mem)
                .size(size)
                .call(),
        }
    }

    /// Compare a register or memory operand against an immediate.
    ///
    /// Picks the short accumulator forms (`cmp al, imm8` / `cmp eax, imm`)
    /// when the operand is the accumulator register.
    pub fn cmp(
        &self,
        operand: impl Into<Operand>,
        imm: i64,
        size: Size,
    ) -> Result<Vec<u8>, EncodingError> {
        match (operand.into(), size) {
            (Operand::Reg(Reg::Eax), Size::Byte) => self
                .insn(&[opcode::CMP_AL_IMM_8])
                .imm(imm)
                .size(size)
                .call(),
            (Operand::Reg(Reg::Eax), _) => self
                .insn(&[opcode::CMP_EAX_IMM])
                .imm(imm)
                .size(size)
                .imm_size(size.min(Size::Dword))
                .call(),
            (Operand::Reg(reg), Size::Byte) => self
                .insn(&[opcode::CMP_RM_IMM_8])
                .opex(opcode::CMP_RM_IMM_8_EX)
                .reg_mem(reg)
                .imm(imm)
                .size(size)
                .call(),
            (Operand::Reg(reg), _) => self
                .insn(&[opcode::CMP_RM_IMM])
                .opex(opcode::CMP_RM_IMM_EX)
                .reg_mem(reg)
                .imm(imm)
                .size(size)
                .imm_size(size.min(Size::Dword))
                .call(),
            (Operand::Mem(mem), Size::Byte) => self
                .insn(&[opcode::CMP_RM_IMM_8])
                .opex(opcode::CMP_RM_IMM_8_EX)
                .mem(mem)
                .imm(imm)
                .size(size)
                .call(),
            (Operand::Mem(mem), _) => self
                .insn(&[opcode::CMP_RM_IMM])
                .opex(opcode::CMP_RM_IMM_EX)
                .mem(mem)
                .imm(imm)
                .size(size)
                .imm_size(size.min(Size::Dword))
                .call(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_prefixes(
        &self,
        out: &mut Vec<u8>,
        size: Option<Size>,
        address_size: Option<Size>,
        reg: Option<Reg>,
        reg_mem: Option<Reg>,
        index: Option<Reg>,
        base: Option<Reg>,
        opcode_reg: Option<Reg>,
    ) -> Result<(), EncodingError> {
        if size == Some(Size::Word) {
            out.push(opcode::OVERRIDE_SIZE);
        }
        match self.mode {
            Mode::Protected32 => {
                if size == Some(Size::Qword) {
                    return Err(EncodingError::QwordOperand);
                }
                if address_size == Some(Size::Word) {
                    return Err(EncodingError::AddressSize16);
                }
            }
            Mode::Long64 => {
                if address_size == Some(Size::Dword) {
                    out.push(opcode::OVERRIDE_ADDRESSING);
                }
                let mut rex = Rex::empty();
                if size == Some(Size::Qword) {
                    rex |= Rex::W;
                }
                if reg.is_some_and(Reg::is_extended) {
                    rex |= Rex::R;
                }
                if index.is_some_and(Reg::is_extended) {
                    rex |= Rex::X;
                }
                if reg_mem.is_some_and(Reg::is_extended)
                    || base.is_some_and(Reg::is_extended)
                    || opcode_reg.is_some_and(Reg::is_extended)
                {
                    rex |= Rex::B;
                }
                // A byte access through ESP/EBP/ESI/EDI needs a null REX to
                // select SPL/BPL/SIL/DIL instead of AH/CH/DH/BH.
                let byte_high = size == Some(Size::Byte)
                    && [reg, reg_mem, opcode_reg].into_iter().flatten().any(|r| {
                        matches!(r, Reg::Esp | Reg::Ebp | Reg::Esi | Reg::Edi)
                    });
                if !rex.is_empty() || byte_high {
                    out.push(rex.byte());
                }
            }
        }
        Ok(())
    }

    /// ModR/M, SIB and displacement bytes. `reg_bits` is the already-merged
    /// REG/opcode-extension field.
    fn push_modrm_sib(
        &self,
        out: &mut Vec<u8>,
        reg_bits: u8,
        reg_mem: Option<Reg>,
        base: Option<Reg>,
        index: Option<Reg>,
        scale: Option<Scale>,
        disp: Option<i32>,
    ) -> Result<(), EncodingError> {
        if index.map(Reg::low3) == Some(MODRM_RM_USE_SIB) {
            return Err(EncodingError::IndexRegister);
        }

        // Register-direct operand.
        if let Some(rm) = reg_mem {
            out.push(modrm(MODRM_MOD_REG, reg_bits, rm.low3()));
            return Ok(());
        }

        let disp = disp.unwrap_or(0);

        // [disp32] alone. On 64-bit mod=00 rm=101 means RIP-relative, so an
        // explicit SIB form is required instead.
        if base.is_none() && index.is_none() {
            match self.mode {
                Mode::Protected32 => {
                    out.push(modrm(MODRM_MOD_MEM, reg_bits, MODRM_RM_DISP32_ONLY_32));
                }
                Mode::Long64 => {
                    out.push(modrm(MODRM_MOD_MEM, reg_bits, MODRM_RM_USE_SIB));
                    out.push(sib(Scale::Mul1 as u8, SIB_INDEX_NONE, SIB_BASE_NONE));
                }
            }
            out.extend_from_slice(&disp.to_le_bytes());
            return Ok(());
        }

        if let Some(index) = index {
            let scale = scale.unwrap_or(Scale::Mul1) as u8;
            match base {
                // [scale*index + disp]: no base, forced disp32.
                None => {
                    out.push(modrm(MODRM_MOD_MEM, reg_bits, MODRM_RM_USE_SIB));
                    out.push(sib(scale, index.low3(), SIB_BASE_NONE));
                    out.extend_from_slice(&disp.to_le_bytes());
                }
                Some(base) => {
                    // [EBP/R13 + scale*index] has no mod=00 form; it falls
                    // through to the disp8 case with an explicit zero.
                    if disp == 0 && base.low3() != Reg::Ebp.low3() {
                        out.push(modrm(MODRM_MOD_MEM, reg_bits, MODRM_RM_USE_SIB));
                        out.push(sib(scale, index.low3(), base.low3()));
                    } else if (-128..=127).contains(&disp) {
                        out.push(modrm(MODRM_MOD_MEM_DISP8, reg_bits, MODRM_RM_USE_SIB));
                        out.push(sib(scale, index.low3(), base.low3()));
                        out.push(disp as u8);
                    } else {
                        out.push(modrm(MODRM_MOD_MEM_DISP32, reg_bits, MODRM_RM_USE_SIB));
                        out.push(sib(scale, index.low3(), base.low3()));
                        out.extend_from_slice(&disp.to_le_bytes());
                    }
                }
            }
            return Ok(());
        }

        let base = match base {
            Some(base) => base,
            // Unreachable per the guards above, but keep the encoder total.
            None => return Ok(()),
        };

        // [ESP/R12 + disp] needs a SIB byte: the ESP R/M code means "SIB
        // follows".
        if base.low3() == Reg::Esp.low3() {
            let sib_byte = sib(Scale::Mul1 as u8, SIB_INDEX_NONE, Reg::Esp.low3());
            if disp == 0 {
                out.push(modrm(MODRM_MOD_MEM, reg_bits, MODRM_RM_USE_SIB));
                out.push(sib_byte);
            } else if (-128..=127).contains(&disp) {
                out.push(modrm(MODRM_MOD_MEM_DISP8, reg_bits, MODRM_RM_USE_SIB));
                out.push(sib_byte);
                out.push(disp as u8);
            } else {
                out.push(modrm(MODRM_MOD_MEM_DISP32, reg_bits, MODRM_RM_USE_SIB));
                out.push(sib_byte);
                out.extend_from_slice(&disp.to_le_bytes());
            }
            return Ok(());
        }

        // [base + disp]. [EBP/R13] with no displacement does not exist
        // (mod=00 rm=101 is the disp-only form), so it gets an explicit
        // zero disp8.
        if disp == 0 && base.low3() != Reg::Ebp.low3() {
            out.push(modrm(MODRM_MOD_MEM, reg_bits, base.low3()));
        } else if (-128..=127).contains(&disp) {
            out.push(modrm(MODRM_MOD_MEM_DISP8, reg_bits, base.low3()));
            out.push(disp as u8);
        } else {
            out.push(modrm(MODRM_MOD_MEM_DISP32, reg_bits, base.low3()));
            out.extend_from_slice(&disp.to_le_bytes());
        }
        Ok(())
    }
}

fn push_imm(out: &mut Vec<u8>, imm: i64, width: Size) -> Result<(), EncodingError> {
    let bytes = width.bytes();
    if bytes < 8 {
        let bits = bytes as u32 * 8;
        let signed_min = -(1i64 << (bits - 1));
        let unsigned_max = (1i64 << bits) - 1;
        if imm < signed_min || imm > unsigned_max {
            return Err(EncodingError::ImmediateOverflow {
                imm,
                size: bytes as u8,
            });
        }
    }
    out.extend_from_slice(&imm.to_le_bytes()[..bytes]);
    Ok(())
}
