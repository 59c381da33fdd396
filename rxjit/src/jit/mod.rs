/*!
Lowering IR to x86/x86-64 machine code.

The compiler is a pipeline of passes over a shared working form: a vector
of [`Step`]s, where each step is still-abstract IR, a register-substituted
instruction, or a fully encoded byte sequence. Passes run in a fixed
order and communicate through a [`Context`] carried alongside the steps:

1. discover variables (reads and writes),
2. allocate registers (architecture specific),
3. emit the function prologue,
4. substitute registers into the data instructions,
5. replace abstract values (`ret` booleans become integers),
6. - 9. lower compares, moves, `inc` and `set` to bytes,
10. lower `ret` into `mov eax, imm` plus a jump to a shared epilogue,
11. resolve label positions,
12. emit `rel32` jump placeholders,
13. patch jump displacements,
14. purge the label pseudo-instructions,
15. merge everything into one blob.

Only `rel32` jump forms are emitted, so instruction lengths never depend
on the displacement value and the fix-up in pass 13 is a single backward
patch rather than a fixed point iteration.

Compilation never touches the host: the 32-bit backend runs fine on a
64-bit machine (the bytes just cannot be called there). Executing the
result is the business of [`CompiledCode`](crate::jit::code::CompiledCode).
*/

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::{debug, trace};
use thiserror::Error;

use rxjit_x86::{opcode, Encoder, EncodingError, Mode, OperandKind, Reg, Scale, Size};

use crate::ir::{Inst, Program, Var};

#[cfg(feature = "jit")]
pub mod code;

/// Target architecture of a compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
}

/// Calling convention flavour. 32-bit code is always cdecl; 64-bit code
/// follows the platform ABI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Abi {
    Cdecl,
    SystemV,
    Windows,
}

/// A complete compilation target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Target {
    pub arch: Arch,
    pub abi: Abi,
}

impl Target {
    /// 32-bit x86, cdecl.
    pub fn x86() -> Target {
        Target {
            arch: Arch::X86,
            abi: Abi::Cdecl,
        }
    }

    /// 64-bit x86 with the given ABI.
    pub fn x86_64(abi: Abi) -> Target {
        Target {
            arch: Arch::X86_64,
            abi,
        }
    }

    /// The target matching the running platform, if the platform can run
    /// generated code at all.
    pub fn host() -> Option<Target> {
        if cfg!(target_arch = "x86_64") {
            let abi = if cfg!(windows) {
                Abi::Windows
            } else {
                Abi::SystemV
            };
            Some(Target::x86_64(abi))
        } else if cfg!(target_arch = "x86") {
            Some(Target::x86())
        } else {
            None
        }
    }

    fn mode(self) -> Mode {
        match self.arch {
            Arch::X86 => Mode::Protected32,
            Arch::X86_64 => Mode::Long64,
        }
    }
}

/// JIT compilation failure.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("not enough registers for {0} variables")]
    RegisterExhaustion(usize),
    #[error("more than {0} arguments are not supported on this target")]
    TooManyArguments(usize),
    #[error("label `{0}` defined twice")]
    DuplicateLabel(String),
    #[error("jump to unknown label `{0}`")]
    UnknownLabel(String),
    #[error("this platform cannot run generated code")]
    UnsupportedHost,
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    #[error("failed to map executable memory: {0}")]
    Load(#[from] std::io::Error),
    #[error("internal compiler error: {0}")]
    Internal(&'static str),
}

/// Pass-to-pass state, the side channel next to the instruction stream.
#[derive(Clone, Debug)]
pub struct Context {
    pub target: Target,
    pub args: Vec<Var>,
    pub var_kinds: BTreeMap<Var, OperandKind>,
    pub reads: BTreeSet<Var>,
    pub writes: BTreeSet<Var>,
    pub vars: BTreeSet<Var>,
    pub var_regs: BTreeMap<Var, Reg>,
    pub regs_to_restore: Vec<Reg>,
    pub labels: BTreeMap<String, usize>,
}

impl Context {
    fn new(target: Target, program: &Program) -> Context {
        Context {
            target,
            args: program.args.clone(),
            var_kinds: program.vars.iter().copied().collect(),
            reads: BTreeSet::new(),
            writes: BTreeSet::new(),
            vars: BTreeSet::new(),
            var_regs: BTreeMap::new(),
            regs_to_restore: Vec::new(),
            labels: BTreeMap::new(),
        }
    }

    fn kind(&self, var: Var) -> OperandKind {
        self.var_kinds.get(var).copied().unwrap_or(OperandKind::Int)
    }

    fn reg(&self, var: Var) -> Result<Reg, CompileError> {
        self.var_regs
            .get(var)
            .copied()
            .ok_or(CompileError::Internal("variable without a register"))
    }

    fn size(&self, kind: OperandKind) -> Size {
        self.target.mode().operand_size(kind)
    }
}

/// An instruction while it moves through the pipeline.
#[derive(Clone, Debug)]
enum Step {
    /// Untouched IR.
    Ir(Inst),
    /// Registers substituted, not yet encoded.
    Reg(RegInst),
    /// Encoded bytes, plus the jump target for placeholder jumps.
    Bin(BinInst),
}

#[derive(Clone, Debug)]
enum RegInst {
    CmpValue {
        rm: Reg,
        imm: i64,
        kind: OperandKind,
    },
    CmpName {
        reg: Reg,
        rm: Reg,
        kind: OperandKind,
    },
    Inc {
        reg: Reg,
        kind: OperandKind,
    },
    Set {
        reg: Reg,
        imm: i64,
        kind: OperandKind,
    },
    Move {
        dst: Reg,
        src: Reg,
        kind: OperandKind,
    },
    MoveIndexed {
        dst: Reg,
        base: Reg,
        index: Reg,
        kind: OperandKind,
        addr: OperandKind,
    },
    Ret {
        imm: i64,
    },
}

#[derive(Clone, Debug)]
struct BinInst {
    what: String,
    bytes: Vec<u8>,
    /// Set on jump placeholders until pass 13 patches them.
    target: Option<String>,
}

impl BinInst {
    fn plain(what: impl Into<String>, bytes: Vec<u8>) -> Step {
        Step::Bin(BinInst {
            what: what.into(),
            bytes,
            target: None,
        })
    }
}

/// The finished machine code for one IR program.
#[derive(Clone, Debug)]
pub struct Assembly {
    pub bytes: Vec<u8>,
    pub target: Target,
}

/// The JIT compiler for a fixed target.
#[derive(Clone, Copy, Debug)]
pub struct Compiler {
    target: Target,
    encoder: Encoder,
}

impl Compiler {
    pub fn new(target: Target) -> Compiler {
        Compiler {
            target,
            encoder: Encoder::new(target.mode()),
        }
    }

    /// A compiler for the running platform.
    pub fn for_host() -> Result<Compiler, CompileError> {
        Target::host()
            .map(Compiler::new)
            .ok_or(CompileError::UnsupportedHost)
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Run the whole pass pipeline over `program`.
    pub fn compile(&self, program: &Program) -> Result<Assembly, CompileError> {
        let mut ctx = Context::new(self.target, program);
        let steps: Vec<Step> = program.insts.iter().cloned().map(Step::Ir).collect();

        let steps = discover_vars(steps, &mut ctx);
        let steps = allocate_registers(steps, &mut ctx)?;
        let steps = emit_prologue(steps, &mut ctx, &self.encoder)?;
        let steps = substitute_registers(steps, &mut ctx)?;
        let steps = replace_values(steps, &mut ctx);
        let steps = lower_compares(steps, &ctx, &self.encoder)?;
        let steps = lower_moves(steps, &ctx, &self.encoder)?;
        let steps = lower_inc(steps, &ctx, &self.encoder)?;
        let steps = lower_set(steps, &ctx, &self.encoder)?;
        let steps = lower_ret(steps, &ctx, &self.encoder)?;
        let steps = resolve_labels(steps, &mut ctx)?;
        let steps = emit_jumps(steps, &ctx, &self.encoder)?;
        let steps = patch_jumps(steps, &ctx)?;
        let steps = purge_labels(steps);
        let bytes = merge(steps)?;

        debug!(
            "compiled {} bytes for {:?}: {:02x}",
            bytes.len(),
            self.target,
            bytes.iter().format(" ")
        );
        Ok(Assembly {
            bytes,
            target: self.target,
        })
    }
}

/// Pass 1: classify variable reads and writes.
fn discover_vars(steps: Vec<Step>, ctx: &mut Context) -> Vec<Step> {
    for step in &steps {
        let Step::Ir(inst) = step else { continue };
        match inst {
            &Inst::CmpName(a, b) => {
                ctx.reads.insert(a);
                ctx.reads.insert(b);
            }
            &Inst::CmpValue(var, _) => {
                ctx.reads.insert(var);
            }
            &Inst::Set(var, _) => {
                ctx.writes.insert(var);
            }
            &Inst::Inc(var) => {
                ctx.reads.insert(var);
            }
            &Inst::Move(dst, src) => {
                ctx.writes.insert(dst);
                ctx.reads.insert(src);
            }
            &Inst::MoveIndexed { dst, base, index } => {
                ctx.writes.insert(dst);
                ctx.reads.insert(base);
                ctx.reads.insert(index);
            }
            _ => {}
        }
    }
    ctx.vars = ctx.reads.union(&ctx.writes).copied().collect();
    steps
}

/// Pass 2: map variables to registers.
fn allocate_registers(steps: Vec<Step>, ctx: &mut Context) -> Result<Vec<Step>, CompileError> {
    match ctx.target.arch {
        Arch::X86 => {
            // ESI and EDI are unusable: their low byte cannot be addressed
            // in 32-bit mode.
            let candidates = [Reg::Eax, Reg::Ecx, Reg::Edx, Reg::Ebx];
            if ctx.vars.len() > candidates.len() {
                return Err(CompileError::RegisterExhaustion(ctx.vars.len()));
            }
            ctx.var_regs = ctx.vars.iter().copied().zip(candidates).collect();
            let callee_saved = [Reg::Ebx, Reg::Esi, Reg::Edi, Reg::Ebp];
            let used: BTreeSet<Reg> = ctx.var_regs.values().copied().collect();
            ctx.regs_to_restore = callee_saved
                .into_iter()
                .filter(|reg| used.contains(reg))
                .collect();
        }
        Arch::X86_64 => {
            let (arg_regs, scratch): (&[Reg], &[Reg]) = match ctx.target.abi {
                Abi::Windows => (
                    &[Reg::Ecx, Reg::Edx, Reg::R8, Reg::R9],
                    &[
                        Reg::Eax,
                        Reg::Ecx,
                        Reg::Edx,
                        Reg::R8,
                        Reg::R9,
                        Reg::R10,
                        Reg::R11,
                    ],
                ),
                Abi::SystemV | Abi::Cdecl => (
                    &[Reg::Edi, Reg::Esi, Reg::Edx, Reg::Ecx, Reg::R8, Reg::R9],
                    &[
                        Reg::Eax,
                        Reg::Ecx,
                        Reg::Edx,
                        Reg::Esi,
                        Reg::Edi,
                        Reg::R8,
                        Reg::R9,
                        Reg::R10,
                        Reg::R11,
                    ],
                ),
            };
            if ctx.args.len() > arg_regs.len() {
                return Err(CompileError::TooManyArguments(arg_regs.len()));
            }
            // Arguments arrive in their ABI registers and simply stay there.
            ctx.var_regs = ctx.args.iter().copied().zip(arg_regs.iter().copied()).collect();
            let taken: BTreeSet<Reg> = ctx.var_regs.values().copied().collect();
            let free: Vec<Reg> = scratch
                .iter()
                .copied()
                .filter(|reg| !taken.contains(reg))
                .collect();
            let remaining: Vec<Var> = ctx
                .vars
                .iter()
                .copied()
                .filter(|var| !ctx.var_regs.contains_key(var))
                .collect();
            if remaining.len() > free.len() {
                return Err(CompileError::RegisterExhaustion(ctx.vars.len()));
            }
            ctx.var_regs.extend(remaining.into_iter().zip(free));
            // Everything allocated is caller saved; nothing to restore.
            ctx.regs_to_restore = Vec::new();
        }
    }
    trace!("register allocation: {:?}", ctx.var_regs);
    Ok(steps)
}

/// Pass 3: stack frame setup, callee-saved spills and, on 32-bit targets,
/// argument loads from the stack.
fn emit_prologue(
    steps: Vec<Step>,
    ctx: &mut Context,
    enc: &Encoder,
) -> Result<Vec<Step>, CompileError> {
    let mut prologue = Vec::new();
    prologue.push(BinInst::plain("push ebp", enc.push(Reg::Ebp)?));
    prologue.push(BinInst::plain(
        "mov ebp, esp",
        enc.insn(&[opcode::MOV_R_RM])
            .reg(Reg::Ebp)
            .reg_mem(Reg::Esp)
            .size(ctx.size(OperandKind::Long))
            .call()?,
    ));
    for &reg in &ctx.regs_to_restore {
        prologue.push(BinInst::plain(format!("push {reg:?}"), enc.push(reg)?));
    }
    if ctx.target.arch == Arch::X86 {
        // Arguments start above the return address and the saved frame
        // pointer.
        let mut disp = 8i32;
        for &arg in &ctx.args {
            let kind = ctx.kind(arg);
            if let Some(&reg) = ctx.var_regs.get(arg) {
                prologue.push(BinInst::plain(
                    format!("mov {reg:?}, [ebp + {disp}]"),
                    enc.insn(&[opcode::MOV_R_RM])
                        .reg(reg)
                        .base(Reg::Ebp)
                        .disp(disp)
                        .size(ctx.size(kind))
                        .call()?,
                ));
            }
            disp += ctx.size(kind).bytes() as i32;
        }
    }
    prologue.extend(steps);
    Ok(prologue)
}

/// Pass 4: rewrite the data instructions with their allocated registers
/// and declared operand types.
fn substitute_registers(steps: Vec<Step>, ctx: &mut Context) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| {
            let inst = match step {
                Step::Ir(inst) => inst,
                other => return Ok(other),
            };
            let reg_inst = match inst {
                Inst::CmpValue(var, byte) => RegInst::CmpValue {
                    rm: ctx.reg(var)?,
                    imm: i64::from(byte),
                    kind: ctx.kind(var),
                },
                Inst::CmpName(a, b) => RegInst::CmpName {
                    reg: ctx.reg(a)?,
                    rm: ctx.reg(b)?,
                    kind: ctx.kind(a),
                },
                Inst::Inc(var) => RegInst::Inc {
                    reg: ctx.reg(var)?,
                    kind: ctx.kind(var),
                },
                Inst::Set(var, value) => RegInst::Set {
                    reg: ctx.reg(var)?,
                    imm: value,
                    kind: ctx.kind(var),
                },
                Inst::Move(dst, src) => RegInst::Move {
                    dst: ctx.reg(dst)?,
                    src: ctx.reg(src)?,
                    kind: ctx.kind(dst),
                },
                Inst::MoveIndexed { dst, base, index } => RegInst::MoveIndexed {
                    dst: ctx.reg(dst)?,
                    base: ctx.reg(base)?,
                    index: ctx.reg(index)?,
                    kind: ctx.kind(dst),
                    addr: ctx.kind(base),
                },
                other => return Ok(Step::Ir(other)),
            };
            Ok(Step::Reg(reg_inst))
        })
        .collect()
}

/// Pass 5: booleans become machine integers. Byte constants already are.
fn replace_values(steps: Vec<Step>, _ctx: &mut Context) -> Vec<Step> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Ir(Inst::Ret(accept)) => Step::Reg(RegInst::Ret {
                imm: i64::from(accept),
            }),
            other => other,
        })
        .collect()
}

/// Pass 6: `cmp r/m8, imm8` and `cmp r/m, r`.
fn lower_compares(
    steps: Vec<Step>,
    ctx: &Context,
    enc: &Encoder,
) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Reg(RegInst::CmpValue { rm, imm, kind }) => Ok(BinInst::plain(
                format!("cmp {rm:?}, {imm}"),
                enc.insn(&[opcode::CMP_RM_IMM_8])
                    .opex(opcode::CMP_RM_IMM_8_EX)
                    .reg_mem(rm)
                    .imm(imm)
                    .size(ctx.size(kind))
                    .call()?,
            )),
            Step::Reg(RegInst::CmpName { reg, rm, kind }) => Ok(BinInst::plain(
                format!("cmp {rm:?}, {reg:?}"),
                enc.insn(&[opcode::CMP_RM_R])
                    .reg(reg)
                    .reg_mem(rm)
                    .size(ctx.size(kind))
                    .call()?,
            )),
            other => Ok(other),
        })
        .collect()
}

/// Pass 7: register moves and the indexed byte load.
fn lower_moves(steps: Vec<Step>, ctx: &Context, enc: &Encoder) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Reg(RegInst::MoveIndexed {
                dst,
                base,
                index,
                kind,
                addr,
            }) => Ok(BinInst::plain(
                format!("mov {dst:?}, [{base:?} + {index:?}]"),
                enc.insn(&[opcode::MOV_R_RM_8])
                    .reg(dst)
                    .base(base)
                    .index(index)
                    .scale(Scale::Mul1)
                    .size(ctx.size(kind))
                    .address_size(ctx.size(addr))
                    .call()?,
            )),
            Step::Reg(RegInst::Move { dst, src, kind }) => Ok(BinInst::plain(
                format!("mov {dst:?}, {src:?}"),
                enc.insn(&[opcode::MOV_R_RM])
                    .reg(dst)
                    .reg_mem(src)
                    .size(ctx.size(kind))
                    .call()?,
            )),
            other => Ok(other),
        })
        .collect()
}

/// Pass 8: `inc`. The 32-bit short form `inc r32` does not exist on
/// 64-bit targets, where its bytes became the REX prefixes.
fn lower_inc(steps: Vec<Step>, ctx: &Context, enc: &Encoder) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Reg(RegInst::Inc { reg, kind }) => Ok(BinInst::plain(
                format!("inc {reg:?}"),
                enc.inc(reg, ctx.size(kind))?,
            )),
            other => Ok(other),
        })
        .collect()
}

/// Pass 9: `mov r, imm`.
fn lower_set(steps: Vec<Step>, ctx: &Context, enc: &Encoder) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| match step {
            Step::Reg(RegInst::Set { reg, imm, kind }) => Ok(BinInst::plain(
                format!("mov {reg:?}, {imm}"),
                enc.insn(&[opcode::MOV_R_IMM])
                    .opcode_reg(reg)
                    .imm(imm)
                    .size(ctx.size(kind))
                    .call()?,
            )),
            other => Ok(other),
        })
        .collect()
}

/// Pass 10: every `ret` becomes `mov eax, imm` plus a jump to a shared
/// epilogue, which is appended at the end: restore callee-saved registers
/// in reverse, pop the frame pointer, `ret`.
fn lower_ret(steps: Vec<Step>, ctx: &Context, enc: &Encoder) -> Result<Vec<Step>, CompileError> {
    let mut out = Vec::with_capacity(steps.len() + ctx.regs_to_restore.len() + 3);
    for step in steps {
        match step {
            Step::Reg(RegInst::Ret { imm }) => {
                out.push(BinInst::plain(
                    format!("mov Eax, {imm}"),
                    enc.insn(&[opcode::MOV_R_IMM])
                        .opcode_reg(Reg::Eax)
                        .imm(imm)
                        .size(ctx.size(OperandKind::Int))
                        .call()?,
                ));
                out.push(Step::Ir(Inst::Jump("return".to_string())));
            }
            other => out.push(other),
        }
    }
    out.push(Step::Ir(Inst::Label("return".to_string())));
    for &reg in ctx.regs_to_restore.iter().rev() {
        out.push(BinInst::plain(format!("pop {reg:?}"), enc.pop(reg)?));
    }
    out.push(BinInst::plain("pop ebp", enc.pop(Reg::Ebp)?));
    out.push(BinInst::plain("ret", enc.ret()?));
    Ok(out)
}

/// Pass 11: record label positions; duplicates are fatal.
fn resolve_labels(steps: Vec<Step>, ctx: &mut Context) -> Result<Vec<Step>, CompileError> {
    for (pos, step) in steps.iter().enumerate() {
        if let Step::Ir(Inst::Label(label)) = step {
            if ctx.labels.insert(label.clone(), pos).is_some() {
                return Err(CompileError::DuplicateLabel(label.clone()));
            }
        }
    }
    Ok(steps)
}

/// Pass 12: jumps become `rel32` placeholders with a zero displacement.
fn emit_jumps(steps: Vec<Step>, ctx: &Context, enc: &Encoder) -> Result<Vec<Step>, CompileError> {
    steps
        .into_iter()
        .map(|step| {
            let jump = match &step {
                Step::Ir(Inst::Jump(label)) => Some(("jmp", label.clone())),
                Step::Ir(Inst::JumpEq(label)) => Some(("je", label.clone())),
                Step::Ir(Inst::JumpNe(label)) => Some(("jne", label.clone())),
                _ => None,
            };
            let Some((mnemonic, label)) = jump else {
                return Ok(step);
            };
            if !ctx.labels.contains_key(&label) {
                return Err(CompileError::UnknownLabel(label));
            }
            let bytes = match mnemonic {
                "jmp" => enc.jmp_near(0)?,
                "je" => enc.je_near(0)?,
                _ => enc.jne_near(0)?,
            };
            Ok(Step::Bin(BinInst {
                what: format!("{mnemonic} {label}"),
                bytes,
                target: Some(label),
            }))
        })
        .collect()
}

/// Pass 13: patch every placeholder's trailing four bytes with the real
/// displacement. Instruction lengths are final at this point, so the
/// displacement is just a byte count over the steps in between.
fn patch_jumps(mut steps: Vec<Step>, ctx: &Context) -> Result<Vec<Step>, CompileError> {
    let lengths: Vec<i64> = steps
        .iter()
        .map(|step| match step {
            Step::Bin(bin) => bin.bytes.len() as i64,
            _ => 0,
        })
        .collect();
    for pos in 0..steps.len() {
        let label = match &steps[pos] {
            Step::Bin(BinInst {
                target: Some(label),
                ..
            }) => label.clone(),
            _ => continue,
        };
        let target = *ctx
            .labels
            .get(&label)
            .ok_or(CompileError::UnknownLabel(label))?;
        let disp: i64 = if target > pos {
            lengths[pos + 1..target].iter().sum()
        } else {
            -lengths[target..=pos].iter().sum::<i64>()
        };
        let disp = i32::try_from(disp)
            .map_err(|_| CompileError::Internal("jump displacement overflow"))?;
        if let Step::Bin(bin) = &mut steps[pos] {
            let len = bin.bytes.len();
            bin.bytes[len - 4..].copy_from_slice(&disp.to_le_bytes());
            bin.target = None;
        }
    }
    Ok(steps)
}

/// Pass 14: drop the label pseudo-instructions.
fn purge_labels(steps: Vec<Step>) -> Vec<Step> {
    steps
        .into_iter()
        .filter(|step| !matches!(step, Step::Ir(Inst::Label(_))))
        .collect()
}

/// Pass 15: concatenate. Everything must be fully lowered by now.
fn merge(steps: Vec<Step>) -> Result<Vec<u8>, CompileError> {
    let mut bytes = Vec::new();
    for step in steps {
        match step {
            Step::Bin(bin) => {
                trace!("{:24} {:02x}", bin.what, bin.bytes.iter().format(" "));
                bytes.extend(bin.bytes);
            }
            _ => return Err(CompileError::Internal("unlowered instruction survived")),
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfa::Dfa;
    use crate::nfa;
    use crate::syntax::{normalize::normalize, parse};

    fn program_for(pattern: &str) -> Program {
        let ast = normalize(&parse(pattern).unwrap());
        let nfa = nfa::build(&ast).unwrap();
        Program::from_dfa(&Dfa::from_nfa(&nfa))
    }

    #[test]
    fn compiles_for_both_arches() {
        for target in [Target::x86(), Target::x86_64(Abi::SystemV), Target::x86_64(Abi::Windows)] {
            for pattern in ["a", "a|b|c", "a*", "a(bb|(cc)*)", "a.b", "[x-z]*", "[]", ""] {
                let program = program_for(pattern);
                let assembly = Compiler::new(target).compile(&program).unwrap();
                assert!(!assembly.bytes.is_empty(), "{pattern} on {target:?}");
            }
        }
    }

    #[test]
    fn x86_32_prologue_shape() {
        // The four variables take EAX..EBX; EBX is callee saved, so the
        // prologue is push ebp / mov ebp, esp / push ebx and the epilogue
        // restores them in reverse.
        let program = program_for("a");
        let assembly = Compiler::new(Target::x86()).compile(&program).unwrap();
        assert_eq!(&assembly.bytes[..3], &[0x55, 0x8B, 0xEC]);
        assert_eq!(assembly.bytes[3], 0x53); // push ebx
        let n = assembly.bytes.len();
        assert_eq!(&assembly.bytes[n - 3..], &[0x5B, 0x5D, 0xC3]); // pop ebx, pop ebp, ret
    }

    #[test]
    fn x86_64_prologue_shape() {
        let program = program_for("a");
        let assembly = Compiler::new(Target::x86_64(Abi::SystemV))
            .compile(&program)
            .unwrap();
        // push rbp / mov rbp, rsp; no callee-saved registers in use.
        assert_eq!(&assembly.bytes[..4], &[0x55, 0x48, 0x8B, 0xEC]);
        let n = assembly.bytes.len();
        assert_eq!(&assembly.bytes[n - 2..], &[0x5D, 0xC3]); // pop rbp, ret
    }

    #[test]
    fn x86_32_loads_args_from_stack() {
        let program = program_for("a");
        let assembly = Compiler::new(Target::x86()).compile(&program).unwrap();
        // Variables in sorted order (char, i, length, string) take
        // EAX, ECX, EDX, EBX; string loads from [ebp+8], length from
        // [ebp+12].
        let bytes = assembly.bytes;
        let string_load = [0x8B, 0x5D, 0x08]; // mov ebx, [ebp+8]
        let length_load = [0x8B, 0x55, 0x0C]; // mov edx, [ebp+12]
        assert!(windows_contains(&bytes, &string_load), "missing string load");
        assert!(windows_contains(&bytes, &length_load), "missing length load");
    }

    #[test]
    fn deterministic_output() {
        let program = program_for("a(bb|(cc)*)");
        let target = Target::x86_64(Abi::SystemV);
        let first = Compiler::new(target).compile(&program).unwrap();
        let second = Compiler::new(target).compile(&program).unwrap();
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn duplicate_labels_are_fatal() {
        let program = Program {
            insts: vec![
                Inst::Label("x".to_string()),
                Inst::Ret(true),
                Inst::Label("x".to_string()),
            ],
            vars: vec![],
            args: vec![],
        };
        let err = Compiler::new(Target::x86_64(Abi::SystemV))
            .compile(&program)
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateLabel(label) if label == "x"));
    }

    #[test]
    fn unknown_jump_target_is_fatal() {
        let program = Program {
            insts: vec![Inst::Jump("nowhere".to_string()), Inst::Ret(true)],
            vars: vec![],
            args: vec![],
        };
        let err = Compiler::new(Target::x86_64(Abi::SystemV))
            .compile(&program)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownLabel(label) if label == "nowhere"));
    }

    #[test]
    fn jump_displacements_resolve_to_zero_for_adjacent_target() {
        // jump to the very next instruction -> displacement 0.
        let program = Program {
            insts: vec![
                Inst::Jump("next".to_string()),
                Inst::Label("next".to_string()),
                Inst::Ret(true),
            ],
            vars: vec![],
            args: vec![],
        };
        let assembly = Compiler::new(Target::x86_64(Abi::SystemV))
            .compile(&program)
            .unwrap();
        // Prologue is push rbp (1) + mov rbp, rsp (3); then the jump.
        assert_eq!(&assembly.bytes[4..9], &[0xE9, 0x00, 0x00, 0x00, 0x00]);
    }

    fn windows_contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}
