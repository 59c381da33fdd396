/*!
Reference interpreter for the IR.

The VM exists for two reasons: it is the executable semantics the JIT
output is tested against, and it is the fallback engine on hosts the JIT
cannot target. It keeps a variable table, a single equality flag written
by the compare instructions, and an instruction pointer driven by the
jump instructions through the label map.

Execution is bounded: a program that runs more than [`STEP_LIMIT`]
instructions is assumed to be malformed and aborted. All [`VmError`]
variants indicate an implementation bug in the IR emitter, not bad user
input.
*/

use std::collections::HashMap;

use log::trace;
use thiserror::Error;

use crate::ir::{Inst, Program, Var, LENGTH, STRING};

/// Upper bound on executed instructions per match.
pub const STEP_LIMIT: usize = 10_000;

/// Faults raised by the interpreter on malformed programs.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("tried to execute a label pseudo-instruction")]
    ExecutedLabel,
    #[error("step limit of {STEP_LIMIT} exceeded, runaway program?")]
    StepLimit,
    #[error("unknown variable `{0}`")]
    UnknownVariable(Var),
    #[error("jump to unknown label `{0}`")]
    UnknownLabel(String),
    #[error("indexed load out of bounds")]
    OutOfBounds,
    #[error("instruction pointer ran off the program")]
    OutOfProgram,
}

/// An interpreter borrowing an IR program.
#[derive(Clone, Copy, Debug)]
pub struct Vm<'p> {
    program: &'p Program,
}

impl<'p> Vm<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self { program }
    }

    /// Run the program against `haystack` and return the accept flag.
    pub fn run(&self, haystack: &[u8]) -> Result<bool, VmError> {
        let insts = &self.program.insts;
        let labels: HashMap<&str, usize> = insts
            .iter()
            .enumerate()
            .filter_map(|(pos, inst)| match inst {
                Inst::Label(l) => Some((l.as_str(), pos)),
                _ => None,
            })
            .collect();

        let mut vars: HashMap<Var, i64> = HashMap::new();
        vars.insert(LENGTH, haystack.len() as i64);
        let mut pointers: HashMap<Var, &[u8]> = HashMap::new();
        pointers.insert(STRING, haystack);

        let mut eq = false;
        let mut ip = 0usize;
        let mut steps = 0usize;
        loop {
            let inst = insts.get(ip).ok_or(VmError::OutOfProgram)?;
            trace!("ip {ip}: {inst}");
            match inst {
                &Inst::Set(var, value) => {
                    vars.insert(var, value);
                }
                &Inst::Inc(var) => {
                    let slot = vars.get_mut(var).ok_or(VmError::UnknownVariable(var))?;
                    *slot += 1;
                }
                &Inst::Move(dst, src) => {
                    let value = read(&vars, src)?;
                    vars.insert(dst, value);
                }
                &Inst::MoveIndexed { dst, base, index } => {
                    let buf = pointers.get(base).ok_or(VmError::UnknownVariable(base))?;
                    let at =
                        usize::try_from(read(&vars, index)?).map_err(|_| VmError::OutOfBounds)?;
                    let byte = buf.get(at).ok_or(VmError::OutOfBounds)?;
                    vars.insert(dst, i64::from(*byte));
                }
                &Inst::CmpName(a, b) => {
                    eq = read(&vars, a)? == read(&vars, b)?;
                }
                &Inst::CmpValue(var, byte) => {
                    eq = read(&vars, var)? == i64::from(byte);
                }
                Inst::Jump(label) => {
                    ip = jump_to(&labels, label)?;
                }
                Inst::JumpEq(label) => {
                    if eq {
                        ip = jump_to(&labels, label)?;
                    }
                }
                Inst::JumpNe(label) => {
                    if !eq {
                        ip = jump_to(&labels, label)?;
                    }
                }
                &Inst::Ret(accept) => return Ok(accept),
                Inst::Label(_) => return Err(VmError::ExecutedLabel),
            }
            // Advance past the executed instruction (for jumps, past the
            // target label) and skip consecutive labels.
            ip += 1;
            while matches!(insts.get(ip), Some(Inst::Label(_))) {
                ip += 1;
            }
            steps += 1;
            if steps > STEP_LIMIT {
                return Err(VmError::StepLimit);
            }
        }
    }
}

fn read(vars: &HashMap<Var, i64>, var: Var) -> Result<i64, VmError> {
    vars.get(var).copied().ok_or(VmError::UnknownVariable(var))
}

fn jump_to(labels: &HashMap<&str, usize>, label: &str) -> Result<usize, VmError> {
    labels
        .get(label)
        .copied()
        .ok_or_else(|| VmError::UnknownLabel(label.to_string()))
}
