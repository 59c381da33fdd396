/*!
The linear intermediate representation.

A [`Program`] is an ordered instruction list plus a side table declaring
the variables it uses and their semantic types. The representation sits
close to three-address code: labels and branches for control flow, a
handful of data instructions for everything else. It is executed directly
by the [VM interpreter](crate::vm) and lowered to machine code by the
[JIT compiler](crate::jit).

[`Program::from_dfa`] emits the full-string match procedure of a DFA:

```text
        set i, -1
state:  inc i
        cmp i, length
        jne load_state
        ret <state accepting?>        ; input exhausted
load_state:
        char = string[i]              ; only if the state has edges
        cmp char, b ; je target       ; per specific-byte edge
        jmp any_target | ret false    ; wildcard edge or reject
```

DFA states are renamed to short numbers for readability; the start state
is always `0`.
*/

use std::collections::BTreeMap;
use std::fmt;

use rxjit_x86::OperandKind;

use crate::dfa::{Dfa, Label};

/// An IR variable. The DFA→IR stage only ever emits the four fixed
/// variables `string`, `length`, `i` and `char`.
pub type Var = &'static str;

pub const STRING: Var = "string";
pub const LENGTH: Var = "length";
pub const INDEX: Var = "i";
pub const CHAR: Var = "char";

/// One IR instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inst {
    /// Jump target marker. Never executed.
    Label(String),
    Jump(String),
    /// Taken when the last comparison was equal.
    JumpEq(String),
    /// Taken when the last comparison was not equal.
    JumpNe(String),
    Inc(Var),
    Set(Var, i64),
    /// Register-to-register move. Part of the alphabet for the VM and the
    /// JIT, although the DFA translation never emits it.
    Move(Var, Var),
    /// `dst = base[index]`, a single byte load.
    MoveIndexed { dst: Var, base: Var, index: Var },
    /// Compare a variable against a byte constant.
    CmpValue(Var, u8),
    /// Compare two variables.
    CmpName(Var, Var),
    Ret(bool),
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Label(l) => write!(f, "{l}:"),
            Inst::Jump(l) => write!(f, "    jump {l}"),
            Inst::JumpEq(l) => write!(f, "    jump-eq {l}"),
            Inst::JumpNe(l) => write!(f, "    jump-ne {l}"),
            Inst::Inc(v) => write!(f, "    inc {v}"),
            Inst::Set(v, value) => write!(f, "    set {v}, {value}"),
            Inst::Move(dst, src) => write!(f, "    move {dst}, {src}"),
            Inst::MoveIndexed { dst, base, index } => {
                write!(f, "    move {dst}, {base}[{index}]")
            }
            Inst::CmpValue(v, byte) => write!(f, "    cmp {v}, {:?}", *byte as char),
            Inst::CmpName(a, b) => write!(f, "    cmp {a}, {b}"),
            Inst::Ret(v) => write!(f, "    ret {v}"),
        }
    }
}

/// An IR program together with its variable declarations.
#[derive(Clone, Debug)]
pub struct Program {
    pub insts: Vec<Inst>,
    /// Variable name to semantic type.
    pub vars: Vec<(Var, OperandKind)>,
    /// The compiled function's parameters, in call order.
    pub args: Vec<Var>,
}

impl Program {
    /// Translate a DFA into the IR match procedure. The compiled function
    /// has the shape `fn(string, length) -> int`, nonzero meaning accept.
    pub fn from_dfa(dfa: &Dfa) -> Program {
        let rename = rename_states(dfa);
        let mut insts = Vec::new();
        // The first `inc` must land the index on zero.
        insts.push(Inst::Set(INDEX, -1));

        let start_first = std::iter::once(dfa.start().to_string())
            .chain(dfa.states().keys().filter(|n| *n != dfa.start()).cloned());
        for state in start_first {
            let short = &rename[&state];
            let load = format!("load_{short}");
            insts.push(Inst::Label(short.clone()));
            insts.push(Inst::Inc(INDEX));
            insts.push(Inst::CmpName(INDEX, LENGTH));
            insts.push(Inst::JumpNe(load.clone()));
            insts.push(Inst::Ret(dfa.accepting().contains(&state)));
            insts.push(Inst::Label(load));
            let edges = &dfa.states()[&state];
            if edges.is_empty() {
                insts.push(Inst::Ret(false));
                continue;
            }
            insts.push(Inst::MoveIndexed {
                dst: CHAR,
                base: STRING,
                index: INDEX,
            });
            for (label, target) in edges {
                if let Label::Byte(byte) = label {
                    insts.push(Inst::CmpValue(CHAR, *byte));
                    insts.push(Inst::JumpEq(rename[target].clone()));
                }
            }
            match edges.get(&Label::Any) {
                Some(target) => insts.push(Inst::Jump(rename[target].clone())),
                None => insts.push(Inst::Ret(false)),
            }
        }

        Program {
            insts,
            vars: vec![
                (STRING, OperandKind::Pointer),
                (LENGTH, OperandKind::Long),
                (INDEX, OperandKind::Long),
                (CHAR, OperandKind::Byte),
            ],
            args: vec![STRING, LENGTH],
        }
    }

    /// Declared type of a variable, if any.
    pub fn var_kind(&self, var: Var) -> Option<OperandKind> {
        self.vars
            .iter()
            .find(|(name, _)| *name == var)
            .map(|&(_, kind)| kind)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (var, kind) in &self.vars {
            writeln!(f, "; {kind} {var}")?;
        }
        for inst in &self.insts {
            writeln!(f, "{inst}")?;
        }
        Ok(())
    }
}

/// Stable 1-to-1 renaming of DFA state names to short numbers.
fn rename_states(dfa: &Dfa) -> BTreeMap<String, String> {
    let mut rename = BTreeMap::new();
    rename.insert(dfa.start().to_string(), "0".to_string());
    let mut next = 1usize;
    for name in dfa.states().keys() {
        if name != dfa.start() {
            rename.insert(name.clone(), next.to_string());
            next += 1;
        }
    }
    rename
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
    fn starts_with_index_reset_and_start_state() {
        let prog = program_for("a");
        assert_eq!(prog.insts[0], Inst::Set(INDEX, -1));
        assert_eq!(prog.insts[1], Inst::Label("0".to_string()));
    }

    #[test]
    fn block_shape_for_single_symbol() {
        let prog = program_for("a");
        let head = &prog.insts[..7];
        assert_eq!(
            head,
            &[
                Inst::Set(INDEX, -1),
                Inst::Label("0".into()),
                Inst::Inc(INDEX),
                Inst::CmpName(INDEX, LENGTH),
                Inst::JumpNe("load_0".into()),
                Inst::Ret(false),
                Inst::Label("load_0".into()),
            ]
        );
        assert!(prog
            .insts
            .iter()
            .any(|inst| *inst == Inst::CmpValue(CHAR, b'a')));
    }

    #[test]
    fn labels_are_unique() {
        let prog = program_for("a(bb|(cc)*)");
        let mut labels: Vec<&String> = prog
            .insts
            .iter()
            .filter_map(|inst| match inst {
                Inst::Label(l) => Some(l),
                _ => None,
            })
            .collect();
        let total = labels.len();
        labels.sort();
        labels.dedup();
        assert_eq!(total, labels.len());
    }

    #[test]
    fn every_jump_resolves_to_a_label() {
        let prog = program_for("a(bb|(cc)*)x?");
        let labels: std::collections::BTreeSet<&String> = prog
            .insts
            .iter()
            .filter_map(|inst| match inst {
                Inst::Label(l) => Some(l),
                _ => None,
            })
            .collect();
        for inst in &prog.insts {
            match inst {
                Inst::Jump(l) | Inst::JumpEq(l) | Inst::JumpNe(l) => {
                    assert!(labels.contains(l), "dangling jump to {l}");
                }
                _ => {}
            }
        }
    }

    #[test]
    fn dead_state_has_no_char_load() {
        // `[]` has a single state and no edges, so no indexed load at all.
        let prog = program_for("[]");
        assert!(!prog
            .insts
            .iter()
            .any(|inst| matches!(inst, Inst::MoveIndexed { .. })));
    }

    #[test]
    fn side_table_declares_the_four_variables() {
        let prog = program_for("ab");
        assert_eq!(prog.var_kind(STRING), Some(OperandKind::Pointer));
        assert_eq!(prog.var_kind(LENGTH), Some(OperandKind::Long));
        assert_eq!(prog.var_kind(INDEX), Some(OperandKind::Long));
        assert_eq!(prog.var_kind(CHAR), Some(OperandKind::Byte));
        assert_eq!(prog.args, vec![STRING, LENGTH]);
    }

    #[test]
    fn display_is_line_oriented() {
        let prog = program_for("a");
        let text = prog.to_string();
        assert!(text.contains("set i, -1"));
        assert!(text.contains("load_0:"));
    }
}
