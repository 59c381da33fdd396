/*!
Thompson construction of nondeterministic finite automata.

States live in an arena owned by the [`Thompson`] builder; edges store
target indices rather than pointers, which is what makes the cyclic graphs
produced by Kleene stars representable without interior mutability. Every
state additionally carries a small display id drawn from a process-wide
atomic counter. Those ids only exist to make debug output readable and to
name DFA states; their exact values are not part of any contract.

Building proceeds bottom-up: generation methods ([`Thompson::empty`],
[`Thompson::symbol`], [`Thompson::any`], [`Thompson::none`],
[`Thompson::char_set`]) create fresh subexpressions, combination methods
([`Thompson::union`], [`Thompson::concat`], [`Thompson::kleene`],
[`Thompson::kleene_plus`], [`Thompson::zero_or_one`] and their n-ary
variants) consume subexpressions to form bigger ones.

Subexpressions are single-use. A combination method validates every
operand before touching any of them: a handle that was already consumed
fails with [`NfaError::Invalid`], the same handle passed twice fails with
[`NfaError::DuplicateArgument`], and on failure no operand is consumed.
To reuse a subexpression, [`Thompson::duplicate`] deep-copies it (fresh
states, fresh display ids).

```
use rxjit::nfa::Thompson;

let mut builder = Thompson::new();
let a = builder.symbol(b'a');
let b = builder.symbol(b'b');
let ab = builder.concat(a, b)?;
let nfa = builder.finish(ab)?;
assert!(nfa.accept("ab"));
assert!(!nfa.accept("aab"));
# Ok::<(), rxjit::nfa::NfaError>(())
```
*/

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, Ordering};

use itertools::Itertools;
use thiserror::Error;

use crate::syntax::{escape_byte, Ast};

/// Transition requirement of an edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EdgeLabel {
    Epsilon,
    Any,
    Byte(u8),
}

#[derive(Clone, Debug)]
pub(crate) struct State {
    /// Unique display id, fresh even across deep copies.
    pub(crate) id: u32,
    pub(crate) edges: Vec<(EdgeLabel, usize)>,
}

static STATE_IDS: AtomicU32 = AtomicU32::new(0);

fn fresh_id() -> u32 {
    STATE_IDS.fetch_add(1, Ordering::Relaxed)
}

/// Misuse of the single-use subexpression discipline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum NfaError {
    #[error("use of a consumed NFA subexpression")]
    Invalid,
    #[error("the same NFA subexpression cannot be passed twice to one combinator")]
    DuplicateArgument,
}

/// Handle to a subexpression inside a [`Thompson`] builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExprId(usize);

#[derive(Clone, Debug)]
struct Expr {
    start: usize,
    end: usize,
    description: String,
    valid: bool,
}

/// Arena-backed Thompson NFA builder.
#[derive(Clone, Debug, Default)]
pub struct Thompson {
    states: Vec<State>,
    exprs: Vec<Expr>,
}

impl Thompson {
    pub fn new() -> Self {
        Self::default()
    }

    fn new_state(&mut self) -> usize {
        self.states.push(State {
            id: fresh_id(),
            edges: Vec::new(),
        });
        self.states.len() - 1
    }

    fn add_edge(&mut self, from: usize, label: EdgeLabel, to: usize) {
        self.states[from].edges.push((label, to));
    }

    fn new_expr(&mut self, start: usize, end: usize, description: String) -> ExprId {
        self.exprs.push(Expr {
            start,
            end,
            description,
            valid: true,
        });
        ExprId(self.exprs.len() - 1)
    }

    /// Validate a combinator's operand list without consuming anything.
    fn check(&self, operands: &[ExprId]) -> Result<(), NfaError> {
        for (pos, id) in operands.iter().enumerate() {
            let valid = self.exprs.get(id.0).map(|e| e.valid).unwrap_or(false);
            if !valid {
                return Err(NfaError::Invalid);
            }
            if operands[..pos].contains(id) {
                return Err(NfaError::DuplicateArgument);
            }
        }
        Ok(())
    }

    fn consume(&mut self, operands: &[ExprId]) {
        for id in operands {
            self.exprs[id.0].valid = false;
        }
    }

    /// Whether a subexpression may still be used.
    pub fn is_valid(&self, id: ExprId) -> bool {
        self.exprs.get(id.0).map(|e| e.valid).unwrap_or(false)
    }

    /// The regular expression a subexpression stands for.
    pub fn description(&self, id: ExprId) -> Option<&str> {
        self.exprs
            .get(id.0)
            .filter(|e| e.valid)
            .map(|e| e.description.as_str())
    }

    /// Accepts only the empty string. Displayed as `\E` since there is no
    /// epsilon letter to print.
    pub fn empty(&mut self) -> ExprId {
        let start = self.new_state();
        let end = self.new_state();
        self.add_edge(start, EdgeLabel::Epsilon, end);
        self.new_expr(start, end, r"\E".to_string())
    }

    /// Accepts exactly the one-byte string `byte`.
    pub fn symbol(&mut self, byte: u8) -> ExprId {
        let start = self.new_state();
        let end = self.new_state();
        self.add_edge(start, EdgeLabel::Byte(byte), end);
        self.new_expr(start, end, escape_byte(byte))
    }

    /// Accepts any single byte.
    pub fn any(&mut self) -> ExprId {
        let start = self.new_state();
        let end = self.new_state();
        self.add_edge(start, EdgeLabel::Any, end);
        self.new_expr(start, end, ".".to_string())
    }

    /// Accepts nothing at all; the accepting state is unreachable.
    pub fn none(&mut self) -> ExprId {
        let start = self.new_state();
        let end = self.new_state();
        self.new_expr(start, end, "[]".to_string())
    }

    /// Accepts one byte out of `bytes`. Duplicates are allowed but wasteful.
    /// The display string is provided by the caller because the byte list
    /// alone cannot distinguish `[a-e]` from `[abcde]`.
    pub fn char_set(&mut self, bytes: &[u8], display: &str) -> Result<ExprId, NfaError> {
        let symbols: Vec<ExprId> = bytes.iter().map(|&b| self.symbol(b)).collect();
        let id = self.union_many(&symbols)?;
        self.exprs[id.0].description = display.to_string();
        Ok(id)
    }

    /// `s|t`. Consumes both operands on success.
    pub fn union(&mut self, s: ExprId, t: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s, t])?;
        let start = self.new_state();
        let end = self.new_state();
        let (s_start, s_end) = (self.exprs[s.0].start, self.exprs[s.0].end);
        let (t_start, t_end) = (self.exprs[t.0].start, self.exprs[t.0].end);
        self.add_edge(start, EdgeLabel::Epsilon, s_start);
        self.add_edge(start, EdgeLabel::Epsilon, t_start);
        self.add_edge(s_end, EdgeLabel::Epsilon, end);
        self.add_edge(t_end, EdgeLabel::Epsilon, end);
        let description = format!(
            "({}|{})",
            self.exprs[s.0].description, self.exprs[t.0].description
        );
        self.consume(&[s, t]);
        Ok(self.new_expr(start, end, description))
    }

    /// `st`. Consumes both operands on success.
    pub fn concat(&mut self, s: ExprId, t: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s, t])?;
        let (s_start, s_end) = (self.exprs[s.0].start, self.exprs[s.0].end);
        let (t_start, t_end) = (self.exprs[t.0].start, self.exprs[t.0].end);
        self.add_edge(s_end, EdgeLabel::Epsilon, t_start);
        let description = format!(
            "{}{}",
            self.exprs[s.0].description, self.exprs[t.0].description
        );
        self.consume(&[s, t]);
        Ok(self.new_expr(s_start, t_end, description))
    }

    /// `s*`. Consumes the operand on success.
    pub fn kleene(&mut self, s: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s])?;
        let start = self.new_state();
        let end = self.new_state();
        let (s_start, s_end) = (self.exprs[s.0].start, self.exprs[s.0].end);
        self.add_edge(start, EdgeLabel::Epsilon, s_start);
        self.add_edge(start, EdgeLabel::Epsilon, end);
        self.add_edge(s_end, EdgeLabel::Epsilon, s_start);
        self.add_edge(s_end, EdgeLabel::Epsilon, end);
        let description = format!("({})*", self.exprs[s.0].description);
        self.consume(&[s]);
        Ok(self.new_expr(start, end, description))
    }

    /// `s+`, built as `s` concatenated with a starred deep copy of `s`.
    pub fn kleene_plus(&mut self, s: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s])?;
        let description = format!("({})+", self.exprs[s.0].description);
        let copy = self.duplicate(s)?;
        let star = self.kleene(copy)?;
        let id = self.concat(s, star)?;
        self.exprs[id.0].description = description;
        Ok(id)
    }

    /// `s?`, built as `s | empty`.
    pub fn zero_or_one(&mut self, s: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s])?;
        let description = format!("({})?", self.exprs[s.0].description);
        let empty = self.empty();
        let id = self.union(s, empty)?;
        self.exprs[id.0].description = description;
        Ok(id)
    }

    /// Concatenation of a whole list, left to right. An empty list yields
    /// the empty-string language. All operands are consumed, or none.
    pub fn concat_many(&mut self, list: &[ExprId]) -> Result<ExprId, NfaError> {
        if list.is_empty() {
            return Ok(self.empty());
        }
        // Validate up front so a late failure cannot leave the head of the
        // list consumed.
        self.check(list)?;
        let mut acc = list[0];
        for &next in &list[1..] {
            acc = self.concat(acc, next)?;
        }
        Ok(acc)
    }

    /// Union of a whole list. An empty list yields the empty-set language.
    /// Flat construction: one fresh start and end pair regardless of the
    /// list length. All operands are consumed, or none.
    pub fn union_many(&mut self, list: &[ExprId]) -> Result<ExprId, NfaError> {
        if list.is_empty() {
            return Ok(self.none());
        }
        self.check(list)?;
        let start = self.new_state();
        let end = self.new_state();
        for &id in list {
            let (e_start, e_end) = (self.exprs[id.0].start, self.exprs[id.0].end);
            self.add_edge(start, EdgeLabel::Epsilon, e_start);
            self.add_edge(e_end, EdgeLabel::Epsilon, end);
        }
        let description = format!(
            "({})",
            list.iter().map(|id| &self.exprs[id.0].description).join("|")
        );
        self.consume(list);
        Ok(self.new_expr(start, end, description))
    }

    /// Deep-copy a subexpression. The copy shares no states with the
    /// original and every copied state gets a fresh display id. The
    /// original stays valid.
    pub fn duplicate(&mut self, s: ExprId) -> Result<ExprId, NfaError> {
        self.check(&[s])?;
        let (start, end) = (self.exprs[s.0].start, self.exprs[s.0].end);
        let reachable = self.reachable_from(start, Some(end));
        let mut remap = std::collections::BTreeMap::new();
        for &idx in &reachable {
            let copy = self.new_state();
            remap.insert(idx, copy);
        }
        for &idx in &reachable {
            let edges: Vec<_> = self.states[idx]
                .edges
                .iter()
                .map(|&(label, to)| (label, remap[&to]))
                .collect();
            self.states[remap[&idx]].edges = edges;
        }
        let description = self.exprs[s.0].description.clone();
        Ok(self.new_expr(remap[&start], remap[&end], description))
    }

    /// All states reachable from `from` by any path, plus `extra`.
    fn reachable_from(&self, from: usize, extra: Option<usize>) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![from];
        if let Some(extra) = extra {
            stack.push(extra);
        }
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            for &(_, to) in &self.states[idx].edges {
                if !seen.contains(&to) {
                    stack.push(to);
                }
            }
        }
        seen
    }

    /// Extract the finished automaton for a subexpression, consuming the
    /// builder. Only the states belonging to the subexpression are kept.
    pub fn finish(mut self, s: ExprId) -> Result<Nfa, NfaError> {
        self.check(&[s])?;
        let (start, end) = (self.exprs[s.0].start, self.exprs[s.0].end);
        let keep = self.reachable_from(start, Some(end));
        let remap: std::collections::BTreeMap<usize, usize> =
            keep.iter().enumerate().map(|(new, &old)| (old, new)).collect();
        let mut states = Vec::with_capacity(keep.len());
        for &old in &keep {
            let state = &self.states[old];
            states.push(State {
                id: state.id,
                edges: state
                    .edges
                    .iter()
                    .map(|&(label, to)| (label, remap[&to]))
                    .collect(),
            });
        }
        let description = std::mem::take(&mut self.exprs[s.0].description);
        Ok(Nfa {
            states,
            start: remap[&start],
            end: remap[&end],
            description,
        })
    }
}

/// A finished, immutable NFA with one start and one accepting state.
#[derive(Clone, Debug)]
pub struct Nfa {
    states: Vec<State>,
    start: usize,
    end: usize,
    description: String,
}

impl Nfa {
    /// The regular expression this automaton was built from, in canonical
    /// redisplay form.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the automaton's language contains `input` exactly.
    pub fn accept(&self, input: impl AsRef<[u8]>) -> bool {
        let mut rest = input.as_ref();
        let mut current: BTreeSet<usize> = BTreeSet::from([self.start]);
        while !current.is_empty() {
            current = self.epsilon_closure(&current);
            let Some((&byte, tail)) = rest.split_first() else {
                break;
            };
            current = self.move_byte(&current, byte);
            rest = tail;
        }
        current.contains(&self.end) && rest.is_empty()
    }

    /// States reachable from `set` using only epsilon edges, including
    /// `set` itself.
    pub(crate) fn epsilon_closure(&self, set: &BTreeSet<usize>) -> BTreeSet<usize> {
        let mut closed = BTreeSet::new();
        let mut stack: Vec<usize> = set.iter().copied().collect();
        while let Some(idx) = stack.pop() {
            if !closed.insert(idx) {
                continue;
            }
            for &(label, to) in &self.states[idx].edges {
                if label == EdgeLabel::Epsilon && !closed.contains(&to) {
                    stack.push(to);
                }
            }
        }
        closed
    }

    fn move_byte(&self, set: &BTreeSet<usize>, byte: u8) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for &idx in set {
            for &(label, to) in &self.states[idx].edges {
                if label == EdgeLabel::Byte(byte) || label == EdgeLabel::Any {
                    out.insert(to);
                }
            }
        }
        out
    }

    pub(crate) fn states(&self) -> &[State] {
        &self.states
    }

    pub(crate) fn start_index(&self) -> usize {
        self.start
    }

    pub(crate) fn end_index(&self) -> usize {
        self.end
    }
}

impl std::fmt::Display for Nfa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<NFA regex: {}>", self.description)
    }
}

/// Compile a normalized AST into an NFA.
pub fn build(ast: &Ast) -> Result<Nfa, NfaError> {
    let mut builder = Thompson::new();
    let expr = compile_ast(&mut builder, ast)?;
    builder.finish(expr)
}

fn compile_ast(builder: &mut Thompson, ast: &Ast) -> Result<ExprId, NfaError> {
    match ast {
        Ast::Empty => Ok(builder.empty()),
        Ast::Any => Ok(builder.any()),
        Ast::Symbol(byte) => Ok(builder.symbol(*byte)),
        Ast::Set { bytes, display } => builder.char_set(bytes, display),
        Ast::Concat(children) => {
            let ids = children
                .iter()
                .map(|child| compile_ast(builder, child))
                .collect::<Result<Vec<_>, _>>()?;
            builder.concat_many(&ids)
        }
        Ast::Union(children) => {
            let ids = children
                .iter()
                .map(|child| compile_ast(builder, child))
                .collect::<Result<Vec<_>, _>>()?;
            builder.union_many(&ids)
        }
        Ast::Star(x) => {
            let inner = compile_ast(builder, x)?;
            builder.kleene(inner)
        }
        Ast::Plus(x) => {
            let inner = compile_ast(builder, x)?;
            builder.kleene_plus(inner)
        }
        Ast::ZeroOrOne(x) => {
            let inner = compile_ast(builder, x)?;
            builder.zero_or_one(inner)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_cases(nfa: &Nfa, cases: &[(&str, bool)]) {
        for (input, expected) in cases {
            assert_eq!(
                nfa.accept(input),
                *expected,
                "{} on {input:?}",
                nfa.description()
            );
        }
    }

    #[test]
    fn empty_accepts_only_empty_string() {
        let mut b = Thompson::new();
        let e = b.empty();
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("", true), ("a", false)]);
        assert_eq!(nfa.description(), r"\E");
    }

    #[test]
    fn symbol_accepts_only_itself() {
        let mut b = Thompson::new();
        let e = b.symbol(b'a');
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("a", true), ("", false), ("b", false), ("aa", false)]);
    }

    #[test]
    fn any_accepts_every_single_byte() {
        let mut b = Thompson::new();
        let e = b.any();
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("a", true), ("%", true), ("", false), ("ab", false)]);
    }

    #[test]
    fn none_accepts_nothing() {
        let mut b = Thompson::new();
        let e = b.none();
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("", false), ("a", false), ("b", false)]);
        assert_eq!(nfa.description(), "[]");
    }

    #[test]
    fn char_set_accepts_members() {
        let mut b = Thompson::new();
        let e = b.char_set(b"abc", "[abc]").unwrap();
        let nfa = b.finish(e).unwrap();
        assert_cases(
            &nfa,
            &[("a", true), ("b", true), ("c", true), ("d", false), ("", false)],
        );
        assert_eq!(nfa.description(), "[abc]");
    }

    #[test]
    fn empty_char_set_is_none() {
        let mut b = Thompson::new();
        let e = b.char_set(b"", "[]").unwrap();
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("", false), ("a", false)]);
    }

    #[test]
    fn kleene_star() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let star = b.kleene(a).unwrap();
        let nfa = b.finish(star).unwrap();
        assert_cases(
            &nfa,
            &[
                ("", true),
                ("a", true),
                ("aaaaaaa", true),
                ("b", false),
                ("aaaaaab", false),
                ("baaaaaa", false),
                ("aaabaaa", false),
            ],
        );
        assert_eq!(nfa.description(), "(a)*");
    }

    #[test]
    fn kleene_plus_requires_one() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let plus = b.kleene_plus(a).unwrap();
        let nfa = b.finish(plus).unwrap();
        assert_cases(
            &nfa,
            &[("a", true), ("aa", true), ("aaaaaaa", true), ("", false), ("b", false)],
        );
        assert_eq!(nfa.description(), "(a)+");
    }

    #[test]
    fn concat_chains() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let b_ = b.symbol(b'b');
        let ab = b.concat(a, b_).unwrap();
        let nfa = b.finish(ab).unwrap();
        assert_cases(
            &nfa,
            &[
                ("ab", true),
                ("", false),
                ("a", false),
                ("b", false),
                ("abb", false),
                ("aab", false),
            ],
        );
        assert_eq!(nfa.description(), "ab");
    }

    #[test]
    fn concat_many_with_plus() {
        let mut b = Thompson::new();
        let parts = [b.symbol(b'a'), b.symbol(b'b')];
        let c = b.symbol(b'c');
        let c_plus = b.kleene_plus(c).unwrap();
        let d = b.symbol(b'd');
        let all = b.concat_many(&[parts[0], parts[1], c_plus, d]).unwrap();
        let nfa = b.finish(all).unwrap();
        assert_cases(
            &nfa,
            &[
                ("abcd", true),
                ("abcccccd", true),
                ("", false),
                ("ab", false),
                ("abd", false),
                ("abdccccc", false),
            ],
        );
    }

    #[test]
    fn concat_many_empty_list_is_empty_language() {
        let mut b = Thompson::new();
        let e = b.concat_many(&[]).unwrap();
        let nfa = b.finish(e).unwrap();
        assert_cases(&nfa, &[("", true), ("a", false)]);
    }

    #[test]
    fn union_accepts_either() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let b_ = b.symbol(b'b');
        let u = b.union(a, b_).unwrap();
        let nfa = b.finish(u).unwrap();
        assert_cases(&nfa, &[("a", true), ("b", true), ("", false), ("ab", false)]);
        assert_eq!(nfa.description(), "(a|b)");
    }

    #[test]
    fn union_many_flat_description() {
        let mut b = Thompson::new();
        let ids = [b.symbol(b'a'), b.symbol(b'b'), b.symbol(b'c')];
        let u = b.union_many(&ids).unwrap();
        let nfa = b.finish(u).unwrap();
        assert_cases(&nfa, &[("a", true), ("b", true), ("c", true), ("d", false)]);
        assert_eq!(nfa.description(), "(a|b|c)");
    }

    #[test]
    fn union_many_empty_list_is_none() {
        let mut b = Thompson::new();
        let u = b.union_many(&[]).unwrap();
        let nfa = b.finish(u).unwrap();
        assert_cases(&nfa, &[("", false), ("a", false)]);
    }

    #[test]
    fn zero_or_one() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let opt = b.zero_or_one(a).unwrap();
        let nfa = b.finish(opt).unwrap();
        assert_cases(&nfa, &[("", true), ("a", true), ("aa", false), ("b", false)]);
        assert_eq!(nfa.description(), "(a)?");
    }

    #[test]
    fn combinators_consume_operands() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let c = b.symbol(b'c');
        assert!(b.is_valid(a) && b.is_valid(c));
        let u = b.union(a, c).unwrap();
        assert!(!b.is_valid(a));
        assert!(!b.is_valid(c));
        assert!(b.is_valid(u));
    }

    #[test]
    fn consumed_operand_is_rejected_and_nothing_changes() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let c = b.symbol(b'c');
        let _ = b.kleene(a).unwrap();
        // `a` is gone now; combining it again must fail and leave `c` valid.
        assert_eq!(b.union(a, c).unwrap_err(), NfaError::Invalid);
        assert!(b.is_valid(c));
        assert_eq!(b.concat_many(&[c, a]).unwrap_err(), NfaError::Invalid);
        assert!(b.is_valid(c));
    }

    #[test]
    fn duplicate_argument_is_rejected() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        assert_eq!(b.union(a, a).unwrap_err(), NfaError::DuplicateArgument);
        assert!(b.is_valid(a));
        let c = b.symbol(b'c');
        assert_eq!(
            b.union_many(&[a, c, a]).unwrap_err(),
            NfaError::DuplicateArgument
        );
        assert!(b.is_valid(a));
        assert!(b.is_valid(c));
    }

    #[test]
    fn duplicate_is_independent_and_has_fresh_ids() {
        let mut b = Thompson::new();
        let a = b.symbol(b'a');
        let copy = b.duplicate(a).unwrap();
        assert!(b.is_valid(a));
        assert!(b.is_valid(copy));

        let plus = {
            let star = b.kleene(copy).unwrap();
            b.concat(a, star).unwrap()
        };
        let nfa = b.finish(plus).unwrap();
        // No state id appears twice anywhere in the automaton.
        let mut ids: Vec<u32> = nfa.states().iter().map(|s| s.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), nfa.states().len());
    }

    #[test]
    fn build_from_ast() {
        let ast = crate::syntax::normalize::normalize(&crate::syntax::parse("a(bb)*").unwrap());
        let nfa = build(&ast).unwrap();
        assert_cases(
            &nfa,
            &[("a", true), ("abb", true), ("abbbb", true), ("ab", false), ("", false)],
        );
    }

    #[test]
    fn descriptions_escape_specials() {
        let ast = crate::syntax::normalize::normalize(&crate::syntax::parse(r"\*a").unwrap());
        let nfa = build(&ast).unwrap();
        assert_eq!(nfa.description(), r"\*a");
        assert!(nfa.accept("*a"));
    }
}
