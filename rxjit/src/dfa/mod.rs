/*!
Subset construction of a deterministic automaton.

A DFA state stands for a set of NFA states and is named after them: the
canonical name is the sorted, comma-joined list of the member states'
display ids. Edges are labelled with either an exact byte or the `any`
wildcard; the match procedure tries the exact byte first and falls back to
`any`, so a DFA built here never has more than one applicable transition.

The construction first rewrites every NFA state into its epsilon-free
form (all non-epsilon edges reachable through the epsilon closure, with
`any` targets folded into every byte edge, since a byte that could take a
specific edge could equally take the wildcard), then merges state sets
until no new set appears, and finally prunes everything unreachable from
the start state.
*/

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use itertools::Itertools;

use crate::nfa::Nfa;

/// A DFA edge label: an exact byte, or the wildcard.
///
/// The derived order puts all byte labels before `Any`, which is also the
/// order the match procedure and the IR emitter consider them in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Label {
    Byte(u8),
    Any,
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::Byte(b) => write!(f, "{}", *b as char),
            Label::Any => f.write_str("any"),
        }
    }
}

type StateSet = BTreeSet<usize>;
type LabelMap = BTreeMap<Label, StateSet>;

/// A deterministic finite automaton over byte labels.
#[derive(Clone, Debug)]
pub struct Dfa {
    start: String,
    states: BTreeMap<String, BTreeMap<Label, String>>,
    accepting: BTreeSet<String>,
    description: String,
}

impl Dfa {
    /// Build the equivalent DFA. The NFA is only read, never consumed.
    pub fn from_nfa(nfa: &Nfa) -> Dfa {
        let construction = Construction::new(nfa);
        construction.run()
    }

    /// The regular expression this automaton was built from.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Name of the start state.
    pub fn start(&self) -> &str {
        &self.start
    }

    /// Transition table: state name to label-to-successor map.
    pub fn states(&self) -> &BTreeMap<String, BTreeMap<Label, String>> {
        &self.states
    }

    /// Names of the accepting states.
    pub fn accepting(&self) -> &BTreeSet<String> {
        &self.accepting
    }

    /// Whether the automaton's language contains `input` exactly: follow
    /// the exact-byte edge if present, otherwise the `any` edge, otherwise
    /// reject; accept iff the final state is accepting.
    pub fn accept(&self, input: impl AsRef<[u8]>) -> bool {
        let mut state = &self.start;
        for &byte in input.as_ref() {
            let edges = &self.states[state];
            if let Some(next) = edges.get(&Label::Byte(byte)) {
                state = next;
            } else if let Some(next) = edges.get(&Label::Any) {
                state = next;
            } else {
                return false;
            }
        }
        self.accepting.contains(state)
    }
}

impl std::fmt::Display for Dfa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<DFA regex: {}>", self.description)
    }
}

struct Construction<'n> {
    nfa: &'n Nfa,
    /// Reachable NFA states, in arena index form.
    reachable: BTreeSet<usize>,
    /// Epsilon-free edge map of every single NFA state.
    state_edges: BTreeMap<usize, LabelMap>,
}

impl<'n> Construction<'n> {
    fn new(nfa: &'n Nfa) -> Self {
        let start: BTreeSet<usize> = BTreeSet::from([nfa.start_index()]);
        let mut reachable = BTreeSet::new();
        let mut stack: Vec<usize> = start.into_iter().collect();
        while let Some(idx) = stack.pop() {
            if !reachable.insert(idx) {
                continue;
            }
            for &(_, to) in &nfa.states()[idx].edges {
                if !reachable.contains(&to) {
                    stack.push(to);
                }
            }
        }
        let state_edges = reachable
            .iter()
            .map(|&idx| (idx, Self::epsilon_free_edges(nfa, idx)))
            .collect();
        Self {
            nfa,
            reachable,
            state_edges,
        }
    }

    /// All non-epsilon transitions available from `idx`, looking through
    /// epsilon closures on both sides, with `any` targets folded into every
    /// byte label.
    fn epsilon_free_edges(nfa: &Nfa, idx: usize) -> LabelMap {
        use crate::nfa::EdgeLabel;

        let mut map = LabelMap::new();
        let closure = nfa.epsilon_closure(&BTreeSet::from([idx]));
        for &state in &closure {
            for &(label, to) in &nfa.states()[state].edges {
                let label = match label {
                    EdgeLabel::Epsilon => continue,
                    EdgeLabel::Any => Label::Any,
                    EdgeLabel::Byte(b) => Label::Byte(b),
                };
                let targets = map.entry(label).or_default();
                targets.insert(to);
                targets.extend(nfa.epsilon_closure(&BTreeSet::from([to])));
            }
        }
        propagate_any(&mut map);
        map
    }

    fn name(&self, set: &StateSet) -> String {
        set.iter()
            .map(|&idx| self.nfa.states()[idx].id)
            .sorted_unstable()
            .join(",")
    }

    fn run(self) -> Dfa {
        // Seed with one DFA state per single NFA state.
        let mut sets: BTreeMap<String, StateSet> = BTreeMap::new();
        let mut table: BTreeMap<String, LabelMap> = BTreeMap::new();
        let mut worklist: Vec<StateSet> = Vec::new();
        for (&idx, edges) in &self.state_edges {
            let singleton = BTreeSet::from([idx]);
            let name = self.name(&singleton);
            worklist.extend(edges.values().cloned());
            table.insert(name.clone(), edges.clone());
            sets.insert(name, singleton);
        }

        // Merge multistates until the worklist dries up.
        while let Some(set) = worklist.pop() {
            let name = self.name(&set);
            if table.contains_key(&name) {
                continue;
            }
            let mut merged = LabelMap::new();
            for &member in &set {
                for (label, targets) in &self.state_edges[&member] {
                    merged.entry(*label).or_default().extend(targets.iter().copied());
                }
            }
            propagate_any(&mut merged);
            worklist.extend(merged.values().cloned());
            table.insert(name.clone(), merged);
            sets.insert(name, set);
        }

        // Successor sets become canonical names.
        let mut states: BTreeMap<String, BTreeMap<Label, String>> = table
            .into_iter()
            .map(|(name, edges)| {
                let named = edges
                    .into_iter()
                    .map(|(label, set)| (label, self.name(&set)))
                    .collect();
                (name, named)
            })
            .collect();

        // Accepting states contain the NFA's end state, or are singletons
        // whose one state reaches the end through epsilon edges alone.
        let end = self.nfa.end_index();
        let mut accepting: BTreeSet<String> = sets
            .iter()
            .filter(|(_, set)| set.contains(&end))
            .map(|(name, _)| name.clone())
            .collect();
        for &idx in &self.reachable {
            let closure = self.nfa.epsilon_closure(&BTreeSet::from([idx]));
            if closure.contains(&end) {
                accepting.insert(self.name(&BTreeSet::from([idx])));
            }
        }

        // Prune states unreachable from the start.
        let start = self.name(&BTreeSet::from([self.nfa.start_index()]));
        let mut live = BTreeSet::new();
        let mut stack = vec![start.clone()];
        while let Some(name) = stack.pop() {
            if !live.insert(name.clone()) {
                continue;
            }
            for next in states[&name].values() {
                if !live.contains(next) {
                    stack.push(next.clone());
                }
            }
        }
        states.retain(|name, _| live.contains(name));
        accepting.retain(|name| live.contains(name));

        Dfa {
            start,
            states,
            accepting,
            description: self.nfa.description().to_string(),
        }
    }
}

/// A byte that can take a specific edge can also take the wildcard, so the
/// wildcard's targets join every label's target set.
fn propagate_any(map: &mut LabelMap) {
    if let Some(any_targets) = map.get(&Label::Any).cloned() {
        for targets in map.values_mut() {
            targets.extend(any_targets.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nfa;
    use crate::syntax::{normalize::normalize, parse};

    fn dfa_for(pattern: &str) -> Dfa {
        let ast = normalize(&parse(pattern).unwrap());
        let nfa = nfa::build(&ast).unwrap();
        Dfa::from_nfa(&nfa)
    }

    fn agree(pattern: &str, inputs: &[&str]) {
        let ast = normalize(&parse(pattern).unwrap());
        let nfa = nfa::build(&ast).unwrap();
        let dfa = Dfa::from_nfa(&nfa);
        for input in inputs {
            assert_eq!(
                nfa.accept(input),
                dfa.accept(input),
                "{pattern} disagrees on {input:?}"
            );
        }
    }

    #[test]
    fn simple_symbol() {
        let dfa = dfa_for("a");
        assert!(dfa.accept("a"));
        assert!(!dfa.accept(""));
        assert!(!dfa.accept("A"));
        assert!(!dfa.accept("aa"));
    }

    #[test]
    fn start_state_exists_in_table() {
        let dfa = dfa_for("ab");
        assert!(dfa.states().contains_key(dfa.start()));
    }

    #[test]
    fn wildcard_vs_specific_edges() {
        // `(a|.)b`: the `a` edge and the `any` edge must both reach `b`.
        let dfa = dfa_for("(a|.)b");
        assert!(dfa.accept("ab"));
        assert!(dfa.accept("xb"));
        assert!(!dfa.accept("a"));
        assert!(!dfa.accept("abb"));
    }

    #[test]
    fn any_propagation_keeps_specific_bytes_alive() {
        // After `a` the DFA is in a merged state where `a` still works
        // because the wildcard admits it.
        let dfa = dfa_for(".*a");
        assert!(dfa.accept("a"));
        assert!(dfa.accept("aa"));
        assert!(dfa.accept("xya"));
        assert!(!dfa.accept("ax"));
    }

    #[test]
    fn accepting_by_epsilon_reach() {
        // The start state of `a*` reaches the end state by epsilon only.
        let dfa = dfa_for("a*");
        assert!(dfa.accept(""));
        assert!(dfa.accept("aaa"));
        assert!(!dfa.accept("b"));
        assert!(dfa.accepting().contains(dfa.start()));
    }

    #[test]
    fn empty_set_rejects_everything() {
        let dfa = dfa_for("[]");
        assert!(!dfa.accept(""));
        assert!(!dfa.accept("a"));
    }

    #[test]
    fn equivalence_on_scenarios() {
        let inputs = [
            "", "a", "b", "c", "aa", "ab", "abc", "aab", "acc", "aacc", "aabbcc", "acccccc",
            "axb", "a1b", "a+b", "axxb", "x", "zyx", "xx.", "abcd", "abcccccd",
        ];
        for pattern in [
            "a",
            "a|b|c",
            "a*",
            "a(bb|(cc)*)",
            "a.b",
            "[x-z]*",
            "(a|b)*c",
            "a+b?",
            "ab(c|d)+",
        ] {
            agree(pattern, &inputs);
        }
    }

    #[test]
    fn names_are_sorted_id_lists() {
        let dfa = dfa_for("a|b");
        for name in dfa.states().keys() {
            let ids: Vec<u32> = name.split(',').map(|s| s.parse().unwrap()).collect();
            let mut sorted = ids.clone();
            sorted.sort_unstable();
            assert_eq!(ids, sorted, "name {name} not sorted");
        }
    }
}
