/*!
The public matcher.

A [`Matcher`] owns one compiled form of a pattern and answers full-string
membership queries. Which form is decided by the [`Engine`] setting:

- [`Engine::Nfa`]: direct simulation of the Thompson NFA.
- [`Engine::Dfa`]: the determinized automaton.
- [`Engine::Vm`]: the IR program run by the reference interpreter.
- [`Engine::Jit`]: native code, compiled for and executed on the host.
- [`Engine::Auto`] (default): native code where the platform supports it,
  the VM otherwise.

```
use rxjit::Matcher;

let matcher = Matcher::builder("aa(bb|(cc)*)").build()?;
assert!(matcher.accept("aacc")?);
assert!(!matcher.accept("acccccc")?);
assert_eq!(matcher.description(), Some("aa(bb|(cc)*)"));
# Ok::<(), rxjit::Error>(())
```

A matcher can also start out empty and receive its pattern later; calling
[`Matcher::accept`] before then fails with [`Error::NotReady`].
*/

use bon::bon;
use thiserror::Error;

use crate::dfa::Dfa;
use crate::ir::Program;
use crate::nfa::{self, Nfa, NfaError};
use crate::syntax::{self, normalize::normalize, ParseError};
use crate::vm::{Vm, VmError};
#[cfg(feature = "jit")]
use crate::jit::code::CompiledCode;
use crate::jit::{CompileError, Compiler};

/// Execution strategy of a [`Matcher`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Engine {
    /// Native code on supported hosts, the VM elsewhere.
    #[default]
    Auto,
    Nfa,
    Dfa,
    Vm,
    Jit,
}

/// Anything that can go wrong constructing or using a matcher.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no pattern loaded")]
    NotReady,
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Nfa(#[from] NfaError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] VmError),
}

#[derive(Debug)]
enum Executor {
    Nfa(Nfa),
    Dfa(Dfa),
    Vm(Program),
    #[cfg(feature = "jit")]
    Jit(CompiledCode),
}

/// A compiled pattern matcher deciding exact-language membership.
#[derive(Debug, Default)]
pub struct Matcher {
    engine: Engine,
    executor: Option<Executor>,
    description: Option<String>,
}

#[bon]
impl Matcher {
    /// Compile `pattern` into a ready matcher.
    #[builder]
    pub fn new(
        #[builder(start_fn)] pattern: &str,
        /// Execution strategy; defaults to [`Engine::Auto`].
        #[builder(default)]
        engine: Engine,
    ) -> Result<Matcher, Error> {
        let mut matcher = Matcher {
            engine,
            executor: None,
            description: None,
        };
        matcher.load_pattern(pattern)?;
        Ok(matcher)
    }

    /// Shorthand for `Matcher::builder(pattern).build()`.
    pub fn compile(pattern: &str) -> Result<Matcher, Error> {
        Matcher::builder(pattern).build()
    }

    /// Compile `pattern` and install it, replacing any previous one. On
    /// failure the matcher keeps its previous state.
    pub fn load_pattern(&mut self, pattern: &str) -> Result<(), Error> {
        let ast = normalize(&syntax::parse(pattern)?);
        let nfa = nfa::build(&ast)?;
        let description = nfa.description().to_string();
        let executor = build_executor(self.engine, nfa)?;
        self.executor = Some(executor);
        self.description = Some(description);
        Ok(())
    }

    /// Whether the pattern's language contains `input` exactly.
    ///
    /// Fails with [`Error::NotReady`] when no pattern has been loaded.
    pub fn accept(&self, input: impl AsRef<[u8]>) -> Result<bool, Error> {
        let input = input.as_ref();
        match self.executor.as_ref().ok_or(Error::NotReady)? {
            Executor::Nfa(nfa) => Ok(nfa.accept(input)),
            Executor::Dfa(dfa) => Ok(dfa.accept(input)),
            Executor::Vm(program) => Ok(Vm::new(program).run(input)?),
            #[cfg(feature = "jit")]
            Executor::Jit(code) => Ok(code.matches(input)),
        }
    }

    /// Canonical redisplay of the pattern, once one is loaded.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Switch an NFA-backed matcher to DFA execution. A no-op for every
    /// other engine.
    pub fn compile_to_dfa(&mut self) -> Result<(), Error> {
        match self.executor.take() {
            None => Err(Error::NotReady),
            Some(Executor::Nfa(nfa)) => {
                self.executor = Some(Executor::Dfa(Dfa::from_nfa(&nfa)));
                Ok(())
            }
            Some(other) => {
                self.executor = Some(other);
                Ok(())
            }
        }
    }
}

fn build_executor(engine: Engine, nfa: Nfa) -> Result<Executor, Error> {
    let resolved = match engine {
        Engine::Auto => {
            #[cfg(feature = "jit")]
            {
                if crate::jit::Target::host().is_some() {
                    Engine::Jit
                } else {
                    Engine::Vm
                }
            }
            #[cfg(not(feature = "jit"))]
            {
                Engine::Vm
            }
        }
        other => other,
    };
    match resolved {
        Engine::Nfa => Ok(Executor::Nfa(nfa)),
        Engine::Dfa => Ok(Executor::Dfa(Dfa::from_nfa(&nfa))),
        Engine::Vm => {
            let program = Program::from_dfa(&Dfa::from_nfa(&nfa));
            Ok(Executor::Vm(program))
        }
        Engine::Jit => {
            #[cfg(feature = "jit")]
            {
                let program = Program::from_dfa(&Dfa::from_nfa(&nfa));
                let assembly = Compiler::for_host()?.compile(&program)?;
                Ok(Executor::Jit(CompiledCode::load(&assembly)?))
            }
            #[cfg(not(feature = "jit"))]
            {
                let _ = Compiler::for_host()?;
                Err(Error::Compile(CompileError::UnsupportedHost))
            }
        }
        Engine::Auto => unreachable!("Auto resolved above"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engines() -> Vec<Engine> {
        let mut engines = vec![Engine::Nfa, Engine::Dfa, Engine::Vm];
        #[cfg(all(feature = "jit", any(target_arch = "x86", target_arch = "x86_64")))]
        engines.push(Engine::Jit);
        engines
    }

    fn check(pattern: &str, accepted: &[&str], rejected: &[&str]) {
        for engine in engines() {
            let matcher = Matcher::builder(pattern).engine(engine).build().unwrap();
            for input in accepted {
                assert!(
                    matcher.accept(input).unwrap(),
                    "{pattern} should accept {input:?} under {engine:?}"
                );
            }
            for input in rejected {
                assert!(
                    !matcher.accept(input).unwrap(),
                    "{pattern} should reject {input:?} under {engine:?}"
                );
            }
        }
    }

    #[test]
    fn scenario_single_symbol() {
        check("a", &["a"], &["", "A", "aa"]);
    }

    #[test]
    fn scenario_alternation() {
        check("a|b|c", &["a", "b", "c"], &["", "ab"]);
    }

    #[test]
    fn scenario_star() {
        check("a*", &["", "a", "aaaaa"], &["b", "aab"]);
    }

    #[test]
    fn scenario_nested_groups() {
        check(
            "a(bb|(cc)*)",
            &["a", "abb", "acc", "acccc", "acccccc"],
            &["", "ab", "ac", "abbcc"],
        );
        check(
            "aa(bb|(cc)*)",
            &["aacc", "aa", "aabb", "aacccc"],
            &["acccccc", "aabbcc"],
        );
    }

    #[test]
    fn scenario_wildcard() {
        check("a.b", &["axb", "a1b", "a+b"], &["ab", "axxb"]);
    }

    #[test]
    fn scenario_class_star() {
        check("[x-z]*", &["", "x", "zyx"], &["a", "xx."]);
    }

    #[test]
    fn empty_pattern_accepts_empty_string() {
        check("", &[""], &["a"]);
    }

    #[test]
    fn empty_class_rejects_all() {
        check("[]", &[], &["", "a"]);
    }

    #[test]
    fn escaped_specials() {
        check(r"\(\)\*", &["()*"], &["", "()"]);
    }

    #[test]
    fn not_ready_until_loaded() {
        let matcher = Matcher::default();
        assert!(matches!(matcher.accept("a"), Err(Error::NotReady)));
        assert_eq!(matcher.description(), None);

        let mut matcher = Matcher::default();
        matcher.load_pattern("ab").unwrap();
        assert!(matcher.accept("ab").unwrap());
    }

    #[test]
    fn load_failure_keeps_previous_pattern() {
        let mut matcher = Matcher::compile("ab").unwrap();
        assert!(matcher.load_pattern("a|").is_err());
        assert!(matcher.accept("ab").unwrap());
        assert_eq!(matcher.description(), Some("ab"));
    }

    #[test]
    fn compile_to_dfa_switches_engine() {
        let mut matcher = Matcher::builder("a*b").engine(Engine::Nfa).build().unwrap();
        matcher.compile_to_dfa().unwrap();
        assert!(matcher.accept("aaab").unwrap());
        assert!(!matcher.accept("aba").unwrap());
    }

    #[test]
    fn parse_errors_surface() {
        assert!(matches!(
            Matcher::compile("(a"),
            Err(Error::Parse(ParseError::UnmatchedParen))
        ));
        assert!(matches!(
            Matcher::compile("[^a]"),
            Err(Error::Parse(ParseError::NegatedClass))
        ));
    }

    #[test]
    fn description_round_trips() {
        for pattern in ["a", "ab", "a|b|c", "a*", "a(bb|(cc)*)", "a.b", "[x-z]*", r"\*a", "a+b?"] {
            let matcher = Matcher::compile(pattern).unwrap();
            let description = matcher.description().unwrap().to_string();
            let reparsed = Matcher::compile(&description).unwrap();
            for input in ["", "a", "b", "ab", "abc", "*a", "aacc", "axb", "zyx", "aab"] {
                assert_eq!(
                    matcher.accept(input).unwrap(),
                    reparsed.accept(input).unwrap(),
                    "{pattern} vs {description} on {input:?}"
                );
            }
        }
    }

    #[test]
    fn differential_against_regex_crate() {
        // Full-string membership agrees with the regex crate under
        // anchoring, over a corpus without rxjit-specific syntax quirks.
        let patterns = ["a", "ab", "a|b|c", "a*", "a(bb|(cc)*)", "a.b", "[x-z]*", "a+b?", "(a|b)*c"];
        let inputs = [
            "", "a", "b", "c", "ab", "abc", "aa", "aab", "acc", "aacc", "axb", "a1b", "axxb",
            "x", "zyx", "ac", "bc", "abab", "ababc",
        ];
        for pattern in patterns {
            let ours = Matcher::compile(pattern).unwrap();
            let theirs = regex::Regex::new(&format!("^(?:{pattern})$")).unwrap();
            for input in inputs {
                assert_eq!(
                    ours.accept(input).unwrap(),
                    theirs.is_match(input),
                    "{pattern} on {input:?}"
                );
            }
        }
    }
}
