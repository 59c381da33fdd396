/*!
A regular expression matcher that compiles patterns down to native
x86/x86-64 code.

A pattern goes through a classic pipeline: recursive-descent parsing to an
AST ([`syntax`]), normalization ([`syntax::normalize`]), Thompson
construction of an NFA ([`nfa`]), subset construction of a DFA ([`dfa`]),
translation to a small linear IR ([`ir`]) and finally either
interpretation ([`vm`]) or JIT compilation to machine code ([`jit`], with
the instruction encoding living in the [`x86`] crate). The [`Matcher`]
type wraps the whole pipeline behind one builder.

Matching is full-string membership only: `accept` answers whether the
pattern's language contains the input exactly. There are no capture
groups, anchors or substring searches.

## Usage
```
use rxjit::{Engine, Matcher};

let matcher = Matcher::builder("(a|b)*c").build()?;
assert!(matcher.accept("ababc")?);
assert!(matcher.accept("c")?);
assert!(!matcher.accept("abab")?);

// Force a specific execution strategy:
let vm = Matcher::builder("[0-9]+").engine(Engine::Vm).build()?;
assert!(vm.accept("2024")?);
# Ok::<(), rxjit::Error>(())
```

## Pattern syntax
Byte-oriented and deliberately small: literals, `\c` escapes, `|`
alternation, juxtaposition, the `*`/`+`/`?` quantifiers, `(…)` grouping,
`.` wildcard and `[abc]`/`[a-z]` classes. `^` inside a class is reserved
and rejected. The specials are `\ ^ * ( ) - + [ ] | ? .`; everything else
matches itself.

## Crate features
- `jit` (default): map compiled code into executable memory and run it.
  Without it the compiler still emits machine code for either target, but
  matchers execute on the VM interpreter.
*/

pub mod dfa;
pub mod ir;
pub mod jit;
pub mod matcher;
pub mod nfa;
pub mod syntax;
pub mod vm;

pub use matcher::{Engine, Error, Matcher};

pub use rxjit_x86 as x86;
