/*!
AST normalization.

Two rewrites over the parser output, producing a fresh tree:

1. Flattening: a `Concat` child of a `Concat` (and a `Union` child of a
   `Union`) is spliced into its parent, preserving order. The parser emits
   binary nodes, so this is what makes `Concat`/`Union` n-ary.
2. Quantifier collapsing: directly nested quantifiers reduce to a single
   one (`(a*)*` is `a*`, `(a+)?` is `a*`, and so on).

After normalization no `Concat` contains a `Concat` child, no `Union`
contains a `Union` child, both have at least two children, and no
quantifier directly wraps another.
*/

use super::Ast;

/// Normalize an AST. The input is left untouched.
pub fn normalize(ast: &Ast) -> Ast {
    collapse(&flatten(ast))
}

fn flatten(ast: &Ast) -> Ast {
    match ast {
        Ast::Empty | Ast::Any | Ast::Symbol(_) | Ast::Set { .. } => ast.clone(),
        Ast::Star(x) => Ast::Star(Box::new(flatten(x))),
        Ast::Plus(x) => Ast::Plus(Box::new(flatten(x))),
        Ast::ZeroOrOne(x) => Ast::ZeroOrOne(Box::new(flatten(x))),
        Ast::Concat(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    Ast::Concat(sub) => out.extend(sub),
                    other => out.push(other),
                }
            }
            Ast::Concat(out)
        }
        Ast::Union(children) => {
            let mut out = Vec::with_capacity(children.len());
            for child in children {
                match flatten(child) {
                    Ast::Union(sub) => out.extend(sub),
                    other => out.push(other),
                }
            }
            Ast::Union(out)
        }
    }
}

fn collapse(ast: &Ast) -> Ast {
    match ast {
        Ast::Empty | Ast::Any | Ast::Symbol(_) | Ast::Set { .. } => ast.clone(),
        Ast::Concat(children) => Ast::Concat(children.iter().map(collapse).collect()),
        Ast::Union(children) => Ast::Union(children.iter().map(collapse).collect()),
        Ast::Star(x) => match collapse(x) {
            Ast::Star(inner) | Ast::Plus(inner) | Ast::ZeroOrOne(inner) => Ast::Star(inner),
            other => Ast::Star(Box::new(other)),
        },
        Ast::Plus(x) => match collapse(x) {
            Ast::Plus(inner) => Ast::Plus(inner),
            // One-or-more of something already allowing zero is a star.
            Ast::Star(inner) | Ast::ZeroOrOne(inner) => Ast::Star(inner),
            other => Ast::Plus(Box::new(other)),
        },
        Ast::ZeroOrOne(x) => match collapse(x) {
            Ast::ZeroOrOne(inner) => Ast::ZeroOrOne(inner),
            Ast::Star(inner) | Ast::Plus(inner) => Ast::Star(inner),
            other => Ast::ZeroOrOne(Box::new(other)),
        },
    }
}
