use rxjit::{Engine, Matcher};

fn main() {
    let matcher = Matcher::builder("(a|b)*c").build().unwrap();
    assert!(matcher.accept("ababc").unwrap());
    assert!(matcher.accept("c").unwrap());
    assert!(!matcher.accept("abab").unwrap());

    let matcher = Matcher::builder("[0-9]+(\\.[0-9]+)?").build().unwrap();
    assert!(matcher.accept("3.14").unwrap());
    assert!(matcher.accept("42").unwrap());
    assert!(!matcher.accept("3.").unwrap());

    // Force the interpreter instead of native code.
    let matcher = Matcher::builder("a.c")
        .engine(Engine::Vm)
        .build()
        .unwrap();
    assert!(matcher.accept("abc").unwrap());
    // Matching is whole-string only; there is no substring search.
    assert!(!matcher.accept("xabcx").unwrap());

    println!("pattern: {}", matcher.description().unwrap());
}
