//! Shared test helpers: compile an [`Fsm`], load it, and check a table of
//! expected accept/reject outcomes.

use std::ffi::CString;

use regexjit::exec::CompiledMatcher;
use regexjit::fsm::Fsm;
use regexjit::{compile, CompileOptions};

/// Compiles `fsm`, loads it into executable memory, and asserts every
/// `(input, expected)` pair in `cases`.
pub fn assert_matches(fsm: &Fsm, cases: &[(&str, bool)]) {
    let subroutine = compile(fsm, CompileOptions::default()).expect("fsm should compile");
    let matcher = CompiledMatcher::new(&subroutine).expect("subroutine should load");
    for (input, expected) in cases {
        let c_input = CString::new(*input).expect("test input must not contain interior NUL");
        let actual = matcher.is_match(&c_input);
        assert_eq!(
            actual, *expected,
            "input {:?}: expected {}, got {}",
            input, expected, actual
        );
    }
}

/// Compiles `fsm` and returns its finalized bytes, without loading them.
pub fn compiled_bytes(fsm: &Fsm) -> Vec<u8> {
    compile(fsm, CompileOptions::default())
        .expect("fsm should compile")
        .write_code()
}
