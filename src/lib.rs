//! # regexjit
//!
//! **regexjit** turns a regular expression, given as a finite-state machine
//! over a finite character alphabet, into native x86-64 machine code
//! callable under the System V AMD64 convention: `uint8_t fn(const char*)`.
//!
//! ## Pipeline
//!
//! - [`fsm`] — the in-memory FSM graph (states, alphabet, edge labels).
//! - [`binarize`] — lowers an arbitrary FSM into canonical binary form.
//! - [`segment`] — the four-phase segment lifecycle and the fixed/branching
//!   segment variants.
//! - [`subroutine`] — the ordered segment container and two-pass
//!   branch-displacement resolution.
//! - [`lower`] — walks a binarized FSM and produces the segment sequence.
//! - [`exec`] — a minimal loader that maps the finalized bytes executable
//!   and exposes a safe calling convention. Not part of the core compiler;
//!   provided so the crate is usable and testable end-to-end.
//!
//! ## Usage
//!
//! ```
//! use regexjit::fsm::{Alphabet, Fsm};
//! use regexjit::{compile, CompileOptions};
//! use regexjit::exec::CompiledMatcher;
//! use std::ffi::CString;
//!
//! let alphabet = Alphabet::new([b'a', b'\0']).unwrap();
//! let mut fsm = Fsm::new(alphabet);
//! let s1 = fsm.add_state();
//! fsm.add_char_transition(fsm.start(), s1, b'a').unwrap();
//! fsm.add_remainder_transition(fsm.start(), fsm.failure()).unwrap();
//! fsm.add_char_transition(s1, fsm.success(), b'\0').unwrap();
//! fsm.add_remainder_transition(s1, fsm.failure()).unwrap();
//!
//! let subroutine = compile(&fsm, CompileOptions::default()).unwrap();
//! let matcher = CompiledMatcher::new(&subroutine).unwrap();
//! assert!(matcher.is_match(&CString::new("a").unwrap()));
//! assert!(!matcher.is_match(&CString::new("b").unwrap()));
//! ```
//!
//! ## Crate organization
//!
//! - `fsm`: graph construction and the dot-graph diagnostic renderer.
//! - `binarize`: the FSM canonicalization pass.
//! - `segment` / `subroutine`: the assembler.
//! - `lower`: FSM-to-segment translation.
//! - `exec`: executable-memory loader.
//!
//! ## License
//!
//! Licensed under MIT or Apache-2.0.

pub mod binarize;
pub mod exec;
pub mod fsm;
pub mod lower;
pub mod segment;
pub mod subroutine;

use fsm::Fsm;
use segment::EncodingError;
use subroutine::Subroutine;

/// Options accepted by [`compile`].
#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Reserved for future displacement-validation toggles. Currently the
    /// compiler always validates; this field exists so callers have a
    /// forward-compatible way to pass options without an API break.
    pub validate_displacements: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            validate_displacements: true,
        }
    }
}

/// Binarizes, lowers, and finalizes `fsm` into a ready-to-emit [`Subroutine`].
///
/// This is the single entry point most callers need: it runs the whole
/// pipeline (binarize → lower → finalize) and stops at the first
/// [`EncodingError`], if any.
pub fn compile(fsm: &Fsm, _options: CompileOptions) -> Result<Subroutine, EncodingError> {
    let binarized = binarize::to_binarized(fsm);
    let mut subroutine = lower::lower(&binarized);
    subroutine.finalize()?;
    Ok(subroutine)
}
