//! Lowering: walks a binarized FSM and produces the correct sequence of
//! segments (prologue, per-state match/jump, success epilogue, failure
//! epilogue).
//!
//! Assumes the caller's FSM follows the convention every `Char` edge is
//! paired with a sibling `Epsilon` or `Remainder` on the same state (the
//! convention `original_source/fsm_test.cc`'s fixtures follow uniformly via
//! `AddTransitionForRemaining`). Under that convention the binarizer never
//! produces a bare single-edge state whose one edge consumes a character,
//! so the single-out-edge → `NoOp` rule below is always sound. See
//! `DESIGN.md` for the reasoning.

use crate::fsm::{EdgeLabel, Fsm, StateId};
use crate::segment::Segment;
use crate::subroutine::Subroutine;

/// Segment id reserved for the prologue. Never a jump target, so it cannot
/// collide with any FSM state id.
const PROLOGUE_ID: u32 = u32::MAX;

enum Shape {
    Terminal,
    Pass {
        fallthrough: StateId,
    },
    Match {
        letter: u8,
        match_target: StateId,
        fallthrough: StateId,
    },
    ElseBranch {
        letter: u8,
        else_target: StateId,
        fallthrough: StateId,
    },
}

fn classify(fsm: &Fsm, state: StateId) -> Shape {
    let edges: Vec<(StateId, EdgeLabel)> = fsm.iter_transitions(state).collect();
    match edges.len() {
        0 => Shape::Terminal,
        1 => Shape::Pass {
            fallthrough: edges[0].0,
        },
        2 => {
            let (t0, l0) = edges[0];
            let (t1, l1) = edges[1];
            match (l0, l1) {
                (EdgeLabel::Epsilon, EdgeLabel::Char(c)) => Shape::Match {
                    letter: c,
                    match_target: t1,
                    fallthrough: t0,
                },
                (EdgeLabel::Char(c), EdgeLabel::Epsilon) => Shape::Match {
                    letter: c,
                    match_target: t0,
                    fallthrough: t1,
                },
                (EdgeLabel::Char(c), EdgeLabel::Remainder) => Shape::ElseBranch {
                    letter: c,
                    else_target: t1,
                    fallthrough: t0,
                },
                (EdgeLabel::Remainder, EdgeLabel::Char(c)) => Shape::ElseBranch {
                    letter: c,
                    else_target: t0,
                    fallthrough: t1,
                },
                _ => panic!(
                    "lowering: unsupported binarized state shape at state {}: {:?}/{:?}",
                    state, l0, l1
                ),
            }
        }
        n => panic!("lowering: state {} is not binarized (out-degree {})", state, n),
    }
}

fn build_segment(fsm: &Fsm, state: StateId) -> Segment {
    match classify(fsm, state) {
        Shape::Terminal => unreachable!("terminal states are emitted separately"),
        Shape::Pass { .. } => Segment::no_op(state.index()),
        Shape::Match {
            letter,
            match_target,
            ..
        } => Segment::consuming_match_branch(state.index(), letter, match_target.index()),
        Shape::ElseBranch {
            letter, else_target, ..
        } => Segment::consuming_else_branch(state.index(), letter, else_target.index()),
    }
}

fn walk(fsm: &Fsm, state: StateId, visited: &mut [bool], order: &mut Vec<StateId>) {
    let idx = state.index() as usize;
    if visited[idx] {
        return;
    }
    visited[idx] = true;
    order.push(state);
    match classify(fsm, state) {
        Shape::Terminal => {}
        Shape::Pass { fallthrough } => walk(fsm, fallthrough, visited, order),
        Shape::Match {
            fallthrough,
            match_target,
            ..
        } => {
            // The fallthrough target must be laid out immediately next;
            // the jump target can be placed anywhere (resolved by the
            // subroutine's two-pass offset resolution), so it is only
            // walked afterward to make sure it is emitted somewhere.
            walk(fsm, fallthrough, visited, order);
            walk(fsm, match_target, visited, order);
        }
        Shape::ElseBranch {
            fallthrough,
            else_target,
            ..
        } => {
            walk(fsm, fallthrough, visited, order);
            walk(fsm, else_target, visited, order);
        }
    }
}

/// Walks `fsm` (assumed already binarized) and returns the segment
/// sequence that implements it, not yet finalized.
pub fn lower(fsm: &Fsm) -> Subroutine {
    let mut sub = Subroutine::new();
    sub.add_segment(Segment::stack_prologue(PROLOGUE_ID));

    let n = fsm.num_states();
    let mut visited = vec![false; n];
    visited[fsm.success().index() as usize] = true;
    visited[fsm.failure().index() as usize] = true;

    let mut order = Vec::with_capacity(n);
    walk(fsm, fsm.start(), &mut visited, &mut order);
    // Pick up any states not reached through the fallthrough/jump walk
    // from start (disconnected subgraphs); harmless no-op otherwise.
    for state in fsm.iter_states() {
        walk(fsm, state, &mut visited, &mut order);
    }

    for state in order {
        sub.add_segment(build_segment(fsm, state));
    }
    sub.add_segment(Segment::success(fsm.success().index()));
    sub.add_segment(Segment::failure(fsm.failure().index()));
    sub
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Alphabet;

    #[test]
    fn literal_a_lowers_and_finalizes() {
        let mut fsm = Fsm::new(Alphabet::new([b'a', b'\0']).unwrap());
        let s1 = fsm.add_state();
        fsm.add_char_transition(fsm.start(), s1, b'a').unwrap();
        fsm.add_remainder_transition(fsm.start(), fsm.failure()).unwrap();
        fsm.add_char_transition(s1, fsm.success(), b'\0').unwrap();
        fsm.add_remainder_transition(s1, fsm.failure()).unwrap();

        let mut sub = lower(&crate::binarize::to_binarized(&fsm));
        sub.finalize().unwrap();
        let code = sub.write_code();
        assert_eq!(&code[0..4], &[0x55, 0x48, 0x89, 0xe5]);
        assert!(code.contains(&0xae));
    }
}
