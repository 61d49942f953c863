//! The binarizer: lowers an arbitrary [`Fsm`] into canonical binary form,
//! where every non-terminal state has out-degree ≤ 2 and at most one of
//! those two edges consumes a character.
//!
//! This is half of THE CORE named in the specification; the other half is
//! the two-pass offset resolution in [`crate::subroutine`].

use crate::fsm::{EdgeLabel, Fsm, StateId};

/// Consumes `fsm` and produces an equivalent FSM in canonical binary form.
///
/// For every non-terminal state `s` in the output, either:
/// - `out-degree(s) == 1` (a single transition of any kind), or
/// - `out-degree(s) == 2`, with exactly one edge `Epsilon` and the other
///   `Char` or `Remainder`.
///
/// The three distinguished states keep their roles. This never fails: a
/// well-formed input FSM (the only kind [`Fsm`] can construct) always has
/// a valid binarization.
pub fn to_binarized(fsm: &Fsm) -> Fsm {
    let mut out = Fsm::new(fsm.alphabet().clone());

    let n = fsm.num_states();
    let mut mirror: Vec<Option<StateId>> = vec![None; n];
    mirror[fsm.start().index() as usize] = Some(out.start());
    mirror[fsm.success().index() as usize] = Some(out.success());
    mirror[fsm.failure().index() as usize] = Some(out.failure());
    for i in 0..n {
        if mirror[i].is_none() {
            mirror[i] = Some(out.add_state());
        }
    }

    let mut visited = vec![false; n];
    visit(fsm, fsm.start(), &mirror, &mut visited, &mut out);
    out
}

fn visit(fsm: &Fsm, state: StateId, mirror: &[Option<StateId>], visited: &mut [bool], out: &mut Fsm) {
    let idx = state.index() as usize;
    if visited[idx] {
        return;
    }
    visited[idx] = true;

    let m = mirror[idx].expect("every input state has a mirror");
    let edges: Vec<(StateId, EdgeLabel)> = fsm.iter_transitions(state).collect();

    match edges.len() {
        0 => {}
        1 => {
            let (target, label) = edges[0];
            emit(out, m, mirror[target.index() as usize].unwrap(), label);
            visit(fsm, target, mirror, visited, out);
        }
        _ => {
            let mut previous = m;
            for (target, label) in edges {
                let mirrored_target = mirror[target.index() as usize].unwrap();
                match label {
                    EdgeLabel::Remainder => {
                        emit(out, previous, mirrored_target, EdgeLabel::Remainder);
                        visit(fsm, target, mirror, visited, out);
                        break;
                    }
                    _ => {
                        let k = out.add_state();
                        emit(out, previous, k, EdgeLabel::Epsilon);
                        emit(out, k, mirrored_target, label);
                        previous = k;
                        visit(fsm, target, mirror, visited, out);
                    }
                }
            }
        }
    }
}

fn emit(out: &mut Fsm, from: StateId, to: StateId, label: EdgeLabel) {
    let result = match label {
        EdgeLabel::Char(c) => out.add_char_transition(from, to, c),
        EdgeLabel::Epsilon => out.add_epsilon_transition(from, to),
        EdgeLabel::Remainder => out.add_remainder_transition(from, to),
    };
    result.expect("binarizer always produces a well-formed edge sequence");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::Alphabet;

    fn alphabet() -> Alphabet {
        Alphabet::new([b'a', b'b', b'c', b'\0']).unwrap()
    }

    /// Mirrors `original_source/fsm_test.cc`'s `ToBinarizedFsm` fixture:
    /// start -c-> s2; s2 -a/b-> s2 (self-loop); s2 -c-> s3; s3 -a/b/c-> s4;
    /// s4 -\0-> success.
    fn build_fixture() -> Fsm {
        let mut fsm = Fsm::new(alphabet());
        let s2 = fsm.add_state();
        fsm.add_char_transition(fsm.start(), s2, b'c').unwrap();
        fsm.add_char_transition(s2, s2, b'a').unwrap();
        fsm.add_char_transition(s2, s2, b'b').unwrap();
        let s3 = fsm.add_state();
        fsm.add_char_transition(s2, s3, b'c').unwrap();
        let s4 = fsm.add_state();
        for letter in [b'a', b'b', b'c'] {
            fsm.add_char_transition(s3, s4, letter).unwrap();
        }
        fsm.add_char_transition(s4, fsm.success(), b'\0').unwrap();
        fsm
    }

    #[test]
    fn every_non_terminal_state_has_out_degree_at_most_two() {
        let fsm = build_fixture();
        let binarized = to_binarized(&fsm);

        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![binarized.start()];
        while let Some(state) = stack.pop() {
            if state == binarized.success() || state == binarized.failure() {
                continue;
            }
            if !visited.insert(state) {
                continue;
            }
            let edges: Vec<_> = binarized.iter_transitions(state).collect();
            assert!(edges.len() <= 2, "state {:?} has out-degree {}", state, edges.len());
            if edges.len() == 2 {
                let has_epsilon = edges.iter().any(|(_, l)| matches!(l, EdgeLabel::Epsilon));
                let consuming_count = edges
                    .iter()
                    .filter(|(_, l)| !matches!(l, EdgeLabel::Epsilon))
                    .count();
                assert!(
                    has_epsilon && consuming_count == 1,
                    "binarized 2-edge state must be one epsilon + one consuming edge"
                );
            }
            for (target, _) in edges {
                stack.push(target);
            }
        }
    }

    #[test]
    fn start_success_failure_preserved() {
        let fsm = build_fixture();
        let binarized = to_binarized(&fsm);
        assert_eq!(binarized.start().index(), 0);
        assert_eq!(binarized.success().index(), 1);
        assert_eq!(binarized.failure().index(), 2);
    }

    #[test]
    fn simple_chain_binarizes_to_single_edges() {
        let mut fsm = Fsm::new(Alphabet::new([b'a', b'\0']).unwrap());
        let s1 = fsm.add_state();
        fsm.add_char_transition(fsm.start(), s1, b'a').unwrap();
        fsm.add_char_transition(s1, fsm.success(), b'\0').unwrap();
        let binarized = to_binarized(&fsm);
        assert_eq!(binarized.out_edges(binarized.start()).len(), 1);
    }
}
