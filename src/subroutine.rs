//! The subroutine assembler: an ordered collection of owned [`Segment`]s,
//! a side map from stable segment id to layout position, and the two-pass
//! branch-displacement resolution that turns segment sizes into final
//! byte offsets.

use std::collections::HashMap;

use crate::segment::{EncodingError, OffsetInterface, Segment};

/// Read-only view over a snapshotted per-position size vector, implementing
/// [`OffsetInterface`]. Used for both the pessimistic (`max_size()`) phase
/// and the exact (`size()`) phase: the two phases differ only in which
/// sizes were snapshotted, not in how the interface computes distances.
struct SegmentOffsets<'a> {
    sizes: &'a [usize],
    position_of: &'a HashMap<u32, usize>,
}

impl OffsetInterface for SegmentOffsets<'_> {
    fn maximum_distance(&self, a: u32, b: u32) -> usize {
        let (mut lo, mut hi) = (self.position_of[&a], self.position_of[&b]);
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        self.sizes[lo..hi].iter().sum()
    }

    fn absolute_offset(&self, id: u32) -> usize {
        let pos = self.position_of[&id];
        self.sizes[..pos].iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubroutinePhase {
    Building,
    Finalized,
}

/// An ordered sequence of segments that together form one callable native
/// procedure.
#[derive(Debug)]
pub struct Subroutine {
    segments: Vec<Segment>,
    position_of: HashMap<u32, usize>,
    phase: SubroutinePhase,
}

impl Default for Subroutine {
    fn default() -> Self {
        Self::new()
    }
}

impl Subroutine {
    pub fn new() -> Self {
        Subroutine {
            segments: Vec::new(),
            position_of: HashMap::new(),
            phase: SubroutinePhase::Building,
        }
    }

    /// Appends `segment`, recording `id → position`.
    ///
    /// # Panics
    /// Panics if `segment`'s id collides with a previously added segment's,
    /// or if the subroutine has already been finalized. Both are
    /// programming errors per the contract-violation error category.
    pub fn add_segment(&mut self, segment: Segment) {
        assert_eq!(
            self.phase,
            SubroutinePhase::Building,
            "add_segment called on a finalized subroutine"
        );
        let id = segment.id();
        let position = self.segments.len();
        if self.position_of.insert(id, position).is_some() {
            panic!("duplicate segment id {}", id);
        }
        self.segments.push(segment);
    }

    /// Runs the two-pass offset resolution: first every segment commits to
    /// a size (queried against `max_size()` sums), then every segment
    /// commits its relative offset (queried against finalized `size()`
    /// sums). After this, `size()` and `write_code` are callable.
    pub fn finalize(&mut self) -> Result<(), EncodingError> {
        assert_eq!(
            self.phase,
            SubroutinePhase::Building,
            "finalize called more than once"
        );

        let max_sizes: Vec<usize> = self.segments.iter().map(Segment::max_size).collect();
        let pessimistic = SegmentOffsets {
            sizes: &max_sizes,
            position_of: &self.position_of,
        };
        for segment in self.segments.iter_mut() {
            segment.determine_size(&pessimistic)?;
        }

        let sizes: Vec<usize> = self.segments.iter().map(Segment::size).collect();
        let exact = SegmentOffsets {
            sizes: &sizes,
            position_of: &self.position_of,
        };
        for segment in self.segments.iter_mut() {
            segment.determine_offset(&exact);
        }

        self.phase = SubroutinePhase::Finalized;
        Ok(())
    }

    /// The total byte size of the procedure. Callable only after
    /// [`Subroutine::finalize`].
    pub fn size(&self) -> usize {
        assert_eq!(self.phase, SubroutinePhase::Finalized, "size() called before finalize");
        self.segments.iter().map(Segment::size).sum()
    }

    /// Writes every segment's bytes, in layout order, into a freshly
    /// allocated buffer of exactly `size()` bytes.
    pub fn write_code(&self) -> Vec<u8> {
        assert_eq!(
            self.phase,
            SubroutinePhase::Finalized,
            "write_code called before finalize"
        );
        let mut buf = Vec::with_capacity(self.size());
        for segment in &self.segments {
            segment.write_code(&mut buf);
        }
        buf
    }

    /// A concatenation of every segment's assembly-like listing text.
    pub fn debug_string(&self) -> String {
        self.segments.iter().map(Segment::debug_string).collect()
    }
}

impl OffsetInterface for Subroutine {
    fn maximum_distance(&self, a: u32, b: u32) -> usize {
        let sizes: Vec<usize> = self.segments.iter().map(Segment::max_size).collect();
        SegmentOffsets {
            sizes: &sizes,
            position_of: &self.position_of,
        }
        .maximum_distance(a, b)
    }

    fn absolute_offset(&self, id: u32) -> usize {
        let sizes: Vec<usize> = self.segments.iter().map(Segment::size).collect();
        SegmentOffsets {
            sizes: &sizes,
            position_of: &self.position_of,
        }
        .absolute_offset(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_prologue_only_subroutine_finalizes() {
        let mut sub = Subroutine::new();
        sub.add_segment(Segment::no_op(0));
        sub.finalize().unwrap();
        assert_eq!(sub.size(), 0);
        assert_eq!(sub.write_code(), Vec::<u8>::new());
    }

    #[test]
    fn size_is_sum_of_segment_sizes() {
        let mut sub = Subroutine::new();
        sub.add_segment(Segment::stack_prologue(0));
        sub.add_segment(Segment::success(1));
        sub.add_segment(Segment::failure(2));
        sub.finalize().unwrap();
        assert_eq!(sub.size(), 4 + 9 + 4);
        assert_eq!(sub.write_code().len(), sub.size());
    }

    #[test]
    #[should_panic(expected = "duplicate segment id")]
    fn duplicate_segment_id_panics() {
        let mut sub = Subroutine::new();
        sub.add_segment(Segment::no_op(0));
        sub.add_segment(Segment::no_op(0));
    }

    #[test]
    fn forward_and_backward_jumps_resolve() {
        let mut sub = Subroutine::new();
        sub.add_segment(Segment::stack_prologue(0));
        sub.add_segment(Segment::consuming_match_branch(1, b'a', 2));
        sub.add_segment(Segment::success(2));
        sub.add_segment(Segment::failure(3));
        sub.finalize().unwrap();
        let code = sub.write_code();
        assert_eq!(&code[0..4], &[0x55, 0x48, 0x89, 0xe5]);
        assert!(code.contains(&0xae));
    }

    #[test]
    fn idempotent_after_finalize() {
        let mut sub = Subroutine::new();
        sub.add_segment(Segment::stack_prologue(0));
        sub.add_segment(Segment::success(1));
        sub.finalize().unwrap();
        let a = sub.debug_string();
        let b = sub.debug_string();
        assert_eq!(a, b);
        assert_eq!(sub.size(), sub.size());
    }
}
