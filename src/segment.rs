//! The segment model: a closed set of code-fragment variants sharing a
//! uniform four-phase lifecycle (Built → Sized → Placed → Emitted).
//!
//! Mapped here as a tagged sum type (`Segment`) matched over by the four
//! lifecycle methods, per the design notes: the variant set is small and
//! fixed, so a `match` is as idiomatic as a trait object here and avoids
//! threading a `Box<dyn ...>` through the subroutine's hot path.

use std::error::Error;
use std::fmt;

use crate::fsm::Char;

/// A query interface over the positions and sizes of segments in a
/// [`crate::subroutine::Subroutine`], used by branching segments during
/// `determine_size` (queried with `max_size()` sums) and `determine_offset`
/// (queried with finalized `size()` sums).
pub trait OffsetInterface {
    /// An upper bound on the byte distance between the segments with ids
    /// `a` and `b`: the sum of `max_size()` of every segment strictly
    /// between them in layout order. Symmetric in `a` and `b`.
    fn maximum_distance(&self, a: u32, b: u32) -> usize;

    /// The exact byte offset, from the subroutine's entry point, at which
    /// the segment with id `id` begins. Only meaningful once every
    /// segment's size has been committed.
    fn absolute_offset(&self, id: u32) -> usize;
}

/// Capacity error: a required displacement does not fit in a signed 32-bit
/// field. Regular expressions producing code this large are out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingError {
    pub parent_id: u32,
    pub target_id: u32,
    pub distance: usize,
}

impl fmt::Display for EncodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "displacement from segment {} to segment {} ({} bytes) does not fit a signed 32-bit encoding",
            self.parent_id, self.target_id, self.distance
        )
    }
}

impl Error for EncodingError {}

/// The resolved width of a conditional jump's displacement field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetSize {
    Rel8,
    Rel32,
}

impl OffsetSize {
    fn size(self) -> usize {
        match self {
            OffsetSize::Rel8 => 2,
            OffsetSize::Rel32 => 6,
        }
    }
}

/// Which conditional jump a branching segment's jump sub-segment emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JumpMnemonic {
    /// `je`: jump on equal (zero flag set).
    Je,
    /// `jne`: jump on not-equal (zero flag clear).
    Jne,
}

/// The four-phase lifecycle a [`Segment`] (and its embedded jump
/// sub-segment) moves through. Encoded explicitly so contract violations
/// are plain `panic!`s rather than silent no-ops on sentinel fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Built,
    Sized,
    Placed,
}

/// The jump sub-segment: the shared "emit the narrowest conditional jump to
/// a given id" implementation, composed by value into both branching
/// segment variants rather than through inheritance.
#[derive(Debug, Clone)]
struct JumpSegment {
    mnemonic: JumpMnemonic,
    target_id: u32,
    phase: Phase,
    offset_size: Option<OffsetSize>,
    relative_offset: i32,
}

impl JumpSegment {
    fn new(mnemonic: JumpMnemonic, target_id: u32) -> Self {
        JumpSegment {
            mnemonic,
            target_id,
            phase: Phase::Built,
            offset_size: None,
            relative_offset: 0,
        }
    }

    /// Conservative size upper bound: the widest encoding this jump could
    /// ever need.
    fn max_size(&self) -> usize {
        OffsetSize::Rel32.size()
    }

    fn determine_size(
        &mut self,
        offsets: &dyn OffsetInterface,
        parent_id: u32,
        parent_offset_within_outer: usize,
    ) -> Result<(), EncodingError> {
        assert_eq!(self.phase, Phase::Built, "determine_size called out of order");
        let max_distance =
            offsets.maximum_distance(parent_id, self.target_id) + parent_offset_within_outer + self.max_size();
        self.offset_size = Some(if max_distance < 127 {
            OffsetSize::Rel8
        } else if max_distance < i32::MAX as usize {
            OffsetSize::Rel32
        } else {
            return Err(EncodingError {
                parent_id,
                target_id: self.target_id,
                distance: max_distance,
            });
        });
        self.phase = Phase::Sized;
        Ok(())
    }

    fn size(&self) -> usize {
        assert!(self.phase >= Phase::Sized, "size() called before determine_size");
        self.offset_size.expect("size committed").size()
    }

    fn determine_offset(
        &mut self,
        offsets: &dyn OffsetInterface,
        parent_id: u32,
        parent_offset_within_outer: usize,
    ) {
        assert_eq!(self.phase, Phase::Sized, "determine_offset called out of order");
        let jmp_source = offsets.absolute_offset(parent_id) + parent_offset_within_outer + self.size();
        let target = offsets.absolute_offset(self.target_id);
        self.relative_offset = (target as i64 - jmp_source as i64) as i32;
        self.phase = Phase::Placed;
    }

    fn write_code(&self, buf: &mut Vec<u8>) {
        assert_eq!(self.phase, Phase::Placed, "write_code called before determine_offset");
        let opcode_rel8: u8 = match self.mnemonic {
            JumpMnemonic::Je => 0x74,
            JumpMnemonic::Jne => 0x75,
        };
        match self.offset_size.expect("size committed") {
            OffsetSize::Rel8 => {
                buf.push(opcode_rel8);
                buf.push(self.relative_offset as i8 as u8);
            }
            OffsetSize::Rel32 => {
                let opcode: [u8; 2] = match self.mnemonic {
                    JumpMnemonic::Je => [0x0f, 0x84],
                    JumpMnemonic::Jne => [0x0f, 0x85],
                };
                buf.extend_from_slice(&opcode);
                buf.extend_from_slice(&self.relative_offset.to_le_bytes());
            }
        }
    }

    fn mnemonic_str(&self) -> &'static str {
        match self.mnemonic {
            JumpMnemonic::Je => "je",
            JumpMnemonic::Jne => "jne",
        }
    }
}

/// Shared state for the two branching-segment variants: a 3-byte preamble
/// (`mov $letter, %al; scasb`), a delegated jump sub-segment, and an
/// optional 3-byte conclusion (`dec %rdi`).
#[derive(Debug, Clone)]
struct BranchSegment {
    id: u32,
    letter: Char,
    jump: JumpSegment,
    /// `ConsumingMatchBranch` undoes the `scasb` advance on the fall-through
    /// path; `ConsumingElseBranch` does not.
    has_conclusion: bool,
    phase: Phase,
    size: usize,
}

const PREAMBLE_LEN: usize = 3;
const CONCLUSION_LEN: usize = 3;

impl BranchSegment {
    fn new(id: u32, letter: Char, mnemonic: JumpMnemonic, target_id: u32, has_conclusion: bool) -> Self {
        BranchSegment {
            id,
            letter,
            jump: JumpSegment::new(mnemonic, target_id),
            has_conclusion,
            phase: Phase::Built,
            size: 0,
        }
    }

    fn max_size(&self) -> usize {
        PREAMBLE_LEN + self.jump.max_size() + if self.has_conclusion { CONCLUSION_LEN } else { 0 }
    }

    fn determine_size(&mut self, offsets: &dyn OffsetInterface) -> Result<(), EncodingError> {
        assert_eq!(self.phase, Phase::Built, "determine_size called out of order");
        self.jump.determine_size(offsets, self.id, PREAMBLE_LEN)?;
        self.size = PREAMBLE_LEN + self.jump.size() + if self.has_conclusion { CONCLUSION_LEN } else { 0 };
        self.phase = Phase::Sized;
        Ok(())
    }

    fn size(&self) -> usize {
        assert!(self.phase >= Phase::Sized, "size() called before determine_size");
        self.size
    }

    fn determine_offset(&mut self, offsets: &dyn OffsetInterface) {
        assert_eq!(self.phase, Phase::Sized, "determine_offset called out of order");
        self.jump.determine_offset(offsets, self.id, PREAMBLE_LEN);
        self.phase = Phase::Placed;
    }

    fn write_code(&self, buf: &mut Vec<u8>) {
        assert_eq!(self.phase, Phase::Placed, "write_code called before determine_offset");
        buf.push(0xb0);
        buf.push(self.letter);
        buf.push(0xae);
        self.jump.write_code(buf);
        if self.has_conclusion {
            buf.extend_from_slice(&[0x48, 0xff, 0xcf]);
        }
    }

    fn debug_string(&self) -> String {
        let mut s = format!(
            ".section_{}:\n  mov ${:#04x}, %al\n  scasb\n  {} .section_{} ; disp={:#x}\n",
            self.id, self.letter, self.jump.mnemonic_str(), self.jump.target_id, self.jump.relative_offset
        );
        if self.has_conclusion {
            s.push_str("  dec %rdi\n");
        }
        s
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        fn rank(p: &Phase) -> u8 {
            match p {
                Phase::Built => 0,
                Phase::Sized => 1,
                Phase::Placed => 2,
            }
        }
        rank(self).partial_cmp(&rank(other))
    }
}

/// A fixed byte sequence with no displacement to resolve: `size() ==
/// max_size()` always, and `determine_size`/`determine_offset` are no-ops.
#[derive(Debug, Clone, Copy)]
struct StaticSegment {
    id: u32,
    bytes: &'static [u8],
}

/// A polymorphic unit of emitted code, identified by a stable `id`.
///
/// Matched over rather than dispatched through a trait object, per the
/// design notes: the variant set is closed and small.
#[derive(Debug, Clone)]
pub enum Segment {
    /// Zero bytes. Exists solely so a state has a stable id for jumps.
    NoOp { id: u32 },
    /// `push %rbp; mov %rsp, %rbp`.
    StackPrologue(StaticSegment),
    /// `mov $1, %rax; pop %rbp; retq`.
    Success(StaticSegment),
    /// `xor %eax, %eax; pop %rbp; retq`.
    Failure(StaticSegment),
    /// Match → jump to `match_target_id`; mismatch → fall through, undoing
    /// the `scasb` consumption.
    ConsumingMatchBranch(BranchSegment),
    /// Match → fall through (character consumed); mismatch → jump to
    /// `else_target_id`.
    ConsumingElseBranch(BranchSegment),
}

const PROLOGUE_BYTES: &[u8] = &[0x55, 0x48, 0x89, 0xe5];
const SUCCESS_BYTES: &[u8] = &[0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, 0x5d, 0xc3];
const FAILURE_BYTES: &[u8] = &[0x31, 0xc0, 0x5d, 0xc3];

impl Segment {
    pub fn no_op(id: u32) -> Self {
        Segment::NoOp { id }
    }

    pub fn stack_prologue(id: u32) -> Self {
        Segment::StackPrologue(StaticSegment { id, bytes: PROLOGUE_BYTES })
    }

    pub fn success(id: u32) -> Self {
        Segment::Success(StaticSegment { id, bytes: SUCCESS_BYTES })
    }

    pub fn failure(id: u32) -> Self {
        Segment::Failure(StaticSegment { id, bytes: FAILURE_BYTES })
    }

    pub fn consuming_match_branch(id: u32, letter: Char, match_target_id: u32) -> Self {
        Segment::ConsumingMatchBranch(BranchSegment::new(id, letter, JumpMnemonic::Je, match_target_id, true))
    }

    pub fn consuming_else_branch(id: u32, letter: Char, else_target_id: u32) -> Self {
        Segment::ConsumingElseBranch(BranchSegment::new(id, letter, JumpMnemonic::Jne, else_target_id, false))
    }

    pub fn id(&self) -> u32 {
        match self {
            Segment::NoOp { id } => *id,
            Segment::StackPrologue(s) | Segment::Success(s) | Segment::Failure(s) => s.id,
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.id,
        }
    }

    /// An upper bound on this segment's emitted size, valid in any phase.
    pub fn max_size(&self) -> usize {
        match self {
            Segment::NoOp { .. } => 0,
            Segment::StackPrologue(s) | Segment::Success(s) | Segment::Failure(s) => s.bytes.len(),
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.max_size(),
        }
    }

    pub(crate) fn determine_size(&mut self, offsets: &dyn OffsetInterface) -> Result<(), EncodingError> {
        match self {
            Segment::NoOp { .. } | Segment::StackPrologue(_) | Segment::Success(_) | Segment::Failure(_) => Ok(()),
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.determine_size(offsets),
        }
    }

    /// This segment's committed size. Callable only after `determine_size`.
    pub fn size(&self) -> usize {
        match self {
            Segment::NoOp { .. } => 0,
            Segment::StackPrologue(s) | Segment::Success(s) | Segment::Failure(s) => s.bytes.len(),
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.size(),
        }
    }

    pub(crate) fn determine_offset(&mut self, offsets: &dyn OffsetInterface) {
        match self {
            Segment::NoOp { .. } | Segment::StackPrologue(_) | Segment::Success(_) | Segment::Failure(_) => {}
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.determine_offset(offsets),
        }
    }

    /// Writes this segment's bytes to `buf`, advancing it by exactly
    /// `size()` bytes. Callable only after `determine_offset`.
    pub fn write_code(&self, buf: &mut Vec<u8>) {
        match self {
            Segment::NoOp { .. } => {}
            Segment::StackPrologue(s) | Segment::Success(s) | Segment::Failure(s) => {
                buf.extend_from_slice(s.bytes);
            }
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.write_code(buf),
        }
    }

    /// An AT&T-syntax listing for this segment, suitable for diffing
    /// against an external assembler's output of the same text.
    pub fn debug_string(&self) -> String {
        match self {
            Segment::NoOp { id } => format!(".section_{}:\n  ; no-op\n", id),
            Segment::StackPrologue(s) => format!(".section_{}:\n  push %rbp\n  mov %rsp, %rbp\n", s.id),
            Segment::Success(s) => format!(".section_{}:\n  mov $1, %rax\n  pop %rbp\n  retq\n", s.id),
            Segment::Failure(s) => format!(".section_{}:\n  xor %eax, %eax\n  pop %rbp\n  retq\n", s.id),
            Segment::ConsumingMatchBranch(b) | Segment::ConsumingElseBranch(b) => b.debug_string(),
        }
    }
}
