use crate::{
    engine::{HighestBefore, LowestAfter},
    Seq,
};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};

/// Sentinel `min_seq` marking a branch whose creator was caught forking.
const FORK_DETECTED: Seq = i32::MAX as Seq;

/// The range of sequences observed on a single branch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BranchSeq {
    /// Highest sequence observed.
    pub seq: Seq,

    /// Lowest sequence observed.
    pub min_seq: Seq,
}

impl BranchSeq {
    /// Marker of a branch whose creator was caught forking.
    pub const FORKED: Self = Self {
        seq: 0,
        min_seq: FORK_DETECTED,
    };

    /// Returns `true` if nothing was observed on the branch.
    pub fn is_empty(&self) -> bool {
        self.seq == 0 && self.min_seq == 0
    }

    /// Returns `true` if the creator of the branch was caught forking.
    pub fn is_fork_detected(&self) -> bool {
        self.seq == 0 && self.min_seq == FORK_DETECTED
    }
}

impl Write for BranchSeq {
    fn write(&self, buf: &mut impl BufMut) {
        self.seq.write(buf);
        self.min_seq.write(buf);
    }
}

impl Read for BranchSeq {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let seq = Seq::read(buf)?;
        let min_seq = Seq::read(buf)?;
        Ok(Self { seq, min_seq })
    }
}

impl FixedSize for BranchSeq {
    const SIZE: usize = Seq::SIZE * 2;
}

/// Read every remaining fixed-size entry of `buf`.
fn read_all<T: Read<Cfg = ()> + FixedSize>(
    buf: &mut impl Buf,
    name: &'static str,
) -> Result<Vec<T>, Error> {
    if buf.remaining() % T::SIZE != 0 {
        return Err(Error::Invalid(name, "length not a multiple of entry size"));
    }
    let mut entries = Vec::with_capacity(buf.remaining() / T::SIZE);
    while buf.has_remaining() {
        entries.push(T::read(buf)?);
    }
    Ok(entries)
}

/// The [BranchSeq] observed in the causal past of an event, per branch.
///
/// Encoded as a sequence of fixed-width entries without a length prefix (a stored vector always
/// spans the whole value). Slots beyond the stored length read as empty.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HighestBeforeSeq(Vec<BranchSeq>);

impl HighestBeforeSeq {
    /// Create a vector of `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self(vec![BranchSeq::default(); size])
    }

    /// Returns the slot of `branch`.
    pub fn get(&self, branch: usize) -> BranchSeq {
        self.0.get(branch).copied().unwrap_or_default()
    }

    /// Set the slot of `branch`, growing the vector if needed.
    pub fn set(&mut self, branch: usize, value: BranchSeq) {
        if branch >= self.0.len() {
            self.0.resize(branch + 1, BranchSeq::default());
        }
        self.0[branch] = value;
    }

    /// Returns all slots.
    pub fn as_slice(&self) -> &[BranchSeq] {
        &self.0
    }
}

impl HighestBefore for HighestBeforeSeq {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn is_unobserved(&self, branch: usize) -> bool {
        let slot = self.get(branch);
        slot.seq == 0 && !slot.is_fork_detected()
    }

    fn is_fork_detected(&self, branch: usize) -> bool {
        self.get(branch).is_fork_detected()
    }

    fn seq(&self, branch: usize) -> Seq {
        self.get(branch).seq
    }

    fn min_seq(&self, branch: usize) -> Seq {
        self.get(branch).min_seq
    }

    fn set_fork_detected(&mut self, branch: usize) {
        self.set(branch, BranchSeq::FORKED);
    }

    fn init_with_event(&mut self, branch: usize, seq: Seq) {
        self.set(branch, BranchSeq { seq, min_seq: seq });
    }

    fn collect_from(&mut self, other: &Self, size: usize) {
        for branch in 0..size {
            let theirs = other.get(branch);
            if theirs.seq == 0 && !theirs.is_fork_detected() {
                continue;
            }
            let mut mine = self.get(branch);
            if mine.is_fork_detected() {
                continue;
            }
            if theirs.is_fork_detected() {
                self.set_fork_detected(branch);
                continue;
            }
            if mine.seq == 0 || mine.min_seq > theirs.min_seq {
                mine.min_seq = theirs.min_seq;
            }
            if mine.seq < theirs.seq {
                mine.seq = theirs.seq;
            }
            self.set(branch, mine);
        }
    }

    fn gather_from(&mut self, to: usize, other: &Self, from: &[usize]) {
        let mut highest = BranchSeq::default();
        for branch in from {
            let slot = other.get(*branch);
            if slot.is_fork_detected() {
                highest = slot;
                break;
            }
            if slot.seq > highest.seq {
                highest = slot;
            }
        }
        self.set(to, highest);
    }
}

impl Write for HighestBeforeSeq {
    fn write(&self, buf: &mut impl BufMut) {
        for slot in &self.0 {
            slot.write(buf);
        }
    }
}

impl EncodeSize for HighestBeforeSeq {
    fn encode_size(&self) -> usize {
        self.0.len() * BranchSeq::SIZE
    }
}

impl Read for HighestBeforeSeq {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(read_all(buf, "HighestBeforeSeq")?))
    }
}

/// The lowest sequence (per branch) of an event observing a given event.
///
/// `0` means the branch has not observed the event (yet).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LowestAfterSeq(Vec<Seq>);

impl LowestAfterSeq {
    /// Create a vector of `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self(vec![0; size])
    }

    /// Returns the slot of `branch`.
    pub fn get(&self, branch: usize) -> Seq {
        self.0.get(branch).copied().unwrap_or_default()
    }

    /// Set the slot of `branch`, growing the vector if needed.
    pub fn set(&mut self, branch: usize, seq: Seq) {
        if branch >= self.0.len() {
            self.0.resize(branch + 1, 0);
        }
        self.0[branch] = seq;
    }

    /// Returns the number of slots held.
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Returns all slots.
    pub fn as_slice(&self) -> &[Seq] {
        &self.0
    }
}

impl LowestAfter for LowestAfterSeq {
    fn seq(&self, branch: usize) -> Seq {
        self.get(branch)
    }

    fn init_with_event(&mut self, branch: usize, seq: Seq) {
        self.set(branch, seq);
    }

    fn visit(&mut self, branch: usize, seq: Seq) -> bool {
        if self.get(branch) != 0 {
            return false;
        }
        self.set(branch, seq);
        true
    }
}

impl Write for LowestAfterSeq {
    fn write(&self, buf: &mut impl BufMut) {
        for seq in &self.0 {
            seq.write(buf);
        }
    }
}

impl EncodeSize for LowestAfterSeq {
    fn encode_size(&self) -> usize {
        self.0.len() * Seq::SIZE
    }
}

impl Read for LowestAfterSeq {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        Ok(Self(read_all(buf, "LowestAfterSeq")?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::{DecodeExt, Encode};

    fn slot(seq: Seq, min_seq: Seq) -> BranchSeq {
        BranchSeq { seq, min_seq }
    }

    #[test]
    fn test_branch_seq_markers() {
        assert!(BranchSeq::default().is_empty());
        assert!(!BranchSeq::default().is_fork_detected());
        assert!(BranchSeq::FORKED.is_fork_detected());
        assert!(!BranchSeq::FORKED.is_empty());
        assert!(!slot(3, 1).is_empty());
    }

    #[test]
    fn test_out_of_range() {
        let mut vector = HighestBeforeSeq::new(2);
        assert_eq!(vector.get(10), BranchSeq::default());
        assert!(vector.is_unobserved(10));

        vector.set(4, slot(2, 1));
        assert_eq!(vector.size(), 5);
        assert_eq!(vector.seq(4), 2);
        assert!(vector.is_unobserved(3));

        let mut vector = LowestAfterSeq::new(1);
        assert_eq!(vector.get(7), 0);
        assert!(vector.visit(7, 4));
        assert_eq!(vector.size(), 8);
        assert_eq!(vector.seq(7), 4);
    }

    #[test]
    fn test_collect_from() {
        let mut mine = HighestBeforeSeq::new(4);
        mine.init_with_event(0, 5);
        mine.set(1, slot(3, 2));
        mine.set(2, BranchSeq::FORKED);

        let mut theirs = HighestBeforeSeq::new(4);
        theirs.set(0, slot(4, 1));
        theirs.set(1, slot(6, 1));
        theirs.set(2, slot(9, 9));
        theirs.set(3, BranchSeq::FORKED);

        mine.collect_from(&theirs, 4);
        assert_eq!(mine.get(0), slot(5, 1));
        assert_eq!(mine.get(1), slot(6, 1));

        // A fork flag is never cleared and always adopted
        assert!(mine.is_fork_detected(2));
        assert!(mine.is_fork_detected(3));
    }

    #[test]
    fn test_collect_from_bounded() {
        let mut mine = HighestBeforeSeq::new(1);
        let mut theirs = HighestBeforeSeq::new(3);
        theirs.set(0, slot(1, 1));
        theirs.set(2, slot(2, 2));

        mine.collect_from(&theirs, 2);
        assert_eq!(mine.get(0), slot(1, 1));
        assert!(mine.is_unobserved(2));
    }

    #[test]
    fn test_gather_from() {
        let mut scattered = HighestBeforeSeq::new(4);
        scattered.set(0, slot(3, 1));
        scattered.set(2, slot(5, 4));
        scattered.set(1, slot(2, 1));
        scattered.set(3, BranchSeq::FORKED);

        let mut merged = HighestBeforeSeq::new(2);
        merged.gather_from(0, &scattered, &[0, 2]);
        merged.gather_from(1, &scattered, &[1, 3]);
        assert_eq!(merged.get(0), slot(5, 4));
        assert!(merged.is_fork_detected(1));
        assert_eq!(merged.seq(1), 0);
    }

    #[test]
    fn test_visit() {
        let mut vector = LowestAfterSeq::new(3);
        vector.init_with_event(1, 4);
        assert!(!vector.visit(1, 7));
        assert_eq!(vector.seq(1), 4);
        assert!(vector.visit(0, 2));
        assert!(!vector.visit(0, 1));
        assert_eq!(vector.as_slice(), &[2, 4, 0]);
    }

    #[test]
    fn test_codec() {
        let mut vector = HighestBeforeSeq::new(3);
        vector.set(0, slot(7, 2));
        vector.set(2, BranchSeq::FORKED);
        let encoded = vector.encode();
        assert_eq!(encoded.len(), 3 * BranchSeq::SIZE);
        assert_eq!(HighestBeforeSeq::decode(encoded).unwrap(), vector);

        let mut vector = LowestAfterSeq::new(2);
        vector.set(1, 9);
        let encoded = vector.encode();
        assert_eq!(encoded.len(), 2 * Seq::SIZE);
        assert_eq!(LowestAfterSeq::decode(encoded).unwrap(), vector);
    }

    #[test]
    fn test_codec_invalid() {
        assert!(matches!(
            HighestBeforeSeq::decode(&[0u8; 12][..]),
            Err(Error::Invalid("HighestBeforeSeq", _))
        ));
        assert!(matches!(
            LowestAfterSeq::decode(&[0u8; 5][..]),
            Err(Error::Invalid("LowestAfterSeq", _))
        ));
        assert!(HighestBeforeSeq::decode(&[][..]).unwrap().as_slice().is_empty());
    }
}
