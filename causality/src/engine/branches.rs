use super::Error;
use crate::Seq;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error as CodecError, FixedSize, Read, ReadExt, Write};

/// Global bookkeeping of validator branches.
///
/// Branch `i < validators` is the initial branch of validator `i`. Additional branches are
/// allocated whenever a validator produces an event that does not extend an existing branch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branches {
    /// Highest sequence assigned on each branch.
    last_seq: Vec<Seq>,

    /// Creator (dense validator index) of each branch.
    creators: Vec<usize>,

    /// Branches of each creator (the first is always the initial branch).
    by_creator: Vec<Vec<usize>>,
}

impl Branches {
    /// Create bookkeeping for `validators` validators, each with a single empty branch.
    pub fn new(validators: usize) -> Self {
        Self {
            last_seq: vec![0; validators],
            creators: (0..validators).collect(),
            by_creator: (0..validators).map(|idx| vec![idx]).collect(),
        }
    }

    /// Returns the number of branches.
    pub fn len(&self) -> usize {
        self.creators.len()
    }

    /// Returns `true` if there are no branches.
    pub fn is_empty(&self) -> bool {
        self.creators.is_empty()
    }

    /// Returns the number of validators tracked.
    pub fn validators(&self) -> usize {
        self.by_creator.len()
    }

    /// Returns the creator of every branch (indexed by branch).
    pub fn creators(&self) -> &[usize] {
        &self.creators
    }

    /// Returns the creator of `branch`.
    pub fn creator(&self, branch: usize) -> Option<usize> {
        self.creators.get(branch).copied()
    }

    /// Returns the branches of every creator (indexed by creator).
    pub fn by_creator(&self) -> &[Vec<usize>] {
        &self.by_creator
    }

    /// Returns the branches of `creator`.
    pub fn of(&self, creator: usize) -> &[usize] {
        self.by_creator
            .get(creator)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the highest sequence assigned on `branch`.
    pub fn last_seq(&self, branch: usize) -> Seq {
        self.last_seq.get(branch).copied().unwrap_or_default()
    }

    /// Returns `true` if any validator has more than one branch.
    pub fn at_least_one_fork(&self) -> bool {
        self.creators.len() > self.by_creator.len()
    }

    /// Assign an event of `creator` at `seq` to a branch.
    ///
    /// `self_parent` is the branch of the self-parent (if any). A new branch is allocated if the
    /// event does not extend the tip of its self-parent's branch (or if the creator's initial
    /// branch was already started by another first event).
    pub(super) fn assign(
        &mut self,
        creator: usize,
        self_parent: Option<usize>,
        seq: Seq,
    ) -> Result<usize, Error> {
        if creator >= self.by_creator.len() {
            return Err(Error::InconsistentBranches("creator out of range"));
        }
        match self_parent {
            None => {
                if seq != 1 {
                    return Err(Error::InvalidFirstEvent(seq));
                }
                if self.last_seq[creator] == 0 {
                    self.last_seq[creator] = seq;
                    return Ok(creator);
                }
            }
            Some(branch) => {
                if branch >= self.last_seq.len() {
                    return Err(Error::InconsistentBranches("branch out of range"));
                }
                if self.last_seq[branch].checked_add(1) == Some(seq) {
                    self.last_seq[branch] = seq;
                    return Ok(branch);
                }
            }
        }

        // The creator forked: allocate a new branch
        let branch = self.creators.len();
        self.last_seq.push(seq);
        self.creators.push(creator);
        self.by_creator[creator].push(branch);
        Ok(branch)
    }
}

impl Write for Branches {
    fn write(&self, buf: &mut impl BufMut) {
        (self.validators() as u32).write(buf);
        (self.len() as u32).write(buf);
        for (seq, creator) in self.last_seq.iter().zip(self.creators.iter()) {
            seq.write(buf);
            (*creator as u32).write(buf);
        }
    }
}

impl EncodeSize for Branches {
    fn encode_size(&self) -> usize {
        u32::SIZE * 2 + self.len() * u32::SIZE * 2
    }
}

impl Read for Branches {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, CodecError> {
        let validators = u32::read(buf)? as usize;
        let len = u32::read(buf)? as usize;
        if len < validators {
            return Err(CodecError::Invalid("Branches", "fewer branches than validators"));
        }
        if buf.remaining() < len * u32::SIZE * 2 {
            return Err(CodecError::EndOfBuffer);
        }

        let mut branches = Self::new(validators);
        for branch in 0..len {
            let seq = Seq::read(buf)?;
            let creator = u32::read(buf)? as usize;
            if branch < validators {
                // Initial branches are owned by the validator with the same index
                if creator != branch {
                    return Err(CodecError::Invalid("Branches", "initial branch creator"));
                }
                branches.last_seq[branch] = seq;
                continue;
            }
            if creator >= validators {
                return Err(CodecError::Invalid("Branches", "creator out of range"));
            }
            branches.last_seq.push(seq);
            branches.creators.push(creator);
            branches.by_creator[creator].push(branch);
        }
        Ok(branches)
    }
}
