use crate::{Event, Seq, Source};
use commonware_cryptography::sha256::{self, Digest};
use rand::Rng;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// An event identified by the hash of its name, created by a validator identified by an integer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestEvent {
    name: String,
    id: Digest,
    creator: u32,
    seq: Seq,
    parents: Vec<Digest>,
    timestamp: u64,
}

impl TestEvent {
    /// Returns the name of the event.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Event for TestEvent {
    type Digest = Digest;
    type PublicKey = u32;

    fn id(&self) -> Digest {
        self.id
    }

    fn creator(&self) -> &u32 {
        &self.creator
    }

    fn seq(&self) -> Seq {
        self.seq
    }

    fn parents(&self) -> &[Digest] {
        &self.parents
    }

    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// An in-memory DAG of [TestEvent]s.
///
/// Clones share the same events.
#[derive(Clone, Default)]
pub struct Dag {
    events: Arc<RwLock<HashMap<Digest, TestEvent>>>,
}

impl Dag {
    /// Returns the identity of the event named `name`.
    pub fn digest(name: &str) -> Digest {
        sha256::hash(name.as_bytes())
    }

    /// Returns the number of events created.
    pub fn len(&self) -> usize {
        self.events.read().unwrap().len()
    }

    /// Returns `true` if no events were created.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the event named `name`, if created.
    pub fn get(&self, name: &str) -> Option<TestEvent> {
        self.events.read().unwrap().get(&Self::digest(name)).cloned()
    }

    /// Create an event of `creator` referencing `parents` (by name).
    ///
    /// If the first parent was created by `creator`, it is the self-parent and the new event
    /// follows it. Otherwise, the new event is the first (sequence `1`) of a chain.
    pub fn create(&self, name: &str, creator: u32, parents: &[&str]) -> TestEvent {
        let seq = parents
            .first()
            .and_then(|parent| self.get(parent))
            .filter(|parent| parent.creator == creator)
            .map_or(1, |parent| parent.seq + 1);
        self.create_with_seq(name, creator, seq, parents)
    }

    /// Create an event with an explicit sequence number.
    pub fn create_with_seq(
        &self,
        name: &str,
        creator: u32,
        seq: Seq,
        parents: &[&str],
    ) -> TestEvent {
        let mut events = self.events.write().unwrap();
        let event = TestEvent {
            name: name.to_string(),
            id: Self::digest(name),
            creator,
            seq,
            parents: parents.iter().map(|parent| Self::digest(parent)).collect(),
            timestamp: events.len() as u64 + 1,
        };
        events.insert(event.id, event.clone());
        event
    }

    /// Create `count` random events (in causal order) by `creators` validators.
    ///
    /// Validators with an index below `cheaters` occasionally fork by building upon an older event
    /// of their own (or by starting a new chain).
    pub fn random(
        &self,
        rng: &mut impl Rng,
        creators: u32,
        count: usize,
        cheaters: u32,
    ) -> Vec<TestEvent> {
        let mut created: Vec<TestEvent> = Vec::with_capacity(count);
        let mut by_creator: Vec<Vec<usize>> = vec![Vec::new(); creators as usize];
        for _ in 0..count {
            let creator = rng.gen_range(0..creators);
            let own = &by_creator[creator as usize];
            let self_parent = if own.is_empty() {
                None
            } else if creator < cheaters && rng.gen_bool(0.2) {
                own.get(rng.gen_range(0..=own.len())).copied()
            } else {
                own.last().copied()
            };

            let mut parents = Vec::new();
            if let Some(self_parent) = self_parent {
                parents.push(created[self_parent].name.clone());
            }
            for _ in 0..rng.gen_range(0..=2) {
                if created.is_empty() {
                    break;
                }
                let other = &created[rng.gen_range(0..created.len())];
                if other.creator != creator && !parents.contains(&other.name) {
                    parents.push(other.name.clone());
                }
            }

            let name = format!("random-{}", self.len());
            let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
            let event = self.create(&name, creator, &parents);
            by_creator[creator as usize].push(created.len());
            created.push(event);
        }
        created
    }
}

impl Source for Dag {
    type Event = TestEvent;

    fn has_event(&self, id: &Digest) -> bool {
        self.events.read().unwrap().contains_key(id)
    }

    fn get_event(&self, id: &Digest) -> Option<TestEvent> {
        self.events.read().unwrap().get(id).cloned()
    }
}
