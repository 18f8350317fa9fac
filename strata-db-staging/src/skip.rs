//! Arena-backed skip list with back links.
//!
//! Nodes live in a `Vec` and refer to each other by index; index 0 is the
//! head sentinel. Level-0 links are doubly linked so cursors can walk in both
//! directions. Removal is never needed: deletes are staged as tombstones.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use strata_db_core::{Tuple, TupleDesc};

pub(crate) const NIL: u32 = u32::MAX;
const HEAD: u32 = 0;
const MAX_HEIGHT: usize = 16;

struct SkipNode {
    key: Tuple,
    /// `None` is a tombstone.
    value: Option<Tuple>,
    next: Vec<u32>,
    prev: u32,
}

pub(crate) struct SkipList {
    nodes: Vec<SkipNode>,
    height: usize,
    rng: SmallRng,
}

impl SkipList {
    pub(crate) fn new(seed: u64) -> Self {
        let head = SkipNode {
            key: Tuple::empty(),
            value: None,
            next: vec![NIL; MAX_HEIGHT],
            prev: NIL,
        };
        Self {
            nodes: vec![head],
            height: 1,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Physical entries, tombstones included.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub(crate) fn clear(&mut self) {
        self.nodes.truncate(1);
        self.nodes[0].next.iter_mut().for_each(|n| *n = NIL);
        self.height = 1;
    }

    pub(crate) fn key(&self, i: u32) -> &Tuple {
        &self.nodes[i as usize].key
    }

    pub(crate) fn value(&self, i: u32) -> Option<&Tuple> {
        self.nodes[i as usize].value.as_ref()
    }

    pub(crate) fn next(&self, i: u32) -> u32 {
        self.nodes[i as usize].next[0]
    }

    pub(crate) fn prev(&self, i: u32) -> u32 {
        match self.nodes[i as usize].prev {
            HEAD => NIL,
            p => p,
        }
    }

    pub(crate) fn first(&self) -> u32 {
        self.nodes[HEAD as usize].next[0]
    }

    pub(crate) fn last(&self) -> u32 {
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            while self.nodes[x as usize].next[level] != NIL {
                x = self.nodes[x as usize].next[level];
            }
        }
        if x == HEAD {
            NIL
        } else {
            x
        }
    }

    /// Last node whose key satisfies `before`, where `before` holds for a
    /// prefix of the ordered keys. Returns the head when none do.
    fn last_where(&self, before: impl Fn(&Tuple) -> bool) -> (u32, [u32; MAX_HEIGHT]) {
        let mut update = [HEAD; MAX_HEIGHT];
        let mut x = HEAD;
        for level in (0..self.height).rev() {
            loop {
                let n = self.nodes[x as usize].next[level];
                if n != NIL && before(&self.nodes[n as usize].key) {
                    x = n;
                } else {
                    break;
                }
            }
            update[level] = x;
        }
        (x, update)
    }

    /// First node with key `>= key` (or `> key` when `strict`).
    pub(crate) fn seek_ge(&self, desc: &TupleDesc, key: &Tuple, strict: bool) -> u32 {
        let (x, _) = self.last_where(|k| match desc.compare(k, key) {
            Ordering::Less => true,
            Ordering::Equal => strict,
            Ordering::Greater => false,
        });
        self.nodes[x as usize].next[0]
    }

    /// Last node with key `<= key` (or `< key` when `strict`).
    pub(crate) fn seek_le(&self, desc: &TupleDesc, key: &Tuple, strict: bool) -> u32 {
        let (x, _) = self.last_where(|k| match desc.compare(k, key) {
            Ordering::Less => true,
            Ordering::Equal => !strict,
            Ordering::Greater => false,
        });
        if x == HEAD {
            NIL
        } else {
            x
        }
    }

    pub(crate) fn find(&self, desc: &TupleDesc, key: &Tuple) -> Option<u32> {
        let i = self.seek_ge(desc, key, false);
        (i != NIL && desc.compare(self.key(i), key) == Ordering::Equal).then_some(i)
    }

    /// Replace the value of an existing node.
    pub(crate) fn set(&mut self, i: u32, value: Option<Tuple>) -> Option<Tuple> {
        std::mem::replace(&mut self.nodes[i as usize].value, value)
    }

    /// Insert a key known to be absent.
    pub(crate) fn insert(&mut self, desc: &TupleDesc, key: Tuple, value: Option<Tuple>) -> u32 {
        // levels above the current height already point at the head
        let (pred, update) = self.last_where(|k| desc.compare(k, &key) == Ordering::Less);
        let height = self.random_height();
        self.height = self.height.max(height);
        let idx = self.nodes.len() as u32;
        let mut next = vec![NIL; height];
        for (level, n) in next.iter_mut().enumerate() {
            let u = update[level] as usize;
            *n = self.nodes[u].next[level];
            self.nodes[u].next[level] = idx;
        }
        let succ = next[0];
        self.nodes.push(SkipNode {
            key,
            value,
            next,
            prev: pred,
        });
        if succ != NIL {
            self.nodes[succ as usize].prev = idx;
        }
        idx
    }

    fn random_height(&mut self) -> usize {
        let mut h = 1;
        while h < MAX_HEIGHT && self.rng.gen_range(0..4) == 0 {
            h += 1;
        }
        h
    }
}
