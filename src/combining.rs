//! A software combining tree barrier, as described in "3.3 Software Combining Tree Barriers" in
//! Mellor-Crummey and Scott's paper [Algorithms for scalable synchronization on shared-memory
//! multiprocessors][1].
//!
//! Unlike the centralized barrier, threads don't all hit one shared counter: they're organized
//! into groups, and groups are organized into a tree by level-order insertion. A group's last
//! arrival "represents" that group one level up, so contention at any single node is bounded by
//! the tree's fan-out rather than by the total thread count. The tree is built once, under a
//! spinlock, before any thread calls [`CombiningBarrier::wait`]; the wait path itself never
//! touches the lock.
//!
//! [1]: https://dl.acm.org/citation.cfm?doid=103727.103729

use std::sync::{atomic, Arc};

use crate::spin::{Stall, TestAndSetLock};
use crate::ThreadBarrier;

const NONE: usize = usize::MAX;

struct Node {
    k: atomic::AtomicUsize,
    count: atomic::AtomicUsize,
    sense: atomic::AtomicBool,
    parent: atomic::AtomicUsize,
    lchild: atomic::AtomicUsize,
    rchild: atomic::AtomicUsize,
}

impl Node {
    fn empty() -> Self {
        Node {
            k: atomic::AtomicUsize::new(0),
            count: atomic::AtomicUsize::new(0),
            sense: atomic::AtomicBool::new(false),
            parent: atomic::AtomicUsize::new(NONE),
            lchild: atomic::AtomicUsize::new(NONE),
            rchild: atomic::AtomicUsize::new(NONE),
        }
    }
}

/// The shared tree that every [`CombiningBarrier`] group attaches to.
///
/// Allocated once, up front, with room for the seed group (node 0, the eventual root of the
/// tree) plus `max_groups` groups registered on top of it. Registering more than `max_groups`
/// groups is a misuse caught only by a debug assertion, per the crate's no-hot-path-checks
/// policy.
pub struct Root {
    nodes: Box<[Node]>,
    // Guards tree construction (the BFS insertion in `register_group`) and doubles as the
    // "next free slot" counter; the wait path never takes this lock.
    next_free: TestAndSetLock<usize>,
}

impl Root {
    /// Create a new, empty combining tree that can hold up to `max_groups` registered groups.
    ///
    /// The seed group (node 0, the eventual root of the tree) is allocated immediately with
    /// `k = 0`; every subsequent [`register_group`](Self::register_group) attaches a new leaf
    /// somewhere under it.
    pub fn new(max_groups: usize) -> Arc<Self> {
        debug_assert!(max_groups > 0, "a combining tree needs room for at least one group");
        let nodes: Box<[Node]> = (0..max_groups + 1).map(|_| Node::empty()).collect();
        Arc::new(Root {
            nodes,
            next_free: TestAndSetLock::new(1),
        })
    }

    /// Register a new group of `nthr` threads that will arrive together as one participant, and
    /// attach it to the tree by level-order (breadth-first) insertion: the first node found with
    /// a free left- or right-child slot becomes this group's parent, and that parent's expected
    /// arrival count `k` grows by one to account for the new subtree.
    ///
    /// Returns a handle for the *first* thread in the group; every other thread in the group
    /// should be handed a [`Clone`] of it.
    pub fn register_group(self: &Arc<Self>, nthr: usize) -> CombiningBarrier {
        debug_assert!(nthr > 0, "a group of 0 threads can never arrive");
        let mut free = self.next_free.lock();
        let me = *free;
        debug_assert!(
            me < self.nodes.len(),
            "combining tree capacity exceeded: more groups registered than reserved"
        );
        *free += 1;

        self.nodes[me].k.store(nthr, atomic::Ordering::Relaxed);

        // BFS from the root looking for the first node with a free child slot.
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(0usize);
        while let Some(t) = queue.pop_front() {
            let lchild = self.nodes[t].lchild.load(atomic::Ordering::Acquire);
            if lchild == NONE {
                self.nodes[t].lchild.store(me, atomic::Ordering::Release);
                self.nodes[me].parent.store(t, atomic::Ordering::Release);
                self.nodes[t].k.fetch_add(1, atomic::Ordering::AcqRel);
                break;
            }
            let rchild = self.nodes[t].rchild.load(atomic::Ordering::Acquire);
            if rchild == NONE {
                self.nodes[t].rchild.store(me, atomic::Ordering::Release);
                self.nodes[me].parent.store(t, atomic::Ordering::Release);
                self.nodes[t].k.fetch_add(1, atomic::Ordering::AcqRel);
                break;
            }
            queue.push_back(lchild);
            queue.push_back(rchild);
        }
        drop(free);

        CombiningBarrier {
            root: Arc::clone(self),
            group: me,
            sense: false,
            used: false,
        }
    }
}

/// One thread's handle onto a group registered in a combining tree (see [`Root`]).
///
/// `CombiningBarrier` is `Clone`, and should *not* be wrapped in an `Arc` -- every thread in the
/// same group gets its own clone, each tracking its own expected sense.
pub struct CombiningBarrier {
    root: Arc<Root>,
    group: usize,
    sense: bool,
    used: bool,
}

impl CombiningBarrier {
    /// Blocks the current thread until every group in the tree has rendezvoused at this episode.
    ///
    /// Only the thread whose arrival is last at a given node continues on to that node's parent;
    /// every other thread spins on its own node's sense flag, which keeps contention local to
    /// each group instead of funnelling every thread through one shared counter.
    pub fn wait(&mut self) {
        self.used = true;
        self.sense = !self.sense;
        let s = self.sense;
        let nodes = &self.root.nodes;

        // Walk leaf-to-root, stopping as soon as this thread is not the last arrival at some
        // node. `path` records every node this thread was the last arrival at, innermost first,
        // so that once the ascent terminates (either at the root, or because this thread must
        // now wait) the release can unwind the same nodes outermost first.
        let mut path = Vec::new();
        let mut t = self.group;
        loop {
            path.push(t);
            let node = &nodes[t];
            let k = node.k.load(atomic::Ordering::Acquire);
            let prior = node.count.fetch_add(1, atomic::Ordering::AcqRel);
            if prior == k - 1 {
                let parent = node.parent.load(atomic::Ordering::Acquire);
                if parent == NONE {
                    break;
                }
                t = parent;
                continue;
            }

            let mut stall = Stall::new();
            while node.sense.load(atomic::Ordering::Acquire) != s {
                stall.spin();
            }
            return;
        }

        // This thread was the last arrival all the way to the root: release every node on the
        // path, root-to-leaf, resetting each node's count and flipping its sense.
        for &idx in path.iter().rev() {
            let node = &nodes[idx];
            node.count.store(0, atomic::Ordering::Relaxed);
            node.sense.store(s, atomic::Ordering::Release);
        }
    }
}

impl Clone for CombiningBarrier {
    /// Produce a new handle onto the same group, for use by another thread in that group.
    ///
    /// # Panics
    ///
    /// Panics if this handle has already been used to `wait`.
    fn clone(&self) -> Self {
        assert!(!self.used, "cannot clone a CombiningBarrier after wait()");
        CombiningBarrier {
            root: Arc::clone(&self.root),
            group: self.group,
            sense: self.sense,
            used: false,
        }
    }
}

impl ThreadBarrier for CombiningBarrier {
    fn wait(&mut self) {
        CombiningBarrier::wait(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{channel, TryRecvError};
    use std::thread;

    #[cfg(feature = "nightly")]
    use test::Bencher;

    #[cfg(feature = "nightly")]
    const BENCH_THREADS: usize = 4;

    #[cfg(feature = "nightly")]
    #[cfg_attr(feature = "nightly", bench)]
    fn bench_wait(b: &mut Bencher) {
        let root = Root::new(BENCH_THREADS);
        let mut leader = root.register_group(1);
        for _ in 0..(BENCH_THREADS - 1) {
            let mut g = root.register_group(1);
            thread::spawn(move || loop {
                g.wait();
            });
        }
        b.iter(move || {
            leader.wait();
        })
    }

    #[test]
    fn single_group_of_one() {
        let root = Root::new(1);
        let mut b = root.register_group(1);
        b.wait();
        b.wait();
    }

    #[test]
    fn single_group_many_threads() {
        const N: usize = 6;
        let root = Root::new(1);
        let leader = root.register_group(N);
        let mut handles = Vec::with_capacity(N - 1);
        let (tx, rx) = channel();
        for _ in 0..N - 1 {
            let mut c = leader.clone();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                c.wait();
                tx.send(()).unwrap();
            }));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let mut leader = leader;
        leader.wait();
        for _ in 0..N - 1 {
            rx.recv().unwrap();
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    /// Three groups of two threads each, registered in sequence, should end up as three direct
    /// children of the root (k=2 each at insertion) and correctly barrier all six threads.
    #[test]
    fn three_groups_of_two_barrier_together() {
        const GROUPS: usize = 3;
        const PER_GROUP: usize = 2;
        let root = Root::new(GROUPS);

        let mut leaders: Vec<_> = (0..GROUPS).map(|_| root.register_group(PER_GROUP)).collect();
        assert_eq!(root.nodes[0].k.load(atomic::Ordering::Relaxed), 2);

        let (tx, rx) = channel();
        let mut handles = Vec::new();
        for leader in &leaders {
            for _ in 0..PER_GROUP - 1 {
                let mut c = leader.clone();
                let tx = tx.clone();
                handles.push(thread::spawn(move || {
                    c.wait();
                    tx.send(()).unwrap();
                }));
            }
        }

        let mut leaders_iter = leaders.iter_mut();
        let me = leaders_iter.next().unwrap();
        for leader in leaders_iter {
            let tx = tx.clone();
            let mut f = leader.clone();
            handles.push(thread::spawn(move || {
                f.wait();
                tx.send(()).unwrap();
            }));
        }
        me.wait();
        for _ in 0..GROUPS * PER_GROUP - 1 {
            rx.recv().unwrap();
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn many_episodes_stress() {
        const EPISODES: usize = 5_000;
        let root = Root::new(2);
        let a = root.register_group(2);
        let b = root.register_group(3);

        let mut handles = Vec::new();
        for leader in [a.clone(), a, b.clone(), b.clone(), b] {
            let mut c = leader;
            handles.push(thread::spawn(move || {
                for _ in 0..EPISODES {
                    c.wait();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
