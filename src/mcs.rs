//! An MCS tree barrier, as described in "3.5 Arrival Trees and Wakeup Trees: MCS Tree Barriers"
//! in Mellor-Crummey and Scott's paper [Algorithms for scalable synchronization on shared-memory
//! multiprocessors][1].
//!
//! Arrival and release are split into two separate trees over the same `N` nodes: a 4-ary
//! arrival tree (each node waits on up to four children before notifying its own parent) and an
//! implicit binary release tree (each node, once released, releases up to two children). The
//! shapes are fixed functions of a node's index, so -- like the tournament barrier -- there is no
//! runtime topology decision to make; only the bounded fan-in/fan-out is a tunable trade-off
//! between tree depth and per-node contention.
//!
//! [1]: https://dl.acm.org/citation.cfm?doid=103727.103729

use std::sync::{atomic, Arc};

use crate::spin::Stall;
use crate::ThreadBarrier;

struct Node {
    /// `true` while the corresponding arrival-tree child hasn't notified this node yet this
    /// episode; reset from `havechild` at the top of every episode by this node itself.
    childnotready: [atomic::AtomicBool; 4],
    /// Constant for the barrier's lifetime: whether arrival-tree child `j` exists.
    havechild: [bool; 4],
    /// `(parent node index, slot)` this node must clear in its parent's `childnotready` once
    /// every one of its own children has checked in. `None` for the root, which targets its own
    /// `dummy` instead (the write is then semantically discarded).
    parent: Option<(usize, usize)>,
    /// The two binary release-tree children (indices `2i+1`, `2i+2`) whose `parentsense` this
    /// node writes on release. `None` slots also target `dummy`.
    children: [Option<usize>; 2],
    /// The word this node spins on waiting for its own release-tree parent. Unused by the root.
    parentsense: atomic::AtomicBool,
    /// Node-private scratch word absorbing writes that have no real target (root's parent
    /// notification, and release writes to release-tree children that don't exist).
    dummy: atomic::AtomicBool,
}

/// The shared 4-ary arrival tree / binary release tree every [`McsBarrier`] thread participates
/// in.
pub struct Root {
    nodes: Box<[Node]>,
    next_free: atomic::AtomicUsize,
}

impl Root {
    /// Build a new MCS tree barrier topology for `n` threads.
    ///
    /// Every node's `havechild`, `parent`, and `children` references are fixed functions of its
    /// index and `n`, computed once here; the wait path never recomputes them.
    pub fn new(n: usize) -> Arc<Self> {
        debug_assert!(n > 0, "a barrier for 0 threads can never release");
        let nodes: Box<[Node]> = (0..n)
            .map(|i| {
                let havechild = [0usize, 1, 2, 3].map(|j| (i << 2) + j < n - 1);
                let parent = if i == 0 {
                    None
                } else {
                    Some(((i - 1) >> 2, (i - 1) & 3))
                };
                let left = 2 * i + 1;
                let right = 2 * i + 2;
                let children = [
                    if left < n { Some(left) } else { None },
                    if right < n { Some(right) } else { None },
                ];
                Node {
                    childnotready: havechild.map(atomic::AtomicBool::new),
                    havechild,
                    parent,
                    children,
                    parentsense: atomic::AtomicBool::new(false),
                    dummy: atomic::AtomicBool::new(false),
                }
            })
            .collect();

        Arc::new(Root {
            nodes,
            next_free: atomic::AtomicUsize::new(0),
        })
    }

    /// Assign the next sequential virtual thread id and return that thread's handle.
    ///
    /// # Panics
    ///
    /// In debug builds, panics if more than `n` threads register against this topology.
    pub fn register_thread(self: &Arc<Self>) -> McsBarrier {
        let id = self.next_free.fetch_add(1, atomic::Ordering::Relaxed);
        debug_assert!(id < self.nodes.len(), "more threads registered than the topology's n");
        McsBarrier {
            root: Arc::clone(self),
            id,
            sense: true,
        }
    }
}

/// One thread's handle onto a [`Root`] MCS tree topology.
///
/// Not `Clone`: each handle owns a unique node in both the arrival and release trees.
pub struct McsBarrier {
    root: Arc<Root>,
    id: usize,
    sense: bool,
}

impl McsBarrier {
    /// Blocks the current thread until every thread registered against this topology has
    /// rendezvoused at this episode.
    ///
    /// Gathers up to four children's arrivals, notifies its own arrival-tree parent, then waits
    /// for (and propagates) release down the binary release tree.
    pub fn wait(&mut self) {
        let s = self.sense;
        let node = &self.root.nodes[self.id];

        let mut stall = Stall::new();
        while node
            .childnotready
            .iter()
            .any(|c| c.load(atomic::Ordering::Acquire))
        {
            stall.spin();
        }

        for j in 0..4 {
            node.childnotready[j].store(node.havechild[j], atomic::Ordering::Relaxed);
        }

        match node.parent {
            Some((parent, slot)) => {
                self.root.nodes[parent].childnotready[slot].store(false, atomic::Ordering::Release);
            }
            None => node.dummy.store(false, atomic::Ordering::Release),
        }

        if self.id != 0 {
            let mut stall = Stall::new();
            while node.parentsense.load(atomic::Ordering::Acquire) != s {
                stall.spin();
            }
        }

        for child in node.children {
            match child {
                Some(idx) => self.root.nodes[idx]
                    .parentsense
                    .store(s, atomic::Ordering::Release),
                None => node.dummy.store(s, atomic::Ordering::Release),
            }
        }

        self.sense = !self.sense;
    }
}

impl ThreadBarrier for McsBarrier {
    fn wait(&mut self) {
        McsBarrier::wait(self);
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
        let mut leader = root.register_thread();
        for _ in 0..(BENCH_THREADS - 1) {
            let mut t = root.register_thread();
            thread::spawn(move || loop {
                t.wait();
            });
        }
        b.iter(move || {
            leader.wait();
        })
    }

    #[test]
    fn single_thread_passes_without_spinning() {
        let root = Root::new(1);
        let mut b = root.register_thread();
        b.wait();
        b.wait();
    }

    #[test]
    fn two_threads_both_paths_exercised() {
        let root = Root::new(2);
        let mut a = root.register_thread();
        let mut b = root.register_thread();
        let handle = thread::spawn(move || b.wait());
        a.wait();
        handle.join().unwrap();
    }

    /// N=7: thread 0's arrival-tree children are nodes 1, 2, 3, 4, all of which exist, so every
    /// `havechild` slot is set.
    #[test]
    fn n7_thread0_havechild_and_tree_shape() {
        const N: usize = 7;
        let root = Root::new(N);
        assert_eq!(root.nodes[0].havechild, [true, true, true, true]);
        assert_eq!(root.nodes[0].parent, None);

        // node 6's arrival-tree parent is node (6-1)>>2 = 1, slot (6-1)&3 = 1.
        assert_eq!(root.nodes[6].parent, Some((1, 1)));
        // node 6 is a leaf: children 4*6+1=25, 4*6+2=26 are both >= N-1=6, so absent.
        assert_eq!(root.nodes[6].havechild, [false, false, false, false]);

        // release tree: node 0's children are 1 and 2 (both exist for N=7).
        assert_eq!(root.nodes[0].children, [Some(1), Some(2)]);
        // node 3's release children would be 7, 8 -- both >= N, so absent.
        assert_eq!(root.nodes[3].children, [None, None]);
    }

    #[test]
    fn rendezvous_n10() {
        const N: usize = 10;
        let root = Root::new(N);
        let (tx, rx) = channel();
        let mut handles = Vec::with_capacity(N - 1);
        for _ in 0..N - 1 {
            let mut t = root.register_thread();
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                t.wait();
                tx.send(()).unwrap();
            }));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        let mut leader = root.register_thread();
        leader.wait();
        for _ in 0..N - 1 {
            rx.recv().unwrap();
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn sense_alternates_across_episodes() {
        const N: usize = 13;
        const EPISODES: usize = 5;
        let root = Root::new(N);
        let mut handles = Vec::with_capacity(N - 1);
        for _ in 0..N - 1 {
            let mut t = root.register_thread();
            handles.push(thread::spawn(move || {
                for _ in 0..EPISODES {
                    t.wait();
                }
            }));
        }
        let mut leader = root.register_thread();
        for _ in 0..EPISODES {
            leader.wait();
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn many_episodes_stress() {
        const N: usize = 16;
        const EPISODES: usize = 20_000;
        let root = Root::new(N);
        let mut handles = Vec::with_capacity(N - 1);
        for _ in 0..N - 1 {
            let mut t = root.register_thread();
            handles.push(thread::spawn(move || {
                for _ in 0..EPISODES {
                    t.wait();
                }
            }));
        }
        let mut leader = root.register_thread();
        for _ in 0..EPISODES {
            leader.wait();
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
