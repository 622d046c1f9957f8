//! A library of scalable thread barriers -- synchronization primitives that block a set of
//! cooperating threads until all of them have arrived, then release them together.
//!
//! `std::sync::Barrier` is built on a `Mutex`, which causes contention with many waiting
//! threads and incurs an undue performance overhead for each call to `wait`. The five barriers
//! in this crate all instead use sense-reversing, lock-free (on the hot path) arrival/release
//! protocols, each trading off bus traffic, spin locality, and arrival/wakeup latency
//! differently:
//!
//!  - [`centralized`] -- a single shared counter and sense flag. The simplest and lowest-latency
//!    option at small thread counts, but every thread hits the same cache line, so it scales the
//!    worst under contention.
//!  - [`combining`] -- threads are organized into groups and groups into a tree by level-order
//!    insertion; a group's last arrival represents it one level up, bounding contention at any
//!    node by the tree's fan-out rather than the total thread count.
//!  - [`dissemination`] -- an all-to-all signaling pattern over `O(log N)` rounds with no central
//!    hotspot: each round, every thread signals a different partner.
//!  - [`tournament`] -- thread roles are assigned statically, single-elimination-bracket style, so
//!    there is no runtime coordination overhead and every thread only ever spins on its own flag.
//!  - [`mcs`] -- a 4-ary arrival tree paired with a binary release tree, again with every role
//!    fixed by node index.
//!
//! All five share the same three-phase surface -- topology init, per-thread state init, wait --
//! and are reusable: calling `wait` again re-arms the barrier with no separate reset step. None
//! of them perform any dynamic allocation on the wait path, and none of them ever suspend a
//! thread in the OS sense: every wait is a spin loop.
//!
//! This crate implements "Algorithms for scalable synchronization on shared-memory
//! multiprocessors" by Mellor-Crummey and Scott ([full text][1]); for a higher-level
//! introduction, see Lars-Dominik Braun's [Introduction to barrier algorithms][2].
//!
//! # Examples
//!
//! ```
//! use hurdles::centralized::CentralizedBarrier;
//! use std::thread;
//!
//! let mut handles = Vec::with_capacity(10);
//! let mut barrier = CentralizedBarrier::new(10);
//! for _ in 0..10 {
//!     let mut c = barrier.clone();
//!     // The same messages will be printed together.
//!     // You will NOT see any interleaving.
//!     handles.push(thread::spawn(move || {
//!         println!("before wait");
//!         c.wait();
//!         println!("after wait");
//!     }));
//! }
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! ```
//!
//! [1]: https://dl.acm.org/citation.cfm?doid=103727.103729
//! [2]: https://6xq.net/barrier-intro/
#![deny(missing_docs)]
#![cfg_attr(feature = "nightly", feature(test))]

#[cfg(feature = "nightly")]
extern crate test;

pub mod centralized;
pub mod combining;
pub mod dissemination;
pub mod mcs;
pub mod tournament;

pub(crate) mod spin;
pub(crate) mod util;

/// A common capability shared by every barrier's per-thread handle: block until this episode's
/// arrivals are complete, then return, ready for the next episode.
///
/// Each barrier also exposes an inherent `wait` with its own algorithm-specific signature (some
/// take `&mut self` only, combining's additionally threads a group reference through
/// construction rather than `wait` itself) -- callers who know the concrete type should prefer
/// that. This trait exists so a caller that selects an algorithm at runtime (a benchmark harness
/// iterating over all five, say) can hold a `Box<dyn ThreadBarrier>` instead.
pub trait ThreadBarrier {
    /// Blocks the current thread until every participant has called `wait` for this episode.
    fn wait(&mut self);
}
