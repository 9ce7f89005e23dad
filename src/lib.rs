//! A reference-counted smart pointer with cycle collection.
//!
//! [`Cc`] behaves like [`Rc`][`std::rc::Rc`]: it provides shared ownership of
//! a heap value, destroys the value as soon as the last owning pointer goes
//! away, and hands out non-owning [`Weak`] pointers that can be upgraded
//! while the value is alive. On top of plain reference counting it runs a
//! trial-deletion cycle collector, so groups of values that keep each other
//! alive through strong cycles are reclaimed as well.
//!
//! Dropping a [`Cc`] whose reference count stays above zero buffers the
//! allocation as a possible cycle root. [`collect_cycles`] processes the
//! buffered roots in three passes: it subtracts the counts contributed by
//! strong edges internal to the traced subgraph, partitions the subgraph into
//! externally reachable and garbage parts, and destroys the garbage while
//! restoring the counts of every survivor. Acyclic garbage never needs the
//! collector; it is reclaimed the moment its count hits zero.
//!
//! Values stored inside a [`Cc`] implement the [`Trace`] trait, which reports
//! every [`Cc`] directly owned by the value. With the `derive` feature the
//! trait can be derived. With the `auto-collect` feature, collections are
//! also triggered by allocation pressure (see the `config` module).
//!
//! # Example
//!
//! ```rust
//! use cyclic_rc::{collect_cycles, Cc, Context, Trace};
//! use std::cell::RefCell;
//!
//! struct Node {
//!     edges: RefCell<Vec<Cc<Node>>>,
//! }
//!
//! unsafe impl Trace for Node {
//!     fn trace(&self, ctx: &mut Context<'_>) {
//!         self.edges.trace(ctx);
//!     }
//! }
//!
//! let a = Cc::new(Node { edges: RefCell::new(Vec::new()) });
//! let b = Cc::new(Node { edges: RefCell::new(Vec::new()) });
//! a.edges.borrow_mut().push(b.clone());
//! b.edges.borrow_mut().push(a.clone());
//! drop(a);
//! drop(b);
//!
//! // The two nodes keep each other alive; the collector reclaims them.
//! collect_cycles();
//! ```

#![deny(rustdoc::broken_intra_doc_links)]

use core::cell::RefCell;
use core::mem;
use core::ptr::NonNull;

use crate::cc::{CcBox, Color};
use crate::state::{replace_state_field, try_state, State};

#[cfg(test)]
mod tests;

mod cc;
mod trace;
mod utils;
mod weak;

pub mod state;

#[cfg(feature = "auto-collect")]
pub mod config;

#[cfg(feature = "derive")]
pub use cyclic_rc_derive::Trace;

pub use cc::Cc;
pub use trace::{Context, Trace};
pub use weak::Weak;

thread_local! {
    pub(crate) static POSSIBLE_ROOTS: RefCell<Vec<NonNull<CcBox>>> = const { RefCell::new(Vec::new()) };
}

/// Runs a cycle collection over every possible root buffered on the current
/// thread.
///
/// Unreachable cycles are destroyed; everything else survives with its
/// reference counts intact. Calling this from inside a running collection
/// (e.g. from a destructor) is a no-op.
pub fn collect_cycles() {
    let _ = try_state(|state| {
        if state.is_collecting() {
            return;
        }
        collect(state);

        #[cfg(feature = "auto-collect")]
        adjust_trigger_point(state);
    });
}

#[cfg(feature = "auto-collect")]
pub(crate) fn trigger_collection(state: &State) {
    if state.is_collecting() {
        return;
    }

    let buffered = POSSIBLE_ROOTS.try_with(|roots| roots.borrow().len()).unwrap_or(0);
    if config::config(|config| config.should_collect(state, buffered)).unwrap_or(false) {
        collect(state);
        adjust_trigger_point(state);
    }
}

#[cfg(feature = "auto-collect")]
fn adjust_trigger_point(state: &State) {
    let _ = config::config(|config| config.adjust(state));
}

fn collect(state: &State) {
    state.set_collecting(true);
    state.increment_executions_count();

    struct DropGuard<'a> {
        state: &'a State,
    }

    impl Drop for DropGuard<'_> {
        #[inline]
        fn drop(&mut self) {
            self.state.set_collecting(false);
        }
    }

    let _drop_guard = DropGuard { state };

    // The buffer is taken out wholesale: insertions made by destructors
    // during the collect pass land in a fresh buffer and are handled by the
    // next collection.
    let Ok(buffer) = POSSIBLE_ROOTS.try_with(|roots| mem::take(&mut *roots.borrow_mut())) else {
        return;
    };
    if buffer.is_empty() {
        return;
    }

    let retained = mark_roots(buffer);
    scan_roots(&retained);
    collect_roots(state, retained);

    // _drop_guard is dropped here, resetting state.collecting
}

/// First pass. Entries still purple are candidate roots: their subgraphs are
/// painted gray and every internal strong edge is subtracted. All other
/// entries have been touched since they were buffered and are dropped.
fn mark_roots(buffer: Vec<NonNull<CcBox>>) -> Vec<NonNull<CcBox>> {
    let mut retained = Vec::with_capacity(buffer.len());
    for ptr in buffer {
        let keep = {
            let block = unsafe { ptr.as_ref() };
            if block.color() == Color::Purple && block.strong() > 0 {
                mark_gray(block);
                true
            } else {
                block.set_buffered(false);
                false
            }
        };
        if keep {
            retained.push(ptr);
        } else {
            // Dropping the entry releases its weak contribution; a block
            // whose counts are both zero by now is destroyed here.
            unsafe { CcBox::decrement_weak(ptr) };
        }
    }
    retained
}

fn mark_gray(block: &CcBox) {
    block.set_color(Color::Gray);
    block.trace(&mut |child| {
        let child = unsafe { child.as_ref() };
        child.park_strong();
        if child.color() != Color::Gray {
            mark_gray(child);
        }
    });
}

/// Second pass. A gray block with a strong count of zero has no references
/// from outside the traced subgraph and is painted white; anything still
/// externally referenced is painted black again, restoring the subtracted
/// counts edge by edge.
fn scan_roots(retained: &[NonNull<CcBox>]) {
    for &ptr in retained {
        let block = unsafe { ptr.as_ref() };
        if block.color() == Color::Gray {
            scan(block);
        }
    }
}

fn scan(block: &CcBox) {
    if block.strong() == 0 {
        block.set_color(Color::White);
        block.trace(&mut |child| {
            let child = unsafe { child.as_ref() };
            if child.color() == Color::Gray {
                scan(child);
            }
            child.unpark_strong();
        });
    } else {
        scan_black(block);
    }
}

fn scan_black(block: &CcBox) {
    if block.color() == Color::White {
        // A white block already restored its outgoing edges when it was
        // whitened; rebalancing them a second time would corrupt the counts.
        // Only the colors of its subgraph need fixing up.
        revive(block);
        return;
    }
    block.set_color(Color::Black);
    block.trace(&mut |child| {
        let child = unsafe { child.as_ref() };
        if child.color() != Color::Black {
            scan_black(child);
        }
        child.unpark_strong();
    });
}

fn revive(block: &CcBox) {
    block.set_color(Color::Black);
    block.trace(&mut |child| {
        let child = unsafe { child.as_ref() };
        if child.color() == Color::White {
            revive(child);
        }
    });
}

/// Third pass. White entries are garbage: their payloads are destroyed, the
/// white subgraph first, the payload destructors afterwards. Every entry is
/// then dropped from the buffer.
fn collect_roots(state: &State, retained: Vec<NonNull<CcBox>>) {
    for ptr in retained {
        {
            let block = unsafe { ptr.as_ref() };
            block.set_buffered(false);
            if block.color() == Color::White {
                collect_white(state, block);
            }
        }
        unsafe { CcBox::decrement_weak(ptr) };
    }
}

fn collect_white(state: &State, block: &CcBox) {
    block.set_color(Color::Black);
    if let Some(payload) = block.take_payload() {
        // Children are discovered through the payload that was just taken
        // out, so a tracer never runs on a payload that has been freed.
        let visit = &mut |child: NonNull<CcBox>| {
            let child = unsafe { child.as_ref() };
            if child.color() == Color::White {
                collect_white(state, child);
            }
        };
        unsafe { block.trace_payload(payload, visit) };

        let _dropping_guard = replace_state_field!(dropping, true, state);
        unsafe { block.drop_payload(payload) };
        // _dropping_guard is dropped here, restoring the previous value
    }
}
