use std::cell::Cell;

use super::*;
use crate::*;

struct Node {
    edges: Cell<Vec<Cc<Droppable<Node>>>>,
}

unsafe impl Trace for Node {
    fn trace(&self, ctx: &mut Context<'_>) {
        unsafe { &*self.edges.as_ptr() }.trace(ctx);
    }
}

fn new_node() -> (Cc<Droppable<Node>>, DropChecker) {
    let (droppable, checker) = Droppable::new(Node {
        edges: Cell::new(Vec::new()),
    });
    (Cc::new(droppable), checker)
}

fn link(from: &Cc<Droppable<Node>>, to: &Cc<Droppable<Node>>) {
    let mut edges = from.edges.take();
    edges.push(to.clone());
    from.edges.set(edges);
}

/// A cycle kept alive from outside, with the garbage-looking member buffered
/// (and therefore scanned) before the member holding the external reference.
/// The whitened member must be revived without rebalancing its edges twice.
#[test]
fn test_rescue_after_whitening() {
    reset_state();

    let (a, checker_a) = new_node();
    let (b, checker_b) = new_node();
    link(&a, &b);
    link(&b, &a);
    let keep = b.clone();

    // Buffer order: a first (it looks like garbage during the scan), then b
    drop(a);
    drop(b);
    assert_eq!(2, POSSIBLE_ROOTS.with(|roots| roots.borrow().len()));

    collect_cycles();
    checker_a.assert_not_dropped();
    checker_b.assert_not_dropped();
    assert_no_buffered_roots();

    // Counts must be exactly restored: b is held by the edge a -> b and by
    // `keep`, a only by the edge b -> a
    assert_eq!(2, keep.strong_count());
    assert_eq!(0, keep.weak_count());
    let a_again = &unsafe { &*keep.edges.as_ptr() }[0];
    assert_eq!(1, a_again.strong_count());

    // Dropping the external reference makes the cycle collectable
    drop(keep);
    collect_cycles();
    checker_a.assert_dropped();
    checker_b.assert_dropped();
    assert_no_buffered_roots();
}

/// Same shape, but the member holding the external reference is scanned
/// first, so the subgraph is blackened before anything is whitened.
#[test]
fn test_rescue_before_whitening() {
    reset_state();

    let (a, checker_a) = new_node();
    let (b, checker_b) = new_node();
    link(&a, &b);
    link(&b, &a);
    let keep = b.clone();

    // Buffer order: b first
    drop(b);
    drop(a);

    collect_cycles();
    checker_a.assert_not_dropped();
    checker_b.assert_not_dropped();
    assert_eq!(2, keep.strong_count());

    drop(keep);
    collect_cycles();
    checker_a.assert_dropped();
    checker_b.assert_dropped();
}

/// A three-node cycle rescued through a chain node outside of it, exercising
/// the revive path through a longer gray chain.
#[test]
fn test_chain_outside_cycle() {
    reset_state();

    let (a, checker_a) = new_node();
    let (b, checker_b) = new_node();
    let (c, checker_c) = new_node();
    let (d, checker_d) = new_node();
    link(&a, &b);
    link(&b, &c);
    link(&c, &a);
    link(&d, &a);

    // Drop the cycle members first so they sit in front of the buffer
    drop(b);
    drop(c);
    drop(a);

    collect_cycles();
    checker_a.assert_not_dropped();
    checker_b.assert_not_dropped();
    checker_c.assert_not_dropped();
    checker_d.assert_not_dropped();

    drop(d);
    collect_cycles();
    checker_a.assert_dropped();
    checker_b.assert_dropped();
    checker_c.assert_dropped();
    checker_d.assert_dropped();
    assert_no_buffered_roots();
}

/// Two cycles bridged by a strong edge die together in one collection, even
/// though only members of the first are buffered as roots.
#[test]
fn test_bridged_cycles_die_together() {
    reset_state();

    let (x, checker_x) = new_node();
    let (y, checker_y) = new_node();
    let (z, checker_z) = new_node();
    let (w, checker_w) = new_node();
    link(&x, &y);
    link(&y, &x);
    link(&z, &w);
    link(&w, &z);
    // Bridge from the first cycle into the second
    link(&y, &z);

    drop(x);
    drop(z);
    drop(y);
    drop(w);

    collect_cycles();
    checker_x.assert_dropped();
    checker_y.assert_dropped();
    checker_z.assert_dropped();
    checker_w.assert_dropped();

    // A second collection only has stale bookkeeping left to discard
    collect_cycles();
    assert_no_buffered_roots();
    assert_state_not_collecting();
}

#[test]
fn test_reentrant_collection_is_a_noop() {
    struct CollectsOnDrop {
        cc: Cell<Option<Cc<Droppable<CollectsOnDrop>>>>,
    }

    unsafe impl Trace for CollectsOnDrop {
        fn trace(&self, ctx: &mut Context<'_>) {
            if let Some(cc) = unsafe { &*self.cc.as_ptr() } {
                cc.trace(ctx);
            }
        }
    }

    impl Drop for CollectsOnDrop {
        fn drop(&mut self) {
            // Runs inside the collector; must not recurse into it
            collect_cycles();
        }
    }

    reset_state();

    let (droppable1, checker1) = Droppable::new(CollectsOnDrop {
        cc: Cell::new(None),
    });
    let (droppable2, checker2) = Droppable::new(CollectsOnDrop {
        cc: Cell::new(None),
    });
    let cc1 = Cc::new(droppable1);
    let cc2 = Cc::new(droppable2);
    cc1.cc.set(Some(cc2.clone()));
    cc2.cc.set(Some(cc1.clone()));

    drop(cc1);
    drop(cc2);

    let executions_before = state::executions_count().unwrap();
    collect_cycles();
    checker1.assert_dropped();
    checker2.assert_dropped();
    // The nested calls returned without starting a collection
    assert_eq!(executions_before + 1, state::executions_count().unwrap());
    assert_state_not_collecting();
}

/// Destructors running inside the collect pass may drop further handles;
/// whatever they re-buffer belongs to the next collection.
#[test]
fn test_destructor_buffers_new_roots() {
    reset_state();

    let (cycle_a, checker_a) = new_node();
    let (cycle_b, checker_b) = new_node();
    link(&cycle_a, &cycle_b);
    link(&cycle_b, &cycle_a);

    // A second, live cycle referenced from the dying one
    let (live_a, checker_live_a) = new_node();
    let (live_b, checker_live_b) = new_node();
    link(&live_a, &live_b);
    link(&live_b, &live_a);
    link(&cycle_b, &live_a);

    drop(cycle_a);
    drop(cycle_b);
    collect_cycles();
    checker_a.assert_dropped();
    checker_b.assert_dropped();
    // The live cycle lost the edge from the dead one but is still held here
    checker_live_a.assert_not_dropped();
    checker_live_b.assert_not_dropped();
    assert_eq!(2, live_a.strong_count());

    drop(live_a);
    drop(live_b);
    collect_cycles();
    checker_live_a.assert_dropped();
    checker_live_b.assert_dropped();
    assert_no_buffered_roots();
}

#[test]
fn test_executions_count() {
    reset_state();

    let executions = state::executions_count().unwrap();
    collect_cycles();
    assert_eq!(executions + 1, state::executions_count().unwrap());
    collect_cycles();
    assert_eq!(executions + 2, state::executions_count().unwrap());
}

#[test]
fn test_buffered_roots_count() {
    reset_state();

    assert_eq!(0, state::buffered_roots_count().unwrap());

    let (cc, _checker) = new_node();
    let cloned = cc.clone();
    drop(cloned);
    assert_eq!(1, state::buffered_roots_count().unwrap());

    // Re-dropping an already buffered block must not add an entry
    let cloned = cc.clone();
    drop(cloned);
    assert_eq!(1, state::buffered_roots_count().unwrap());

    collect_cycles();
    assert_eq!(0, state::buffered_roots_count().unwrap());
}

#[test]
fn test_allocated_bytes_balance() {
    reset_state();

    let before = state::allocated_bytes().unwrap();
    {
        let (a, _ca) = new_node();
        let (b, _cb) = new_node();
        link(&a, &b);
        link(&b, &a);
        assert!(state::allocated_bytes().unwrap() > before);
    }
    collect_cycles();
    assert_eq!(before, state::allocated_bytes().unwrap());
}

#[cfg(feature = "auto-collect")]
mod auto_collect {
    use super::*;
    use crate::config::config;

    fn enable_auto_collect() {
        config(|config| config.set_auto_collect(true)).unwrap();
    }

    struct Big {
        _pad: [u8; 256],
        cc: Cell<Option<Cc<Droppable<Big>>>>,
    }

    unsafe impl Trace for Big {
        fn trace(&self, ctx: &mut Context<'_>) {
            if let Some(cc) = unsafe { &*self.cc.as_ptr() } {
                cc.trace(ctx);
            }
        }
    }

    fn new_big() -> (Cc<Droppable<Big>>, DropChecker) {
        let (droppable, checker) = Droppable::new(Big {
            _pad: [0; 256],
            cc: Cell::new(None),
        });
        (Cc::new(droppable), checker)
    }

    #[test]
    fn test_construction_triggers_collection() {
        reset_state();
        enable_auto_collect();

        let (cc1, checker1) = new_big();
        let (cc2, checker2) = new_big();
        cc1.cc.set(Some(cc2.clone()));
        cc2.cc.set(Some(cc1.clone()));
        drop(cc1);
        drop(cc2);
        checker1.assert_not_dropped();
        checker2.assert_not_dropped();

        // Well over the byte threshold: this construction collects first
        let _trigger = Cc::new(0u32);
        checker1.assert_dropped();
        checker2.assert_dropped();
    }

    #[test]
    fn test_disabled_auto_collect_does_not_trigger() {
        reset_state();

        let (cc1, checker1) = new_big();
        let (cc2, checker2) = new_big();
        cc1.cc.set(Some(cc2.clone()));
        cc2.cc.set(Some(cc1.clone()));
        drop(cc1);
        drop(cc2);

        let _trigger = Cc::new(0u32);
        checker1.assert_not_dropped();
        checker2.assert_not_dropped();

        collect_cycles();
        checker1.assert_dropped();
        checker2.assert_dropped();
    }
}
