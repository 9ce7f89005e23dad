#![cfg(test)]

use std::cell::Cell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::state::{self, state};
use crate::trace::Trace;
use crate::{Context, POSSIBLE_ROOTS};

mod collect;

pub(crate) fn reset_state() {
    POSSIBLE_ROOTS.with(|roots| {
        let buffer = std::mem::take(&mut *roots.borrow_mut());
        for ptr in buffer {
            unsafe { ptr.as_ref() }.set_buffered(false);
            unsafe { crate::cc::CcBox::decrement_weak(ptr) };
        }
    });
    state::reset_state();

    #[cfg(feature = "auto-collect")]
    {
        use crate::config::{config, Config};
        config(|config| {
            *config = Config::default();
            // Unit tests drive collections explicitly
            config.set_auto_collect(false);
        })
        .expect("couldn't reset the config");
    }
}

pub(crate) struct Droppable<T: Trace> {
    inner: T,
    drop: Rc<Cell<bool>>,
}

impl<T: Trace> Droppable<T> {
    pub(crate) fn new(t: T) -> (Droppable<T>, DropChecker) {
        let drop = Rc::new(Cell::new(false));
        (
            Droppable {
                inner: t,
                drop: drop.clone(),
            },
            DropChecker { drop },
        )
    }
}

impl<T: Trace> Deref for Droppable<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T: Trace> DerefMut for Droppable<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

unsafe impl<T: Trace> Trace for Droppable<T> {
    fn trace(&self, ctx: &mut Context<'_>) {
        assert_collecting();
        assert_tracing();
        self.inner.trace(ctx);
    }
}

impl<T: Trace> Drop for Droppable<T> {
    fn drop(&mut self) {
        assert_dropping();
        self.drop.set(true);
    }
}

pub(crate) struct DropChecker {
    drop: Rc<Cell<bool>>,
}

impl DropChecker {
    pub(crate) fn assert_dropped(&self) {
        assert!(self.drop.get(), "Expected dropped!");
    }

    pub(crate) fn assert_not_dropped(&self) {
        assert!(!self.drop.get(), "Expected not dropped!");
    }
}

pub(crate) fn assert_no_buffered_roots() {
    let buffered = POSSIBLE_ROOTS.with(|roots| roots.borrow().len());
    assert_eq!(0, buffered);
}

pub(crate) fn assert_collecting() {
    state(|state| {
        assert!(state.is_collecting());
    });
}

pub(crate) fn assert_tracing() {
    state(|state| {
        assert!(state.is_tracing());
        assert!(!state.is_dropping());
    });
}

pub(crate) fn assert_dropping() {
    state(|state| {
        assert!(!state.is_tracing());
        assert!(state.is_dropping());
    });
}

pub(crate) fn assert_state_not_collecting() {
    state(|state| {
        assert!(!state.is_collecting());
        assert!(!state.is_tracing());
        assert!(!state.is_dropping());
    });
}

#[test]
fn make_sure_droppable_drops_are_observed() {
    reset_state();

    let (droppable, checker) = Droppable::new(());

    {
        let _ = crate::Cc::new(droppable);
    }

    checker.assert_dropped();
    assert_no_buffered_roots();
}
