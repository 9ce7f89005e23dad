//! Introspection of the collector state of the current thread.

use core::cell::Cell;
use core::marker::PhantomData;
use std::alloc::Layout;
use std::rc::Rc;

use thiserror::Error;

thread_local! {
    static STATE: State = const { State::new() };
}

#[inline]
pub(crate) fn state<R>(f: impl FnOnce(&State) -> R) -> R {
    try_state(f).unwrap_or_else(|_| panic!("couldn't access the collector state"))
}

#[inline]
pub(crate) fn try_state<R>(f: impl FnOnce(&State) -> R) -> Result<R, StateAccessError> {
    STATE.try_with(|state| Ok(f(state))).unwrap_or(Err(StateAccessError::AccessError))
}

/// An error returned when the thread-local collector state cannot be reached,
/// usually because the thread is being torn down.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StateAccessError {
    #[error("couldn't access the collector state")]
    AccessError,
}

pub(crate) struct State {
    collecting: Cell<bool>,
    dropping: Cell<bool>,
    allocated_bytes: Cell<usize>,
    executions_counter: Cell<usize>,
    _phantom: PhantomData<Rc<()>>, // Make State !Send and !Sync
}

impl State {
    #[inline]
    const fn new() -> Self {
        Self {
            collecting: Cell::new(false),
            dropping: Cell::new(false),
            allocated_bytes: Cell::new(0),
            executions_counter: Cell::new(0),
            _phantom: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.get()
    }

    #[inline]
    pub(crate) fn record_allocation(&self, layout: Layout) {
        self.allocated_bytes.set(self.allocated_bytes.get() + layout.size());
    }

    #[inline]
    pub(crate) fn record_deallocation(&self, layout: Layout) {
        self.allocated_bytes.set(self.allocated_bytes.get() - layout.size());
    }

    #[inline]
    pub(crate) fn executions_count(&self) -> usize {
        self.executions_counter.get()
    }

    #[inline]
    pub(crate) fn increment_executions_count(&self) {
        self.executions_counter.set(self.executions_counter.get() + 1);
    }

    #[inline]
    pub(crate) fn is_collecting(&self) -> bool {
        self.collecting.get()
    }

    #[inline]
    pub(crate) fn set_collecting(&self, value: bool) {
        self.collecting.set(value);
    }

    #[inline]
    pub(crate) fn is_dropping(&self) -> bool {
        self.dropping.get()
    }

    #[inline]
    pub(crate) fn set_dropping(&self, value: bool) {
        self.dropping.set(value);
    }

    /// The collector is walking the graph: between the passes of a collection,
    /// but outside the destructors the collection itself runs.
    #[inline]
    pub(crate) fn is_tracing(&self) -> bool {
        self.collecting.get() && !self.dropping.get()
    }
}

impl Default for State {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) fn reset_state() {
    state(|state| {
        state.collecting.set(false);
        state.dropping.set(false);
        state.allocated_bytes.set(0);
        state.executions_counter.set(0);
    });
}

/// Returns the number of bytes currently held by managed allocations on this
/// thread (control blocks and payloads).
#[inline]
pub fn allocated_bytes() -> Result<usize, StateAccessError> {
    try_state(|state| Ok(state.allocated_bytes()))?
}

/// Returns how many collections have been run on this thread.
#[inline]
pub fn executions_count() -> Result<usize, StateAccessError> {
    try_state(|state| Ok(state.executions_count()))?
}

/// Returns `true` while the collector is walking the object graph.
#[inline]
pub fn is_tracing() -> Result<bool, StateAccessError> {
    try_state(|state| Ok(state.is_tracing()))?
}

/// Returns the number of possible cycle roots buffered for the next
/// collection.
#[inline]
pub fn buffered_roots_count() -> Result<usize, StateAccessError> {
    crate::POSSIBLE_ROOTS
        .try_with(|roots| Ok(roots.borrow().len()))
        .unwrap_or(Err(StateAccessError::AccessError))
}

/// Utility macro used internally to implement drop guards over state flags
macro_rules! replace_state_field {
    (dropping, $value:expr, $state:ident) => {{
        let old_value: bool = $crate::state::State::is_dropping($state);
        $crate::state::State::set_dropping($state, $value);

        #[must_use = "the drop guard shouldn't be dropped instantly"]
        struct DropGuard<'a> {
            state: &'a $crate::state::State,
            old_value: bool,
        }

        impl<'a> ::core::ops::Drop for DropGuard<'a> {
            #[inline]
            fn drop(&mut self) {
                $crate::state::State::set_dropping(self.state, self.old_value);
            }
        }

        DropGuard {
            state: $state,
            old_value,
        }
    }};
}

// This makes replace_state_field usable across modules
pub(crate) use replace_state_field;
