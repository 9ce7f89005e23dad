use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::alloc::Layout;
use std::rc::Rc;

use crate::cc::CcBox;
use crate::state::state;
use crate::trace::{Context, Trace};
use crate::utils;
use crate::Cc;

/// A non-owning pointer to a [`Cc`] allocation.
///
/// A `Weak` does not keep the payload alive: once every [`Cc`] is gone the
/// payload is destroyed and [`upgrade`][`Weak::upgrade`] starts returning
/// [`None`]. The bookkeeping for the allocation survives until the last
/// `Weak` is dropped.
///
/// Weak pointers are invisible to the cycle collector, which makes them the
/// right tool for back edges: a tree with parent pointers stored as `Weak`
/// contains no cycle at all from the collector's point of view.
pub struct Weak<T: Trace + 'static> {
    inner: Option<NonNull<CcBox>>, // None when created with Weak::new()
    _phantom: PhantomData<Rc<T>>,  // Make Weak !Send and !Sync
}

impl<T: Trace> Weak<T> {
    /// Constructs a `Weak` pointing to nothing. [`upgrade`][`Weak::upgrade`]
    /// on the returned value always gives [`None`].
    #[inline]
    #[must_use]
    pub fn new() -> Weak<T> {
        Weak {
            inner: None,
            _phantom: PhantomData,
        }
    }

    /// Attempts to obtain an owning pointer, returning [`None`] once the
    /// payload has been destroyed.
    ///
    /// On success the strong reference count is incremented.
    #[must_use = "newly created Cc is immediately dropped"]
    #[track_caller]
    pub fn upgrade(&self) -> Option<Cc<T>> {
        #[cfg(debug_assertions)]
        if crate::state::try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot upgrade while tracing");
        }

        let ptr = self.inner?;
        let block = unsafe { ptr.as_ref() };
        if block.payload().is_none() {
            return None;
        }
        block.increment_strong();
        Some(Cc::from_block(ptr))
    }

    /// Returns `true` if the two `Weak`s point to the same allocation, or if
    /// both point to nothing.
    #[inline]
    pub fn ptr_eq(this: &Weak<T>, other: &Weak<T>) -> bool {
        match (this.inner, other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => a.as_ptr() == b.as_ptr(),
            _ => false,
        }
    }

    /// Returns the number of [`Cc`]s to the pointed allocation, or 0 if the
    /// payload has been destroyed or `self` was created with [`Weak::new`].
    #[inline]
    pub fn strong_count(&self) -> usize {
        self.inner.map_or(0, |ptr| {
            let block = unsafe { ptr.as_ref() };
            if block.payload().is_some() {
                block.strong()
            } else {
                0
            }
        })
    }

    /// Returns the number of `Weak`s to the pointed allocation, or 0 if
    /// `self` was created with [`Weak::new`].
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.inner.map_or(0, |ptr| {
            let block = unsafe { ptr.as_ref() };
            // A root buffer entry holds one weak count but is not a handle.
            block.weak() - usize::from(block.is_buffered())
        })
    }
}

impl<T: Trace> Clone for Weak<T> {
    /// Makes a clone of the `Weak` pointer, increasing the weak reference
    /// count.
    #[inline]
    #[track_caller]
    fn clone(&self) -> Self {
        #[cfg(debug_assertions)]
        if crate::state::try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot clone while tracing");
        }

        if let Some(ptr) = self.inner {
            unsafe { ptr.as_ref() }.increment_weak();
        }
        Weak {
            inner: self.inner,
            _phantom: PhantomData,
        }
    }
}

impl<T: Trace> Drop for Weak<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.inner {
            unsafe { CcBox::decrement_weak(ptr) };
        }
    }
}

unsafe impl<T: Trace> Trace for Weak<T> {
    /// Weak pointers hold no strong edge, so there is nothing to report.
    #[inline(always)]
    fn trace(&self, _: &mut Context<'_>) {}
}

impl<T: Trace> Cc<T> {
    /// Creates a new [`Weak`] pointer to the managed allocation, increasing
    /// the weak reference count.
    #[inline]
    #[must_use = "newly created Weak is immediately dropped"]
    #[track_caller]
    pub fn downgrade(&self) -> Weak<T> {
        #[cfg(debug_assertions)]
        if crate::state::try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot downgrade while tracing");
        }

        self.inner().increment_weak();
        Weak {
            inner: Some(self.inner_ptr()),
            _phantom: PhantomData,
        }
    }

    /// Returns the number of [`Weak`]s to the pointed allocation.
    #[inline]
    pub fn weak_count(&self) -> usize {
        let block = self.inner();
        block.weak() - usize::from(block.is_buffered())
    }

    /// Creates a new [`Cc<T>`][`Cc`] while providing a [`Weak<T>`][`Weak`]
    /// pointer to the allocation, to allow the creation of a `T` which holds
    /// a weak pointer to itself.
    ///
    /// Calling [`upgrade`][`Weak::upgrade`] on the weak pointer inside `f`
    /// returns [`None`], since the payload does not exist yet.
    ///
    /// # Example
    /// ```rust
    /// use cyclic_rc::{Cc, Context, Trace, Weak};
    ///
    /// struct Node {
    ///     me: Weak<Node>,
    /// }
    ///
    /// unsafe impl Trace for Node {
    ///     fn trace(&self, ctx: &mut Context<'_>) {
    ///         self.me.trace(ctx);
    ///     }
    /// }
    ///
    /// let node = Cc::new_cyclic(|weak| Node { me: weak.clone() });
    /// assert!(Cc::ptr_eq(&node, &node.me.upgrade().unwrap()));
    /// ```
    #[must_use = "newly created Cc is immediately dropped"]
    #[track_caller]
    pub fn new_cyclic<F>(f: F) -> Cc<T>
    where
        F: FnOnce(&Weak<T>) -> T,
    {
        #[cfg(debug_assertions)]
        if crate::state::try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot create a new Cc while tracing");
        }

        let ptr = state(|state| CcBox::new_empty::<T>(state));
        let block = unsafe { ptr.as_ref() };
        block.increment_weak();
        let weak: Weak<T> = Weak {
            inner: Some(ptr),
            _phantom: PhantomData,
        };

        // If `f` panics, dropping `weak` destroys the payload-less block.
        let value = f(&weak);

        utils::record_allocation(Layout::new::<T>());
        let payload = NonNull::from(Box::leak(Box::new(value))).cast::<()>();
        block.set_payload(payload);
        block.increment_strong();

        // `weak` is dropped here
        Cc::from_block(ptr)
    }
}

// ####################################
// #         Weak Trait impls         #
// ####################################

impl<T: Trace> Default for Weak<T> {
    #[inline]
    fn default() -> Self {
        Weak::new()
    }
}

impl<T: Trace> Debug for Weak<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}
