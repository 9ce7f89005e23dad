use core::borrow::Borrow;
use core::cell::Cell;
use core::cmp::Ordering;
use core::fmt::{self, Debug, Display, Formatter, Pointer};
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use std::alloc::Layout;
use std::rc::Rc;

use crate::state::{replace_state_field, state, try_state, State};
use crate::trace::{Context, Trace};
use crate::utils;
use crate::POSSIBLE_ROOTS;

/// Collection state of a control block.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Color {
    /// In use or known acyclic.
    Black,
    /// Possible member of a cycle, counts under trial deletion.
    Gray,
    /// Member of a garbage cycle.
    White,
    /// Possible root of a cycle, buffered for the next collection.
    Purple,
}

/// Per-allocation control block.
///
/// The payload lives in its own allocation so that weak pointers and root
/// buffer entries can keep the bookkeeping alive after the payload is gone.
/// The payload pointer is taken out before the payload is freed; a cleared
/// pointer is what makes weak upgrades fail.
pub(crate) struct CcBox {
    strong: Cell<usize>,
    weak: Cell<usize>,
    color: Cell<Color>,
    buffered: Cell<bool>,
    payload: Cell<Option<NonNull<()>>>,
    trace_fn: unsafe fn(NonNull<()>, &mut Context<'_>),
    drop_fn: unsafe fn(NonNull<()>),
    _phantom: PhantomData<Rc<()>>, // Make CcBox !Send and !Sync
}

impl CcBox {
    #[must_use]
    fn new<T: Trace + 'static>(value: T, state: &State) -> NonNull<CcBox> {
        state.record_allocation(Layout::new::<T>());
        let payload = NonNull::from(Box::leak(Box::new(value))).cast::<()>();
        CcBox::allocate::<T>(Some(payload), 1, state)
    }

    /// A block with no payload and no owners yet, used by `Cc::new_cyclic`.
    /// Upgrades fail until a payload is attached.
    #[must_use]
    pub(crate) fn new_empty<T: Trace + 'static>(state: &State) -> NonNull<CcBox> {
        CcBox::allocate::<T>(None, 0, state)
    }

    #[must_use]
    fn allocate<T: Trace + 'static>(
        payload: Option<NonNull<()>>,
        strong: usize,
        state: &State,
    ) -> NonNull<CcBox> {
        state.record_allocation(Layout::new::<CcBox>());
        let block = Box::new(CcBox {
            strong: Cell::new(strong),
            weak: Cell::new(0),
            color: Cell::new(Color::Black),
            buffered: Cell::new(false),
            payload: Cell::new(payload),
            trace_fn: trace_payload_of::<T>,
            drop_fn: drop_payload_of::<T>,
            _phantom: PhantomData,
        });
        NonNull::from(Box::leak(block))
    }

    #[inline]
    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline]
    pub(crate) fn color(&self) -> Color {
        self.color.get()
    }

    #[inline]
    pub(crate) fn set_color(&self, color: Color) {
        self.color.set(color);
    }

    #[inline]
    pub(crate) fn is_buffered(&self) -> bool {
        self.buffered.get()
    }

    #[inline]
    pub(crate) fn set_buffered(&self, buffered: bool) {
        self.buffered.set(buffered);
    }

    #[inline]
    pub(crate) fn payload(&self) -> Option<NonNull<()>> {
        self.payload.get()
    }

    #[inline]
    pub(crate) fn take_payload(&self) -> Option<NonNull<()>> {
        self.payload.take()
    }

    #[inline]
    pub(crate) fn set_payload(&self, payload: NonNull<()>) {
        debug_assert!(self.payload.get().is_none());
        self.payload.set(Some(payload));
    }

    /// A fresh strong reference proves the block reachable, so a pending
    /// purple mark is cleared as well.
    #[inline]
    pub(crate) fn increment_strong(&self) {
        self.strong.set(self.strong.get() + 1);
        self.color.set(Color::Black);
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    pub(crate) unsafe fn decrement_strong(ptr: NonNull<CcBox>) {
        let block = ptr.as_ref();
        debug_assert!(block.strong.get() > 0);
        block.strong.set(block.strong.get() - 1);
        if block.strong.get() == 0 {
            CcBox::release(ptr);
        } else if block.color.get() != Color::Purple {
            CcBox::possible_root(ptr);
        }
    }

    pub(crate) unsafe fn decrement_weak(ptr: NonNull<CcBox>) {
        let block = ptr.as_ref();
        debug_assert!(block.weak.get() > 0);
        block.weak.set(block.weak.get() - 1);
        if block.weak.get() == 0 && block.strong.get() == 0 {
            CcBox::destroy(ptr);
        }
    }

    /// Frees the payload once the last strong reference is gone. The payload
    /// pointer is taken out first, so weak upgrades observe the block as dead
    /// before the payload destructor runs.
    unsafe fn release(ptr: NonNull<CcBox>) {
        let block = ptr.as_ref();
        block.color.set(Color::Black);
        let Some(payload) = block.payload.take() else {
            if block.weak.get() == 0 {
                CcBox::destroy(ptr);
            }
            return;
        };
        // The payload destructor may drop the last weak pointer to this very
        // block; the extra weak keeps the block allocated until the
        // bookkeeping below is done.
        block.increment_weak();
        let ran = try_state(|state| {
            let _dropping_guard = replace_state_field!(dropping, true, state);
            (block.drop_fn)(payload);
        });
        if ran.is_err() {
            // Thread teardown: the state is gone but the payload still has
            // to be freed.
            (block.drop_fn)(payload);
        }
        CcBox::decrement_weak(ptr);
    }

    unsafe fn possible_root(ptr: NonNull<CcBox>) {
        let block = ptr.as_ref();
        block.color.set(Color::Purple);
        if !block.buffered.get() {
            let _ = POSSIBLE_ROOTS.try_with(|roots| {
                block.buffered.set(true);
                // The buffer entry keeps the block alive until the entry is
                // dropped by a collection.
                block.increment_weak();
                roots.borrow_mut().push(ptr);
            });
        }
    }

    unsafe fn destroy(ptr: NonNull<CcBox>) {
        debug_assert!(ptr.as_ref().payload.get().is_none());
        utils::record_deallocation(Layout::new::<CcBox>());
        drop(Box::from_raw(ptr.as_ptr()));
    }

    /// Trial-deletes one incoming strong edge, parking it on the weak count
    /// so the block outlives the current collection pass.
    #[inline]
    pub(crate) fn park_strong(&self) {
        debug_assert!(self.strong.get() > 0);
        self.strong.set(self.strong.get() - 1);
        self.weak.set(self.weak.get() + 1);
    }

    /// Undoes [`park_strong`][`CcBox::park_strong`] for one edge.
    #[inline]
    pub(crate) fn unpark_strong(&self) {
        debug_assert!(self.weak.get() > 0);
        self.strong.set(self.strong.get() + 1);
        self.weak.set(self.weak.get() - 1);
    }

    /// Reports the children of the live payload. A block whose payload has
    /// been taken has nothing to report.
    pub(crate) fn trace(&self, visitor: &mut dyn FnMut(NonNull<CcBox>)) {
        if let Some(payload) = self.payload.get() {
            unsafe { (self.trace_fn)(payload, &mut Context::new(visitor)) };
        }
    }

    /// Reports the children of a payload already taken out of the block.
    ///
    /// # Safety
    /// `payload` must be the pointer taken from this block and not yet freed.
    pub(crate) unsafe fn trace_payload(
        &self,
        payload: NonNull<()>,
        visitor: &mut dyn FnMut(NonNull<CcBox>),
    ) {
        (self.trace_fn)(payload, &mut Context::new(visitor));
    }

    /// # Safety
    /// `payload` must be the pointer taken from this block and not yet freed.
    pub(crate) unsafe fn drop_payload(&self, payload: NonNull<()>) {
        (self.drop_fn)(payload);
    }
}

unsafe fn trace_payload_of<T: Trace>(payload: NonNull<()>, ctx: &mut Context<'_>) {
    payload.cast::<T>().as_ref().trace(ctx);
}

unsafe fn drop_payload_of<T: Trace>(payload: NonNull<()>) {
    utils::record_deallocation(Layout::new::<T>());
    drop(Box::from_raw(payload.cast::<T>().as_ptr()));
}

/// A single-threaded reference-counted pointer with cycle collection.
///
/// See the [module-level documentation][`mod@crate`] for more details.
pub struct Cc<T: Trace + 'static> {
    inner: NonNull<CcBox>,
    _phantom: PhantomData<Rc<T>>, // Make Cc !Send and !Sync
}

impl<T: Trace> Cc<T> {
    /// Creates a new `Cc`.
    ///
    /// # Collection
    ///
    /// This method may start a collection when the `auto-collect` feature is
    /// enabled. See the `config` module documentation for more details.
    #[must_use = "newly created Cc is immediately dropped"]
    #[track_caller]
    pub fn new(value: T) -> Cc<T> {
        state(|state| {
            debug_assert_not_tracing(state);

            #[cfg(feature = "auto-collect")]
            crate::trigger_collection(state);

            Cc {
                inner: CcBox::new(value, state),
                _phantom: PhantomData,
            }
        })
    }

    /// Creates a new `Cc` whose payload is passed to `deleter` instead of
    /// being dropped in place when it is destroyed.
    ///
    /// The deleter runs exactly once, whether the payload dies through plain
    /// reference counting or through the cycle collector.
    #[must_use = "newly created Cc is immediately dropped"]
    #[track_caller]
    pub fn new_with_deleter(value: T, deleter: fn(T)) -> Cc<T> {
        state(|state| {
            debug_assert_not_tracing(state);

            #[cfg(feature = "auto-collect")]
            crate::trigger_collection(state);

            let wrapped = WithDeleter {
                value: ManuallyDrop::new(value),
                deleter,
            };
            Cc {
                // The payload pointer doubles as a pointer to `value`, which
                // sits first in the repr(C) wrapper.
                inner: CcBox::new(wrapped, state),
                _phantom: PhantomData,
            }
        })
    }

    /// Returns `true` if the two `Cc`s point to the same allocation.
    #[inline]
    pub fn ptr_eq(this: &Cc<T>, other: &Cc<T>) -> bool {
        ptr::eq(this.inner.as_ptr(), other.inner.as_ptr())
    }

    /// Returns the number of `Cc`s to the pointed allocation.
    #[inline]
    pub fn strong_count(&self) -> usize {
        self.inner().strong()
    }

    /// Returns `true` if the strong reference count is `1`.
    #[inline]
    pub fn is_unique(&self) -> bool {
        self.strong_count() == 1
    }

    /// Returns `true` while the payload has not been reclaimed.
    ///
    /// This can only return `false` inside a destructor run by the collector,
    /// for a handle into the garbage cycle being reclaimed.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.inner().payload().is_some()
    }

    /// Returns a raw pointer to the payload, or null once the payload has
    /// been reclaimed.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        match self.inner().payload() {
            Some(payload) => payload.cast::<T>().as_ptr(),
            None => ptr::null(),
        }
    }

    /// Returns a mutable reference to the payload if this `Cc` is the only
    /// handle to it, `None` otherwise.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let block = self.inner();
        // A root buffer entry holds one weak count but is not a handle.
        let bookkeeping_weak = usize::from(block.is_buffered());
        if block.strong() == 1 && block.weak() == bookkeeping_weak {
            let payload = block.payload()?;
            Some(unsafe { &mut *payload.cast::<T>().as_ptr() })
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn inner(&self) -> &CcBox {
        unsafe { self.inner.as_ref() }
    }

    #[inline]
    pub(crate) fn inner_ptr(&self) -> NonNull<CcBox> {
        self.inner
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_block(inner: NonNull<CcBox>) -> Cc<T> {
        Cc {
            inner,
            _phantom: PhantomData,
        }
    }
}

impl<T: Trace> Clone for Cc<T> {
    /// Makes a clone of the `Cc` pointer, increasing the strong reference
    /// count.
    #[inline]
    #[track_caller]
    fn clone(&self) -> Self {
        #[cfg(debug_assertions)]
        if try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot clone while tracing");
        }

        self.inner().increment_strong();
        Cc {
            inner: self.inner,
            _phantom: PhantomData,
        }
    }
}

impl<T: Trace> Deref for Cc<T> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the payload has already been reclaimed by the collector,
    /// which can only be observed from destructors of a garbage cycle.
    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        #[cfg(debug_assertions)]
        if try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot deref while tracing");
        }

        match self.inner().payload() {
            Some(payload) => unsafe { payload.cast::<T>().as_ref() },
            None => panic!("accessed a value already reclaimed by the cycle collector"),
        }
    }
}

impl<T: Trace> Drop for Cc<T> {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        if try_state(|state| state.is_tracing()).unwrap_or(false) {
            panic!("cannot drop while tracing");
        }

        unsafe { CcBox::decrement_strong(self.inner) };
    }
}

unsafe impl<T: Trace> Trace for Cc<T> {
    /// Reports this handle's control block as one strong edge.
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        ctx.visit(self.inner);
    }
}

#[cfg(debug_assertions)]
fn debug_assert_not_tracing(state: &State) {
    if state.is_tracing() {
        panic!("cannot create a new Cc while tracing");
    }
}

#[cfg(not(debug_assertions))]
#[inline(always)]
fn debug_assert_not_tracing(_: &State) {}

/// Payload wrapper carrying a per-construction deleter. The value sits first
/// so a pointer to the wrapper is also a pointer to the value.
#[repr(C)]
struct WithDeleter<T: Trace + 'static> {
    value: ManuallyDrop<T>,
    deleter: fn(T),
}

unsafe impl<T: Trace> Trace for WithDeleter<T> {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        self.value.trace(ctx);
    }
}

impl<T: Trace> Drop for WithDeleter<T> {
    #[inline]
    fn drop(&mut self) {
        let value = unsafe { ManuallyDrop::take(&mut self.value) };
        (self.deleter)(value);
    }
}

// ####################################
// #          Cc Trait impls          #
// ####################################

impl<T: Trace + Default> Default for Cc<T> {
    /// Creates a new [`Cc<T>`][`Cc`], with the [`Default`] value for `T`.
    #[inline]
    fn default() -> Self {
        Cc::new(<T as Default>::default())
    }
}

impl<T: Trace> AsRef<T> for Cc<T> {
    #[inline(always)]
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: Trace> Borrow<T> for Cc<T> {
    #[inline(always)]
    fn borrow(&self) -> &T {
        self
    }
}

impl<T: Trace> From<T> for Cc<T> {
    #[inline(always)]
    fn from(value: T) -> Self {
        Cc::new(value)
    }
}

impl<T: Trace + Debug> Debug for Cc<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

impl<T: Trace + Display> Display for Cc<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&**self, f)
    }
}

impl<T: Trace> Pointer for Cc<T> {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Pointer::fmt(&ptr::addr_of!(**self), f)
    }
}

impl<T: Trace + PartialEq> PartialEq for Cc<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        **self == **other
    }
}

impl<T: Trace + Eq> Eq for Cc<T> {}

impl<T: Trace + PartialOrd> PartialOrd for Cc<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        (**self).partial_cmp(&**other)
    }
}

impl<T: Trace + Ord> Ord for Cc<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        (**self).cmp(&**other)
    }
}

impl<T: Trace + Hash> Hash for Cc<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        (**self).hash(state);
    }
}
