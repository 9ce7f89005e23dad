use core::cell::RefCell;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use crate::cc::CcBox;

/// Trait for types that may own [`Cc`][`crate::Cc`] pointers.
///
/// The collector discovers the shape of the object graph by asking every
/// managed value to report its outgoing strong edges. An implementation calls
/// [`trace`][`Trace::trace`] on each field; [`Cc`][`crate::Cc`] fields report
/// themselves, [`Weak`][`crate::Weak`] fields report nothing.
///
/// # Derive macro
///
/// With the `derive` feature enabled the trait can be derived, which traces
/// every field. Fields annotated with `#[cyclic_rc(ignore)]` are skipped.
///
/// # Safety
///
/// Implementations must uphold the following invariants:
///   * Every [`Cc`][`crate::Cc`] *exclusively* owned by `self` is traced at
///     most once, and no other [`Cc`][`crate::Cc`] is traced.
///   * Tracing the same value twice during one collection reports the same
///     edges. The collector walks the graph several times per collection and
///     relies on seeing a stable picture.
///   * The implementation does not create, clone, dereference or drop any
///     [`Cc`][`crate::Cc`] or [`Weak`][`crate::Weak`].
///
/// Never tracing a field is always safe: the field's subgraph is then treated
/// as externally referenced and is kept alive.
pub unsafe trait Trace {
    /// Reports the [`Cc`][`crate::Cc`] pointers owned by `self`.
    fn trace(&self, ctx: &mut Context<'_>);
}

/// The tracing context handed to every [`Trace::trace`] invocation.
///
/// Opaque to clients; it is only ever passed on to the `trace` methods of
/// owned fields.
pub struct Context<'a> {
    visitor: &'a mut dyn FnMut(NonNull<CcBox>),
    _phantom: PhantomData<*mut ()>, // Make Context !Send and !Sync
}

impl<'a> Context<'a> {
    #[inline]
    #[must_use]
    pub(crate) fn new(visitor: &'a mut dyn FnMut(NonNull<CcBox>)) -> Context<'a> {
        Context {
            visitor,
            _phantom: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn visit(&mut self, block: NonNull<CcBox>) {
        (self.visitor)(block);
    }
}

// #################################
// #          Trace impls          #
// #################################

macro_rules! empty_trace {
    ($($this:ty),*,) => {
        $(
        unsafe impl $crate::trace::Trace for $this {
            #[inline(always)]
            fn trace(&self, _: &mut $crate::trace::Context<'_>) {}
        }
        )*
    };
}

empty_trace! {
    (),
    bool,
    char,
    isize,
    usize,
    i8,
    u8,
    i16,
    u16,
    i32,
    u32,
    i64,
    u64,
    i128,
    u128,
    f32,
    f64,
    str,
    String,
    Path,
    PathBuf,
    OsStr,
    OsString,
}

unsafe impl<T: ?Sized> Trace for PhantomData<T> {
    #[inline(always)]
    fn trace(&self, _: &mut Context<'_>) {}
}

macro_rules! deref_trace {
    ($($this:tt),*,) => {
        $(
        unsafe impl<T: ?Sized + $crate::trace::Trace> $crate::trace::Trace for $this<T> {
            #[inline]
            fn trace(&self, ctx: &mut $crate::trace::Context<'_>) {
                let deref: &T = <$this<T> as ::core::ops::Deref>::deref(self);
                <T as $crate::trace::Trace>::trace(deref, ctx);
            }
        }
        )*
    };
}

deref_trace! {
    Box,
    ManuallyDrop,
}

unsafe impl<T: ?Sized + Trace> Trace for RefCell<T> {
    /// Contents that are mutably borrowed while tracing runs are skipped.
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        if let Ok(borrow) = self.try_borrow() {
            borrow.trace(ctx);
        }
    }
}

unsafe impl<T: Trace> Trace for Option<T> {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        if let Some(inner) = self {
            inner.trace(ctx);
        }
    }
}

unsafe impl<R: Trace, E: Trace> Trace for Result<R, E> {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        match self {
            Ok(ok) => ok.trace(ctx),
            Err(err) => err.trace(ctx),
        }
    }
}

unsafe impl<T: Trace, const N: usize> Trace for [T; N] {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        for elem in self {
            elem.trace(ctx);
        }
    }
}

unsafe impl<T: Trace> Trace for [T] {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        for elem in self {
            elem.trace(ctx);
        }
    }
}

unsafe impl<T: Trace> Trace for Vec<T> {
    #[inline]
    fn trace(&self, ctx: &mut Context<'_>) {
        for elem in self {
            elem.trace(ctx);
        }
    }
}

macro_rules! tuple_trace {
    ($($args:ident),+) => {
        #[allow(non_snake_case)]
        unsafe impl<$($args),*> $crate::trace::Trace for ($($args,)*)
        where $($args: $crate::trace::Trace),*
        {
            #[inline]
            fn trace(&self, ctx: &mut $crate::trace::Context<'_>) {
                match self {
                    ($($args,)*) => {
                        $(
                            <$args as $crate::trace::Trace>::trace($args, ctx);
                        )*
                    }
                }
            }
        }
    }
}

macro_rules! tuple_traces {
    ($(($($args:ident),+);)*) => {
        $(
            tuple_trace!($($args),*);
        )*
    }
}

tuple_traces! {
    (A);
    (A, B);
    (A, B, C);
    (A, B, C, D);
    (A, B, C, D, E);
    (A, B, C, D, E, F);
    (A, B, C, D, E, F, G);
    (A, B, C, D, E, F, G, H);
}
