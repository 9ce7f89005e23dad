//! Configuration of automatic collections.
//!
//! With the `auto-collect` feature enabled, constructing a new
//! [`Cc`][`crate::Cc`] may start a collection. A *byte threshold* is kept
//! over the number of bytes held by managed allocations: when a constructor
//! finds the threshold exceeded, it runs [`collect_cycles`][`crate::collect_cycles`]
//! first. After an automatic collection the threshold is doubled until it
//! exceeds the live byte count again; when the live byte count falls below
//! the threshold times [`adjustment_percent`][`Config::adjustment_percent`],
//! the threshold is halved back down (never below the default).
//!
//! A second, optional trigger fires when the number of buffered possible
//! roots exceeds [`buffered_roots_threshold`][`Config::buffered_roots_threshold`].
//! It is disabled by default.
//!
//! The configuration is thread-local and accessed through [`config`]:
//!
//! ```rust
//! cyclic_rc::config::config(|config| {
//!     config.set_auto_collect(false);
//! }).unwrap();
//! ```

use core::cell::RefCell;
use core::marker::PhantomData;
use core::num::NonZeroUsize;
use std::rc::Rc;

use thiserror::Error;

use crate::state::State;

const DEFAULT_BYTES_THRESHOLD: usize = 100;

thread_local! {
    pub(crate) static CONFIG: RefCell<Config> = const { RefCell::new(Config::new()) };
}

/// Accesses the configuration of the current thread.
///
/// Returns [`Err`] if the configuration is unreachable or already being
/// accessed.
pub fn config<F, R>(f: F) -> Result<R, ConfigAccessError>
where
    F: FnOnce(&mut Config) -> R,
{
    CONFIG
        .try_with(|config| {
            config
                .try_borrow_mut()
                .or(Err(ConfigAccessError::ConcurrentAccessError))
                .map(|mut config| f(&mut config))
        })
        .unwrap_or(Err(ConfigAccessError::AccessError))
}

/// An error returned by [`config`][`fn@config`].
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigAccessError {
    /// The configuration couldn't be accessed.
    #[error("couldn't access the configuration")]
    AccessError,
    /// The configuration was already being accessed.
    #[error("the configuration is already being accessed")]
    ConcurrentAccessError,
}

/// The configuration of automatic collections.
#[derive(Debug, Clone)]
pub struct Config {
    bytes_threshold: usize,
    adjustment_percent: f64,
    buffered_threshold: Option<NonZeroUsize>,
    auto_collect: bool,
    _phantom: PhantomData<Rc<()>>, // Make Config !Send and !Sync
}

impl Config {
    #[inline]
    const fn new() -> Self {
        Self {
            bytes_threshold: DEFAULT_BYTES_THRESHOLD,
            adjustment_percent: 0.1,
            buffered_threshold: None,
            auto_collect: true,
            _phantom: PhantomData,
        }
    }

    /// Returns `true` if collections can be automatically started.
    #[inline]
    pub fn auto_collect(&self) -> bool {
        self.auto_collect
    }

    /// Sets whether collections can be automatically started.
    #[inline]
    pub fn set_auto_collect(&mut self, auto_collect: bool) {
        self.auto_collect = auto_collect;
    }

    /// Returns the threshold adjustment percent.
    #[inline]
    pub fn adjustment_percent(&self) -> f64 {
        self.adjustment_percent
    }

    /// Sets the threshold adjustment percent.
    ///
    /// # Panics
    ///
    /// Panics if the provided `percent` isn't between 0 and 1 (included).
    #[inline]
    #[track_caller]
    pub fn set_adjustment_percent(&mut self, percent: f64) {
        assert!(
            (0f64..=1f64).contains(&percent),
            "percent must be between 0 and 1"
        );
        self.adjustment_percent = percent;
    }

    /// Returns the buffered-roots threshold, or [`None`] if this trigger is
    /// disabled.
    #[inline]
    pub fn buffered_roots_threshold(&self) -> Option<NonZeroUsize> {
        self.buffered_threshold
    }

    /// Sets the buffered-roots threshold. [`None`] disables this trigger.
    #[inline]
    pub fn set_buffered_roots_threshold(&mut self, threshold: Option<NonZeroUsize>) {
        self.buffered_threshold = threshold;
    }

    #[inline]
    pub(crate) fn should_collect(&mut self, state: &State, buffered_roots: usize) -> bool {
        if !self.auto_collect {
            return false;
        }

        if state.allocated_bytes() > self.bytes_threshold {
            return true;
        }

        match self.buffered_threshold {
            Some(buffered_threshold) => buffered_roots > buffered_threshold.get(),
            None => false,
        }
    }

    #[inline]
    pub(crate) fn adjust(&mut self, state: &State) {
        let allocated = state.allocated_bytes();

        if allocated >= self.bytes_threshold {
            // Grow until the threshold clears the live byte count
            loop {
                let Some(new_threshold) = self.bytes_threshold.checked_mul(2) else {
                    break;
                };
                self.bytes_threshold = new_threshold;
                if allocated < self.bytes_threshold {
                    break;
                }
            }
            return;
        }

        // Shrink while the live byte count stays far under the threshold
        while (allocated as f64) <= (self.bytes_threshold as f64) * self.adjustment_percent {
            let new_threshold = self.bytes_threshold >> 1;
            if new_threshold <= DEFAULT_BYTES_THRESHOLD {
                self.bytes_threshold = DEFAULT_BYTES_THRESHOLD;
                break;
            }
            if allocated >= new_threshold {
                break;
            }
            self.bytes_threshold = new_threshold;
        }
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}
