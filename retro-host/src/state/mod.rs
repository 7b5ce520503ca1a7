//! Host-side callback routing.
//!
//! libretro callbacks are bare C function pointers with no user-data argument, so a core
//! cannot tell *which* host it is talking to. Each [`crate::host::CoreHost`] therefore owns a
//! boxed [`HostContext`] and marks it *active* on the current thread for the duration of
//! every call into the core. The `extern "C"` trampolines installed into the core
//! (`environment`, `av`, `input`) look up the active context here.
//!
//! Design goals:
//! - No process-wide singleton: several hosts can coexist (one active at a time per thread).
//! - Reentrancy: activation nests (the previous context is restored on exit), and every
//!   component lives in its own `RefCell` so a callback only borrows what it touches.
//! - Never panic across the FFI boundary: a callback with no active context, or one that
//!   would need a borrow already held, is declined / answered with a neutral value.

use crate::av::audio::AudioPipeline;
use crate::av::video::VideoPipeline;
use crate::environment::Environment;
use crate::input::InputSampler;
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::ptr;

/// Everything the trampolines need while a core call is in flight.
pub(crate) struct HostContext {
    pub environment: RefCell<Environment>,
    pub video: RefCell<VideoPipeline>,
    pub audio: RefCell<AudioPipeline>,
    pub input: RefCell<InputSampler>,
}

thread_local! {
    static ACTIVE: Cell<*const HostContext> = const { Cell::new(ptr::null()) };
}

/// Restores the previously active context when dropped.
pub(crate) struct Activation<'a> {
    previous: *const HostContext,
    // Ties the guard to the borrowed context and keeps it on this thread.
    _context: PhantomData<&'a HostContext>,
    _not_send: PhantomData<*const ()>,
}

/// Mark `context` as the target of core callbacks on this thread until the guard drops.
pub(crate) fn activate(context: &HostContext) -> Activation<'_> {
    let previous = ACTIVE.with(|active| active.replace(context as *const _));
    Activation {
        previous,
        _context: PhantomData,
        _not_send: PhantomData,
    }
}

impl Drop for Activation<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(self.previous));
    }
}

/// Run `f` against the active context, if any.
///
/// Called from `extern "C"` trampolines only.
pub(crate) fn with_active<R>(f: impl FnOnce(&HostContext) -> R) -> Option<R> {
    let context = ACTIVE.with(Cell::get);
    if context.is_null() {
        return None;
    }
    // SAFETY: the pointer is only non-null while an `Activation` borrowing the context is
    // alive on this thread, so the context outlives this call.
    let context = unsafe { &*context };
    Some(f(context))
}

/// True when some host context is active on this thread.
#[cfg(test)]
pub(crate) fn is_active() -> bool {
    !ACTIVE.with(Cell::get).is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;

    fn context() -> HostContext {
        let config = HostConfig::default();
        HostContext {
            environment: RefCell::new(Environment::new(&config, None)),
            video: RefCell::new(VideoPipeline::default()),
            audio: RefCell::new(AudioPipeline::new(config.audio.pending_frames)),
            input: RefCell::new(InputSampler::new(config.input.max_ports)),
        }
    }

    #[test]
    fn nothing_active_by_default() {
        assert!(!is_active());
        assert!(with_active(|_| ()).is_none());
    }

    #[test]
    fn activation_nests_and_restores() {
        let outer = context();
        let inner = context();

        let _outer_guard = activate(&outer);
        assert!(with_active(|ctx| ptr::eq(ctx, &outer)).unwrap());
        {
            let _inner_guard = activate(&inner);
            assert!(with_active(|ctx| ptr::eq(ctx, &inner)).unwrap());
        }
        assert!(with_active(|ctx| ptr::eq(ctx, &outer)).unwrap());
    }

    #[test]
    fn dropping_last_guard_deactivates() {
        let ctx = context();
        {
            let _guard = activate(&ctx);
            assert!(is_active());
        }
        assert!(!is_active());
    }
}
