// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::{CString, c_char, c_void};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use ocdm::SessionCallbacks;
use tracing::debug;

use crate::OpenCDMSession;

/// Application callbacks of a session constructed through the C ABI.
///
/// Every member may be null. `user_data` is passed back untouched.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCDMSessionCallbacks {
    pub process_challenge_callback: Option<
        unsafe extern "C" fn(
            session: *mut OpenCDMSession,
            user_data: *mut c_void,
            url: *const c_char,
            challenge: *const u8,
            challenge_length: u32,
        ),
    >,
    pub key_update_callback: Option<
        unsafe extern "C" fn(
            session: *mut OpenCDMSession,
            user_data: *mut c_void,
            key_id: *const u8,
            length: u8,
        ),
    >,
    pub error_message_callback: Option<
        unsafe extern "C" fn(
            session: *mut OpenCDMSession,
            user_data: *mut c_void,
            message: *const c_char,
        ),
    >,
    pub keys_updated_callback:
        Option<unsafe extern "C" fn(session: *const OpenCDMSession, user_data: *mut c_void)>,
}

enum Event {
    Challenge(String, Vec<u8>),
    KeyUpdated(Vec<u8>),
    Error(String),
    KeysUpdated,
}

enum Target {
    /// Handle not boxed yet; events are held back until it is.
    Pending(Vec<Event>),
    Attached(*mut OpenCDMSession),
    Detached,
}

struct State {
    target: Target,
    /// Threads currently inside a C callback with the attached handle.
    delivering: Vec<ThreadId>,
}

/// Routes session notifications to the C callbacks with the session handle.
///
/// The DRM engine may report the first challenge while the session is still
/// being constructed, before a handle exists. Those events are queued and
/// replayed by [`CallbackBridge::attach`].
///
/// [`CallbackBridge::detach`] blocks until callbacks running on other
/// threads return, so no callback sees a freed handle. A callback may
/// destruct its own session: the delivery on the detaching thread is not
/// waited for.
pub(crate) struct CallbackBridge {
    callbacks: OpenCDMSessionCallbacks,
    user_data: *mut c_void,
    state: Mutex<State>,
    idle: Condvar,
}

// SAFETY: the handle is only dereferenced by the C callbacks, which the
// caller registered as callable from any thread. `user_data` is opaque here.
unsafe impl Send for CallbackBridge {}
// SAFETY: all mutable state sits behind the `state` mutex.
unsafe impl Sync for CallbackBridge {}

/// Marks one delivery in flight until dropped.
struct InFlight<'a> {
    bridge: &'a CallbackBridge,
    thread: ThreadId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut state = self.bridge.state();
        if let Some(index) = state.delivering.iter().position(|id| *id == self.thread) {
            state.delivering.swap_remove(index);
        }
        drop(state);
        self.bridge.idle.notify_all();
    }
}

impl CallbackBridge {
    pub(crate) fn new(callbacks: OpenCDMSessionCallbacks, user_data: *mut c_void) -> Self {
        Self {
            callbacks,
            user_data,
            state: Mutex::new(State {
                target: Target::Pending(Vec::new()),
                delivering: Vec::new(),
            }),
            idle: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds the bridge to its handle and replays queued events.
    pub(crate) fn attach(&self, handle: *mut OpenCDMSession) {
        let queued = {
            let mut state = self.state();
            match std::mem::replace(&mut state.target, Target::Attached(handle)) {
                Target::Pending(queued) => queued,
                _ => Vec::new(),
            }
        };
        for event in queued {
            self.deliver(handle, event);
        }
    }

    /// Stops delivery; the handle is about to be freed.
    ///
    /// Returns once no other thread is inside a callback.
    pub(crate) fn detach(&self) {
        let current = thread::current().id();
        let mut state = self.state();
        state.target = Target::Detached;
        while state.delivering.iter().any(|id| *id != current) {
            debug!("Waiting for {} callbacks to return", state.delivering.len());
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn dispatch(&self, event: Event) {
        let thread = thread::current().id();
        let handle = {
            let mut guard = self.state();
            let state = &mut *guard;
            match &mut state.target {
                Target::Pending(queued) => {
                    queued.push(event);
                    return;
                }
                Target::Attached(handle) => {
                    let handle = *handle;
                    state.delivering.push(thread);
                    handle
                }
                Target::Detached => return,
            }
        };
        let _in_flight = InFlight {
            bridge: self,
            thread,
        };
        self.deliver(handle, event);
    }

    fn deliver(&self, handle: *mut OpenCDMSession, event: Event) {
        match event {
            Event::Challenge(url, challenge) => {
                let Some(callback) = self.callbacks.process_challenge_callback else {
                    return;
                };
                let Ok(length) = u32::try_from(challenge.len()) else {
                    debug!("Dropping oversized challenge of {} bytes", challenge.len());
                    return;
                };
                let url = CString::new(url).unwrap_or_default();
                // SAFETY: the callback was registered by the C caller for this session.
                unsafe {
                    callback(
                        handle,
                        self.user_data,
                        url.as_ptr(),
                        challenge.as_ptr(),
                        length,
                    )
                };
            }
            Event::KeyUpdated(key_id) => {
                let Some(callback) = self.callbacks.key_update_callback else {
                    return;
                };
                let Ok(length) = u8::try_from(key_id.len()) else {
                    return;
                };
                // SAFETY: as above.
                unsafe { callback(handle, self.user_data, key_id.as_ptr(), length) };
            }
            Event::Error(message) => {
                if let Some(callback) = self.callbacks.error_message_callback {
                    let message = CString::new(message).unwrap_or_default();
                    // SAFETY: as above.
                    unsafe { callback(handle, self.user_data, message.as_ptr()) };
                }
            }
            Event::KeysUpdated => {
                if let Some(callback) = self.callbacks.keys_updated_callback {
                    // SAFETY: as above.
                    unsafe { callback(handle, self.user_data) };
                }
            }
        }
    }
}

impl SessionCallbacks for CallbackBridge {
    fn on_challenge(&self, url: &str, challenge: &[u8]) {
        self.dispatch(Event::Challenge(url.to_owned(), challenge.to_vec()));
    }

    fn on_key_updated(&self, key_id: &[u8]) {
        self.dispatch(Event::KeyUpdated(key_id.to_vec()));
    }

    fn on_error(&self, message: &str) {
        self.dispatch(Event::Error(message.to_owned()));
    }

    fn on_keys_updated(&self) {
        self.dispatch(Event::KeysUpdated);
    }
}
