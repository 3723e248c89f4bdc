// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Cross-process wait/wake on a word in shared memory.
//!
//! On Linux this is a non-private futex so that waiters in another process
//! mapping the same page are woken. Elsewhere waiting degrades to short
//! sleeps.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(any(target_os = "linux", target_os = "android"))]
mod imp {
    use std::ptr;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use tracing::warn;

    pub fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
        let timeout = libc::timespec {
            tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };
        // Safety: `word` is a live AtomicU32 and the kernel only reads it.
        let res = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32,
                libc::FUTEX_WAIT,
                expected,
                &timeout as *const libc::timespec,
                ptr::null::<u32>(),
                0_u32,
            )
        };
        if res < 0 {
            let error = std::io::Error::last_os_error();
            match error.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) | Some(libc::ETIMEDOUT) => {}
                _ => warn!("Unexpected error from FUTEX_WAIT: {error}"),
            }
        }
    }

    pub fn wake_all(word: &AtomicU32) {
        // Safety: waking does not touch the word's memory.
        let res = unsafe {
            libc::syscall(
                libc::SYS_futex,
                word as *const AtomicU32,
                libc::FUTEX_WAKE,
                libc::INT_MAX,
                ptr::null::<libc::timespec>(),
                ptr::null::<u32>(),
                0_u32,
            )
        };
        if res < 0 {
            warn!(
                "Unexpected error from FUTEX_WAKE: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
mod imp {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const POLL_INTERVAL: Duration = Duration::from_millis(1);

    pub fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
        if word.load(Ordering::Acquire) == expected {
            std::thread::sleep(timeout.min(POLL_INTERVAL));
        }
    }

    pub fn wake_all(_word: &AtomicU32) {}
}

/// Blocks while `word == expected`, for at most `timeout`. May return early.
pub(crate) fn wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    imp::wait(word, expected, timeout)
}

/// Wakes every waiter blocked on `word`.
pub(crate) fn wake_all(word: &AtomicU32) {
    imp::wake_all(word)
}
