// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Linux futex wrapper for inter-process wake-ups.
//!
//! Uses `FUTEX_WAIT` / `FUTEX_WAKE` (NOT the `_PRIVATE` variants): the private
//! variants only work within a single process and would silently fail to wake
//! a subscriber in another process.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
const FUTEX_WAIT: i32 = 0; // NOT 128 (FUTEX_WAIT_PRIVATE)
#[cfg(target_os = "linux")]
const FUTEX_WAKE: i32 = 1; // NOT 129 (FUTEX_WAKE_PRIVATE)

/// Block while `*addr == expected`, up to `timeout`.
///
/// Returns `0` on wake (or spurious wake-up), `-1` on mismatch, timeout or
/// error. Callers re-check their condition in all cases.
#[cfg(target_os = "linux")]
pub(crate) fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Duration) -> i32 {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };

    // SAFETY:
    // - addr is a live reference, so the address is valid for the whole call
    // - ts lives on the stack until the syscall returns
    // - uaddr2 and val3 are unused by FUTEX_WAIT
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
            std::ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

/// Wake every waiter blocked on `addr`. Returns the number woken or `-1`.
#[cfg(target_os = "linux")]
pub(crate) fn futex_wake_all(addr: &AtomicU32) -> i32 {
    // SAFETY:
    // - addr is a live reference
    // - timeout, uaddr2 and val3 are unused by FUTEX_WAKE
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

// Non-Linux fallback: short sleep, callers poll
#[cfg(not(target_os = "linux"))]
pub(crate) fn futex_wait(_addr: &AtomicU32, _expected: u32, timeout: Duration) -> i32 {
    std::thread::sleep(timeout.min(Duration::from_millis(1)));
    0
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn futex_wake_all(_addr: &AtomicU32) -> i32 {
    0
}
