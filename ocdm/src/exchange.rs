// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! The shared-memory decrypt channel.
//!
//! Each session decrypts through a named shared-memory region created by the
//! DRM engine (the *server*) and attached by the client. The region starts
//! with a control block whose state word drives a one-request-at-a-time
//! handshake:
//!
//! ```text
//! Idle ──client──▶ Producing ──client──▶ Produced ──server──▶ Decrypting
//!   ▲                                                             │
//!   └──client── Consuming ◀──client── Completed ◀──server─────────┘
//! ```
//!
//! Every transition is a compare-and-swap followed by a wake of all waiters;
//! every wait is bounded by a deadline.
//!
//! A client that times out withdraws its request if the server has not taken
//! it yet. A result the server publishes after that is discarded by the next
//! request.

mod futex;
mod layout;
mod server;
mod shm;

use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::{Error, MediaProperties, Result, SampleInfo};

use layout::{CHANNEL_MAGIC, ControlBlock, DATA_OFFSET, RequestHeader};
use shm::SharedMemory;

pub use layout::{MAX_IV_LENGTH, MAX_KEY_ID_LENGTH, MAX_SUBSAMPLES};
pub use server::{DecryptRequest, DecryptServer};

/// Handshake state stored in the control block.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle = 0,
    Producing = 1,
    Produced = 2,
    Decrypting = 3,
    Completed = 4,
    Consuming = 5,
}

/// Moves `word` from `from` to `to`, waiting for `from` until `deadline`.
fn transition(
    word: &AtomicU32,
    from: ChannelState,
    to: ChannelState,
    deadline: Instant,
) -> Result<()> {
    loop {
        match word.compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                futex::wake_all(word);
                return Ok(());
            }
            Err(current) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                futex::wait(word, current, deadline - now);
            }
        }
    }
}

/// Moves `word` from `Idle` to `Producing`.
///
/// A `Completed` found here is the late answer to a request whose client
/// already timed out; it is discarded and the channel returns to `Idle`.
fn acquire(word: &AtomicU32, deadline: Instant) -> Result<()> {
    loop {
        let idle = ChannelState::Idle as u32;
        let producing = ChannelState::Producing as u32;
        match word.compare_exchange(idle, producing, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => {
                futex::wake_all(word);
                return Ok(());
            }
            Err(current) if current == ChannelState::Completed as u32 => {
                debug!("Discarding a decrypt result that arrived after its timeout");
                discard(word, ChannelState::Completed);
            }
            Err(current) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::Timeout);
                }
                futex::wait(word, current, deadline - now);
            }
        }
    }
}

/// Returns `word` to `Idle` if it still holds `from`.
fn discard(word: &AtomicU32, from: ChannelState) -> bool {
    let reset = word
        .compare_exchange(
            from as u32,
            ChannelState::Idle as u32,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok();
    if reset {
        futex::wake_all(word);
    }
    reset
}

fn publish(word: &AtomicU32, state: ChannelState) {
    word.store(state as u32, Ordering::Release);
    futex::wake_all(word);
}

/// Client end of a decrypt channel.
///
/// Requests are serialized through `lock`, which is either shared by every
/// channel in the process or private to this one.
pub struct DataExchange {
    memory: SharedMemory,
    capacity: usize,
    lock: Arc<Mutex<()>>,
    timeout: Duration,
    reserved: usize,
}

impl DataExchange {
    /// Attaches to the channel named `name`, created by a [`DecryptServer`].
    ///
    /// `reserved` bytes at the end of the data region are kept free for the
    /// secure-buffer token the decryptor may append.
    pub fn attach(
        name: &str,
        lock: Arc<Mutex<()>>,
        timeout: Duration,
        reserved: usize,
    ) -> Result<Self> {
        let memory = SharedMemory::open(name)?;
        if memory.size() < DATA_OFFSET {
            return Err(Error::InvalidDecryptBuffer);
        }
        // Safety: the mapping is at least one control block long and page aligned.
        let block = unsafe { &*(memory.as_ptr() as *const ControlBlock) };
        if block.magic != CHANNEL_MAGIC {
            warn!("Shared buffer {name} is not a decrypt channel");
            return Err(Error::InvalidDecryptBuffer);
        }
        let capacity = (block.capacity as usize).min(memory.size() - DATA_OFFSET);
        debug!("Attached decrypt channel {name} ({capacity} bytes)");
        Ok(Self {
            memory,
            capacity,
            lock,
            timeout,
            reserved,
        })
    }

    pub fn name(&self) -> &str {
        self.memory.name()
    }

    /// Size of the data region.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn block(&self) -> *mut ControlBlock {
        self.memory.as_ptr() as *mut ControlBlock
    }

    fn state(&self) -> &AtomicU32 {
        // Safety: the control block lives as long as the mapping.
        unsafe { &(*self.block()).state }
    }

    /// Runs one decrypt request; `data` is replaced by the decryptor's output.
    ///
    /// `data` plus the reserved token must fit in the channel. The remote
    /// status comes back unchanged as `Ok(())` or the matching [`Error`].
    /// Waiting for either side of the handshake past the configured timeout
    /// fails with [`Error::Timeout`].
    pub fn decrypt(
        &self,
        data: &mut [u8],
        info: Option<&SampleInfo>,
        init_with_last_15: bool,
        properties: Option<&MediaProperties>,
    ) -> Result<()> {
        if data.len() + self.reserved > self.capacity {
            return Err(Error::BufferTooSmall);
        }
        let header = RequestHeader::new(data.len(), info, init_with_last_15, properties)?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::Other("Decrypt lock poisoned".to_owned()))?;
        let deadline = Instant::now() + self.timeout;
        let state = self.state();

        acquire(state, deadline)?;
        // Safety: `Producing` hands the header and data region to this side.
        unsafe {
            addr_of_mut!((*self.block()).header).write(header);
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.memory.as_ptr().add(DATA_OFFSET),
                data.len(),
            );
        }
        publish(state, ChannelState::Produced);
        trace!("Produced {} bytes on {}", data.len(), self.name());

        if let Err(error) =
            transition(state, ChannelState::Completed, ChannelState::Consuming, deadline)
        {
            warn!("No decrypt result on {} within {:?}", self.name(), self.timeout);
            // Withdraw a request the decryptor never picked up, or drop a
            // result that raced the deadline. A request still being decrypted
            // is discarded by the next `acquire`.
            if !discard(state, ChannelState::Produced) {
                discard(state, ChannelState::Completed);
            }
            return Err(error);
        }
        // Safety: `Consuming` hands the data region back to this side.
        let status = unsafe {
            std::ptr::copy_nonoverlapping(
                self.memory.as_ptr().add(DATA_OFFSET),
                data.as_mut_ptr(),
                data.len(),
            );
            addr_of_mut!((*self.block()).status).read()
        };
        publish(state, ChannelState::Idle);

        Error::from_status(status)
    }
}
