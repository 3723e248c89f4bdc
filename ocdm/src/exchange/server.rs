// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use std::ptr::{addr_of, addr_of_mut};
use std::sync::atomic::AtomicU32;
use std::time::{Duration, Instant};

use tracing::debug;

use super::layout::{CHANNEL_MAGIC, ControlBlock, DATA_OFFSET, RequestHeader, region_size};
use super::shm::SharedMemory;
use super::{ChannelState, publish, transition};
use crate::{Error, MediaProperties, Result, SampleInfo, Status};

/// DRM-engine end of a decrypt channel. Owns the shared memory name.
pub struct DecryptServer {
    memory: SharedMemory,
    capacity: usize,
}

impl DecryptServer {
    /// Creates the channel `name` with a data region of `capacity` bytes.
    pub fn create(name: &str, capacity: usize) -> Result<Self> {
        let capacity_word = u32::try_from(capacity).map_err(|_| Error::InvalidArg)?;
        let memory = SharedMemory::create(name, region_size(capacity))?;
        let block = memory.as_ptr() as *mut ControlBlock;
        // Safety: the mapping is fresh, zero-filled and not yet shared.
        unsafe {
            addr_of_mut!((*block).capacity).write(capacity_word);
            addr_of_mut!((*block).status).write(0);
            addr_of_mut!((*block).magic).write(CHANNEL_MAGIC);
        }
        debug!("Created decrypt channel {name} ({capacity} bytes)");
        Ok(Self { memory, capacity })
    }

    pub fn name(&self) -> &str {
        self.memory.name()
    }

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

    /// Waits up to `timeout` for a request, runs `handler` on it and
    /// publishes the returned status.
    ///
    /// Returns `Ok(false)` when no request arrived in time.
    pub fn serve<F>(&self, timeout: Duration, handler: F) -> Result<bool>
    where
        F: FnOnce(&mut DecryptRequest<'_>) -> Status,
    {
        let deadline = Instant::now() + timeout;
        let state = self.state();
        match transition(state, ChannelState::Produced, ChannelState::Decrypting, deadline) {
            Ok(()) => {}
            Err(Error::Timeout) => return Ok(false),
            Err(error) => return Err(error),
        }

        // Safety: `Decrypting` hands the header and data region to this side.
        let header = unsafe { addr_of!((*self.block()).header).read() };
        let length = (header.data_length as usize).min(self.capacity);
        let data = unsafe {
            std::slice::from_raw_parts_mut(self.memory.as_ptr().add(DATA_OFFSET), length)
        };

        let mut request = DecryptRequest { header, data };
        let status = handler(&mut request);

        unsafe { addr_of_mut!((*self.block()).status).write(status) };
        publish(state, ChannelState::Completed);
        Ok(true)
    }
}

/// One sample handed to the DRM engine for decryption.
pub struct DecryptRequest<'a> {
    header: RequestHeader,
    data: &'a mut [u8],
}

impl DecryptRequest<'_> {
    pub fn sample_info(&self) -> SampleInfo {
        self.header.sample_info()
    }

    pub fn media_properties(&self) -> Option<MediaProperties> {
        self.header.media_properties()
    }

    pub fn init_with_last_15(&self) -> bool {
        self.header.init_with_last_15 != 0
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Sample bytes, decrypted in place by the handler.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }
}
