// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process transport: synchronous push into each consumer buffer.

use super::TransportSetup;
use crate::buffer::RingBuffer;
use crate::connector::ConnectorError;
use crate::port::PortData;
use std::sync::Arc;

pub(crate) struct LocalTransport<T> {
    sinks: Vec<Arc<RingBuffer<T>>>,
    live: bool,
}

impl<T: PortData> LocalTransport<T> {
    pub fn acquire(setup: &TransportSetup<'_, T>) -> Self {
        Self {
            sinks: setup.sinks.to_vec(),
            live: true,
        }
    }

    /// Every sink is attempted; the first failure is returned.
    pub fn deliver(&mut self, value: &T) -> Result<(), ConnectorError> {
        if !self.live {
            return Err(ConnectorError::Disconnected);
        }
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.write(value.clone()) {
                first_err.get_or_insert(ConnectorError::from(e));
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn release(&mut self) {
        self.sinks.clear();
        self.live = false;
    }

    pub fn is_live(&self) -> bool {
        self.live
    }
}
