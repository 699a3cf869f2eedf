// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connector-side shared-memory transport.
//!
//! One [`ShmPublisher`] owns the connector's segment. Each consumer buffer is
//! fed by its own [`ShmSubscriber`] attached to the same segment, so the data
//! path is the same one a subscriber in another process would use.

use super::{connector_segment_name, ShmError, ShmPublisher, ShmSubscriber, HEADER_SIZE};
use crate::buffer::RingBuffer;
use crate::connector::ConnectorError;
use crate::port::PortData;
use crate::transport::TransportSetup;
use std::sync::Arc;

pub(crate) struct ShmTransport<T> {
    publisher: Option<ShmPublisher>,
    subscribers: Vec<(ShmSubscriber, Arc<RingBuffer<T>>)>,
    outbound: Vec<u8>,
    inbound: Vec<u8>,
}

impl<T: PortData> ShmTransport<T> {
    pub fn acquire(setup: &TransportSetup<'_, T>) -> Result<Self, ConnectorError> {
        let memory_size = setup.profile.memory_size()?;
        let capacity = memory_size.checked_sub(HEADER_SIZE).filter(|c| *c > 0).ok_or_else(|| {
            ConnectorError::InvalidConfig(format!(
                "shm.memory_size {memory_size} leaves no room after the {HEADER_SIZE}-byte header"
            ))
        })?;
        let name = connector_segment_name(setup.connector.as_u64());

        let mut transport = Self {
            publisher: None,
            subscribers: Vec::with_capacity(setup.sinks.len()),
            outbound: Vec::with_capacity(capacity),
            inbound: Vec::with_capacity(capacity),
        };

        let publisher = ShmPublisher::create(&name, capacity).map_err(unavailable)?;
        transport.publisher = Some(publisher);

        for sink in setup.sinks {
            match ShmSubscriber::open(&name) {
                Ok(sub) => transport.subscribers.push((sub, Arc::clone(sink))),
                Err(e) => {
                    transport.release();
                    return Err(unavailable(e));
                }
            }
        }

        log::info!(
            "[SHM] Connector {} using segment {} ({} payload bytes, {} consumer(s))",
            setup.connector,
            name,
            capacity,
            transport.subscribers.len()
        );
        Ok(transport)
    }

    pub fn deliver(&mut self, value: &T) -> Result<(), ConnectorError> {
        let publisher = self.publisher.as_mut().ok_or(ConnectorError::Disconnected)?;

        self.outbound.clear();
        value.encode(&mut self.outbound);
        publisher.publish(&self.outbound).map_err(|e| match e {
            ShmError::PayloadTooLarge { size, capacity } => {
                ConnectorError::PayloadTooLarge { size, capacity }
            }
            other => unavailable(other),
        })?;

        let mut first_err = None;
        for (sub, sink) in &mut self.subscribers {
            let result = match sub.poll_into(&mut self.inbound) {
                Ok(Some(info)) => {
                    if info.overwritten > 0 {
                        log::debug!(
                            "[SHM] {} missed {} publish(es)",
                            sub.name(),
                            info.overwritten
                        );
                    }
                    T::decode(&self.inbound)
                        .map_err(ConnectorError::Decode)
                        .and_then(|v| sink.write(v).map_err(ConnectorError::from))
                }
                Ok(None) => Ok(()),
                Err(e) => Err(unavailable(e)),
            };
            if let Err(e) = result {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    pub fn release(&mut self) {
        self.subscribers.clear();
        if let Some(publisher) = self.publisher.take() {
            let name = publisher.name().to_string();
            if let Err(e) = publisher.close_and_unlink() {
                log::warn!("[SHM] Releasing segment {} failed: {}", name, e);
            }
        }
    }

    pub fn is_live(&self) -> bool {
        self.publisher.is_some()
    }
}

fn unavailable(e: ShmError) -> ConnectorError {
    ConnectorError::TransportUnavailable(e.to_string())
}
