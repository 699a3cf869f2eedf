// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network transport: asynchronous publish through the process participant.
//!
//! Each consumer buffer is fed by one topic subscription whose sink runs on
//! the participant receive thread. Releasing the transport removes those
//! subscriptions; the participant itself stays alive.

use super::TransportSetup;
use crate::connector::ConnectorError;
use crate::participant::{Participant, ParticipantError, SubscriptionId, Topic, TypeDescriptor};
use crate::port::PortData;
use std::marker::PhantomData;
use std::sync::Arc;

pub(crate) struct NetworkTransport<T> {
    participant: Option<Arc<Participant>>,
    topic: Option<Topic>,
    subscriptions: Vec<SubscriptionId>,
    outbound: Vec<u8>,
    _element: PhantomData<fn(T)>,
}

impl<T: PortData> NetworkTransport<T> {
    pub fn acquire(setup: &TransportSetup<'_, T>) -> Result<Self, ConnectorError> {
        let manager = setup.context.participants().ok_or_else(|| {
            ConnectorError::TransportUnavailable(
                "network transport requires a participant manager".to_string(),
            )
        })?;
        let participant = manager.get_or_init().map_err(unavailable)?;

        let descriptor = TypeDescriptor::of::<T>();
        participant.register_type(descriptor.clone());
        let topic_name = setup
            .profile
            .topic()
            .unwrap_or(setup.producer.name.as_str())
            .to_string();
        let topic = participant
            .create_topic(&topic_name, descriptor.name())
            .map_err(unavailable)?;

        let mut transport = Self {
            participant: Some(Arc::clone(&participant)),
            topic: Some(topic.clone()),
            subscriptions: Vec::with_capacity(setup.sinks.len()),
            outbound: Vec::new(),
            _element: PhantomData,
        };

        for sink in setup.sinks {
            let sink = Arc::clone(sink);
            let topic_label = topic_name.clone();
            let id = participant.subscribe(&topic, move |payload| match T::decode(payload) {
                Ok(value) => {
                    if let Err(e) = sink.write(value) {
                        log::debug!("[Connector] '{}' sample not buffered: {}", topic_label, e);
                    }
                }
                Err(e) => log::warn!("[Connector] '{}' undecodable sample: {}", topic_label, e),
            });
            transport.subscriptions.push(id);
        }

        log::info!(
            "[Connector] {} publishing on topic '{}' via participant '{}'",
            setup.connector,
            topic_name,
            participant.name()
        );
        Ok(transport)
    }

    pub fn deliver(&mut self, value: &T) -> Result<(), ConnectorError> {
        let (Some(participant), Some(topic)) = (self.participant.as_ref(), self.topic.as_ref())
        else {
            return Err(ConnectorError::Disconnected);
        };
        self.outbound.clear();
        value.encode(&mut self.outbound);
        match participant.publish(topic, &self.outbound) {
            Ok(_) => Ok(()),
            Err(ParticipantError::PayloadTooLarge { size, capacity }) => {
                Err(ConnectorError::PayloadTooLarge { size, capacity })
            }
            Err(ParticipantError::Closed) => Err(ConnectorError::Disconnected),
            Err(e) => Err(unavailable(e)),
        }
    }

    pub fn release(&mut self) {
        if let (Some(participant), Some(topic)) = (self.participant.take(), self.topic.take()) {
            for id in self.subscriptions.drain(..) {
                participant.unsubscribe(&topic, id);
            }
        }
        self.subscriptions.clear();
    }

    pub fn is_live(&self) -> bool {
        self.participant.as_ref().is_some_and(|p| p.is_running())
    }
}

fn unavailable(e: ParticipantError) -> ConnectorError {
    ConnectorError::TransportUnavailable(e.to_string())
}
