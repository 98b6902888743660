//! Client sessions and the per-instance acceptance filter.

use crate::config::InstanceConfig;
use crate::delivery::{Delivered, DeliveredList, RxPacket, RxToken};
use crate::icmp;
use crate::info::{CastType, Datagram, RxStatus};
use crate::packet::Packet;
use crate::parsing::Ipv4Header;
use std::collections::VecDeque;
use std::sync::Mutex;
use thiserror::Error as ThisError;

/// A client session on an interface.
///
/// An instance starts out unconfigured and ignores all traffic. Once
/// configured it filters the datagrams fanned out on its interface into
/// its receive queue, where they wait for the client to hand in a receive
/// token.
#[derive(Debug, Default)]
pub struct Instance {
    state: Mutex<InstanceState>,
    received: Mutex<VecDeque<Datagram>>,
    tokens: Mutex<VecDeque<RxToken>>,
    delivered: DeliveredList,
}

#[derive(Debug, Default)]
enum InstanceState {
    #[default]
    Unconfigured,
    Configured(InstanceConfig),
    Stopping,
}

impl Instance {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Brings the instance up with the given configuration.
    pub fn configure(&self, config: InstanceConfig) -> Result<(), ConfigError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            InstanceState::Unconfigured => {
                *state = InstanceState::Configured(config);
                Ok(())
            }
            InstanceState::Configured(_) => Err(ConfigError::AlreadyConfigured),
            InstanceState::Stopping => Err(ConfigError::Stopping),
        }
    }

    /// Returns the instance to its unconfigured state. Queued datagrams
    /// are flushed and pending receive tokens are cancelled by dropping
    /// their completions. Wrappers already with the client stay valid
    /// until recycled.
    pub fn reset(&self) {
        *self.state.lock().unwrap() = InstanceState::Unconfigured;
        self.flush();
    }

    /// Marks the instance as going away for teardown.
    pub fn stop(&self) {
        *self.state.lock().unwrap() = InstanceState::Stopping;
        self.flush();
    }

    fn flush(&self) {
        self.received.lock().unwrap().clear();
        self.tokens.lock().unwrap().clear();
    }

    /// Joins a multicast group.
    pub fn join_group(&self, group: crate::address::Ipv4Address) -> Result<(), ConfigError> {
        if !group.is_multicast() {
            return Err(ConfigError::NotMulticast);
        }
        let mut state = self.state.lock().unwrap();
        let config = match &mut *state {
            InstanceState::Configured(config) => config,
            InstanceState::Unconfigured => return Err(ConfigError::NotStarted),
            InstanceState::Stopping => return Err(ConfigError::Stopping),
        };
        if config.groups.contains(&group) {
            return Err(ConfigError::AlreadyJoined);
        }
        config.groups.push(group);
        Ok(())
    }

    /// Leaves a previously joined multicast group.
    pub fn leave_group(&self, group: crate::address::Ipv4Address) -> Result<(), ConfigError> {
        let mut state = self.state.lock().unwrap();
        let config = match &mut *state {
            InstanceState::Configured(config) => config,
            InstanceState::Unconfigured => return Err(ConfigError::NotStarted),
            InstanceState::Stopping => return Err(ConfigError::Stopping),
        };
        let before = config.groups.len();
        config.groups.retain(|joined| *joined != group);
        if config.groups.len() == before {
            return Err(ConfigError::NoSuchGroup);
        }
        Ok(())
    }

    /// Queues a receive token and immediately matches it against any
    /// datagrams already waiting.
    pub fn receive(&self, token: RxToken) -> Result<(), ReceiveError> {
        {
            let state = self.state.lock().unwrap();
            let config = match &*state {
                InstanceState::Configured(config) => config,
                _ => return Err(ReceiveError::NotStarted),
            };
            if config.receive_timeout.is_disabled() {
                return Err(ReceiveError::ReceiveDisabled);
            }
            self.tokens.lock().unwrap().push_back(token);
        }
        self.deliver();
        Ok(())
    }

    /// The number of datagrams waiting for a receive token.
    pub fn received_count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    /// The number of wrappers currently out with the client.
    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    /// Decides whether this instance wants the datagram, and with what
    /// delivery status. `cast` is the classification local to the
    /// interface being fanned out.
    pub(crate) fn wants(
        &self,
        header: &Ipv4Header,
        body: &Packet,
        cast: CastType,
    ) -> Result<RxStatus, AcceptError> {
        let state = self.state.lock().unwrap();
        let config = match &*state {
            InstanceState::Configured(config) => config,
            _ => return Err(AcceptError::NotStarted),
        };

        // A send-only instance never queues anything
        if config.receive_timeout.is_disabled() {
            return Err(AcceptError::Unwanted);
        }

        let icmp_error = icmp::is_error(header.protocol, body);
        let status = if icmp_error {
            RxStatus::IcmpError
        } else {
            RxStatus::Success
        };

        if config.accept_promiscuous {
            return Ok(status);
        }

        // An ICMP error speaks for the datagram it reports on, so filter
        // it by the protocol of the embedded header.
        let effective_protocol = if icmp_error {
            if !config.accept_icmp_errors {
                return Err(AcceptError::Unwanted);
            }
            icmp::embedded_protocol(body).ok_or(AcceptError::Unwanted)?
        } else {
            header.protocol
        };

        if !config.accept_any_protocol && effective_protocol != config.default_protocol {
            return Err(AcceptError::Unwanted);
        }

        match cast {
            CastType::LocalBroadcast | CastType::SubnetBroadcast => {
                if config.accept_broadcast {
                    Ok(status)
                } else {
                    Err(AcceptError::Unwanted)
                }
            }
            CastType::Multicast => {
                let accepts_all = config.use_default_address && config.station_address.is_zero();
                if accepts_all || config.groups.contains(&header.destination) {
                    Ok(status)
                } else {
                    Err(AcceptError::Unwanted)
                }
            }
            _ => Ok(status),
        }
    }

    /// The life ticks a freshly queued datagram gets, from this
    /// instance's receive timeout.
    pub(crate) fn receive_life(&self) -> u32 {
        match &*self.state.lock().unwrap() {
            InstanceState::Configured(config) => config.receive_timeout.life_ticks(),
            _ => 0,
        }
    }

    pub(crate) fn enqueue(&self, datagram: Datagram) {
        self.received.lock().unwrap().push_back(datagram);
    }

    /// Matches queued datagrams to pending receive tokens until either
    /// runs dry.
    ///
    /// A token can be cancelled at any point up to the completion
    /// itself. Only a successful completion consumes the datagram;
    /// every other outcome puts it back at the head of the queue for the
    /// next token.
    pub(crate) fn deliver(&self) {
        loop {
            let (datagram, token) = {
                let mut received = self.received.lock().unwrap();
                if received.is_empty() {
                    return;
                }
                let mut tokens = self.tokens.lock().unwrap();
                let Some(token) = tokens.pop_front() else {
                    return;
                };
                (received.pop_front().unwrap(), token)
            };

            if token.is_closed() {
                tracing::debug!("receive token vanished before delivery, requeueing");
                self.received.lock().unwrap().push_front(datagram);
                continue;
            }

            let status = datagram.info.status;
            let header = datagram.header.clone();
            let info = datagram.info;
            let packet = RxPacket::wrap(datagram, self.delivered.clone());
            self.delivered.lock().unwrap().push(packet.clone());

            if let Err(returned) = token.complete(Delivered {
                status,
                packet: packet.clone(),
            }) {
                tracing::debug!("receive token vanished mid delivery, unpublishing");
                self.delivered
                    .lock()
                    .unwrap()
                    .retain(|wrapper| !std::sync::Arc::ptr_eq(wrapper, &packet));
                // Recover the payload from the stillborn wrapper; once
                // its handles drop the clone is the sole owner again.
                let body = returned.packet.body().clone();
                drop(returned);
                drop(packet);
                self.received.lock().unwrap().push_front(Datagram {
                    header,
                    body,
                    info,
                });
            }
        }
    }

    /// Ages the receive queue by one tick, discarding datagrams whose
    /// life runs out. A life of zero never expires.
    pub(crate) fn tick(&self) {
        let mut received = self.received.lock().unwrap();
        received.retain_mut(|datagram| {
            if datagram.info.life > 0 {
                datagram.info.life -= 1;
                if datagram.info.life == 0 {
                    tracing::debug!("queued datagram timed out waiting for a token");
                    return false;
                }
            }
            true
        });
    }
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("The instance is already configured")]
    AlreadyConfigured,
    #[error("The instance has not been configured")]
    NotStarted,
    #[error("The instance is being torn down")]
    Stopping,
    #[error("The address is not a multicast group")]
    NotMulticast,
    #[error("The group was already joined")]
    AlreadyJoined,
    #[error("The group was never joined")]
    NoSuchGroup,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    #[error("The instance has not been configured")]
    NotStarted,
    #[error("The instance is configured send-only")]
    ReceiveDisabled,
}

/// Why the filter declined a datagram.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptError {
    #[error("the instance has not been configured")]
    NotStarted,
    #[error("the instance does not want this datagram")]
    Unwanted,
}
