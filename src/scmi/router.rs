// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The SCMI message router.
//!
//! Requests arrive in the caller's shared buffer, already mailbox-shaped.
//! The router filters them against the protocol allow-list, answers a small
//! set of `(protocol, message id)` pairs locally, and forwards everything
//! else to the SCP: copy into the channel's TX mailbox, ring, spin for
//! completion, copy the response back. Failures travel to the caller as SCMI
//! wire codes, never as local errors.

use super::{
    FLAG_RESP_POLL, Mailbox, ScmiProtocol, ScmiStatus,
    channel::{ChannelMode, InternalMsg, ScmiChannelType, ScpScmi},
};
use crate::{scmi::channel::Doorbell, sync::poll_until};
use percore::Cores;

/// Protocols a caller may address at all. Everything else is refused before
/// any mailbox or doorbell is touched.
fn is_proto_allowed(proto: u32) -> bool {
    match ScmiProtocol::try_from(proto) {
        Ok(p) => matches!(
            p,
            ScmiProtocol::Base
                | ScmiProtocol::Perf
                | ScmiProtocol::Clock
                | ScmiProtocol::ResetDomain
                | ScmiProtocol::Pinctrl
                | ScmiProtocol::Gpio
                | ScmiProtocol::Nvmem
        ),
        Err(_) => false,
    }
}

impl<C: Cores, D: Doorbell> ScpScmi<'_, C, D> {
    /// Routes one SCMI request and returns the wire status for the caller.
    ///
    /// `msg` is the caller's shared buffer; the response is copied back into
    /// it on success. `ty` is the raw channel-role selector, meaningful (and
    /// validated) only when split channels are enabled.
    pub fn send_to_scp(&self, msg: &Mailbox, ty: u32) -> ScmiStatus {
        if !is_proto_allowed(msg.header().protocol_id()) {
            return ScmiStatus::Denied;
        }

        if self.mode() == ChannelMode::Split && ScmiChannelType::try_from(ty).is_err() {
            return ScmiStatus::Denied;
        }

        if msg.packet_size() > self.tx_mailbox_size(ty) {
            return ScmiStatus::OutOfRange;
        }

        if let Some(intern) = self.find_internal_msg(msg) {
            return self.handle_internal_msg(intern, msg);
        }

        self.forward_to_scp(msg, ty)
    }

    fn find_internal_msg(&self, msg: &Mailbox) -> Option<&InternalMsg<'_>> {
        let header = msg.header();
        self.internal_msgs
            .iter()
            .find(|m| m.proto == header.protocol_id() && m.msg_id == header.message_id())
    }

    /// Answers an intercepted message locally, without crossing the hardware
    /// boundary, and releases the caller's buffer.
    fn handle_internal_msg(&self, intern: &InternalMsg<'_>, msg: &Mailbox) -> ScmiStatus {
        if intern.handler.handle(msg).is_err() {
            return ScmiStatus::GenericError;
        }
        msg.mark_free();
        ScmiStatus::Success
    }

    fn forward_to_scp(&self, msg: &Mailbox, ty: u32) -> ScmiStatus {
        let Some((_, channel)) = self.get_channel(ty) else {
            return ScmiStatus::GenericError;
        };
        let mailbox = channel.mailbox();

        if !poll_until(self.poll_budget, || mailbox.is_free()) {
            return ScmiStatus::CommsError;
        }

        if mailbox.copy_message_from(msg).is_err() {
            return ScmiStatus::OutOfRange;
        }
        mailbox.mark_free();

        // All commands must complete with a poll, not an interrupt, whatever
        // the agent asked for.
        mailbox.set_flags(FLAG_RESP_POLL);

        let guard = channel.acquire(C::core_index());
        let sent = guard.send_sync(self.poll_budget);
        drop(guard);
        if sent.is_err() {
            return ScmiStatus::CommsError;
        }

        if msg.copy_message_from(&mailbox).is_err() {
            return ScmiStatus::OutOfRange;
        }

        ScmiStatus::Success
    }
}
