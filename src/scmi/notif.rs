// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! The asynchronous SCMI notification path.
//!
//! The SCP raises the shared RX interrupt after writing a notification into
//! the RX mailbox. GPIO events are re-published into a dedicated mailbox and
//! a platform interrupt is pended so the non-secure observer can consume
//! them; every other protocol's notifications are ignored for now. The
//! companion [`GpioEirqAck`] handler acknowledges GPIO external-IRQ events
//! locally, as an internal message, without involving the SCP.

use super::{
    Mailbox, ScmiProtocol,
    channel::{Doorbell, InternalMsgHandler, RxInfo, ScpScmi},
};
use crate::{Error, platform::{InterruptController, MemRegion}};
use log::debug;
use percore::Cores;

/// Message id of the GPIO external-IRQ acknowledge internal message.
pub const SCMI_GPIO_ACK_IRQ: u32 = 0xff;

impl<C: Cores, D: Doorbell> ScpScmi<'_, C, D> {
    /// Handles the shared RX-channel interrupt.
    ///
    /// The hardware only interrupts with the mailbox claimed and a packet
    /// that fits it; both are asserted as logic invariants. Registries
    /// configured without an RX side ignore the call.
    pub fn handle_rx_interrupt(&self, ic: &dyn InterruptController) {
        let Some(rx) = self.rx() else {
            return;
        };
        let mailbox = rx_mailbox(rx);

        assert!(!mailbox.is_free());
        assert!(mailbox.packet_size() <= mailbox.capacity());

        let proto = mailbox.header().protocol_id();
        if proto == ScmiProtocol::Gpio.into() {
            process_gpio_notification(rx, &mailbox, ic);
        }
    }
}

fn process_gpio_notification(rx: &RxInfo, mailbox: &Mailbox, ic: &dyn InterruptController) {
    if mailbox.packet_size() > mailbox.capacity() {
        return;
    }

    // SAFETY: The registry constructor contract vouches for the configured
    // notification mailbox region.
    let notif = unsafe { Mailbox::new(rx.notif_mailbox) };
    if notif.copy_message_from(mailbox).is_err() {
        return;
    }

    ic.set_interrupt_pending(rx.notif_irq);
}

fn rx_mailbox(rx: &RxInfo) -> Mailbox {
    // SAFETY: The registry constructor contract vouches for the configured
    // RX mailbox region.
    unsafe { Mailbox::new(rx.mailbox) }
}

/// Acknowledges a GPIO external-IRQ event by releasing the RX mailbox.
///
/// Registered with the router as the `(GPIO, SCMI_GPIO_ACK_IRQ)` internal
/// message, so the acknowledgement never crosses the hardware boundary.
pub struct GpioEirqAck {
    rx_mailbox: MemRegion,
}

impl GpioEirqAck {
    /// Builds the handler over the shared RX mailbox region.
    ///
    /// # Safety
    ///
    /// `rx_mailbox` must be the same valid shared-memory region the registry
    /// was configured with.
    pub unsafe fn new(rx_mailbox: MemRegion) -> Self {
        Self { rx_mailbox }
    }
}

impl InternalMsgHandler for GpioEirqAck {
    fn handle(&self, _msg: &Mailbox) -> Result<(), Error> {
        debug!("GPIO eirq acknowledged");
        // Nothing to perform other than marking the channel as free.
        // SAFETY: The constructor contract vouches for the region.
        let mailbox = unsafe { Mailbox::new(self.rx_mailbox) };
        mailbox.mark_free();
        Ok(())
    }
}
