// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SCP SCMI channel registry and doorbells.
//!
//! Channels come in two static shapes, chosen by the platform build: one TX
//! mailbox per application core, or a PSCI/OSPM channel pair shared by every
//! core ("split channels"). Either way a channel binds a mailbox region, a
//! doorbell and a bakery lock; the SCMI protocol-library handshake runs once,
//! on a channel's first use, and its handle is cached for the boot's
//! remaining lifetime.

use super::Mailbox;
use crate::{
    Error,
    platform::{self, MemRegion},
    sync::{BakeryGuard, BakeryLock, poll_until},
};
use arrayvec::ArrayVec;
use core::marker::PhantomData;
use log::error;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use percore::Cores;
use spin::Once;

/// Upper bound on internal `(protocol, message id)` interception slots.
pub const MAX_INTERNAL_MSGS: usize = 4;

/// Role of a channel when split channels are enabled.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ScmiChannelType {
    /// The channel reserved for PSCI-initiated traffic.
    Psci = 0,
    /// The channel for OS-initiated power management traffic.
    Ospm = 1,
}

impl ScmiChannelType {
    fn name(self) -> &'static str {
        match self {
            Self::Psci => "PSCI",
            Self::Ospm => "OSPM",
        }
    }
}

/// How channels map to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelMode {
    /// One TX channel per application core, selected by the calling core.
    PerCore,
    /// A PSCI and an OSPM channel shared by all cores, selected by role.
    Split,
}

/// An MSCM core-to-core interrupt route.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IrqRoute {
    /// Target processor number.
    pub cpn: u32,
    /// Inter-processor interrupt number within the target's register slice.
    pub mscm_irq: u32,
    /// The GIC interrupt the route raises, for handler registration.
    pub plat_irq: u32,
}

/// Rings a channel's doorbell towards the SCP.
pub trait Doorbell {
    /// Tells the remote side that the mailbox has news for it.
    fn ring(&self);
}

/// The MSCM doorbell: a write to the interrupt-generation register selected
/// by the route's `(processor number, interrupt number)` pair.
pub struct MscmDoorbell {
    base: usize,
    route: IrqRoute,
    /// Doorbell-register bits to leave untouched. The IGR has write-one
    /// semantics, so ringing never needs it; kept for ports whose doorbell
    /// register is shared state.
    pub preserve_mask: u32,
    /// Doorbell-register bits to set when ringing.
    pub modify_mask: u32,
}

impl MscmDoorbell {
    /// Creates a doorbell ringing `route` through the MSCM at `base`.
    ///
    /// # Safety
    ///
    /// `base` must be the mapped MSCM register block, valid for the life of
    /// the doorbell.
    pub unsafe fn new(base: usize, route: IrqRoute) -> Self {
        Self {
            base,
            route,
            preserve_mask: 0xffff_fffe,
            modify_mask: 0x1,
        }
    }

    /// Address of the route's interrupt-generation register.
    ///
    /// Panics if the route exceeds the MSCM's processor or interrupt maxima.
    pub fn igr_addr(&self) -> usize {
        assert!(self.route.cpn <= platform::MSCM_CPN_MAX);
        assert!(self.route.mscm_irq <= platform::MSCM_C2C_IRQ_MAX);

        let offset = self
            .base
            .checked_add(0x4)
            .and_then(|a| a.checked_add(platform::MSCM_IRPC_OFFSET))
            .and_then(|a| a.checked_add(self.route.cpn as usize * platform::MSCM_CPN_SIZE))
            .and_then(|a| a.checked_add(self.route.mscm_irq as usize * 0x8));
        offset.expect("MSCM doorbell register address overflows")
    }
}

impl Doorbell for MscmDoorbell {
    fn ring(&self) {
        let reg = self.igr_addr() as *mut u32;
        // SAFETY: The constructor contract guarantees the MSCM block is
        // mapped; the IGR write-one semantics need no read-modify-write.
        unsafe { reg.write_volatile(self.modify_mask) };
    }
}

/// A handle minted by the SCMI protocol library once a channel has completed
/// its base-protocol handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScmiHandle(u32);

impl ScmiHandle {
    /// Wraps the protocol library's raw handle value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Static description of one TX channel's memory and doorbell routing.
#[derive(Clone, Copy, Debug)]
pub struct ChannelPlatInfo {
    /// The channel's TX mailbox.
    pub mailbox: MemRegion,
    /// Metadata region for the SCMI transaction logger, when enabled.
    pub metadata: Option<MemRegion>,
    /// MSCM route of the channel's doorbell.
    pub doorbell_route: IrqRoute,
}

/// The RX side: shared notification mailbox plus where notifications for the
/// non-secure observer are re-published.
#[derive(Clone, Copy, Debug)]
pub struct RxInfo {
    /// The shared RX mailbox the SCP writes notifications into.
    pub mailbox: MemRegion,
    /// Metadata region for the SCMI transaction logger, when enabled.
    pub metadata: Option<MemRegion>,
    /// The MSCM route the SCP rings for RX traffic.
    pub irq: IrqRoute,
    /// Mailbox into which GPIO notifications are re-published for OSPM.
    pub notif_mailbox: MemRegion,
    /// Interrupt raised towards the non-secure observer.
    pub notif_irq: u32,
}

/// The SCMI protocol library, external to this crate.
///
/// In the reference system this is the Arm CSS SCMI driver; in unit tests a
/// fake. Channel registration performs the base-protocol version handshake
/// against the SCP over the channel's own mailbox.
pub trait ScmiProtocolStack {
    /// Registers a channel with the remote protocol stack and returns the
    /// handle the library minted for it.
    fn init_channel(&self, info: &ChannelPlatInfo) -> Result<ScmiHandle, Error>;
}

/// A message the router answers locally instead of forwarding to the SCP.
pub trait InternalMsgHandler {
    /// Handles the intercepted message.
    fn handle(&self, msg: &Mailbox) -> Result<(), Error>;
}

pub(super) struct InternalMsg<'a> {
    pub(super) proto: u32,
    pub(super) msg_id: u32,
    pub(super) handler: &'a dyn InternalMsgHandler,
}

/// One TX channel: platform info, doorbell, lock and the exactly-once
/// protocol-stack registration slot.
pub struct ScmiChannel<D> {
    info: ChannelPlatInfo,
    doorbell: D,
    lock: BakeryLock<{ platform::CORE_COUNT }>,
    handle: Once<ScmiHandle>,
}

impl<D: Doorbell> ScmiChannel<D> {
    /// Binds `info` and its doorbell into a channel.
    pub fn new(info: ChannelPlatInfo, doorbell: D) -> Self {
        Self {
            info,
            doorbell,
            lock: BakeryLock::new(),
            handle: Once::new(),
        }
    }

    /// The channel's static platform description.
    pub fn info(&self) -> &ChannelPlatInfo {
        &self.info
    }

    pub(super) fn mailbox(&self) -> Mailbox {
        // SAFETY: The registry constructor contract vouches for the
        // configured mailbox regions.
        unsafe { Mailbox::new(self.info.mailbox) }
    }

    pub(super) fn acquire(&self, core: usize) -> ChannelGuard<'_, D> {
        ChannelGuard {
            channel: self,
            _lock: self.lock.lock(core),
        }
    }
}

/// Exclusive use of a channel; releases the bakery lock on drop so that
/// acquisition and release stay balanced on every dispatch path.
pub struct ChannelGuard<'a, D> {
    channel: &'a ScmiChannel<D>,
    _lock: BakeryGuard<'a, { platform::CORE_COUNT }>,
}

impl<D: Doorbell> ChannelGuard<'_, D> {
    /// Dispatches the request already staged in the mailbox and waits for
    /// the SCP to complete it: claim the mailbox, ring, spin until the SCP
    /// marks it free again.
    pub(super) fn send_sync(&self, budget: Option<u32>) -> Result<(), Error> {
        let mailbox = self.channel.mailbox();
        mailbox.mark_busy();
        self.channel.doorbell.ring();
        if poll_until(budget, || mailbox.is_free()) {
            Ok(())
        } else {
            Err(Error::Timeout)
        }
    }
}

/// The channel registry: every TX channel, the optional RX side and the
/// internal-message interception table.
///
/// `C` supplies the calling core's index (per-core channel selection and
/// bakery-lock slots); `D` is the doorbell flavour, [`MscmDoorbell`] outside
/// of tests.
pub struct ScpScmi<'a, C, D = MscmDoorbell> {
    mode: ChannelMode,
    channels: ArrayVec<ScmiChannel<D>, { platform::CORE_COUNT }>,
    rx: Option<RxInfo>,
    stack: &'a dyn ScmiProtocolStack,
    pub(super) internal_msgs: ArrayVec<InternalMsg<'a>, MAX_INTERNAL_MSGS>,
    pub(super) poll_budget: Option<u32>,
    _cores: PhantomData<C>,
}

impl<'a, C: Cores, D: Doorbell> ScpScmi<'a, C, D> {
    /// Builds the registry from already-constructed channels.
    ///
    /// Channels are expected in role order (PSCI then OSPM) in split mode,
    /// in core order otherwise.
    ///
    /// # Safety
    ///
    /// Every mailbox region in `channels` and `rx` must be valid shared
    /// memory for the registry's lifetime, accessed otherwise only by the
    /// SCP and by the non-secure notification observer.
    pub unsafe fn with_channels(
        mode: ChannelMode,
        channels: ArrayVec<ScmiChannel<D>, { platform::CORE_COUNT }>,
        rx: Option<RxInfo>,
        stack: &'a dyn ScmiProtocolStack,
    ) -> Self {
        Self {
            mode,
            channels,
            rx,
            stack,
            internal_msgs: ArrayVec::new(),
            poll_budget: None,
            _cores: PhantomData,
        }
    }

    /// Bounds every mailbox wait to `budget` poll iterations (hardening
    /// option; the platform default is to wait forever).
    pub fn set_poll_budget(&mut self, budget: Option<u32>) {
        self.poll_budget = budget;
    }

    /// Registers a local handler for `(proto, msg_id)` messages, which the
    /// router then answers without involving the SCP.
    ///
    /// Wired during single-core boot; the table is read-only afterwards.
    pub fn register_internal_msg_handler(
        &mut self,
        proto: u32,
        msg_id: u32,
        handler: &'a dyn InternalMsgHandler,
    ) -> Result<(), Error> {
        self.internal_msgs
            .try_push(InternalMsg {
                proto,
                msg_id,
                handler,
            })
            .map_err(|_| Error::OutOfCapacity)
    }

    /// The protocol-library handle of a channel, registering it on first
    /// use. `ty` is the raw role word in split mode and ignored otherwise.
    pub fn handle(&self, ty: u32) -> Option<ScmiHandle> {
        let (_, channel) = self.get_channel(ty)?;
        channel.handle.get().copied()
    }

    /// The RX interrupt to register the notification handler on.
    pub fn rx_plat_irq(&self) -> Option<u32> {
        self.rx.map(|rx| rx.irq.plat_irq)
    }

    /// A TX channel's logger metadata region.
    pub fn tx_metadata(&self, ty: u32) -> Option<MemRegion> {
        let (_, channel) = self.get_channel_raw(ty)?;
        channel.info.metadata
    }

    /// The RX mailbox's logger metadata region.
    pub fn rx_metadata(&self) -> Option<MemRegion> {
        self.rx.and_then(|rx| rx.metadata)
    }

    pub(super) fn mode(&self) -> ChannelMode {
        self.mode
    }

    pub(super) fn rx(&self) -> Option<&RxInfo> {
        self.rx.as_ref()
    }

    /// Size of the TX mailbox a request for `ty` would go out on, or zero
    /// for a selector no channel answers to.
    pub(super) fn tx_mailbox_size(&self, ty: u32) -> usize {
        match self.get_channel_raw(ty) {
            Some((_, channel)) => channel.info.mailbox.size,
            None => 0,
        }
    }

    /// Selects a channel and lazily runs its protocol-stack registration.
    ///
    /// Returns `None`, without panicking, when the selector is invalid or
    /// registration fails; a failed registration is retried on the next use.
    pub(super) fn get_channel(&self, ty: u32) -> Option<(usize, &ScmiChannel<D>)> {
        let (idx, channel) = self.get_channel_raw(ty)?;

        if channel
            .handle
            .try_call_once(|| self.stack.init_channel(&channel.info))
            .is_err()
        {
            match self.mode {
                ChannelMode::PerCore => {
                    error!("Failed to initialize SCMI channel for core {idx}");
                }
                ChannelMode::Split => {
                    // The selector was validated by `get_channel_raw`.
                    let name = ScmiChannelType::try_from(ty).map(ScmiChannelType::name);
                    error!("Failed to initialize SCMI {} channel", name.unwrap_or("?"));
                }
            }
            return None;
        }

        Some((idx, channel))
    }

    fn get_channel_raw(&self, ty: u32) -> Option<(usize, &ScmiChannel<D>)> {
        let idx = match self.mode {
            ChannelMode::Split => match ScmiChannelType::try_from(ty) {
                Ok(role) => role as usize,
                Err(_) => {
                    error!("Invalid SCMI channel type: {ty}");
                    return None;
                }
            },
            ChannelMode::PerCore => C::core_index(),
        };

        match self.channels.get(idx) {
            Some(channel) => Some((idx, channel)),
            None => {
                error!("Failed to get SCMI channel for core {idx}");
                None
            }
        }
    }
}

impl<'a, C: Cores> ScpScmi<'a, C> {
    /// Builds the registry with MSCM doorbells from the platform
    /// configuration.
    ///
    /// # Safety
    ///
    /// As for [`ScpScmi::with_channels`]; additionally `mscm_base` must be
    /// the mapped MSCM register block.
    pub unsafe fn new(
        mode: ChannelMode,
        mscm_base: usize,
        tx_channels: &[ChannelPlatInfo],
        rx: Option<RxInfo>,
        stack: &'a dyn ScmiProtocolStack,
    ) -> Self {
        let mut channels = ArrayVec::new();
        for info in tx_channels {
            // SAFETY: The caller vouches for the MSCM mapping.
            let doorbell = unsafe { MscmDoorbell::new(mscm_base, info.doorbell_route) };
            channels.push(ScmiChannel::new(*info, doorbell));
        }
        // SAFETY: The caller vouches for the mailbox regions.
        unsafe { Self::with_channels(mode, channels, rx, stack) }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use core::cell::Cell;

    /// A `Cores` implementation pinned to core 0 (unit tests are
    /// single-core).
    pub(crate) struct TestCores;

    // SAFETY: Unit tests running through this type are single-threaded, so a
    // constant index is exclusive enough.
    unsafe impl Cores for TestCores {
        fn core_index() -> usize {
            0
        }
    }

    /// A doorbell that counts rings and optionally plays the SCP's part:
    /// writing a canned reply into the channel mailbox and marking it free.
    pub(crate) struct FakeDoorbell {
        pub(crate) mailbox: Option<Mailbox>,
        pub(crate) reply: Option<(super::super::MessageHeader, &'static [u8])>,
        pub(crate) rings: Cell<usize>,
        pub(crate) seen_flags: Cell<Option<u32>>,
        pub(crate) seen_free: Cell<Option<bool>>,
    }

    impl FakeDoorbell {
        pub(crate) fn silent() -> Self {
            Self {
                mailbox: None,
                reply: None,
                rings: Cell::new(0),
                seen_flags: Cell::new(None),
                seen_free: Cell::new(None),
            }
        }

        pub(crate) fn answering(
            mailbox: Mailbox,
            reply: (super::super::MessageHeader, &'static [u8]),
        ) -> Self {
            Self {
                mailbox: Some(mailbox),
                reply: Some(reply),
                rings: Cell::new(0),
                seen_flags: Cell::new(None),
                seen_free: Cell::new(None),
            }
        }
    }

    impl Doorbell for FakeDoorbell {
        fn ring(&self) {
            self.rings.set(self.rings.get() + 1);
            if let Some(mailbox) = &self.mailbox {
                self.seen_flags.set(Some(mailbox.flags()));
                self.seen_free.set(Some(mailbox.is_free()));
                if let Some((header, payload)) = self.reply {
                    mailbox.set_message(header, payload);
                    mailbox.mark_free();
                }
            }
        }
    }

    /// A protocol stack that counts registrations and can fail the next one.
    pub(crate) struct FakeStack {
        pub(crate) registrations: Cell<usize>,
        pub(crate) fail_next: Cell<bool>,
    }

    impl FakeStack {
        pub(crate) fn new() -> Self {
            Self {
                registrations: Cell::new(0),
                fail_next: Cell::new(false),
            }
        }
    }

    impl ScmiProtocolStack for FakeStack {
        fn init_channel(&self, _info: &ChannelPlatInfo) -> Result<ScmiHandle, Error> {
            if self.fail_next.replace(false) {
                return Err(Error::IoError);
            }
            let n = self.registrations.get() + 1;
            self.registrations.set(n);
            Ok(ScmiHandle::new(n as u32))
        }
    }

    /// A doorbell route nothing validates against hardware in tests.
    pub(crate) const TEST_ROUTE: IrqRoute = IrqRoute {
        cpn: 0,
        mscm_irq: 0,
        plat_irq: 33,
    };

    impl<C> ScpScmi<'_, C, FakeDoorbell> {
        /// The fake doorbell of channel `idx`.
        pub(crate) fn channel_doorbell(&self, idx: usize) -> &FakeDoorbell {
            &self.channels[idx].doorbell
        }

        /// Total rings across every channel's fake doorbell.
        pub(crate) fn channels_doorbell_rings(&self) -> usize {
            self.channels.iter().map(|c| c.doorbell.rings.get()).sum()
        }
    }
}
