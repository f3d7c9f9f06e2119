// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Messaging Unit transport towards the HSE firmware.
//!
//! One MU instance carries 16 service channels. A request is a single 32-bit
//! word (the physical address of a service descriptor) written to the
//! channel's transmit register; the response is a 32-bit service code read
//! from the receive register. The flag, transmit and receive status registers
//! together tell whether a channel can accept work.

use crate::{
    Error,
    platform::{HseMemmap, HseMemoryMap},
    sync::poll_until,
};
use bitflags::bitflags;
use core::ptr::NonNull;
use log::{error, info};
use safe_mmio::{
    UniqueMmioPointer, field, field_shared,
    fields::{ReadOnly, ReadPure, ReadPureWrite},
};

/// Service channels per MU instance.
pub const NUM_CHANNELS: u8 = 16;

/// Interrupt mask covering every service channel.
const CH_MASK_ALL: u32 = 0xffff;
/// Interrupt mask covering every general-purpose event.
const EVT_MASK_ALL: u32 = 0xffff_ffff;
/// Host-side "peripheral configuration done" handshake bit in GCR.
const PERIPH_CONFIG_DONE: u32 = 1 << 0;

bitflags! {
    /// HSE global status, the 16 MSB of the flag status register.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct HseStatus: u16 {
        /// The firmware random-number generator is seeded.
        const RNG_INIT_OK = 1 << 5;
        /// The firmware completed its basic initialization.
        const INIT_OK = 1 << 8;
        /// Key catalogs are installed and custom services are usable.
        const INSTALL_OK = 1 << 9;
        /// The secure-boot flow accepted the boot chain.
        const BOOT_OK = 1 << 10;
    }
}

/// HSE Messaging Unit instance registers.
#[repr(C)]
pub(crate) struct MuRegisters {
    /// Version ID register, offset 0x0.
    ver: ReadPure<u32>,
    /// Parameter register, offset 0x4.
    par: ReadPure<u32>,
    /// Control register, offset 0x8.
    cr: ReadPureWrite<u32>,
    /// Status register, offset 0xC.
    sr: ReadPure<u32>,
    _reserved0: [u8; 240],
    /// Flag control register, offset 0x100.
    fcr: ReadPureWrite<u32>,
    /// Flag status register, offset 0x104.
    fsr: ReadPure<u32>,
    _reserved1: [u8; 8],
    /// General interrupt enable register, offset 0x110.
    gier: ReadPureWrite<u32>,
    /// General control register, offset 0x114.
    gcr: ReadPureWrite<u32>,
    /// General status register, offset 0x118.
    gsr: ReadPureWrite<u32>,
    _reserved2: [u8; 4],
    /// Transmit control register, offset 0x120.
    tcr: ReadPureWrite<u32>,
    /// Transmit status register, offset 0x124.
    tsr: ReadPure<u32>,
    /// Receive control register, offset 0x128.
    rcr: ReadPureWrite<u32>,
    /// Receive status register, offset 0x12C.
    rsr: ReadPure<u32>,
    _reserved3: [u8; 208],
    /// Transmit registers, offset 0x200.
    tr: [ReadPureWrite<u32>; NUM_CHANNELS as usize],
    _reserved4: [u8; 64],
    /// Receive registers, offset 0x280. Reading consumes the pending flag.
    rr: [ReadOnly<u32>; NUM_CHANNELS as usize],
}

/// The per-channel interrupt classes the MU can raise towards the host.
#[derive(Clone, Copy, Debug)]
enum IrqType {
    /// TX interrupt, raised when HSE acknowledged a request and released the
    /// channel.
    AckRequest,
    /// RX interrupt, raised when HSE wrote the response.
    Response,
    /// General-purpose interrupt, raised for system events, usually error
    /// notifications.
    SysEvent,
}

/// Driver for one MU interface.
///
/// `not initialized → initialized` is the only state transition; there is no
/// teardown. Status queries are valid in either state and report "nothing"
/// before [`Mu::init`] so early boot probing stays simple.
pub struct Mu<'a> {
    regs: UniqueMmioPointer<'a, MuRegisters>,
    desc: HseMemmap,
    initialized: bool,
}

impl<'a> Mu<'a> {
    /// Maps the MU register block and descriptor space of this instance
    /// through the platform collaborator.
    pub fn new(map: &dyn HseMemoryMap) -> Result<Self, Error> {
        let regs = map.map_mu_regs()?;
        if regs.size < size_of::<MuRegisters>() {
            return Err(Error::MapFailed);
        }
        let regs = NonNull::new(regs.vaddr as *mut MuRegisters).ok_or(Error::MapFailed)?;
        let desc = map.map_mu_desc()?;

        Ok(Self {
            // SAFETY: The `HseMemoryMap` contract guarantees the mapping is
            // valid device memory for the life of the stage and unaliased.
            regs: unsafe { UniqueMmioPointer::new(regs) },
            desc,
            initialized: false,
        })
    }

    /// Performs the initial setup of the interface. Idempotent.
    ///
    /// Masks all three interrupt classes (this driver only ever polls), then
    /// drains responses a previous boot stage may have left pending so the
    /// channel status reflects reality.
    pub fn init(&mut self) {
        if self.initialized {
            return;
        }

        self.irq_disable(IrqType::AckRequest, CH_MASK_ALL);
        self.irq_disable(IrqType::Response, CH_MASK_ALL);
        self.irq_disable(IrqType::SysEvent, EVT_MASK_ALL);

        self.initialized = true;

        for channel in 0..NUM_CHANNELS {
            if self.msg_pending(channel) != Ok(true) {
                continue;
            }
            if let Ok(msg) = self.msg_recv(channel) {
                info!("channel {channel}: msg {msg:#010x} dropped");
            }
        }
    }

    /// Returns the HSE global status from the 16 MSB of the flag status
    /// register, or no flags at all before [`Mu::init`].
    pub fn check_status(&self) -> HseStatus {
        if !self.initialized {
            return HseStatus::empty();
        }
        let fsr = field_shared!(self.regs, fsr).read();
        HseStatus::from_bits_truncate((fsr >> 16) as u16)
    }

    /// Checks whether `channel` can accept a new service request.
    ///
    /// A channel is free only if its flag-status bit is clear (no request in
    /// flight), its transmit-status bit is set (hardware accepts a write) and
    /// its receive-status bit is clear (no unread response).
    pub fn channel_available(&self, channel: u8) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if channel >= NUM_CHANNELS {
            return Err(Error::InvalidArgument);
        }

        let bit = 1u32 << channel;
        let fsr = field_shared!(self.regs, fsr).read() & bit;
        let tsr = field_shared!(self.regs, tsr).read() & bit;
        let rsr = field_shared!(self.regs, rsr).read() & bit;

        if fsr != 0 || tsr == 0 || rsr != 0 {
            error!("channel {channel} busy");
            return Err(Error::Busy(channel));
        }

        Ok(())
    }

    /// Sends a message over the MU without blocking.
    pub fn msg_send(&mut self, channel: u8, msg: u32) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if channel >= NUM_CHANNELS {
            return Err(Error::InvalidArgument);
        }
        self.channel_available(channel)?;

        field!(self.regs, tr)
            .get(channel.into())
            .ok_or(Error::InvalidArgument)?
            .write(msg);
        Ok(())
    }

    /// Checks whether a service response is pending on `channel`.
    pub fn msg_pending(&self, channel: u8) -> Result<bool, Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if channel >= NUM_CHANNELS {
            return Err(Error::InvalidArgument);
        }
        let rsr = field_shared!(self.regs, rsr).read();
        Ok(rsr & (1 << channel) != 0)
    }

    /// Reads a pending response from `channel` without blocking.
    ///
    /// The read consumes the channel's receive-status bit.
    pub fn msg_recv(&mut self, channel: u8) -> Result<u32, Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }
        if channel >= NUM_CHANNELS {
            return Err(Error::InvalidArgument);
        }
        if !self.msg_pending(channel)? {
            error!("no message pending on channel {channel}");
            return Err(Error::IoError);
        }

        Ok(field!(self.regs, rr)
            .get(channel.into())
            .ok_or(Error::InvalidArgument)?
            .read())
    }

    /// Returns the service-descriptor space dedicated to this MU instance.
    pub fn descriptor_space(&self) -> HseMemmap {
        self.desc
    }

    /// Signals the firmware that host-side peripheral configuration is done.
    ///
    /// Part of the early-boot handshake: the firmware defers parts of its own
    /// initialization until the host has configured clocks.
    pub fn signal_periph_config_done(&mut self) {
        field!(self.regs, gcr).write(PERIPH_CONFIG_DONE);
    }

    /// Waits for the firmware to report basic initialization.
    ///
    /// Valid before [`Mu::init`]; this is the other half of the early-boot
    /// handshake. An exhausted poll budget reports [`Error::Timeout`].
    pub fn wait_firmware_init(&self, budget: Option<u32>) -> Result<(), Error> {
        let init_ok = (HseStatus::INIT_OK.bits() as u32) << 16;
        let done = poll_until(budget, || {
            field_shared!(self.regs, fsr).read() & init_ok != 0
        });
        if done { Ok(()) } else { Err(Error::Timeout) }
    }

    /// Clears `mask` from the enable register of one interrupt class.
    fn irq_disable(&mut self, irq_type: IrqType, mask: u32) {
        match irq_type {
            IrqType::AckRequest => {
                let cur = field_shared!(self.regs, tcr).read();
                field!(self.regs, tcr).write(cur & !(mask & CH_MASK_ALL));
            }
            IrqType::Response => {
                let cur = field_shared!(self.regs, rcr).read();
                field!(self.regs, rcr).write(cur & !(mask & CH_MASK_ALL));
            }
            IrqType::SysEvent => {
                let cur = field_shared!(self.regs, gier).read();
                field!(self.regs, gier).write(cur & !(mask & EVT_MASK_ALL));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::platform::HseMemoryMap;
    use core::array;

    /// Size of the fake descriptor space (16 channels of 256 bytes).
    pub(crate) const DESC_SPACE_SIZE: usize = 4096;
    /// Size of the fake reserved memory region.
    pub(crate) const RES_MEM_SIZE: usize = 1024;

    /// A fake HSE: leaked register block, descriptor space and reserved
    /// memory, plus an `HseMemoryMap` view of them for the drivers.
    pub(crate) struct FakeHse {
        regs: *mut MuRegisters,
        desc: *mut u8,
        res: *mut u8,
    }

    impl FakeHse {
        pub(crate) fn new() -> Self {
            let regs = Box::leak(Box::new(MuRegisters {
                ver: ReadPure(0),
                par: ReadPure(0),
                cr: ReadPureWrite(0),
                sr: ReadPure(0),
                _reserved0: [0; 240],
                fcr: ReadPureWrite(0),
                fsr: ReadPure(0),
                _reserved1: [0; 8],
                gier: ReadPureWrite(0),
                gcr: ReadPureWrite(0),
                gsr: ReadPureWrite(0),
                _reserved2: [0; 4],
                tcr: ReadPureWrite(0),
                tsr: ReadPure(0),
                rcr: ReadPureWrite(0),
                rsr: ReadPure(0),
                _reserved3: [0; 208],
                tr: array::from_fn(|_| ReadPureWrite(0)),
                _reserved4: [0; 64],
                rr: array::from_fn(|_| ReadOnly(0)),
            }));
            let desc = Box::leak(Box::new([0u8; DESC_SPACE_SIZE]));
            let res = Box::leak(Box::new([0u8; RES_MEM_SIZE]));
            Self {
                regs,
                desc: desc.as_mut_ptr(),
                res: res.as_mut_ptr(),
            }
        }

        /// Stages the 16-bit global status in the fake FSR.
        pub(crate) fn set_status(&self, status: HseStatus) {
            // SAFETY: The register block is leaked and only touched through
            // volatile accesses.
            unsafe {
                let fsr = &raw mut (*self.regs).fsr;
                fsr.write_volatile(ReadPure((status.bits() as u32) << 16));
            }
        }

        /// Raises a channel's flag-status bit in the low FSR half, marking a
        /// request as still in flight.
        pub(crate) fn set_channel_flag(&self, channel: u8) {
            // SAFETY: As in `set_status`.
            unsafe {
                let fsr = &raw mut (*self.regs).fsr;
                let cur = fsr.read_volatile().0;
                fsr.write_volatile(ReadPure(cur | 1 << channel));
            }
        }

        /// Marks `channel` able to accept transmissions.
        pub(crate) fn set_tx_ready(&self, channel: u8) {
            // SAFETY: As in `set_status`.
            unsafe {
                let tsr = &raw mut (*self.regs).tsr;
                let cur = tsr.read_volatile().0;
                tsr.write_volatile(ReadPure(cur | 1 << channel));
            }
        }

        /// Stages a pending response word on `channel`.
        pub(crate) fn set_response(&self, channel: u8, msg: u32) {
            // SAFETY: As in `set_status`.
            unsafe {
                let rsr = &raw mut (*self.regs).rsr;
                let cur = rsr.read_volatile().0;
                rsr.write_volatile(ReadPure(cur | 1 << channel));
                let rr = &raw mut (*self.regs).rr[channel as usize];
                rr.write_volatile(ReadOnly(msg));
            }
        }

        /// Reads back what the driver wrote to a transmit register.
        pub(crate) fn tr(&self, channel: u8) -> u32 {
            // SAFETY: As in `set_status`.
            unsafe { (&raw const (*self.regs).tr[channel as usize]).read_volatile().0 }
        }

        /// Reads back an interrupt-enable register (tcr, rcr, gier).
        pub(crate) fn irq_enables(&self) -> (u32, u32, u32) {
            // SAFETY: As in `set_status`.
            unsafe {
                (
                    (&raw const (*self.regs).tcr).read_volatile().0,
                    (&raw const (*self.regs).rcr).read_volatile().0,
                    (&raw const (*self.regs).gier).read_volatile().0,
                )
            }
        }

        /// Pre-loads the interrupt-enable registers with all-ones.
        pub(crate) fn enable_all_irqs(&self) {
            // SAFETY: As in `set_status`.
            unsafe {
                (&raw mut (*self.regs).tcr).write_volatile(ReadPureWrite(u32::MAX));
                (&raw mut (*self.regs).rcr).write_volatile(ReadPureWrite(u32::MAX));
                (&raw mut (*self.regs).gier).write_volatile(ReadPureWrite(u32::MAX));
            }
        }

        /// Reads back the general control register.
        pub(crate) fn gcr(&self) -> u32 {
            // SAFETY: As in `set_status`.
            unsafe { (&raw const (*self.regs).gcr).read_volatile().0 }
        }

        /// Base address of the fake descriptor space.
        pub(crate) fn desc_base(&self) -> usize {
            self.desc as usize
        }

        /// Plays the engine's part for one request: waits until the driver
        /// announces a descriptor on `channel`, then stages `response`.
        pub(crate) fn auto_respond(
            &self,
            channel: u8,
            response: u32,
        ) -> std::thread::JoinHandle<()> {
            struct SendRegs(*mut MuRegisters);
            // SAFETY: The register block is leaked memory, accessed only
            // volatilely from both sides of this test-only handshake.
            unsafe impl Send for SendRegs {}

            let regs = SendRegs(self.regs);
            std::thread::spawn(move || {
                // Bind the whole wrapper first so the closure captures
                // `SendRegs` (which is `Send`) rather than disjointly
                // capturing the inner `*mut MuRegisters` field.
                let regs = regs;
                let regs = regs.0;
                loop {
                    // SAFETY: As in `set_status`.
                    let announced =
                        unsafe { (&raw const (*regs).tr[channel as usize]).read_volatile().0 };
                    if announced != 0 {
                        break;
                    }
                    std::thread::yield_now();
                }
                // SAFETY: As in `set_status`.
                unsafe {
                    (&raw mut (*regs).rr[channel as usize]).write_volatile(ReadOnly(response));
                    let rsr = &raw mut (*regs).rsr;
                    let cur = rsr.read_volatile().0;
                    rsr.write_volatile(ReadPure(cur | 1 << channel));
                }
            })
        }
    }

    // SAFETY: The fake regions are leaked, valid for the whole test and only
    // handed to one driver instance per fake.
    unsafe impl HseMemoryMap for FakeHse {
        fn map_mu_regs(&self) -> Result<HseMemmap, Error> {
            Ok(HseMemmap {
                vaddr: self.regs as usize,
                paddr: self.regs as u64,
                size: size_of::<MuRegisters>(),
            })
        }

        fn map_mu_desc(&self) -> Result<HseMemmap, Error> {
            Ok(HseMemmap {
                vaddr: self.desc as usize,
                paddr: 0x2270_0000,
                size: DESC_SPACE_SIZE,
            })
        }

        fn map_res_mem(&self) -> Result<HseMemmap, Error> {
            Ok(HseMemmap {
                vaddr: self.res as usize,
                paddr: 0x2280_0000,
                size: RES_MEM_SIZE,
            })
        }
    }
}
