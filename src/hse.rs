// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Hardware Security Engine service layer.
//!
//! Requests are fixed-size service descriptors, copied into a per-channel
//! slot in shared memory and announced to the engine by writing the slot's
//! physical address over the [`mu`] transport. The protocol is synchronous
//! with a single outstanding request per channel: send, poll, read the
//! response code. Callers that share a channel serialize by construction —
//! only specific boot stages talk to the engine, one at a time.

pub mod mem;
pub mod mu;

use crate::{
    Error,
    platform::HseMemoryMap,
};
use core::hint::spin_loop;
use log::{error, info};
use mem::HseHeap;
use mu::{HseStatus, Mu};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Size of a service descriptor, and of each channel's descriptor slot.
pub const MAX_DESCR_SIZE: usize = 256;

/// Service id of the get-attribute administrative request.
const SRV_ID_GET_ATTR: u32 = 0x00a5_0002;
/// The firmware's "request served successfully" response code.
const SRV_RSP_OK: u32 = 0x55a5_aa33;
/// Attribute id of the firmware version record.
const FW_VERSION_ATTR_ID: u16 = 1;

/// The service channels this driver uses.
///
/// The firmware restricts channel zero to administrative services; the rest
/// of the MU's channels are usable for crypto operations, of which this
/// driver claims one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HseChannel {
    /// Restricted to administrative services (attribute queries).
    Admin = 0,
    /// Available for cryptographic service requests.
    Crypto = 1,
}

impl HseChannel {
    /// Channels in use.
    pub const COUNT: usize = 2;

    fn index(self) -> usize {
        self as usize
    }
}

/// One HSE service descriptor.
///
/// The internal layout belongs to the engine firmware's service enumeration;
/// this driver treats it as an opaque buffer it copies verbatim, interpreting
/// nothing beyond the leading service id.
#[derive(Clone, Copy, FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
pub struct ServiceDescriptor {
    data: [u8; MAX_DESCR_SIZE],
}

impl ServiceDescriptor {
    /// Wraps raw descriptor bytes prepared by a caller.
    pub fn from_bytes(data: [u8; MAX_DESCR_SIZE]) -> Self {
        Self { data }
    }

    /// Builds a get-attribute request for `attr_id`, asking the firmware to
    /// write `attr_len` bytes to the physical address `attr_paddr`.
    pub fn get_attribute(attr_id: u16, attr_len: u32, attr_paddr: u64) -> Self {
        let mut data = [0; MAX_DESCR_SIZE];
        data[0..4].copy_from_slice(&SRV_ID_GET_ATTR.to_le_bytes());
        data[4..6].copy_from_slice(&attr_id.to_le_bytes());
        data[8..12].copy_from_slice(&attr_len.to_le_bytes());
        data[12..20].copy_from_slice(&attr_paddr.to_le_bytes());
        Self { data }
    }

    /// The service id in the leading word.
    pub fn service_id(&self) -> u32 {
        let mut id = [0; 4];
        id.copy_from_slice(&self.data[0..4]);
        u32::from_le_bytes(id)
    }
}

/// The firmware version record returned by the ADMIN attribute query.
#[derive(
    Clone, Copy, Debug, Default, Eq, FromBytes, Immutable, IntoBytes, KnownLayout, PartialEq,
)]
#[repr(C)]
pub struct FwVersion {
    reserved: [u8; 2],
    /// SoC the firmware was built for.
    pub soc_type_id: u16,
    /// Firmware flavour: 0 standard, 1 premium, anything else custom.
    pub fw_type_id: u16,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch level.
    pub patch: u16,
}

impl FwVersion {
    /// Human-readable firmware flavour.
    pub fn fw_type_name(&self) -> &'static str {
        match self.fw_type_id {
            0 => "Standard",
            1 => "Premium",
            _ => "Custom",
        }
    }
}

#[derive(Clone, Copy, Default)]
struct DescriptorSlot {
    vaddr: usize,
    paddr: u64,
}

/// The HSE driver: MU transport, per-channel descriptor slots and the
/// allocator over the reserved request-buffer memory.
pub struct HseDriver<'a> {
    mu: Mu<'a>,
    map: &'a dyn HseMemoryMap,
    srv_desc: [DescriptorSlot; HseChannel::COUNT],
    heap: Option<HseHeap>,
    firmware_version: FwVersion,
    initialized: bool,
    poll_budget: Option<u32>,
}

impl<'a> HseDriver<'a> {
    /// Creates the driver and maps the MU register block and descriptor
    /// space. Nothing is sent to the engine yet.
    pub fn new(map: &'a dyn HseMemoryMap) -> Result<Self, Error> {
        Ok(Self {
            mu: Mu::new(map)?,
            map,
            srv_desc: [DescriptorSlot::default(); HseChannel::COUNT],
            heap: None,
            firmware_version: FwVersion::default(),
            initialized: false,
            poll_budget: None,
        })
    }

    /// Bounds every response-wait loop to `budget` poll iterations.
    ///
    /// The platform's historical behavior is an unbounded wait (a hung
    /// engine hangs the boot); this knob is a hardening option for ports
    /// that prefer a diagnosable [`Error::Timeout`].
    pub fn with_poll_budget(mut self, budget: u32) -> Self {
        self.poll_budget = Some(budget);
        self
    }

    /// Initializes the driver's internal resources. Idempotent.
    ///
    /// Verifies the firmware reports basic initialization, binds each
    /// channel's descriptor slot, sets up the allocator over the reserved
    /// memory region and finally queries the firmware version over the ADMIN
    /// channel — if that query fails, initialization is rolled back and the
    /// error propagated.
    pub fn init(&mut self) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }

        self.mu.init();

        let status = self.mu.check_status();
        if !status.contains(HseStatus::INIT_OK) {
            error!("HSE firmware not initialised");
            return Err(Error::NotReady);
        }

        self.config_channels();

        let res_mem = self.map.map_res_mem()?;
        // SAFETY: The `HseMemoryMap` contract guarantees the reserved region
        // is valid for the stage's lifetime and handed to this driver alone.
        self.heap = Some(unsafe { HseHeap::new(res_mem) }?);

        self.initialized = true;

        if let Err(e) = self.get_fw_version() {
            self.initialized = false;
            return Err(e);
        }

        let v = self.firmware_version;
        info!(
            "{} hse firmware, version {}.{}.{}",
            v.fw_type_name(),
            v.major,
            v.minor,
            v.patch
        );
        info!("HSE is successfully initialized");

        Ok(())
    }

    /// Initiates a service request on `channel` and waits for the response.
    ///
    /// The caller's descriptor is copied into the channel's persistent slot
    /// and its physical address sent over the MU; the call then polls until
    /// the engine responds. Any response other than the firmware's OK code is
    /// reported as [`Error::HardwareRejected`] carrying the raw code.
    pub fn srv_req_sync(
        &mut self,
        channel: HseChannel,
        srv_desc: &ServiceDescriptor,
    ) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotReady);
        }

        let slot = self.srv_desc[channel.index()];
        // SAFETY: The slot was carved out of the descriptor space mapping,
        // which the `HseMemoryMap` contract guarantees is valid and covers
        // `MAX_DESCR_SIZE` bytes per channel. The descriptor fills the whole
        // slot, so stale bytes from earlier requests cannot survive.
        unsafe {
            mem::copy(
                slot.vaddr as *mut u8,
                srv_desc.as_bytes().as_ptr(),
                MAX_DESCR_SIZE,
            );
        }

        let msg = u32::try_from(slot.paddr).map_err(|_| Error::InvalidArgument)?;
        self.mu.msg_send(channel.index() as u8, msg)?;

        let mut budget = self.poll_budget;
        loop {
            if self.mu.msg_pending(channel.index() as u8)? {
                break;
            }
            if let Some(left) = &mut budget {
                if *left == 0 {
                    return Err(Error::Timeout);
                }
                *left -= 1;
            }
            spin_loop();
        }

        let srv_rsp = self.mu.msg_recv(channel.index() as u8)?;
        if srv_rsp == SRV_RSP_OK {
            return Ok(());
        }

        error!("HSE service request failed (service response: {srv_rsp:#010x})");
        Err(Error::HardwareRejected(srv_rsp))
    }

    /// Reports whether the platform booted in secure mode.
    ///
    /// BOOT_OK means the engine attested the boot chain; a missing INIT_OK
    /// means secure boot never engaged. INIT_OK without BOOT_OK means the
    /// engine came up and then rejected the boot chain — a security flaw
    /// with no recovery, so this panics rather than returning.
    pub fn is_secboot_active(&mut self) -> bool {
        self.mu.init();
        let status = self.mu.check_status();

        if status.contains(HseStatus::BOOT_OK) {
            return true;
        }
        if !status.contains(HseStatus::INIT_OK) {
            return false;
        }

        panic!("HSE initialised but the secure boot flow failed");
    }

    /// The firmware version cached by [`HseDriver::init`].
    pub fn firmware_version(&self) -> FwVersion {
        self.firmware_version
    }

    /// The allocator over the reserved request-buffer memory, for callers
    /// that need DMA-visible buffers to reference from their descriptors.
    pub fn heap_mut(&mut self) -> Result<&mut HseHeap, Error> {
        self.heap.as_mut().ok_or(Error::NotReady)
    }

    /// Signals the firmware that host-side peripheral configuration is done
    /// (early-boot handshake, valid before [`HseDriver::init`]).
    pub fn signal_periph_config_done(&mut self) {
        self.mu.signal_periph_config_done();
    }

    /// Waits for the firmware to report basic initialization (early-boot
    /// handshake, valid before [`HseDriver::init`]).
    pub fn wait_firmware_init(&self) -> Result<(), Error> {
        self.mu.wait_firmware_init(self.poll_budget)
    }

    fn config_channels(&mut self) {
        let desc = self.mu.descriptor_space();
        for (ch, slot) in self.srv_desc.iter_mut().enumerate() {
            let offset = ch * MAX_DESCR_SIZE;
            slot.vaddr = desc.vaddr + offset;
            slot.paddr = desc.paddr + offset as u64;
        }
    }

    fn get_fw_version(&mut self) -> Result<(), Error> {
        let heap = self.heap.as_mut().ok_or(Error::NotReady)?;
        let buf = heap.alloc(size_of::<FwVersion>())?;
        let paddr = heap.virt_to_phys(buf);

        let desc =
            ServiceDescriptor::get_attribute(FW_VERSION_ATTR_ID, size_of::<FwVersion>() as u32, paddr);
        let ret = self.srv_req_sync(HseChannel::Admin, &desc);

        if ret.is_ok() {
            let mut version = FwVersion::default();
            // SAFETY: `buf` is a live allocation of at least
            // `size_of::<FwVersion>()` bytes; the destination is a local.
            unsafe {
                mem::copy(
                    (&raw mut version).cast(),
                    buf.as_ptr(),
                    size_of::<FwVersion>(),
                );
            }
            self.firmware_version = version;
        }

        if let Ok(heap) = self.heap_mut() {
            heap.free(Some(buf));
        }
        ret
    }
}
