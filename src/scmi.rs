// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! SCMI transport towards the System Control Processor.
//!
//! Wire format of the shared-memory mailboxes, plus the channel registry
//! ([`channel`]), the message router ([`router`]) and the asynchronous
//! notification path ([`notif`]). One mailbox carries one message at a time,
//! guarded by the free bit of its status word; a doorbell write tells the SCP
//! that the mailbox has news for it.

pub mod channel;
pub mod notif;
pub mod router;

use crate::{Error, platform::MemRegion};
use core::{mem::offset_of, ptr::NonNull};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// SCMI status codes as they travel on the wire.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(i32)]
pub enum ScmiStatus {
    /// The command was accepted and will complete asynchronously.
    Queued = 1,
    /// The command completed successfully.
    Success = 0,
    /// The command is not supported.
    NotSupported = -1,
    /// One or more parameters are invalid.
    InvalidParameters = -2,
    /// The caller is not permitted to issue this command.
    Denied = -3,
    /// The addressed entity does not exist.
    NotFound = -4,
    /// A value is outside the legal range, or a buffer is too small.
    OutOfRange = -5,
    /// The recipient is busy.
    Busy = -6,
    /// Communication with the platform failed.
    CommsError = -7,
    /// An unclassified error occurred.
    GenericError = -8,
    /// A hardware error occurred.
    HardwareError = -9,
    /// A protocol error occurred.
    ProtocolError = -10,
}

/// SCMI protocol ids, including the vendor extensions above 0x80.
#[derive(Clone, Copy, Debug, Eq, IntoPrimitive, PartialEq, TryFromPrimitive)]
#[repr(u32)]
pub enum ScmiProtocol {
    /// Base protocol.
    Base = 0x10,
    /// Power-domain management.
    PowerDomain = 0x11,
    /// System power management.
    System = 0x12,
    /// Performance-domain management.
    Perf = 0x13,
    /// Clock management.
    Clock = 0x14,
    /// Sensor management.
    Sensor = 0x15,
    /// Reset-domain management.
    ResetDomain = 0x16,
    /// Voltage-domain management.
    Voltage = 0x17,
    /// Pin control (vendor extension).
    Pinctrl = 0x80,
    /// GPIO control (vendor extension).
    Gpio = 0x81,
    /// NVMEM access (vendor extension).
    Nvmem = 0x82,
}

/// "Respond by polling" — the only response mode this transport permits.
pub const FLAG_RESP_POLL: u32 = 0;

/// Channel-free bit of the mailbox status word.
const STATUS_FREE: u32 = 1 << 0;

/// The fixed leading part of a mailbox message.
#[derive(FromBytes, Immutable, IntoBytes, KnownLayout)]
#[repr(C)]
struct MailboxMem {
    status: u32,
    _reserved: [u8; 8],
    flags: u32,
    len: u32,
    msg_header: u32,
}

/// Byte offset of the message header; `len` counts from here.
const MSG_HEADER_OFFSET: usize = offset_of!(MailboxMem, msg_header);
/// Byte offset of the payload.
const PAYLOAD_OFFSET: usize = size_of::<MailboxMem>();

/// The packed SCMI message header: message id, type, protocol id and token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageHeader(u32);

impl MessageHeader {
    /// Packs a header from its fields.
    pub const fn new(protocol: u32, message_id: u32, token: u32) -> Self {
        Self((message_id & 0xff) | (protocol & 0xff) << 10 | (token & 0x3ff) << 18)
    }

    /// The message id in bits [7:0].
    pub const fn message_id(self) -> u32 {
        self.0 & 0xff
    }

    /// The protocol id in bits [17:10].
    pub const fn protocol_id(self) -> u32 {
        (self.0 >> 10) & 0xff
    }

    /// The transaction token in bits [27:18].
    pub const fn token(self) -> u32 {
        (self.0 >> 18) & 0x3ff
    }
}

/// One shared-memory mailbox.
///
/// A cheap view over a configured region; the status and length words are
/// accessed volatilely because the SCP mutates them concurrently. Cloning the
/// view is fine — it owns nothing.
#[derive(Clone, Copy)]
pub struct Mailbox {
    base: NonNull<u8>,
    size: usize,
}

impl Mailbox {
    /// Wraps `region` as a mailbox.
    ///
    /// # Safety
    ///
    /// `region` must describe memory that is valid for reads and writes for
    /// the life of this view and only otherwise accessed by the remote side
    /// of the transport (or by other views created from the same
    /// configuration record).
    pub unsafe fn new(region: MemRegion) -> Self {
        let base = NonNull::new(region.base as *mut u8);
        let base = base.expect("mailbox region has a null base");
        assert!(region.size >= PAYLOAD_OFFSET);
        Self {
            base,
            size: region.size,
        }
    }

    /// The region size, bounding the largest packet this mailbox can hold.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// The raw status word.
    pub fn status(&self) -> u32 {
        self.read_word(offset_of!(MailboxMem, status))
    }

    /// Whether the channel is free (the remote side owns a busy channel).
    pub fn is_free(&self) -> bool {
        self.status() & STATUS_FREE != 0
    }

    /// Sets the free bit, returning mailbox ownership to this side's peer.
    pub fn mark_free(&self) {
        self.write_word(offset_of!(MailboxMem, status), self.status() | STATUS_FREE);
    }

    /// Clears the free bit before ringing the doorbell.
    pub fn mark_busy(&self) {
        self.write_word(offset_of!(MailboxMem, status), self.status() & !STATUS_FREE);
    }

    /// The channel flags word.
    pub fn flags(&self) -> u32 {
        self.read_word(offset_of!(MailboxMem, flags))
    }

    /// Overwrites the channel flags word.
    pub fn set_flags(&self, flags: u32) {
        self.write_word(offset_of!(MailboxMem, flags), flags);
    }

    /// The message length: header plus payload bytes.
    pub fn length(&self) -> u32 {
        self.read_word(offset_of!(MailboxMem, len))
    }

    /// The message header.
    pub fn header(&self) -> MessageHeader {
        MessageHeader(self.read_word(MSG_HEADER_OFFSET))
    }

    /// Total size of the packet currently in the mailbox.
    pub fn packet_size(&self) -> usize {
        MSG_HEADER_OFFSET + self.length() as usize
    }

    /// Stores a message (header and payload) and its length word.
    pub fn set_message(&self, header: MessageHeader, payload: &[u8]) {
        let len = size_of::<u32>() + payload.len();
        assert!(MSG_HEADER_OFFSET + len <= self.size);
        self.write_word(offset_of!(MailboxMem, len), len as u32);
        self.write_word(MSG_HEADER_OFFSET, header.0);
        // SAFETY: Bounds were asserted above; the region is valid per the
        // constructor contract.
        unsafe {
            self.base
                .as_ptr()
                .add(PAYLOAD_OFFSET)
                .copy_from_nonoverlapping(payload.as_ptr(), payload.len());
        }
    }

    /// Copies the packet held by `src` into this mailbox.
    ///
    /// Fails with [`Error::OutOfCapacity`] before copying anything if the
    /// packet does not fit.
    pub fn copy_message_from(&self, src: &Mailbox) -> Result<(), Error> {
        let copy_len = src.packet_size();
        if copy_len > self.size || copy_len > src.size {
            return Err(Error::OutOfCapacity);
        }
        // SAFETY: `copy_len` was checked against both regions, which are
        // valid per the constructor contract; distinct mailboxes never
        // overlap.
        unsafe {
            self.base
                .as_ptr()
                .copy_from_nonoverlapping(src.base.as_ptr(), copy_len);
        }
        Ok(())
    }

    fn read_word(&self, offset: usize) -> u32 {
        assert!(offset + size_of::<u32>() <= self.size);
        // SAFETY: In bounds per the assertion; valid per the constructor
        // contract. Volatile because the SCP writes concurrently.
        unsafe { self.base.as_ptr().add(offset).cast::<u32>().read_volatile() }
    }

    fn write_word(&self, offset: usize, value: u32) {
        assert!(offset + size_of::<u32>() <= self.size);
        // SAFETY: As in `read_word`.
        unsafe {
            self.base
                .as_ptr()
                .add(offset)
                .cast::<u32>()
                .write_volatile(value);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A heap-backed mailbox region for tests.
    pub(crate) struct TestRegion {
        backing: Box<[u8]>,
    }

    impl TestRegion {
        pub(crate) fn new(size: usize) -> Self {
            Self {
                backing: vec![0u8; size].into_boxed_slice(),
            }
        }

        /// Fills the region with a sentinel byte.
        pub(crate) fn fill(&mut self, byte: u8) {
            self.backing.fill(byte);
        }

        pub(crate) fn region(&self) -> MemRegion {
            MemRegion {
                base: self.backing.as_ptr() as usize,
                size: self.backing.len(),
            }
        }

        pub(crate) fn mailbox(&self) -> Mailbox {
            // SAFETY: The backing buffer lives as long as the `TestRegion`
            // and is only accessed through mailbox views.
            unsafe { Mailbox::new(self.region()) }
        }

        pub(crate) fn bytes(&self) -> &[u8] {
            &self.backing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::TestRegion, *};

    #[test]
    fn header_packs_and_unpacks() {
        let header = MessageHeader::new(0x81, 0xff, 0x2a5);
        assert_eq!(header.protocol_id(), 0x81);
        assert_eq!(header.message_id(), 0xff);
        assert_eq!(header.token(), 0x2a5);

        // Out-of-range fields are masked, not smeared over neighbours.
        let header = MessageHeader::new(0x1ff, 0x1ff, 0xfff);
        assert_eq!(header.protocol_id(), 0xff);
        assert_eq!(header.message_id(), 0xff);
        assert_eq!(header.token(), 0x3ff);
    }

    #[test]
    fn packet_size_counts_from_the_message_header() {
        let region = TestRegion::new(128);
        let mb = region.mailbox();
        mb.set_message(MessageHeader::new(0x14, 6, 0), &[1, 2, 3, 4]);

        assert_eq!(mb.length(), 8);
        assert_eq!(mb.packet_size(), MSG_HEADER_OFFSET + 8);
    }

    #[test]
    fn status_bit_twiddling_preserves_other_bits() {
        let region = TestRegion::new(128);
        let mb = region.mailbox();

        mb.mark_free();
        assert!(mb.is_free());
        mb.mark_busy();
        assert!(!mb.is_free());
        // An error bit set by the remote side survives both transitions.
        mb.write_word(0, 1 << 1);
        mb.mark_free();
        mb.mark_busy();
        assert_eq!(mb.status(), 1 << 1);
    }

    #[test]
    fn copy_rejects_oversize_packets_without_partial_copy() {
        let src_region = TestRegion::new(256);
        let src = src_region.mailbox();
        src.set_message(MessageHeader::new(0x14, 6, 0), &[0x55; 100]);

        let mut dst_region = TestRegion::new(64);
        dst_region.fill(0xee);
        let dst = dst_region.mailbox();

        assert_eq!(dst.copy_message_from(&src), Err(Error::OutOfCapacity));
        assert!(dst_region.bytes().iter().all(|&b| b == 0xee));
    }

    #[test]
    fn copy_transfers_the_whole_packet() {
        let src_region = TestRegion::new(128);
        let src = src_region.mailbox();
        src.set_message(MessageHeader::new(0x10, 0, 1), &[9, 8, 7]);

        let dst_region = TestRegion::new(128);
        let dst = dst_region.mailbox();
        dst.copy_message_from(&src).unwrap();

        assert_eq!(dst.header(), src.header());
        assert_eq!(dst.length(), src.length());
        let n = src.packet_size();
        assert_eq!(dst_region.bytes()[..n], src_region.bytes()[..n]);
    }
}
