// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Error codes shared by the HSE and SCMI drivers.

use thiserror::Error;

/// Errors reported by the drivers in this crate.
///
/// These are local result codes; failures on the SCMI forwarding path travel
/// back to the caller as [`crate::scmi::ScmiStatus`] wire codes instead. The
/// only condition in this crate that is not reported through either channel
/// is the secure-boot partial-initialization anomaly, which panics (see
/// [`crate::hse::HseDriver::is_secboot_active`]).
#[derive(Clone, Copy, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// A null, zero-sized or out-of-range argument.
    #[error("invalid argument")]
    InvalidArgument,
    /// The operation requires an initialization step that has not run yet.
    #[error("driver not initialized")]
    NotReady,
    /// The requested channel is occupied by an in-flight request.
    #[error("channel {0} busy")]
    Busy(u8),
    /// No message was pending where one was expected.
    #[error("no message pending")]
    IoError,
    /// A bounded poll loop ran out of its configured budget.
    #[error("timed out waiting for hardware")]
    Timeout,
    /// A fixed-capacity table is full.
    #[error("out of table capacity")]
    OutOfCapacity,
    /// The engine answered with a non-OK service response code.
    #[error("firmware rejected the request (response {0:#010x})")]
    HardwareRejected(u32),
    /// No free heap block large enough for the request.
    #[error("out of reserved memory")]
    AllocationFailed,
    /// The platform mapping collaborator could not provide a region.
    #[error("memory mapping failed")]
    MapFailed,
}
