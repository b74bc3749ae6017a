//! Canif driver interface
//!
//! The crate provides an interface between a CAN device driver and the canif
//! stack. Limited scope facilitates compatibility across versions.
//! Driver crates should depend on this crate. Canif stack users should depend
//! on the `canif` crate instead.
//!
//! The stack calls downward through the [`Driver`] trait: frame writes into
//! hardware transmit objects and controller mode transition requests. Both
//! calls are synchronous and must not block; a busy transmit object is
//! reported through [`WriteOutcome::Busy`] so the stack can queue the frame in
//! software.
//!
//! Upward traffic (received frames, transmit confirmations, cancellation
//! outcomes, bus-off and mode indications) does not go through a trait. The
//! driver invokes the corresponding methods of the stack object directly from
//! its interrupt handlers or polling task; the stack keeps those paths
//! non-blocking and bounded.

#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod frame;

use canif_core::{ControllerId, Hth};

use crate::frame::Frame;

/// Outcome of a hardware write request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteOutcome {
    /// The frame was accepted into the hardware transmit object.
    Ok,
    /// The transmit object is occupied. The caller may retry later.
    Busy,
    /// The driver rejected the request. Nothing was written.
    NotOk,
}

/// Controller state transition request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeTransition {
    Start,
    Stop,
    Sleep,
    Wakeup,
}

/// The driver refused a controller mode transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransitionRejected;

/// Downward interface of a CAN controller driver
///
/// Implementations take `&self`; a driver guards its own hardware access
/// internally. All methods are called from within the stack's critical
/// sections and must complete in bounded time without blocking.
pub trait Driver {
    /// Requests transmission of `frame` through the hardware transmit object
    /// identified by `mailbox`.
    fn write(&self, mailbox: Hth, frame: &Frame) -> WriteOutcome;

    /// Requests a controller state transition.
    ///
    /// Drivers may complete the transition asynchronously; completion is
    /// signalled back through the stack's mode indication entry point.
    fn mode_request(
        &self,
        controller: ControllerId,
        transition: ModeTransition,
    ) -> Result<(), TransitionRejected>;
}

impl<T: Driver + ?Sized> Driver for &T {
    fn write(&self, mailbox: Hth, frame: &Frame) -> WriteOutcome {
        (**self).write(mailbox, frame)
    }

    fn mode_request(
        &self,
        controller: ControllerId,
        transition: ModeTransition,
    ) -> Result<(), TransitionRejected> {
        (**self).mode_request(controller, transition)
    }
}
