//! Upper layer notification interface
//!
//! Protocol modules above the interface layer register themselves at
//! construction time and are addressed by their index in that registration
//! table. Each PDU's configuration names its owning module and the id the
//! module knows the PDU by.
//!
//! The historical zoo of per-module callback signatures collapses into one
//! method per direction; the per-signature differences live in the
//! [`Indication`] variants, selected per PDU through [`RxCallout`].

use canif_core::{CanId, ControllerId, FrameKind};

use crate::controller::ControllerMode;

/// Reception callout shape configured per receive PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxCallout {
    /// Payload only
    Basic,
    /// Payload only, network management flavor
    NetworkManagement,
    /// Payload with id-derived meta-data bytes appended
    Generic,
    /// Payload plus the matched identifier and frame format
    Advanced,
}

/// Reception notification passed to an upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indication<'a> {
    Basic { data: &'a [u8] },
    NetworkManagement { data: &'a [u8] },
    Generic { data: &'a [u8] },
    Advanced { can_id: CanId, kind: FrameKind, data: &'a [u8] },
}

impl<'a> Indication<'a> {
    pub fn data(&self) -> &'a [u8] {
        match *self {
            Indication::Basic { data } => data,
            Indication::NetworkManagement { data } => data,
            Indication::Generic { data } => data,
            Indication::Advanced { data, .. } => data,
        }
    }
}

/// Transmission outcome passed to an upper layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxResult {
    /// The PDU was handed to the hardware.
    Ok,
    /// The PDU was cancelled before reaching the hardware.
    NotSent,
}

/// Interface of an upper-layer protocol module
///
/// Methods are invoked outside of the stack's critical sections, so an
/// implementation may call back into the stack (e.g. transmit from within a
/// confirmation). Implementations must not block.
pub trait UpperLayer {
    /// A PDU owned by this module was received.
    fn rx_indication(&self, pdu: u16, indication: Indication<'_>);

    /// A transmission of a PDU owned by this module concluded.
    fn tx_confirmation(&self, pdu: u16, result: TxResult);

    /// The controller went bus-off. Transmissions were flushed.
    fn controller_bus_off(&self, controller: ControllerId) {
        let _ = controller;
    }

    /// The controller completed a state transition.
    fn controller_mode_indication(&self, controller: ControllerId, mode: ControllerMode) {
        let _ = (controller, mode);
    }
}
