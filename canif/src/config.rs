//! Generated configuration tables
//!
//! The whole configuration is an immutable set of tables handed to the stack
//! by shared reference at construction. Entries cross-reference each other by
//! dense indices; [`Config::validate`] checks every index and structural
//! invariant once, so the running stack can rely on plain O(1) table lookups.
//!
//! Table layout rules the generator must follow:
//! * Transmit PDUs of one mailbox form the contiguous range
//!   [`TxMailboxConfig::first`] ..= [`TxMailboxConfig::last`]. Within the
//!   range a higher id means a higher transmit priority.
//! * Receive PDUs of a shared (Basic) mailbox form one contiguous range with
//!   the identifier-range entries at the bottom and the single-id entries at
//!   the top. Both segments are searched downwards and carry an explicit
//!   terminator flag on their lowest entry ([`RxPduConfig::stop`],
//!   [`RxPduConfig::stop_range`]).

use canif_core::{CanId, ControllerId, FrameKind, Hrh, Hth, RxPduId, TxPduId};

use crate::queue::Policy;
use crate::upper::RxCallout;

/// Per-controller configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerConfig {
    /// Wake-up validation source, if validation is used at all
    pub wakeup_validation: WakeupValidation,
    /// Whether entering a wake-filter PDU mode arms the transmit filter
    pub pn_tx_filter: bool,
    /// Seed mixed into both identifier hashes of this controller's mailboxes
    pub hash_seed: u32,
}

/// What counts as a wake-up-validating reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeupValidation {
    Off,
    /// Any accepted frame validates the wake-up.
    AllFrames,
    /// Only the designated network-management PDU validates the wake-up.
    NmOnly(RxPduId),
}

/// Per-transmit-PDU configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxPduConfig {
    pub can_id: CanId,
    /// Identifier bits replaced by meta-data bytes; ignored without meta-data
    pub mask: u32,
    pub kind: FrameKind,
    /// Configured maximum payload length in bytes
    pub length: u8,
    /// Longer payloads are truncated instead of rejected
    pub truncation: bool,
    /// Owning hardware transmit object
    pub mailbox: Hth,
    /// Slot in the dynamic-id storage, for PDUs with a changeable identifier
    pub dynamic: Option<u16>,
    /// Count of trailing payload bytes carrying identifier meta-data (0..=4)
    pub meta_data_len: u8,
    /// Transmission is allowed while the partial-networking filter is active
    pub pn_filter_pass: bool,
    /// Owning upper-layer module (index into the registration table)
    pub upper: u8,
    /// The id under which the owning module knows this PDU
    pub upper_id: u16,
}

/// Reception processing switch, changeable at runtime per PDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceptionMode {
    Process,
    /// Matching frames are dropped as if unconfigured.
    Ignore,
}

/// Identifier range accepted by a range entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxRange {
    /// Accepts ids where `raw & mask == code`
    CodeMask { code: u32, mask: u32 },
    /// Accepts raw ids in `lower..=upper`; bounds carry the format flag
    Bounds { lower: u32, upper: u32 },
}

impl RxRange {
    pub fn contains(&self, can_id: CanId) -> bool {
        let raw = can_id.raw();
        match *self {
            RxRange::CodeMask { code, mask } => raw & mask == code,
            RxRange::Bounds { lower, upper } => lower <= raw && raw <= upper,
        }
    }
}

/// Per-receive-PDU configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxPduConfig {
    pub can_id: CanId,
    /// Identifier bits compared for dynamic PDUs and copied into meta-data
    pub mask: u32,
    pub kind: FrameKind,
    /// Frames of the other format do not match this entry
    pub kind_check: bool,
    /// Identifier comparison uses the mask instead of exact equality
    pub dynamic: bool,
    /// Shorter frames are dropped with a diagnostic
    pub min_length: u8,
    /// Accepted identifier range; `None` for single-id entries
    pub range: Option<RxRange>,
    /// Terminates the downward walk of the single-id segment
    pub stop: bool,
    /// Terminates the downward walk of the range segment
    pub stop_range: bool,
    /// Initial reception mode
    pub reception: ReceptionMode,
    /// Count of id-derived meta-data bytes appended to the payload (0..=4)
    pub meta_data_len: u8,
    /// Callout shape used for the upper-layer notification
    pub callout: RxCallout,
    /// Owning upper-layer module (index into the registration table)
    pub upper: u8,
    /// The id under which the owning module knows this PDU
    pub upper_id: u16,
}

/// Reference from a transmit mailbox to its software queue
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueueRef {
    /// Index into the queue storage handed over at construction
    pub index: u8,
    pub policy: Policy,
}

/// Per-hardware-transmit-object configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TxMailboxConfig {
    pub controller: ControllerId,
    /// First transmit PDU owned by this mailbox
    pub first: TxPduId,
    /// Last transmit PDU owned by this mailbox
    pub last: TxPduId,
    /// Software queue absorbing writes while the hardware object is busy
    pub queue: Option<QueueRef>,
}

impl TxMailboxConfig {
    pub fn pdu_span(&self) -> usize {
        usize::from(self.last) - usize::from(self.first) + 1
    }
}

/// Identification strategy of a shared receive mailbox
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxSearch {
    /// Downward walk over the single-id segment
    Linear,
    /// Two-hash adjustment-table lookup over the single-id segment
    DoubleHash,
}

/// How a receive mailbox binds to receive PDUs
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxBinding {
    /// Dedicated hardware object: the PDU identity is free.
    Full(RxPduId),
    /// Shared hardware object: identity is resolved in software.
    Basic {
        /// First receive PDU of the mailbox's contiguous range
        first: RxPduId,
        /// Last receive PDU of the range (top of the single-id segment)
        last: RxPduId,
        /// Top of the range-entry segment; `None` without range entries.
        /// Range entries occupy `first..=range_top`, single-id entries the
        /// rest above.
        range_top: Option<RxPduId>,
        search: RxSearch,
    },
}

/// Per-hardware-receive-object configuration
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RxMailboxConfig {
    pub controller: ControllerId,
    pub binding: RxBinding,
}

/// Shared tables of the double-hash identifier search
///
/// Both hashes multiply the seeded raw identifier by an odd constant and use
/// high product bits to index an adjustment table; the summed adjustments,
/// wrapped modulo the receive PDU count, name the candidate PDU.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HashConfig<'a> {
    pub mul1: u32,
    pub mul2: u32,
    /// Adjustment tables; lengths must be powers of two
    pub table1: &'a [u16],
    pub table2: &'a [u16],
}

/// The complete immutable configuration
#[derive(Debug, Clone, Copy)]
pub struct Config<'a> {
    pub controllers: &'a [ControllerConfig],
    pub tx_pdus: &'a [TxPduConfig],
    pub rx_pdus: &'a [RxPduConfig],
    /// Indexed by hardware transmit handle
    pub tx_mailboxes: &'a [TxMailboxConfig],
    /// Indexed by hardware receive handle
    pub rx_mailboxes: &'a [RxMailboxConfig],
    /// Required when any mailbox uses [`RxSearch::DoubleHash`]
    pub hash: Option<HashConfig<'a>>,
}

/// A malformed generated table
///
/// Carries the index of the first offending entry. Construction fails; no
/// partially validated stack is ever handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    Controller(u8),
    TxPdu(u16),
    RxPdu(u16),
    TxMailbox(u16),
    RxMailbox(u16),
    Hash,
}

impl<'a> Config<'a> {
    pub fn controller(&self, id: ControllerId) -> Option<&ControllerConfig> {
        self.controllers.get(usize::from(id))
    }

    pub fn tx_pdu(&self, id: TxPduId) -> Option<&TxPduConfig> {
        self.tx_pdus.get(usize::from(id))
    }

    pub fn rx_pdu(&self, id: RxPduId) -> Option<&RxPduConfig> {
        self.rx_pdus.get(usize::from(id))
    }

    pub fn tx_mailbox(&self, handle: Hth) -> Option<&TxMailboxConfig> {
        self.tx_mailboxes.get(usize::from(handle))
    }

    pub fn rx_mailbox(&self, handle: Hrh) -> Option<&RxMailboxConfig> {
        self.rx_mailboxes.get(usize::from(handle))
    }

    /// Number of dynamic-id storage slots the configuration requires
    pub fn dynamic_slot_count(&self) -> usize {
        self.tx_pdus
            .iter()
            .filter_map(|pdu| pdu.dynamic)
            .map(|slot| usize::from(slot) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Checks every cross-reference and structural invariant.
    ///
    /// `upper_count` is the length of the upper-layer registration table the
    /// stack is constructed with.
    pub fn validate(&self, upper_count: usize) -> Result<(), ConfigError> {
        for (index, controller) in self.controllers.iter().enumerate() {
            let error = ConfigError::Controller(index as u8);
            if let WakeupValidation::NmOnly(pdu) = controller.wakeup_validation {
                self.rx_pdu(pdu).ok_or(error)?;
            }
        }

        for (index, pdu) in self.tx_pdus.iter().enumerate() {
            let error = ConfigError::TxPdu(index as u16);
            let mailbox = self.tx_mailbox(pdu.mailbox).ok_or(error)?;
            let id = TxPduId::new(index as u16);
            if id < mailbox.first || mailbox.last < id {
                return Err(error);
            }
            if usize::from(pdu.length) > pdu.kind.max_data_len() {
                return Err(error);
            }
            if pdu.meta_data_len > 4 {
                return Err(error);
            }
            if pdu.meta_data_len > 0 && pdu.dynamic.is_some() {
                return Err(error);
            }
            if usize::from(pdu.upper) >= upper_count {
                return Err(error);
            }
        }

        for (index, pdu) in self.rx_pdus.iter().enumerate() {
            let error = ConfigError::RxPdu(index as u16);
            if usize::from(pdu.min_length) > pdu.kind.max_data_len() {
                return Err(error);
            }
            if pdu.meta_data_len > 4 {
                return Err(error);
            }
            if usize::from(pdu.upper) >= upper_count {
                return Err(error);
            }
        }

        for (index, mailbox) in self.tx_mailboxes.iter().enumerate() {
            let error = ConfigError::TxMailbox(index as u16);
            self.controller(mailbox.controller).ok_or(error)?;
            if mailbox.last < mailbox.first {
                return Err(error);
            }
            self.tx_pdu(mailbox.last).ok_or(error)?;
            for id in u16::from(mailbox.first)..=u16::from(mailbox.last) {
                let pdu = self.tx_pdu(TxPduId::new(id)).ok_or(error)?;
                if usize::from(pdu.mailbox) != index {
                    return Err(error);
                }
            }
        }

        for (index, mailbox) in self.rx_mailboxes.iter().enumerate() {
            let error = ConfigError::RxMailbox(index as u16);
            self.controller(mailbox.controller).ok_or(error)?;
            match mailbox.binding {
                RxBinding::Full(pdu) => {
                    self.rx_pdu(pdu).ok_or(error)?;
                }
                RxBinding::Basic {
                    first,
                    last,
                    range_top,
                    search,
                } => {
                    if last < first {
                        return Err(error);
                    }
                    self.rx_pdu(last).ok_or(error)?;
                    self.validate_rx_segments(first, last, range_top, error)?;
                    if search == RxSearch::DoubleHash && self.hash.is_none() {
                        return Err(error);
                    }
                }
            }
        }

        if let Some(hash) = &self.hash {
            for table in [hash.table1, hash.table2] {
                if table.is_empty() || !table.len().is_power_of_two() {
                    return Err(ConfigError::Hash);
                }
            }
        }

        Ok(())
    }

    fn validate_rx_segments(
        &self,
        first: RxPduId,
        last: RxPduId,
        range_top: Option<RxPduId>,
        error: ConfigError,
    ) -> Result<(), ConfigError> {
        let singles_first = match range_top {
            Some(top) => {
                if top < first || last < top {
                    return Err(error);
                }
                for id in u16::from(first)..=u16::from(top) {
                    let pdu = &self.rx_pdus[usize::from(id)];
                    if pdu.range.is_none() {
                        return Err(error);
                    }
                    // the terminator sits on the lowest range entry only
                    if pdu.stop_range != (id == u16::from(first)) {
                        return Err(error);
                    }
                }
                match top.next() {
                    Some(next) if next <= last => next,
                    // range entries fill the whole mailbox
                    _ => return Ok(()),
                }
            }
            None => first,
        };

        for id in u16::from(singles_first)..=u16::from(last) {
            let pdu = &self.rx_pdus[usize::from(id)];
            if pdu.range.is_some() {
                return Err(error);
            }
            // the terminator sits on the lowest single-id entry only
            if pdu.stop != (id == u16::from(singles_first)) {
                return Err(error);
            }
        }
        Ok(())
    }
}
