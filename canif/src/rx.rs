//! Receive path: frame identification and dispatch
//!
//! An inbound frame is resolved to a receive PDU in bounded time:
//!
//! * A dedicated (Full) mailbox already names its PDU; only the reception
//!   switch and the identifier binding are validated.
//! * A shared (Basic) mailbox resolves identity in software, either by a
//!   downward walk over the mailbox's single-id segment or by the two-hash
//!   adjustment-table lookup. A miss, or a hit on an administratively
//!   suspended entry, falls through to the identifier-range segment.
//!
//! An unmatched frame on a shared mailbox is dropped silently: shared
//! hardware objects legitimately receive traffic that is not configured
//! here. Malformed frames are errors.
//!
//! Identification and the wake-up bookkeeping run under the mode lock; the
//! upper-layer callout runs outside of it, so receivers may call back into
//! the stack.

use canif_core::{CanId, FrameKind, Hrh, RxPduId};
use canif_driver::Driver;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::{
    Config, ControllerConfig, ReceptionMode, RxBinding, RxMailboxConfig, RxPduConfig,
    WakeupValidation,
};
use crate::controller::{ControllerMode, ControllerRuntime, WakeupState};
use crate::interface::CanIf;
use crate::report::{Code, Service, dev_error};
use crate::upper::Indication;

/// Malformed inbound frame or unknown mailbox handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxError {
    /// Standard-format identifier wider than 11 bits
    CanId,
    /// Payload longer than the frame format permits
    DataLength,
    /// Unknown hardware receive handle
    Mailbox,
}

/// Maximum payload plus the longest meta-data suffix
const SCRATCH_LEN: usize = 64 + 4;

enum Resolution {
    Match(RxPduId),
    /// An entry matched but its reception switch is off.
    Suspended,
    Miss,
}

impl<'a, M: RawMutex, D: Driver> CanIf<'a, M, D> {
    /// Driver entry point for a received frame.
    ///
    /// `raw_id` carries the frame format in bit 30 and the identifier format
    /// in bit 31. Delivery is idempotent: an identical frame produces an
    /// identical, independent notification.
    pub fn rx_indication(&self, mailbox: Hrh, raw_id: u32, payload: &[u8]) -> Result<(), RxError> {
        let Ok((can_id, kind)) = CanId::parse_raw(raw_id) else {
            dev_error(Service::RxIndication, Code::InvalidCanId);
            return Err(RxError::CanId);
        };
        if payload.len() > kind.max_data_len() {
            dev_error(Service::RxIndication, Code::InvalidDataLength);
            return Err(RxError::DataLength);
        }
        let Some(mailbox) = self.config.rx_mailbox(mailbox) else {
            dev_error(Service::RxIndication, Code::InvalidMailbox);
            return Err(RxError::Mailbox);
        };

        let matched = self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &state.controllers[usize::from(mailbox.controller)];
            if runtime.mode != ControllerMode::Started || !runtime.pdu_mode.rx_online() {
                return None;
            }

            let pdu = resolve(self.config, state.rx_reception, mailbox, can_id, kind)?;
            let entry = &self.config.rx_pdus[usize::from(pdu)];
            if payload.len() < usize::from(entry.min_length) {
                dev_error(Service::RxIndication, Code::ShortFrame);
                return None;
            }

            let controller_config = &self.config.controllers[usize::from(mailbox.controller)];
            let runtime = &mut state.controllers[usize::from(mailbox.controller)];
            mark_wakeup(runtime, controller_config, pdu);
            Some(pdu)
        });
        let Some(pdu) = matched else {
            return Ok(());
        };

        let entry = &self.config.rx_pdus[usize::from(pdu)];
        let mut scratch = [0u8; SCRATCH_LEN];
        let data = if entry.meta_data_len > 0 {
            let meta = usize::from(entry.meta_data_len);
            let id_bytes = (can_id.raw() & entry.mask).to_le_bytes();
            scratch[..payload.len()].copy_from_slice(payload);
            scratch[payload.len()..payload.len() + meta].copy_from_slice(&id_bytes[..meta]);
            &scratch[..payload.len() + meta]
        } else {
            payload
        };

        let indication = match entry.callout {
            crate::upper::RxCallout::Basic => Indication::Basic { data },
            crate::upper::RxCallout::NetworkManagement => Indication::NetworkManagement { data },
            crate::upper::RxCallout::Generic => Indication::Generic { data },
            crate::upper::RxCallout::Advanced => Indication::Advanced { can_id, kind, data },
        };
        self.upper[usize::from(entry.upper)].rx_indication(entry.upper_id, indication);
        Ok(())
    }
}

fn mark_wakeup(runtime: &mut ControllerRuntime, config: &ControllerConfig, pdu: RxPduId) {
    if runtime.wakeup != WakeupState::Armed {
        return;
    }
    let validated = match config.wakeup_validation {
        WakeupValidation::Off => false,
        WakeupValidation::AllFrames => true,
        WakeupValidation::NmOnly(nm_pdu) => nm_pdu == pdu,
    };
    if validated {
        runtime.wakeup = WakeupState::Detected;
    }
}

fn resolve(
    config: &Config<'_>,
    reception: &[ReceptionMode],
    mailbox: &RxMailboxConfig,
    can_id: CanId,
    kind: FrameKind,
) -> Option<RxPduId> {
    match mailbox.binding {
        RxBinding::Full(pdu) => {
            let entry = &config.rx_pdus[usize::from(pdu)];
            if !entry_matches(entry, can_id, kind) {
                // the hardware filter and the table disagree
                dev_error(Service::RxIndication, Code::InvalidCanId);
                return None;
            }
            if reception[usize::from(pdu)] != ReceptionMode::Process {
                return None;
            }
            Some(pdu)
        }
        RxBinding::Basic {
            first,
            last,
            range_top,
            search,
        } => {
            let singles_first = match range_top {
                Some(top) if top == last => None,
                Some(top) => top.next(),
                None => Some(first),
            };

            let outcome = match singles_first {
                Some(singles_first) => match search {
                    crate::config::RxSearch::Linear => {
                        search_linear(config, reception, singles_first, last, can_id, kind)
                    }
                    crate::config::RxSearch::DoubleHash => {
                        let seed = config.controllers[usize::from(mailbox.controller)].hash_seed;
                        search_hash(config, reception, seed, singles_first, last, can_id, kind)
                    }
                },
                None => Resolution::Miss,
            };

            match outcome {
                Resolution::Match(pdu) => Some(pdu),
                Resolution::Suspended | Resolution::Miss => {
                    search_range(config, reception, first, range_top, can_id)
                }
            }
        }
    }
}

fn entry_matches(entry: &RxPduConfig, can_id: CanId, kind: FrameKind) -> bool {
    id_matches(entry, can_id) && kind_matches(entry, kind)
}

fn id_matches(entry: &RxPduConfig, can_id: CanId) -> bool {
    if entry.dynamic {
        can_id.raw() & entry.mask == entry.can_id.raw() & entry.mask
    } else {
        can_id == entry.can_id
    }
}

fn kind_matches(entry: &RxPduConfig, kind: FrameKind) -> bool {
    !entry.kind_check || entry.kind == kind
}

fn check_reception(reception: &[ReceptionMode], pdu: u16) -> Resolution {
    if reception[usize::from(pdu)] == ReceptionMode::Process {
        Resolution::Match(RxPduId::new(pdu))
    } else {
        Resolution::Suspended
    }
}

/// Downward walk over the single-id segment, terminated by the entry
/// carrying the stop flag.
fn search_linear(
    config: &Config<'_>,
    reception: &[ReceptionMode],
    singles_first: RxPduId,
    last: RxPduId,
    can_id: CanId,
    kind: FrameKind,
) -> Resolution {
    let mut id = u16::from(last);
    loop {
        let entry = &config.rx_pdus[usize::from(id)];
        if entry_matches(entry, can_id, kind) {
            return check_reception(reception, id);
        }
        if entry.stop || id == u16::from(singles_first) || id == 0 {
            break;
        }
        id -= 1;
    }
    Resolution::Miss
}

fn hash_index(seeded: u32, mul: u32, len: usize) -> usize {
    (seeded.wrapping_mul(mul) >> 16) as usize & (len - 1)
}

/// Two-hash lookup over the single-id segment.
///
/// Each hash indexes one adjustment table; the summed adjustments, wrapped
/// modulo the receive PDU count, name the candidate. The candidate must
/// verify by exact identifier comparison. When only the frame format
/// disagrees, the adjacent lower id is tried once: the generator places the
/// other-format twin of a shared identifier right below it.
fn search_hash(
    config: &Config<'_>,
    reception: &[ReceptionMode],
    seed: u32,
    singles_first: RxPduId,
    last: RxPduId,
    can_id: CanId,
    kind: FrameKind,
) -> Resolution {
    let Some(hash) = config.hash.as_ref() else {
        return Resolution::Miss;
    };
    let seeded = can_id.raw() ^ seed;
    let adjust1 = hash.table1[hash_index(seeded, hash.mul1, hash.table1.len())];
    let adjust2 = hash.table2[hash_index(seeded, hash.mul2, hash.table2.len())];
    let candidate = (usize::from(adjust1) + usize::from(adjust2)) % config.rx_pdus.len();

    let mut candidate = candidate as u16;
    for attempt in 0..2 {
        if candidate < u16::from(singles_first) || u16::from(last) < candidate {
            break;
        }
        let entry = &config.rx_pdus[usize::from(candidate)];
        if !id_matches(entry, can_id) {
            break;
        }
        if kind_matches(entry, kind) {
            return check_reception(reception, candidate);
        }
        if attempt == 0 && candidate > 0 {
            candidate -= 1;
        } else {
            break;
        }
    }
    Resolution::Miss
}

/// Downward walk over the range segment, terminated by the entry carrying
/// the stop-range flag. A contained identifier only matches while its
/// entry's reception switch is on.
fn search_range(
    config: &Config<'_>,
    reception: &[ReceptionMode],
    first: RxPduId,
    range_top: Option<RxPduId>,
    can_id: CanId,
) -> Option<RxPduId> {
    let top = range_top?;
    let mut id = u16::from(top);
    loop {
        let entry = &config.rx_pdus[usize::from(id)];
        if let Some(range) = &entry.range {
            if range.contains(can_id) && reception[usize::from(id)] == ReceptionMode::Process {
                return Some(RxPduId::new(id));
            }
        }
        if entry.stop_range || id == u16::from(first) || id == 0 {
            break;
        }
        id -= 1;
    }
    None
}
