//! Transmit path: gateway, software queueing and requeueing
//!
//! [`CanIf::transmit`] resolves the outgoing identifier, attempts the
//! hardware write and, when the hardware object is busy, parks the frame in
//! the mailbox's software queue. Queue selection and the hardware write it
//! feeds happen inside one critical section, so a task-level submission can
//! never overtake a queued higher-priority frame between a confirmation and
//! its requeue.
//!
//! The requeue engine runs on every event that can free a hardware object:
//! a transmit confirmation, a hardware-level cancellation returning the
//! displaced frame, and the outcome notification of a software cancellation.
//! It drains at most one frame into the hardware per event; entries the
//! driver rejects outright are dropped with a diagnostic and the next entry
//! is tried while the object stays free.
//!
//! A confirmation is delivered to the upper layer exactly once per
//! successful hand-over: directly when the hardware confirms a frame written
//! from task context, or at requeue time for queued frames, with the later
//! hardware confirmation of such a frame suppressed through a per-PDU mark.
//!
//! Upper-layer callbacks always fire after the locks are released.

use canif_core::{CanId, TxPduId};
use canif_driver::frame::{Data, Frame};
use canif_driver::{Driver, WriteOutcome};
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::{TxMailboxConfig, TxPduConfig};
use crate::controller::{ControllerMode, TxConfirmationState};
use crate::interface::{CanIf, TxState};
use crate::queue::{EnqueueError, QueuedFrame, TxQueue};
use crate::report::{Code, Service, dev_error};
use crate::upper::{TxResult, UpperLayer};

/// Transmit request rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// Unknown PDU id or malformed payload
    Parameter,
    /// The owning controller is not started.
    NotStarted,
    /// The Tx direction of the channel is offline.
    Offline,
    /// Blocked by the active partial-networking transmit filter
    Filtered,
    /// Payload exceeds the configured length and truncation is disabled.
    Length,
    /// Hardware object busy and the mailbox has no software queue.
    Busy,
    /// A copy of this PDU is already queued. The stored payload is kept;
    /// resubmit after the pending copy is released.
    AlreadyQueued,
    /// The software queue is full. Nothing was stored.
    QueueFull,
    /// The driver rejected the write. Nothing was queued.
    Rejected,
}

/// Cancellation request rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CancelError {
    /// Unknown PDU id
    Parameter,
    /// No software-queued copy of the PDU exists.
    NotQueued,
}

/// Upper-layer notifications collected under a lock, fired after release
struct Notifications {
    entries: [Option<(u8, u16, TxResult)>; 4],
    len: usize,
}

impl Notifications {
    const fn new() -> Self {
        Self {
            entries: [None; 4],
            len: 0,
        }
    }

    fn push(&mut self, upper: u8, upper_id: u16, result: TxResult) {
        debug_assert!(self.len < self.entries.len());
        if self.len < self.entries.len() {
            self.entries[self.len] = Some((upper, upper_id, result));
            self.len += 1;
        }
    }

    fn fire(&self, upper_layers: &[&(dyn UpperLayer + Sync)]) {
        for entry in self.entries.iter().flatten() {
            let (upper, upper_id, result) = *entry;
            upper_layers[usize::from(upper)].tx_confirmation(upper_id, result);
        }
    }
}

fn resolve_tx_id(entry: &TxPduConfig, dynamic_ids: &[CanId], meta_bytes: &[u8]) -> CanId {
    if !meta_bytes.is_empty() {
        let mut value = [0u8; 4];
        value[..meta_bytes.len()].copy_from_slice(meta_bytes);
        entry.can_id.merge(u32::from_le_bytes(value), entry.mask)
    } else if let Some(slot) = entry.dynamic {
        dynamic_ids[usize::from(slot)]
    } else {
        entry.can_id
    }
}

impl<'a, M: RawMutex, D: Driver> CanIf<'a, M, D> {
    /// Submits a PDU for transmission.
    ///
    /// The final identifier is resolved at submission time (static table
    /// value, dynamic-id slot, or the payload's trailing meta-data bytes).
    /// When the hardware object is busy the frame is stored in the mailbox's
    /// software queue and released by the next confirmation event; at most
    /// one copy per PDU is ever pending.
    pub fn transmit(&self, pdu: TxPduId, payload: &[u8]) -> Result<(), TransmitError> {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::Transmit, Code::InvalidTxPdu);
            return Err(TransmitError::Parameter);
        };
        let mailbox = &self.config.tx_mailboxes[usize::from(entry.mailbox)];

        let (mode, pdu_mode, filter_active) = self.modes.lock(|cell| {
            let state = cell.borrow();
            let runtime = &state.controllers[usize::from(mailbox.controller)];
            (runtime.mode, runtime.pdu_mode, runtime.tx_filter_active)
        });
        if mode != ControllerMode::Started {
            return Err(TransmitError::NotStarted);
        }
        if pdu_mode.tx_passive() {
            // not sent, confirmed right away so the upper layer keeps cycling
            self.upper[usize::from(entry.upper)].tx_confirmation(entry.upper_id, TxResult::Ok);
            return Ok(());
        }
        if !pdu_mode.tx_online() {
            return Err(TransmitError::Offline);
        }
        if filter_active && !entry.pn_filter_pass {
            return Err(TransmitError::Filtered);
        }

        let meta = usize::from(entry.meta_data_len);
        if payload.len() < meta {
            dev_error(Service::Transmit, Code::InvalidDataLength);
            return Err(TransmitError::Parameter);
        }
        let (sdu, meta_bytes) = payload.split_at(payload.len() - meta);
        let sdu = if sdu.len() > usize::from(entry.length) {
            if !entry.truncation {
                dev_error(Service::Transmit, Code::InvalidDataLength);
                return Err(TransmitError::Length);
            }
            &sdu[..usize::from(entry.length)]
        } else {
            sdu
        };
        let data = Data::new_padded(sdu, entry.kind).map_err(|_| TransmitError::Length)?;

        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let can_id = resolve_tx_id(entry, state.dynamic_ids, meta_bytes);
            let frame = Frame {
                can_id,
                kind: entry.kind,
                data,
            };

            match self.driver.write(entry.mailbox, &frame) {
                WriteOutcome::Ok => {
                    if let Some(reference) = mailbox.queue {
                        if let TxQueue::Priority(queue) =
                            &mut state.queues[usize::from(reference.index)]
                        {
                            // a stale pending mark from an earlier cycle must
                            // not trigger a duplicate transmission
                            queue.clear(relative(pdu, mailbox));
                        }
                    }
                    Ok(())
                }
                WriteOutcome::NotOk => {
                    dev_error(Service::Transmit, Code::DriverRejected);
                    Err(TransmitError::Rejected)
                }
                WriteOutcome::Busy => {
                    let Some(reference) = mailbox.queue else {
                        return Err(TransmitError::Busy);
                    };
                    let stored = QueuedFrame {
                        can_id,
                        kind: entry.kind,
                        data,
                    };
                    match state.queues[usize::from(reference.index)]
                        .enqueue(relative(pdu, mailbox), stored)
                    {
                        Ok(()) => Ok(()),
                        Err(EnqueueError::AlreadyQueued) => Err(TransmitError::AlreadyQueued),
                        Err(EnqueueError::Full) => {
                            dev_error(Service::Transmit, Code::QueueOverflow);
                            Err(TransmitError::QueueFull)
                        }
                    }
                }
            }
        })
    }

    /// Cancels the software-queued copy of a PDU.
    ///
    /// The queued copy is marked not-pending (a FIFO entry keeps its
    /// position) and the upper layer receives exactly one not-sent
    /// confirmation. A frame already handed to the hardware is not affected.
    pub fn cancel_transmit(&self, pdu: TxPduId) -> Result<(), CancelError> {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::CancelTransmit, Code::InvalidTxPdu);
            return Err(CancelError::Parameter);
        };
        let mailbox = &self.config.tx_mailboxes[usize::from(entry.mailbox)];
        let Some(reference) = mailbox.queue else {
            return Err(CancelError::NotQueued);
        };

        let mut notes = Notifications::new();
        let result = self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            if state.queues[usize::from(reference.index)].cancel(relative(pdu, mailbox)) {
                notes.push(entry.upper, entry.upper_id, TxResult::NotSent);
                Ok(())
            } else {
                Err(CancelError::NotQueued)
            }
        });
        notes.fire(self.upper);
        result
    }

    /// Driver notification: a frame completed transmission.
    ///
    /// Confirms the PDU to its upper layer (unless the confirmation was
    /// already delivered when the frame left the software queue) and lets
    /// the requeue engine feed the freed hardware object.
    pub fn tx_confirmation(&self, pdu: TxPduId) {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::TxConfirmation, Code::InvalidTxPdu);
            return;
        };
        let mailbox = &self.config.tx_mailboxes[usize::from(entry.mailbox)];

        let started = self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &mut state.controllers[usize::from(mailbox.controller)];
            if runtime.mode != ControllerMode::Started {
                return false;
            }
            runtime.tx_confirmed = TxConfirmationState::Ok;
            true
        });
        if !started {
            // a late confirmation; the stop already flushed the queues
            dev_error(Service::TxConfirmation, Code::NotStarted);
            return;
        }

        let mut notes = Notifications::new();
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let delivered_early = state.notified.clear(usize::from(pdu));
            if !delivered_early {
                notes.push(entry.upper, entry.upper_id, TxResult::Ok);
            }
            self.requeue(state, mailbox, Service::TxConfirmation, &mut notes);
        });
        notes.fire(self.upper);
    }

    /// Driver notification: a hardware-level cancellation freed the
    /// hardware object and returned the displaced frame.
    ///
    /// The displaced frame goes back into the software queue unless a newer
    /// copy of the PDU is already pending (the last successfully queued
    /// payload wins), then the requeue engine picks the next frame to send.
    pub fn cancel_tx_confirmation(&self, pdu: TxPduId, original: &Frame) {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::CancelTxConfirmation, Code::InvalidTxPdu);
            return;
        };
        let mailbox = &self.config.tx_mailboxes[usize::from(entry.mailbox)];
        let Some(reference) = mailbox.queue else {
            dev_error(Service::CancelTxConfirmation, Code::InvalidMailbox);
            return;
        };
        if !self.controller_started(mailbox) {
            dev_error(Service::CancelTxConfirmation, Code::NotStarted);
            return;
        }

        let mut notes = Notifications::new();
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let queue = &mut state.queues[usize::from(reference.index)];
            let rel = relative(pdu, mailbox);
            if queue.is_queued(rel) {
                // a newer copy supersedes the displaced frame; its hand-over
                // mark must not suppress the newer copy's confirmation
                state.notified.clear(usize::from(pdu));
            } else {
                let stored = QueuedFrame {
                    can_id: original.can_id,
                    kind: original.kind,
                    data: original.data,
                };
                if queue.enqueue(rel, stored).is_err() {
                    dev_error(Service::CancelTxConfirmation, Code::QueueOverflow);
                }
            }
            self.requeue(state, mailbox, Service::CancelTxConfirmation, &mut notes);
        });
        notes.fire(self.upper);
    }

    fn controller_started(&self, mailbox: &TxMailboxConfig) -> bool {
        self.modes.lock(|cell| {
            let state = cell.borrow();
            state.controllers[usize::from(mailbox.controller)].mode == ControllerMode::Started
        })
    }

    /// Driver notification: outcome of a software cancellation request.
    ///
    /// On a successful cancellation the queued copy is released with a
    /// not-sent confirmation; either way the requeue engine runs, since the
    /// hardware object may have been freed.
    pub fn cancel_tx_notification(&self, pdu: TxPduId, cancelled: bool) {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::CancelTxNotification, Code::InvalidTxPdu);
            return;
        };
        let mailbox = &self.config.tx_mailboxes[usize::from(entry.mailbox)];

        let mut notes = Notifications::new();
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            if let Some(reference) = mailbox.queue {
                if cancelled && state.queues[usize::from(reference.index)].cancel(relative(pdu, mailbox))
                {
                    notes.push(entry.upper, entry.upper_id, TxResult::NotSent);
                }
            }
            self.requeue(state, mailbox, Service::CancelTxNotification, &mut notes);
        });
        notes.fire(self.upper);
    }

    /// Feeds the freed hardware object from the mailbox's software queue.
    ///
    /// Runs inside the tx critical section. Selection follows the queue
    /// policy; on a successful write the entry is removed and its
    /// confirmation recorded, a busy object leaves everything untouched for
    /// the next event, and a rejected entry is dropped with a diagnostic
    /// before the next entry is tried.
    fn requeue(
        &self,
        state: &mut TxState<'a>,
        mailbox: &TxMailboxConfig,
        service: Service,
        notes: &mut Notifications,
    ) {
        let Some(reference) = mailbox.queue else {
            return;
        };
        let index = usize::from(reference.index);

        loop {
            let Some((rel, stored)) = state.queues[index].select() else {
                break;
            };
            let pdu = TxPduId::new(u16::from(mailbox.first) + rel);
            let entry = &self.config.tx_pdus[usize::from(pdu)];
            let frame = Frame {
                can_id: stored.can_id,
                kind: stored.kind,
                data: stored.data,
            };

            match self.driver.write(entry.mailbox, &frame) {
                WriteOutcome::Ok => {
                    state.queues[index].remove_selected(rel);
                    // a mark still set here belongs to a frame of the same
                    // PDU that was confirmed at hand-over and then displaced
                    // by a hardware-level cancellation; this re-submission
                    // must not confirm it a second time
                    if !state.notified.set(usize::from(pdu)) {
                        notes.push(entry.upper, entry.upper_id, TxResult::Ok);
                    }
                    break;
                }
                WriteOutcome::Busy => break,
                WriteOutcome::NotOk => {
                    state.queues[index].remove_selected(rel);
                    state.notified.clear(usize::from(pdu));
                    dev_error(service, Code::DriverRejected);
                }
            }
        }
    }
}

fn relative(pdu: TxPduId, mailbox: &TxMailboxConfig) -> u16 {
    u16::from(pdu) - u16::from(mailbox.first)
}
