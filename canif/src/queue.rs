//! Software transmit queues
//!
//! A transmit mailbox that should not drop frames while its hardware object
//! is busy references one software queue. Two interchangeable policies exist:
//!
//! * [`PriorityQueue`] keeps at most one pending frame per PDU and always
//!   releases the highest-priority pending PDU first. Priority is encoded in
//!   the PDU id ordering of the owning mailbox.
//! * [`FifoQueue`] releases frames in submission order, skipping cancelled
//!   entries in place.
//!
//! Both policies guarantee at most one pending copy per PDU id and store
//! frames in caller-provided storage. All operations run under the stack's
//! transmit lock and are bounded; the priority selection scans whole storage
//! words, not individual bits.

use canif_core::{CanId, FrameKind};
use canif_driver::frame::Data;

mod fifo;
mod priority;

pub use fifo::{FifoQueue, FifoSlot};
pub use priority::PriorityQueue;

/// Queue policy tag used by the mailbox configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Policy {
    PriorityByCanId,
    Fifo,
}

/// A queued, fully resolved frame
///
/// The identifier is resolved before queueing, so a dynamic id change after
/// submission does not affect an already buffered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct QueuedFrame {
    pub can_id: CanId,
    pub kind: FrameKind,
    pub data: Data,
}

impl QueuedFrame {
    pub const fn empty() -> Self {
        Self {
            can_id: match CanId::new_standard(0) {
                Some(id) => id,
                None => ::core::unreachable!(),
            },
            kind: FrameKind::Classic,
            data: Data::empty(),
        }
    }
}

impl Default for QueuedFrame {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EnqueueError {
    /// A copy of this PDU is already pending. The stored payload is kept.
    AlreadyQueued,
    /// No free slot. Nothing was stored.
    Full,
}

/// A transmit queue of either policy
///
/// PDU positions are relative to the owning mailbox's first transmit PDU id.
pub enum TxQueue<'a> {
    Priority(PriorityQueue<'a>),
    Fifo(FifoQueue<'a>),
}

impl<'a> TxQueue<'a> {
    pub fn policy(&self) -> Policy {
        match self {
            TxQueue::Priority(_) => Policy::PriorityByCanId,
            TxQueue::Fifo(_) => Policy::Fifo,
        }
    }

    /// Number of pending entries, including cancelled FIFO slots that still
    /// occupy their position.
    pub fn occupancy(&self) -> usize {
        match self {
            TxQueue::Priority(queue) => queue.occupancy(),
            TxQueue::Fifo(queue) => queue.occupancy(),
        }
    }

    /// Number of distinct PDU positions the queue can serve
    pub(crate) fn pdu_span(&self) -> Option<usize> {
        match self {
            TxQueue::Priority(queue) => Some(queue.capacity()),
            TxQueue::Fifo(queue) => queue.pdu_span(),
        }
    }

    pub(crate) fn is_queued(&self, pdu: u16) -> bool {
        match self {
            TxQueue::Priority(queue) => queue.is_queued(pdu),
            TxQueue::Fifo(queue) => queue.is_queued(pdu),
        }
    }

    pub(crate) fn enqueue(&mut self, pdu: u16, frame: QueuedFrame) -> Result<(), EnqueueError> {
        match self {
            TxQueue::Priority(queue) => queue.enqueue(pdu, frame),
            TxQueue::Fifo(queue) => queue.enqueue(pdu, frame),
        }
    }

    /// Removes the pending copy of `pdu` without releasing it.
    ///
    /// Returns whether a copy was pending. A FIFO entry keeps its position
    /// and is skipped once the read index reaches it.
    pub(crate) fn cancel(&mut self, pdu: u16) -> bool {
        match self {
            TxQueue::Priority(queue) => queue.clear(pdu),
            TxQueue::Fifo(queue) => queue.cancel(pdu),
        }
    }

    /// Next entry to release per policy, without removing it.
    pub(crate) fn select(&mut self) -> Option<(u16, QueuedFrame)> {
        match self {
            TxQueue::Priority(queue) => queue.select(),
            TxQueue::Fifo(queue) => queue.select(),
        }
    }

    /// Removes the entry previously returned by [`Self::select`].
    pub(crate) fn remove_selected(&mut self, pdu: u16) {
        match self {
            TxQueue::Priority(queue) => {
                queue.clear(pdu);
            }
            TxQueue::Fifo(queue) => queue.pop(pdu),
        }
    }

    pub(crate) fn clear_all(&mut self) {
        match self {
            TxQueue::Priority(queue) => queue.clear_all(),
            TxQueue::Fifo(queue) => queue.clear_all(),
        }
    }
}
