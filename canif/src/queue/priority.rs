use crate::queue::{EnqueueError, QueuedFrame};
use crate::utils::bitset::BitVec;

/// Priority-ordered transmit queue
///
/// One frame slot and one pending bit per PDU of the owning mailbox. A PDU's
/// position doubles as its priority: selection always returns the pending PDU
/// with the highest position, found through a whole-word highest-set-bit scan.
///
/// The pending bit and the occupancy counter only change together; both are
/// owned by the stack's transmit lock.
pub struct PriorityQueue<'a> {
    pending: BitVec<'a>,
    slots: &'a mut [QueuedFrame],
    occupancy: u16,
}

impl<'a> PriorityQueue<'a> {
    /// Creates a queue over caller-provided storage.
    ///
    /// `words` must provide at least one bit per slot; slot count equals the
    /// PDU span of the owning mailbox.
    pub fn new(words: &'a mut [u32], slots: &'a mut [QueuedFrame]) -> Self {
        let pending = BitVec::new(words);
        assert!(pending.capacity() >= slots.len());
        Self {
            pending,
            slots,
            occupancy: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupancy(&self) -> usize {
        usize::from(self.occupancy)
    }

    pub(crate) fn is_queued(&self, pdu: u16) -> bool {
        self.pending.get(usize::from(pdu))
    }

    pub(crate) fn enqueue(&mut self, pdu: u16, frame: QueuedFrame) -> Result<(), EnqueueError> {
        let index = usize::from(pdu);
        if index >= self.slots.len() {
            return Err(EnqueueError::Full);
        }
        if self.pending.get(index) {
            return Err(EnqueueError::AlreadyQueued);
        }
        self.slots[index] = frame;
        self.pending.set(index);
        self.occupancy = self.occupancy.saturating_add(1);
        Ok(())
    }

    /// Clears the pending mark of `pdu`. Reports whether it was pending.
    pub(crate) fn clear(&mut self, pdu: u16) -> bool {
        let was_pending = self.pending.clear(usize::from(pdu));
        if was_pending {
            self.occupancy = self.occupancy.saturating_sub(1);
        }
        was_pending
    }

    pub(crate) fn select(&mut self) -> Option<(u16, QueuedFrame)> {
        let index = self.pending.highest_set()?;
        Some((index as u16, self.slots[index]))
    }

    pub(crate) fn clear_all(&mut self) {
        self.pending.clear_all();
        self.occupancy = 0;
    }
}
