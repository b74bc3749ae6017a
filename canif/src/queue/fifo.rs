use crate::queue::{EnqueueError, QueuedFrame};

/// One ring position of a [`FifoQueue`]
#[derive(Debug, Clone, Copy)]
pub struct FifoSlot {
    pdu: u16,
    frame: QueuedFrame,
    queued: bool,
}

impl FifoSlot {
    pub const fn empty() -> Self {
        Self {
            pdu: 0,
            frame: QueuedFrame::empty(),
            queued: false,
        }
    }
}

impl Default for FifoSlot {
    fn default() -> Self {
        Self::empty()
    }
}

/// First-in-first-out transmit queue
///
/// A ring of frame slots with wrapping write and read indices. The occupancy
/// counter equals the number of occupied ring positions, including cancelled
/// entries that still hold their position. A cancelled entry is skipped, not
/// removed, once the read index reaches it, so the remaining order is never
/// disturbed.
///
/// The optional PDU map provides O(1) cancellation; without it, cancellation
/// and the single-pending-copy check scan the occupied region.
pub struct FifoQueue<'a> {
    slots: &'a mut [FifoSlot],
    map: Option<&'a mut [u16]>,
    write: u16,
    read: u16,
    occupancy: u16,
}

const NO_SLOT: u16 = 0;

impl<'a> FifoQueue<'a> {
    /// Creates a queue over caller-provided storage.
    ///
    /// `map`, when provided, must hold one entry per PDU of the owning
    /// mailbox, indexed by the PDU's position relative to the mailbox's first
    /// transmit PDU id.
    pub fn new(slots: &'a mut [FifoSlot], map: Option<&'a mut [u16]>) -> Self {
        assert!(!slots.is_empty());
        for slot in slots.iter_mut() {
            *slot = FifoSlot::empty();
        }
        let mut queue = Self {
            slots,
            map,
            write: 0,
            read: 0,
            occupancy: 0,
        };
        if let Some(map) = queue.map.as_deref_mut() {
            map.fill(NO_SLOT);
        }
        queue
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupancy(&self) -> usize {
        usize::from(self.occupancy)
    }

    pub(crate) fn pdu_span(&self) -> Option<usize> {
        self.map.as_deref().map(|map| map.len())
    }

    pub(crate) fn is_queued(&self, pdu: u16) -> bool {
        self.find(pdu).is_some()
    }

    pub(crate) fn enqueue(&mut self, pdu: u16, frame: QueuedFrame) -> Result<(), EnqueueError> {
        if self.find(pdu).is_some() {
            return Err(EnqueueError::AlreadyQueued);
        }
        if self.occupancy() == self.slots.len() {
            return Err(EnqueueError::Full);
        }

        let index = self.write;
        self.slots[usize::from(index)] = FifoSlot {
            pdu,
            frame,
            queued: true,
        };
        self.write = self.advance(index);
        self.occupancy += 1;
        if let Some(map) = self.map.as_deref_mut() {
            map[usize::from(pdu)] = index + 1;
        }
        Ok(())
    }

    /// Marks the pending copy of `pdu` as cancelled, leaving it in position.
    pub(crate) fn cancel(&mut self, pdu: u16) -> bool {
        let Some(index) = self.find(pdu) else {
            return false;
        };
        self.slots[usize::from(index)].queued = false;
        if let Some(map) = self.map.as_deref_mut() {
            map[usize::from(pdu)] = NO_SLOT;
        }
        true
    }

    /// Oldest live entry, releasing any leading cancelled positions.
    pub(crate) fn select(&mut self) -> Option<(u16, QueuedFrame)> {
        while self.occupancy > 0 && !self.slots[usize::from(self.read)].queued {
            self.read = self.advance(self.read);
            self.occupancy -= 1;
        }
        if self.occupancy == 0 {
            return None;
        }
        let slot = &self.slots[usize::from(self.read)];
        Some((slot.pdu, slot.frame))
    }

    /// Removes the head entry previously returned by [`Self::select`].
    pub(crate) fn pop(&mut self, pdu: u16) {
        let index = usize::from(self.read);
        debug_assert!(self.slots[index].queued);
        debug_assert_eq!(self.slots[index].pdu, pdu);
        self.slots[index].queued = false;
        if let Some(map) = self.map.as_deref_mut() {
            map[usize::from(self.slots[index].pdu)] = NO_SLOT;
        }
        self.read = self.advance(self.read);
        self.occupancy -= 1;
    }

    pub(crate) fn clear_all(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.queued = false;
        }
        if let Some(map) = self.map.as_deref_mut() {
            map.fill(NO_SLOT);
        }
        self.write = 0;
        self.read = 0;
        self.occupancy = 0;
    }

    fn advance(&self, index: u16) -> u16 {
        let next = index + 1;
        if usize::from(next) == self.slots.len() {
            0
        } else {
            next
        }
    }

    fn find(&self, pdu: u16) -> Option<u16> {
        if let Some(map) = self.map.as_deref() {
            let index = *map.get(usize::from(pdu))?;
            if index == NO_SLOT {
                return None;
            }
            return Some(index - 1);
        }

        // no map configured: walk the occupied region
        let mut index = self.read;
        for _ in 0..self.occupancy {
            let slot = &self.slots[usize::from(index)];
            if slot.queued && slot.pdu == pdu {
                return Some(index);
            }
            index = self.advance(index);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    extern crate std;
    use super::*;
    use canif_core::{CanId, FrameKind};
    use canif_driver::frame::Data;

    fn frame(tag: u8) -> QueuedFrame {
        QueuedFrame {
            can_id: CanId::new_standard(0x200 + tag as u16).unwrap(),
            kind: FrameKind::Classic,
            data: Data::new(&[tag, tag]).unwrap(),
        }
    }

    fn drain(queue: &mut FifoQueue<'_>) -> std::vec::Vec<u16> {
        let mut order = std::vec::Vec::new();
        while let Some((pdu, _)) = queue.select() {
            order.push(pdu);
            queue.pop(pdu);
        }
        order
    }

    #[test]
    fn test_push_order() {
        let mut slots = [FifoSlot::empty(); 4];
        let mut queue = FifoQueue::new(&mut slots, None);

        for pdu in [3, 0, 2] {
            queue.enqueue(pdu, frame(pdu as u8)).unwrap();
        }
        assert_eq!(queue.occupancy(), 3);
        assert_eq!(drain(&mut queue), [3, 0, 2]);
        assert_eq!(queue.occupancy(), 0);
    }

    #[test]
    fn test_wraparound() {
        let mut slots = [FifoSlot::empty(); 3];
        let mut queue = FifoQueue::new(&mut slots, None);

        queue.enqueue(0, frame(0)).unwrap();
        queue.enqueue(1, frame(1)).unwrap();
        let (pdu, _) = queue.select().unwrap();
        queue.pop(pdu);

        // write index wraps while older entries are still pending
        queue.enqueue(2, frame(2)).unwrap();
        queue.enqueue(3, frame(3)).unwrap();
        assert_eq!(queue.enqueue(4, frame(4)), Err(EnqueueError::Full));

        assert_eq!(drain(&mut queue), [1, 2, 3]);
    }

    #[test]
    fn test_cancel_skips_in_place() {
        let mut map = [0u16; 8];
        let mut slots = [FifoSlot::empty(); 4];
        let mut queue = FifoQueue::new(&mut slots, Some(&mut map));

        for pdu in [5, 6, 7] {
            queue.enqueue(pdu, frame(pdu as u8)).unwrap();
        }
        assert!(queue.cancel(6));
        assert!(!queue.cancel(6));

        // the cancelled entry keeps its position until the read index passes it
        assert_eq!(queue.occupancy(), 3);
        assert_eq!(drain(&mut queue), [5, 7]);
    }

    #[test]
    fn test_payload_round_trip() {
        let mut slots = [FifoSlot::empty(); 2];
        let mut queue = FifoQueue::new(&mut slots, None);

        let sent = QueuedFrame {
            can_id: CanId::new_extended(0x18da_f101).unwrap(),
            kind: FrameKind::Fd,
            data: Data::new(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]).unwrap(),
        };
        queue.enqueue(0, sent).unwrap();

        let (pdu, stored) = queue.select().unwrap();
        assert_eq!(pdu, 0);
        assert_eq!(stored, sent);
    }

    #[test]
    fn test_single_pending_copy_without_map() {
        let mut slots = [FifoSlot::empty(); 4];
        let mut queue = FifoQueue::new(&mut slots, None);

        queue.enqueue(1, frame(1)).unwrap();
        assert_eq!(
            queue.enqueue(1, frame(2)),
            Err(EnqueueError::AlreadyQueued)
        );

        // a cancelled copy no longer blocks re-queueing
        assert!(queue.cancel(1));
        queue.enqueue(1, frame(3)).unwrap();
        assert_eq!(queue.occupancy(), 2);
    }
}
