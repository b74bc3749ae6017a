#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::vec::Vec;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use canif::CanIf;
use canif::controller::ControllerMode;
use canif::core::{ControllerId, Hth};
use canif::driver::{Driver, ModeTransition, TransitionRejected, WriteOutcome};
use canif::frame::Frame;
use canif::pdu_mode::PduModeRequest;
use canif::upper::{Indication, TxResult, UpperLayer};

pub const C0: ControllerId = ControllerId::new(0);

pub type TestCanIf = CanIf<'static, NoopRawMutex, &'static MockDriver>;

/// Scriptable driver double: records every call, returns a programmable
/// write outcome, optionally refuses mode transitions.
pub struct MockDriver {
    outcome: Mutex<WriteOutcome>,
    writes: Mutex<Vec<(Hth, Frame)>>,
    mode_requests: Mutex<Vec<(ControllerId, ModeTransition)>>,
    reject_modes: AtomicBool,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(WriteOutcome::Ok),
            writes: Mutex::new(Vec::new()),
            mode_requests: Mutex::new(Vec::new()),
            reject_modes: AtomicBool::new(false),
        }
    }

    pub fn set_outcome(&self, outcome: WriteOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn set_reject_modes(&self, reject: bool) {
        self.reject_modes.store(reject, Ordering::SeqCst);
    }

    /// Drains the recorded write calls, including rejected and busy attempts.
    pub fn take_writes(&self) -> Vec<(Hth, Frame)> {
        std::mem::take(&mut *self.writes.lock().unwrap())
    }

    pub fn take_mode_requests(&self) -> Vec<(ControllerId, ModeTransition)> {
        std::mem::take(&mut *self.mode_requests.lock().unwrap())
    }
}

impl Driver for MockDriver {
    fn write(&self, mailbox: Hth, frame: &Frame) -> WriteOutcome {
        self.writes.lock().unwrap().push((mailbox, *frame));
        *self.outcome.lock().unwrap()
    }

    fn mode_request(
        &self,
        controller: ControllerId,
        transition: ModeTransition,
    ) -> Result<(), TransitionRejected> {
        if self.reject_modes.load(Ordering::SeqCst) {
            return Err(TransitionRejected);
        }
        self.mode_requests.lock().unwrap().push((controller, transition));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxRecord {
    pub pdu: u16,
    pub data: Vec<u8>,
    /// Raw identifier, present for advanced-shape indications only
    pub advanced_id: Option<u32>,
}

/// Upper-layer double recording every notification
pub struct Recorder {
    pub indications: Mutex<Vec<RxRecord>>,
    pub confirmations: Mutex<Vec<(u16, TxResult)>>,
    pub bus_offs: Mutex<Vec<ControllerId>>,
    pub mode_indications: Mutex<Vec<(ControllerId, ControllerMode)>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            indications: Mutex::new(Vec::new()),
            confirmations: Mutex::new(Vec::new()),
            bus_offs: Mutex::new(Vec::new()),
            mode_indications: Mutex::new(Vec::new()),
        }
    }

    pub fn indication_count(&self, pdu: u16) -> usize {
        self.indications
            .lock()
            .unwrap()
            .iter()
            .filter(|record| record.pdu == pdu)
            .count()
    }

    pub fn confirmations_for(&self, pdu: u16) -> Vec<TxResult> {
        self.confirmations
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == pdu)
            .map(|(_, result)| *result)
            .collect()
    }
}

impl UpperLayer for Recorder {
    fn rx_indication(&self, pdu: u16, indication: Indication<'_>) {
        let advanced_id = match indication {
            Indication::Advanced { can_id, .. } => Some(can_id.raw()),
            _ => None,
        };
        self.indications.lock().unwrap().push(RxRecord {
            pdu,
            data: indication.data().to_vec(),
            advanced_id,
        });
    }

    fn tx_confirmation(&self, pdu: u16, result: TxResult) {
        self.confirmations.lock().unwrap().push((pdu, result));
    }

    fn controller_bus_off(&self, controller: ControllerId) {
        self.bus_offs.lock().unwrap().push(controller);
    }

    fn controller_mode_indication(&self, controller: ControllerId, mode: ControllerMode) {
        self.mode_indications.lock().unwrap().push((controller, mode));
    }
}

/// Starts the controller and opens both traffic directions.
pub fn bring_online(canif: &TestCanIf, controller: ControllerId) {
    canif
        .set_controller_mode(controller, ControllerMode::Started)
        .unwrap();
    canif.set_pdu_mode(controller, PduModeRequest::Online).unwrap();
}
