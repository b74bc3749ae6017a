mod common;

use common::{C0, MockDriver, Recorder, TestCanIf, bring_online};

use canif::config::{
    Config, ConfigError, ControllerConfig, QueueRef, ReceptionMode, TxMailboxConfig, TxPduConfig,
    WakeupValidation,
};
use canif::controller::{ControllerMode, ControllerRuntime, ModeError, TxConfirmationState};
use canif::core::{CanId, FrameKind, Hth, TxPduId};
use canif::driver::{ModeTransition, WriteOutcome};
use canif::pdu_mode::{PduMode, PduModeRequest};
use canif::queue::{Policy, PriorityQueue, QueuedFrame, TxQueue};
use canif::upper::UpperLayer;
use canif::{CanIf, InitError, Storage, TransmitError};

const fn tx_pdu(can_id: u16, pn_filter_pass: bool, upper_id: u16) -> TxPduConfig {
    TxPduConfig {
        can_id: CanId::new_standard(can_id).unwrap(),
        mask: u32::MAX,
        kind: FrameKind::Classic,
        length: 8,
        truncation: false,
        mailbox: Hth::new(0),
        dynamic: None,
        meta_data_len: 0,
        pn_filter_pass,
        upper: 0,
        upper_id,
    }
}

static CONTROLLERS: [ControllerConfig; 1] = [ControllerConfig {
    wakeup_validation: WakeupValidation::Off,
    pn_tx_filter: true,
    hash_seed: 0,
}];

static TX_PDUS: [TxPduConfig; 2] = [tx_pdu(0x400, false, 100), tx_pdu(0x3ff, true, 101)];

static TX_MAILBOXES: [TxMailboxConfig; 1] = [TxMailboxConfig {
    controller: C0,
    first: TxPduId::new(0),
    last: TxPduId::new(1),
    queue: Some(QueueRef {
        index: 0,
        policy: Policy::PriorityByCanId,
    }),
}];

static CONFIG: Config<'static> = Config {
    controllers: &CONTROLLERS,
    tx_pdus: &TX_PDUS,
    rx_pdus: &[],
    tx_mailboxes: &TX_MAILBOXES,
    rx_mailboxes: &[],
    hash: None,
};

fn fixture() -> (&'static TestCanIf, &'static MockDriver, &'static Recorder) {
    let driver: &'static MockDriver = Box::leak(Box::new(MockDriver::new()));
    let recorder: &'static Recorder = Box::leak(Box::new(Recorder::new()));
    let upper: &'static [&'static (dyn UpperLayer + Sync)] =
        Box::leak(Box::new([recorder as &(dyn UpperLayer + Sync)]));

    let storage = Storage {
        controllers: Box::leak(Box::new([ControllerRuntime::new()])),
        rx_reception: Box::leak(Box::<[ReceptionMode; 0]>::new([])),
        tx_queues: Box::leak(Box::new([TxQueue::Priority(PriorityQueue::new(
            Box::leak(Box::new([0u32; 1])),
            Box::leak(Box::new([QueuedFrame::empty(); 2])),
        ))])),
        dynamic_ids: Box::leak(Box::<[CanId; 0]>::new([])),
        confirmation_words: Box::leak(Box::new([0u32; 1])),
    };

    let canif = Box::leak(Box::new(
        CanIf::new(&CONFIG, driver, upper, storage).unwrap(),
    ));
    (canif, driver, recorder)
}

#[test]
fn test_controller_lifecycle() {
    let (canif, driver, _recorder) = fixture();

    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Stopped));

    canif.set_controller_mode(C0, ControllerMode::Started).unwrap();
    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Started));

    // same-state requests succeed without another driver call
    canif.set_controller_mode(C0, ControllerMode::Started).unwrap();
    assert_eq!(
        driver.take_mode_requests(),
        vec![(C0, ModeTransition::Start)]
    );

    canif.set_controller_mode(C0, ControllerMode::Stopped).unwrap();
    canif.set_controller_mode(C0, ControllerMode::Sleep).unwrap();
    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Sleep));

    // a sleeping controller wakes into the stopped state
    canif.set_controller_mode(C0, ControllerMode::Stopped).unwrap();
    assert_eq!(
        driver.take_mode_requests(),
        vec![
            (C0, ModeTransition::Stop),
            (C0, ModeTransition::Sleep),
            (C0, ModeTransition::Wakeup),
        ]
    );
}

#[test]
fn test_illegal_controller_transitions() {
    let (canif, _driver, _recorder) = fixture();

    canif.set_controller_mode(C0, ControllerMode::Started).unwrap();
    assert_eq!(
        canif.set_controller_mode(C0, ControllerMode::Sleep),
        Err(ModeError::Transition)
    );

    canif.set_controller_mode(C0, ControllerMode::Stopped).unwrap();
    canif.set_controller_mode(C0, ControllerMode::Sleep).unwrap();
    assert_eq!(
        canif.set_controller_mode(C0, ControllerMode::Started),
        Err(ModeError::Transition)
    );

    assert_eq!(
        canif.set_controller_mode(canif::core::ControllerId::new(9), ControllerMode::Started),
        Err(ModeError::Parameter)
    );
}

#[test]
fn test_driver_veto_leaves_state_unchanged() {
    let (canif, driver, _recorder) = fixture();

    driver.set_reject_modes(true);
    assert_eq!(
        canif.set_controller_mode(C0, ControllerMode::Started),
        Err(ModeError::Rejected)
    );
    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Stopped));

    driver.set_reject_modes(false);
    canif.set_controller_mode(C0, ControllerMode::Started).unwrap();
}

#[test]
fn test_pdu_mode_requires_started_controller() {
    let (canif, _driver, _recorder) = fixture();

    assert_eq!(
        canif.set_pdu_mode(C0, PduModeRequest::Online),
        Err(ModeError::NotStarted)
    );

    canif.set_controller_mode(C0, ControllerMode::Started).unwrap();
    canif.set_pdu_mode(C0, PduModeRequest::Online).unwrap();
    assert_eq!(canif.pdu_mode(C0), Some(PduMode::Online));

    // a request that changes nothing is accepted and mutates nothing
    canif.set_pdu_mode(C0, PduModeRequest::RxOnline).unwrap();
    assert_eq!(canif.pdu_mode(C0), Some(PduMode::Online));
}

#[test]
fn test_stop_forces_tx_offline_and_flushes() {
    let (canif, driver, _recorder) = fixture();
    bring_online(canif, C0);

    driver.set_outcome(WriteOutcome::Busy);
    canif.transmit(TxPduId::new(0), &[1]).unwrap();
    canif.transmit(TxPduId::new(1), &[2]).unwrap();
    assert_eq!(canif.tx_queue_occupancy(Hth::new(0)), Some(2));

    canif.set_controller_mode(C0, ControllerMode::Stopped).unwrap();
    assert_eq!(canif.tx_queue_occupancy(Hth::new(0)), Some(0));
    assert_eq!(canif.pdu_mode(C0), Some(PduMode::RxOnline));
}

#[test]
fn test_bus_off_stops_and_flushes() {
    let (canif, driver, recorder) = fixture();
    bring_online(canif, C0);

    canif.transmit(TxPduId::new(0), &[1]).unwrap();
    canif.tx_confirmation(TxPduId::new(0));
    assert_eq!(
        canif.tx_confirmation_state(C0),
        Some(TxConfirmationState::Ok)
    );

    driver.set_outcome(WriteOutcome::Busy);
    canif.transmit(TxPduId::new(1), &[2]).unwrap();
    assert_eq!(canif.tx_queue_occupancy(Hth::new(0)), Some(1));

    canif.bus_off(C0);
    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Stopped));
    assert_eq!(canif.tx_queue_occupancy(Hth::new(0)), Some(0));
    assert_eq!(
        canif.tx_confirmation_state(C0),
        Some(TxConfirmationState::Unknown)
    );
    assert_eq!(*recorder.bus_offs.lock().unwrap(), vec![C0]);
}

#[test]
fn test_mode_indication_updates_and_forwards() {
    let (canif, _driver, recorder) = fixture();

    canif.controller_mode_indication(C0, ControllerMode::Started);
    assert_eq!(canif.controller_mode(C0), Some(ControllerMode::Started));
    assert_eq!(
        *recorder.mode_indications.lock().unwrap(),
        vec![(C0, ControllerMode::Started)]
    );
}

#[test]
fn test_wake_filter_gates_transmissions() {
    let (canif, driver, _recorder) = fixture();
    bring_online(canif, C0);

    canif
        .set_pdu_mode(C0, PduModeRequest::OnlineWakeFilter)
        .unwrap();
    assert_eq!(canif.pdu_mode(C0), Some(PduMode::OnlineWakeFilter));

    assert_eq!(
        canif.transmit(TxPduId::new(0), &[1]),
        Err(TransmitError::Filtered)
    );
    canif.transmit(TxPduId::new(1), &[1]).unwrap();
    assert_eq!(driver.take_writes().len(), 1);

    // leaving the wake-filter state lifts the filter
    canif.set_pdu_mode(C0, PduModeRequest::Online).unwrap();
    canif.transmit(TxPduId::new(0), &[1]).unwrap();
}

#[test]
fn test_rejected_construction() {
    let driver = MockDriver::new();
    let recorder = Recorder::new();
    let upper: [&(dyn UpperLayer + Sync); 1] = [&recorder];

    // a transmit PDU pointing at a missing mailbox
    let tx_pdus = [TxPduConfig {
        mailbox: Hth::new(7),
        ..tx_pdu(0x123, false, 0)
    }];
    let bad_config = Config {
        controllers: &CONTROLLERS,
        tx_pdus: &tx_pdus,
        rx_pdus: &[],
        tx_mailboxes: &[],
        rx_mailboxes: &[],
        hash: None,
    };

    let mut controllers = [ControllerRuntime::new()];
    let mut queue_words = [0u32; 1];
    let mut queue_slots = [QueuedFrame::empty(); 2];
    let mut queues = [TxQueue::Priority(PriorityQueue::new(
        &mut queue_words,
        &mut queue_slots,
    ))];
    let mut confirmation_words = [0u32; 1];
    let storage = Storage {
        controllers: &mut controllers,
        rx_reception: &mut [],
        tx_queues: &mut queues,
        dynamic_ids: &mut [],
        confirmation_words: &mut confirmation_words,
    };

    let result = CanIf::<'_, embassy_sync::blocking_mutex::raw::NoopRawMutex, _>::new(
        &bad_config,
        &driver,
        &upper,
        storage,
    );
    assert!(matches!(
        result.err(),
        Some(InitError::Config(ConfigError::TxPdu(0)))
    ));
}

#[test]
fn test_storage_mismatch_is_rejected() {
    let driver = MockDriver::new();
    let recorder = Recorder::new();
    let upper: [&(dyn UpperLayer + Sync); 1] = [&recorder];

    // controller slice too short for the configuration
    let storage = Storage {
        controllers: &mut [],
        rx_reception: &mut [],
        tx_queues: &mut [],
        dynamic_ids: &mut [],
        confirmation_words: &mut [0u32; 1],
    };

    let result = CanIf::<'_, embassy_sync::blocking_mutex::raw::NoopRawMutex, _>::new(
        &CONFIG,
        &driver,
        &upper,
        storage,
    );
    assert!(matches!(result.err(), Some(InitError::Storage)));
}
