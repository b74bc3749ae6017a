//! The CAN interface facade
//!
//! [`CanIf`] owns the driver, the upper-layer registration table and all
//! runtime state. It is constructed once per configuration and then shared:
//! every service takes `&self` and synchronizes internally.
//!
//! Two named locks guard disjoint state so unrelated services never
//! serialize against each other:
//! * `modes` guards controller modes, PDU modes, wake-up validation and
//!   the per-PDU reception switches
//! * `tx` guards the transmit queues, dynamic identifiers, the
//!   delivered-confirmation marks and the hardware writes they order
//!
//! Where both are needed, `tx` nests inside `modes`, never the other way
//! around. Upper-layer callbacks always run outside of both.

use core::cell::RefCell;

use canif_core::{CanId, ControllerId, Hth, InvalidValue, RxPduId, TxPduId};
use canif_driver::{Driver, ModeTransition};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::{Config, ConfigError, ReceptionMode};
use crate::controller::{
    ControllerMode, ControllerRuntime, ModeAction, ModeError, TxConfirmationState, WakeupState,
    mode_action,
};
use crate::pdu_mode::{PduMode, PduModeRequest, transition, with_tx_offline};
use crate::queue::TxQueue;
use crate::report::{Code, Service, dev_error};
use crate::upper::UpperLayer;
use crate::utils::bitset::{BitVec, words_for};

/// Mutable runtime storage, allocated by the caller
///
/// Slice lengths are checked against the configuration at construction:
/// `controllers` and `rx_reception` match their tables, `dynamic_ids` covers
/// the highest dynamic slot, `confirmation_words` provides one bit per
/// transmit PDU, and every queue referenced by a transmit mailbox must exist
/// with the configured policy and sufficient capacity.
pub struct Storage<'a> {
    pub controllers: &'a mut [ControllerRuntime],
    pub rx_reception: &'a mut [ReceptionMode],
    pub tx_queues: &'a mut [TxQueue<'a>],
    pub dynamic_ids: &'a mut [CanId],
    pub confirmation_words: &'a mut [u32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// A generated table is malformed.
    Config(ConfigError),
    /// The runtime storage does not fit the configuration.
    Storage,
}

pub(crate) struct ModeState<'a> {
    pub controllers: &'a mut [ControllerRuntime],
    pub rx_reception: &'a mut [ReceptionMode],
}

pub(crate) struct TxState<'a> {
    pub queues: &'a mut [TxQueue<'a>],
    pub dynamic_ids: &'a mut [CanId],
    /// Hand-over marks, one bit per transmit PDU: set when a queued frame is
    /// handed to the hardware with its confirmation delivered early, consumed
    /// by that frame's hardware confirmation. Keeps the pair from notifying
    /// twice.
    pub notified: BitVec<'a>,
}

/// The CAN interface layer
///
/// Generic over the critical-section implementation `M`: use
/// `CriticalSectionRawMutex` when driver callbacks preempt task-level
/// services, `NoopRawMutex` in single-threaded environments and tests.
pub struct CanIf<'a, M: RawMutex, D: Driver> {
    pub(crate) config: &'a Config<'a>,
    pub(crate) driver: D,
    pub(crate) upper: &'a [&'a (dyn UpperLayer + Sync)],
    pub(crate) modes: Mutex<M, RefCell<ModeState<'a>>>,
    pub(crate) tx: Mutex<M, RefCell<TxState<'a>>>,
}

impl<'a, M: RawMutex, D: Driver> CanIf<'a, M, D> {
    /// Validates the configuration against the storage and brings every
    /// controller into the stopped state.
    pub fn new(
        config: &'a Config<'a>,
        driver: D,
        upper: &'a [&'a (dyn UpperLayer + Sync)],
        storage: Storage<'a>,
    ) -> Result<Self, InitError> {
        if let Err(error) = config.validate(upper.len()) {
            dev_error(Service::Init, Code::InvalidConfig);
            return Err(InitError::Config(error));
        }
        Self::check_storage(config, &storage)?;

        let Storage {
            controllers,
            rx_reception,
            tx_queues,
            dynamic_ids,
            confirmation_words,
        } = storage;

        for controller in controllers.iter_mut() {
            controller.initialize();
        }
        for (slot, pdu) in rx_reception.iter_mut().zip(config.rx_pdus) {
            *slot = pdu.reception;
        }
        for pdu in config.tx_pdus {
            if let Some(slot) = pdu.dynamic {
                dynamic_ids[usize::from(slot)] = pdu.can_id;
            }
        }
        for queue in tx_queues.iter_mut() {
            queue.clear_all();
        }

        Ok(Self {
            config,
            driver,
            upper,
            modes: Mutex::new(RefCell::new(ModeState {
                controllers,
                rx_reception,
            })),
            tx: Mutex::new(RefCell::new(TxState {
                queues: tx_queues,
                dynamic_ids,
                notified: BitVec::new(confirmation_words),
            })),
        })
    }

    fn check_storage(config: &Config<'a>, storage: &Storage<'a>) -> Result<(), InitError> {
        let fits = storage.controllers.len() == config.controllers.len()
            && storage.rx_reception.len() == config.rx_pdus.len()
            && storage.dynamic_ids.len() >= config.dynamic_slot_count()
            && storage.confirmation_words.len() >= words_for(config.tx_pdus.len());
        if !fits {
            dev_error(Service::Init, Code::InvalidConfig);
            return Err(InitError::Storage);
        }

        for mailbox in config.tx_mailboxes {
            let Some(reference) = mailbox.queue else {
                continue;
            };
            let Some(queue) = storage.tx_queues.get(usize::from(reference.index)) else {
                dev_error(Service::Init, Code::InvalidConfig);
                return Err(InitError::Storage);
            };
            let span_fits = match queue.pdu_span() {
                Some(span) => span >= mailbox.pdu_span(),
                // a FIFO without a cancellation map serves any span
                None => true,
            };
            if queue.policy() != reference.policy || !span_fits {
                dev_error(Service::Init, Code::InvalidConfig);
                return Err(InitError::Storage);
            }
        }
        Ok(())
    }

    /// Tears the stack down: all controllers return to the uninitialized
    /// state and every queue is flushed.
    pub fn reset(&mut self) {
        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            for controller in state.controllers.iter_mut() {
                *controller = ControllerRuntime::new();
            }
            for (slot, pdu) in state.rx_reception.iter_mut().zip(self.config.rx_pdus) {
                *slot = pdu.reception;
            }
        });
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            for queue in state.queues.iter_mut() {
                queue.clear_all();
            }
            state.notified.clear_all();
        });
    }

    /// Requests a controller state transition.
    ///
    /// Same-state requests succeed without side effects. On the transition
    /// out of the started state the Tx direction is forced offline and the
    /// controller's queues are flushed before the state change completes.
    pub fn set_controller_mode(
        &self,
        controller: ControllerId,
        target: ControllerMode,
    ) -> Result<(), ModeError> {
        if usize::from(controller) >= self.config.controllers.len() {
            dev_error(Service::SetControllerMode, Code::InvalidController);
            return Err(ModeError::Parameter);
        }

        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &mut state.controllers[usize::from(controller)];
            match mode_action(runtime.mode, target) {
                ModeAction::NoOp => Ok(()),
                ModeAction::Rejected => Err(ModeError::Transition),
                ModeAction::Request(request) => {
                    self.driver
                        .mode_request(controller, request)
                        .map_err(|_| ModeError::Rejected)?;
                    match request {
                        ModeTransition::Stop => {
                            runtime.pdu_mode = with_tx_offline(runtime.pdu_mode);
                            runtime.tx_filter_active = false;
                            self.clear_controller_queues(controller);
                        }
                        ModeTransition::Start => {
                            runtime.tx_confirmed = TxConfirmationState::Unknown;
                        }
                        ModeTransition::Sleep => runtime.wakeup = WakeupState::Armed,
                        ModeTransition::Wakeup => {}
                    }
                    runtime.mode = target;
                    Ok(())
                }
            }
        })
    }

    pub fn controller_mode(&self, controller: ControllerId) -> Option<ControllerMode> {
        self.modes.lock(|cell| {
            let state = cell.borrow();
            let runtime = state.controllers.get(usize::from(controller))?;
            Some(runtime.mode)
        })
    }

    /// Driver notification: a controller state transition completed.
    pub fn controller_mode_indication(&self, controller: ControllerId, mode: ControllerMode) {
        if usize::from(controller) >= self.config.controllers.len() {
            dev_error(Service::ControllerModeIndication, Code::InvalidController);
            return;
        }

        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &mut state.controllers[usize::from(controller)];
            match mode {
                ControllerMode::Started => runtime.tx_confirmed = TxConfirmationState::Unknown,
                ControllerMode::Stopped => {
                    runtime.pdu_mode = with_tx_offline(runtime.pdu_mode);
                    runtime.tx_filter_active = false;
                    self.clear_controller_queues(controller);
                }
                ControllerMode::Sleep => runtime.wakeup = WakeupState::Armed,
                ControllerMode::Uninit => {}
            }
            runtime.mode = mode;
        });

        for upper in self.upper {
            upper.controller_mode_indication(controller, mode);
        }
    }

    /// Driver notification: the controller went bus-off.
    ///
    /// The controller stops, its queues are flushed regardless of in-flight
    /// state, and upper layers are informed. Recovery is driven from above
    /// by restarting the controller.
    pub fn bus_off(&self, controller: ControllerId) {
        if usize::from(controller) >= self.config.controllers.len() {
            dev_error(Service::BusOff, Code::InvalidController);
            return;
        }

        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &mut state.controllers[usize::from(controller)];
            runtime.mode = ControllerMode::Stopped;
            runtime.pdu_mode = with_tx_offline(runtime.pdu_mode);
            runtime.tx_filter_active = false;
            runtime.tx_confirmed = TxConfirmationState::Unknown;
            self.clear_controller_queues(controller);
        });

        for upper in self.upper {
            upper.controller_bus_off(controller);
        }
    }

    /// Requests a PDU channel mode change.
    ///
    /// Only legal while the controller is started. A request that changes
    /// nothing in the current state succeeds without touching anything.
    /// Leaving a Tx-capable state flushes the controller's queues; entering
    /// or leaving a wake-filter state switches the partial-networking
    /// transmit filter for controllers configured to use it.
    pub fn set_pdu_mode(
        &self,
        controller: ControllerId,
        request: PduModeRequest,
    ) -> Result<(), ModeError> {
        let Some(controller_config) = self.config.controller(controller) else {
            dev_error(Service::SetPduMode, Code::InvalidController);
            return Err(ModeError::Parameter);
        };

        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            let runtime = &mut state.controllers[usize::from(controller)];
            if runtime.mode != ControllerMode::Started {
                return Err(ModeError::NotStarted);
            }

            let Some(next) = transition(runtime.pdu_mode, request) else {
                return Ok(());
            };
            let current = runtime.pdu_mode;

            if current.tx_online() && !next.tx_online() {
                self.clear_controller_queues(controller);
            }
            if next.wake_filter() && !current.wake_filter() {
                runtime.tx_filter_active = controller_config.pn_tx_filter;
            }
            if !next.wake_filter() && current.wake_filter() {
                runtime.tx_filter_active = false;
            }

            runtime.pdu_mode = next;
            Ok(())
        })
    }

    pub fn pdu_mode(&self, controller: ControllerId) -> Option<PduMode> {
        self.modes.lock(|cell| {
            let state = cell.borrow();
            let runtime = state.controllers.get(usize::from(controller))?;
            Some(runtime.pdu_mode)
        })
    }

    /// Suspends or resumes processing of a single receive PDU.
    pub fn set_reception_mode(
        &self,
        pdu: RxPduId,
        mode: ReceptionMode,
    ) -> Result<(), InvalidValue> {
        if usize::from(pdu) >= self.config.rx_pdus.len() {
            dev_error(Service::SetReceptionMode, Code::InvalidRxPdu);
            return Err(InvalidValue);
        }
        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            state.rx_reception[usize::from(pdu)] = mode;
        });
        Ok(())
    }

    /// Replaces the identifier of a dynamic transmit PDU.
    ///
    /// Affects subsequent submissions; an already queued frame keeps the
    /// identifier it was resolved with.
    pub fn set_dynamic_tx_id(&self, pdu: TxPduId, can_id: CanId) -> Result<(), InvalidValue> {
        let Some(entry) = self.config.tx_pdu(pdu) else {
            dev_error(Service::SetDynamicTxId, Code::InvalidTxPdu);
            return Err(InvalidValue);
        };
        let Some(slot) = entry.dynamic else {
            dev_error(Service::SetDynamicTxId, Code::InvalidTxPdu);
            return Err(InvalidValue);
        };
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            state.dynamic_ids[usize::from(slot)] = can_id;
        });
        Ok(())
    }

    pub fn wakeup_state(&self, controller: ControllerId) -> Option<WakeupState> {
        self.modes.lock(|cell| {
            let state = cell.borrow();
            let runtime = state.controllers.get(usize::from(controller))?;
            Some(runtime.wakeup)
        })
    }

    /// Disarms wake-up validation after the wake-up source was handled.
    pub fn reset_wakeup_validation(&self, controller: ControllerId) -> Result<(), InvalidValue> {
        if usize::from(controller) >= self.config.controllers.len() {
            return Err(InvalidValue);
        }
        self.modes.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            state.controllers[usize::from(controller)].wakeup = WakeupState::Idle;
        });
        Ok(())
    }

    pub fn tx_confirmation_state(&self, controller: ControllerId) -> Option<TxConfirmationState> {
        self.modes.lock(|cell| {
            let state = cell.borrow();
            let runtime = state.controllers.get(usize::from(controller))?;
            Some(runtime.tx_confirmed)
        })
    }

    /// Pending-entry count of the queue serving `mailbox`, if it has one
    pub fn tx_queue_occupancy(&self, mailbox: Hth) -> Option<usize> {
        let reference = self.config.tx_mailbox(mailbox)?.queue?;
        self.tx.lock(|cell| {
            let state = cell.borrow();
            Some(state.queues[usize::from(reference.index)].occupancy())
        })
    }

    /// Flushes the queues of every mailbox owned by `controller`.
    ///
    /// Hand-over marks of the flushed PDUs are dropped with the queues: a
    /// stopped controller delivers no further confirmations that could
    /// consume them.
    ///
    /// Takes the tx lock; callers may hold the modes lock.
    pub(crate) fn clear_controller_queues(&self, controller: ControllerId) {
        self.tx.lock(|cell| {
            let state = &mut *cell.borrow_mut();
            for mailbox in self.config.tx_mailboxes {
                if mailbox.controller != controller {
                    continue;
                }
                if let Some(reference) = mailbox.queue {
                    state.queues[usize::from(reference.index)].clear_all();
                    for pdu in u16::from(mailbox.first)..=u16::from(mailbox.last) {
                        state.notified.clear(usize::from(pdu));
                    }
                }
            }
        });
    }
}
