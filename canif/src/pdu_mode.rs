//! PDU channel mode handling
//!
//! Independent of the controller state machine, each controller carries a
//! logical channel mode controlling which direction of PDU traffic is
//! processed. The mode is the product of an Rx axis (on/off) and a Tx axis
//! (off, on, passive, wake-filtered); requests move one or both axes and the
//! result is looked up in a total transition table.
//!
//! In a passive Tx state transmissions are not sent but confirmed
//! immediately, so upper layers keep cycling. In a wake-filtered Tx state
//! only transmissions explicitly allowed to pass the partial-networking
//! filter reach the bus.

/// Logical PDU channel state of one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PduMode {
    Offline = 0,
    RxOnline = 1,
    TxOnline = 2,
    Online = 3,
    OfflineActive = 4,
    OfflineActiveRxOnline = 5,
    OnlineWakeFilter = 6,
    TxOnlineWakeFilter = 7,
}

impl PduMode {
    pub const COUNT: usize = 8;

    pub const fn from_u8_truncating(code: u8) -> Self {
        match code % Self::COUNT as u8 {
            0 => PduMode::Offline,
            1 => PduMode::RxOnline,
            2 => PduMode::TxOnline,
            3 => PduMode::Online,
            4 => PduMode::OfflineActive,
            5 => PduMode::OfflineActiveRxOnline,
            6 => PduMode::OnlineWakeFilter,
            7 => PduMode::TxOnlineWakeFilter,
            _ => ::core::unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }

    /// Received frames are dispatched in this state.
    pub const fn rx_online(self) -> bool {
        matches!(
            self,
            PduMode::RxOnline
                | PduMode::Online
                | PduMode::OfflineActiveRxOnline
                | PduMode::OnlineWakeFilter
        )
    }

    /// Transmissions reach the hardware in this state.
    pub const fn tx_online(self) -> bool {
        matches!(
            self,
            PduMode::TxOnline
                | PduMode::Online
                | PduMode::OnlineWakeFilter
                | PduMode::TxOnlineWakeFilter
        )
    }

    /// Transmissions are confirmed without being sent in this state.
    pub const fn tx_passive(self) -> bool {
        matches!(self, PduMode::OfflineActive | PduMode::OfflineActiveRxOnline)
    }

    /// The partial-networking transmit filter applies in this state.
    pub const fn wake_filter(self) -> bool {
        matches!(self, PduMode::OnlineWakeFilter | PduMode::TxOnlineWakeFilter)
    }
}

/// Requested PDU channel mode change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PduModeRequest {
    Offline = 0,
    RxOffline = 1,
    RxOnline = 2,
    TxOffline = 3,
    TxOnline = 4,
    Online = 5,
    OfflineActive = 6,
    OfflineActiveRxOnline = 7,
    OnlineWakeFilter = 8,
    TxOnlineWakeFilter = 9,
}

impl PduModeRequest {
    pub const COUNT: usize = 10;

    pub const fn from_u8_truncating(code: u8) -> Self {
        match code % Self::COUNT as u8 {
            0 => PduModeRequest::Offline,
            1 => PduModeRequest::RxOffline,
            2 => PduModeRequest::RxOnline,
            3 => PduModeRequest::TxOffline,
            4 => PduModeRequest::TxOnline,
            5 => PduModeRequest::Online,
            6 => PduModeRequest::OfflineActive,
            7 => PduModeRequest::OfflineActiveRxOnline,
            8 => PduModeRequest::OnlineWakeFilter,
            9 => PduModeRequest::TxOnlineWakeFilter,
            _ => ::core::unreachable!(),
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TxAxis {
    Off,
    On,
    Passive,
    WakeFilter,
}

const fn split(mode: PduMode) -> (bool, TxAxis) {
    match mode {
        PduMode::Offline => (false, TxAxis::Off),
        PduMode::RxOnline => (true, TxAxis::Off),
        PduMode::TxOnline => (false, TxAxis::On),
        PduMode::Online => (true, TxAxis::On),
        PduMode::OfflineActive => (false, TxAxis::Passive),
        PduMode::OfflineActiveRxOnline => (true, TxAxis::Passive),
        PduMode::OnlineWakeFilter => (true, TxAxis::WakeFilter),
        PduMode::TxOnlineWakeFilter => (false, TxAxis::WakeFilter),
    }
}

const fn join(rx: bool, tx: TxAxis) -> PduMode {
    match (rx, tx) {
        (false, TxAxis::Off) => PduMode::Offline,
        (true, TxAxis::Off) => PduMode::RxOnline,
        (false, TxAxis::On) => PduMode::TxOnline,
        (true, TxAxis::On) => PduMode::Online,
        (false, TxAxis::Passive) => PduMode::OfflineActive,
        (true, TxAxis::Passive) => PduMode::OfflineActiveRxOnline,
        (true, TxAxis::WakeFilter) => PduMode::OnlineWakeFilter,
        (false, TxAxis::WakeFilter) => PduMode::TxOnlineWakeFilter,
    }
}

const fn apply(state: PduMode, request: PduModeRequest) -> PduMode {
    let (rx, tx) = split(state);
    let (rx, tx) = match request {
        PduModeRequest::Offline => (false, TxAxis::Off),
        PduModeRequest::RxOffline => (false, tx),
        PduModeRequest::RxOnline => (true, tx),
        PduModeRequest::TxOffline => (rx, TxAxis::Off),
        PduModeRequest::TxOnline => (rx, TxAxis::On),
        PduModeRequest::Online => (true, TxAxis::On),
        PduModeRequest::OfflineActive => (rx, TxAxis::Passive),
        PduModeRequest::OfflineActiveRxOnline => (true, TxAxis::Passive),
        PduModeRequest::OnlineWakeFilter => (true, TxAxis::WakeFilter),
        PduModeRequest::TxOnlineWakeFilter => (rx, TxAxis::WakeFilter),
    };
    join(rx, tx)
}

const fn next_mode(state: PduMode, request: PduModeRequest) -> Option<PduMode> {
    let next = apply(state, request);
    if next.into_u8() == state.into_u8() {
        None
    } else {
        Some(next)
    }
}

const fn build_transitions() -> [[Option<PduMode>; PduModeRequest::COUNT]; PduMode::COUNT] {
    let mut table = [[None; PduModeRequest::COUNT]; PduMode::COUNT];
    let mut state = 0;
    while state < PduMode::COUNT {
        let mut request = 0;
        while request < PduModeRequest::COUNT {
            table[state][request] = next_mode(
                PduMode::from_u8_truncating(state as u8),
                PduModeRequest::from_u8_truncating(request as u8),
            );
            request += 1;
        }
        state += 1;
    }
    table
}

/// The same mode with the Tx axis forced offline. Applied when the owning
/// controller leaves the started state.
pub(crate) const fn with_tx_offline(mode: PduMode) -> PduMode {
    let (rx, _) = split(mode);
    join(rx, TxAxis::Off)
}

/// Total transition table of the PDU mode state machine.
///
/// `TRANSITIONS[state][request]` is the state to enter, or `None` when the
/// request changes nothing in the given state. Applying a `None` entry never
/// mutates state.
pub const TRANSITIONS: [[Option<PduMode>; PduModeRequest::COUNT]; PduMode::COUNT] =
    build_transitions();

/// Table lookup helper
pub const fn transition(state: PduMode, request: PduModeRequest) -> Option<PduMode> {
    TRANSITIONS[state.into_u8() as usize][request.into_u8() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> impl Iterator<Item = PduMode> {
        (0..PduMode::COUNT as u8).map(PduMode::from_u8_truncating)
    }

    fn all_requests() -> impl Iterator<Item = PduModeRequest> {
        (0..PduModeRequest::COUNT as u8).map(PduModeRequest::from_u8_truncating)
    }

    #[test]
    fn test_table_is_total_and_noop_free() {
        for state in all_states() {
            for request in all_requests() {
                match transition(state, request) {
                    // a real transition never maps a state onto itself
                    Some(next) => assert_ne!(next, state),
                    None => {}
                }
            }
        }
    }

    #[test]
    fn test_full_mode_requests() {
        for state in all_states() {
            match transition(state, PduModeRequest::Online) {
                Some(next) => assert_eq!(next, PduMode::Online),
                None => assert_eq!(state, PduMode::Online),
            }
            match transition(state, PduModeRequest::Offline) {
                Some(next) => assert_eq!(next, PduMode::Offline),
                None => assert_eq!(state, PduMode::Offline),
            }
        }
    }

    #[test]
    fn test_single_axis_requests() {
        assert_eq!(
            transition(PduMode::Online, PduModeRequest::TxOffline),
            Some(PduMode::RxOnline)
        );
        assert_eq!(
            transition(PduMode::Online, PduModeRequest::RxOffline),
            Some(PduMode::TxOnline)
        );
        assert_eq!(
            transition(PduMode::Offline, PduModeRequest::TxOnline),
            Some(PduMode::TxOnline)
        );
        assert_eq!(transition(PduMode::Offline, PduModeRequest::RxOffline), None);
        assert_eq!(
            transition(PduMode::OfflineActive, PduModeRequest::RxOnline),
            Some(PduMode::OfflineActiveRxOnline)
        );
    }

    #[test]
    fn test_wake_filter_requests() {
        assert_eq!(
            transition(PduMode::Online, PduModeRequest::OnlineWakeFilter),
            Some(PduMode::OnlineWakeFilter)
        );
        assert_eq!(
            transition(PduMode::Offline, PduModeRequest::TxOnlineWakeFilter),
            Some(PduMode::TxOnlineWakeFilter)
        );
        assert_eq!(
            transition(PduMode::RxOnline, PduModeRequest::TxOnlineWakeFilter),
            Some(PduMode::OnlineWakeFilter)
        );
        assert_eq!(
            transition(PduMode::OnlineWakeFilter, PduModeRequest::TxOffline),
            Some(PduMode::RxOnline)
        );
    }

    #[test]
    fn test_axis_round_trip() {
        for state in all_states() {
            let (rx, _) = split(state);
            assert_eq!(state.rx_online(), rx);
            assert_eq!(join(split(state).0, split(state).1), state);
        }
    }
}
