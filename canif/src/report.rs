//! Development error funnel
//!
//! Every diagnostic of the stack goes through [`dev_error`], identified by
//! the reporting service and an error code. The call lowers to a single log
//! statement; in a build without a logging backend the whole path compiles
//! to nothing.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Service {
    Init = 0x01,
    SetControllerMode = 0x02,
    SetPduMode = 0x03,
    SetReceptionMode = 0x04,
    SetDynamicTxId = 0x05,
    Transmit = 0x10,
    CancelTransmit = 0x11,
    TxConfirmation = 0x12,
    CancelTxConfirmation = 0x13,
    CancelTxNotification = 0x14,
    RxIndication = 0x20,
    BusOff = 0x30,
    ControllerModeIndication = 0x31,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Code {
    InvalidController = 0x01,
    InvalidTxPdu = 0x02,
    InvalidRxPdu = 0x03,
    InvalidMailbox = 0x04,
    InvalidCanId = 0x05,
    InvalidDataLength = 0x06,
    ShortFrame = 0x07,
    NotStarted = 0x08,
    InvalidConfig = 0x10,
    DriverRejected = 0x20,
    QueueOverflow = 0x21,
}

pub(crate) fn dev_error(service: Service, code: Code) {
    warn!(
        "dev error: service 0x{:02x} code 0x{:02x}",
        service as u8, code as u8
    );
}
