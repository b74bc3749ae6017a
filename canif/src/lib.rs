//! # Canif
//!
//! This library is a hardware-independent CAN interface layer: it multiplexes
//! the PDUs of upper-layer protocol modules onto the transmit objects of one
//! or more CAN controllers and routes received frames back to the module that
//! owns them. It targets no_std environments, uses caller-provided storage
//! for all runtime state and keeps every critical section bounded.
//!
//! ## Architecture
//!
//! ```text
//!   ┌─────────────┐  ┌─────────────┐  ┌─────────────┐
//!   │ Upper layer │  │ Upper layer │  │ Upper layer │
//!   └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!          │ transmit       │ indications    │
//!          ▼                ▼                ▼
//!   ┌─────────────────────────────────────────────────┐
//!   │                     CanIf                       │
//!   │  controller modes │ PDU modes │ wake-up state   │
//!   │  Tx gateway → software queues → requeue engine  │
//!   │  Rx dispatch: direct / linear / double-hash     │
//!   └──────┬──────────────────────────────▲───────────┘
//!          │ write                        │ rx, confirmations,
//!          ▼                              │ bus-off, mode events
//!   ┌─────────────────────────────────────┴───────────┐
//!   │                   CAN driver                    │
//!   └─────────────────────────────────────────────────┘
//! ```
//!
//! Components:
//! * _Configuration_ is an immutable, generated table set (PDU tables,
//!   mailbox tables, hash tables) passed by shared reference and validated
//!   once at construction.
//! * _CanIf_ owns the runtime state behind two named locks: one for the
//!   controller and channel modes, one for the transmit queues and the
//!   hardware writes they order. Unrelated services never share a lock.
//! * _Queues_ implement the two buffering policies (priority-by-id with a
//!   highest-set-bit selection, FIFO with in-place cancellation) over
//!   storage the caller allocates next to the stack.
//! * The _driver_ side is the `canif-driver` trait crate; drivers call the
//!   stack's notification entry points directly from interrupt context.
//!
//! ## Concurrency model
//!
//! There are no threads and no blocking: concurrency comes from driver
//! callbacks preempting task-level services. Every shared structure is
//! mutated inside a critical section provided by an `embassy-sync` blocking
//! mutex; the `RawMutex` type parameter selects a real critical section on
//! hardware or a no-op in single-threaded tests. Upper-layer callbacks are
//! always invoked with no lock held, so they may re-enter the stack.
#![no_std]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub use canif_core as core;
pub use canif_driver as driver;
pub use canif_driver::frame;

pub mod config;
pub mod controller;
pub mod interface;
pub mod pdu_mode;
pub mod queue;
pub(crate) mod report;
mod rx;
mod tx;
pub mod upper;
pub mod utils;

pub use interface::{CanIf, InitError, Storage};
pub use rx::RxError;
pub use tx::{CancelError, TransmitError};
