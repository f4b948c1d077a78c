// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Infraprint Server: IPP wire codec and HTTP framing, the printer object with
// its jobs, output devices and pull subscriptions, the operation dispatcher,
// and the network listener that serves it.  Builds on the domain types of
// `infraprint-core`.

pub mod codec;
pub mod device;
pub mod dispatch;
pub mod events;
pub mod handlers;
pub mod http;
pub mod job;
mod lock;
pub mod printer;
pub mod reconcile;
pub mod requested;
pub mod server;
pub mod spool;
pub mod validate;

pub use codec::IppMessage;
pub use dispatch::process_request;
pub use printer::Printer;
pub use server::InfraServer;
