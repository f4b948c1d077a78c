// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operation handlers, grouped by the object they act on.  Every handler has
// the `dispatch::Handler` signature and leaves a status in the response.

pub mod device;
pub mod documents;
pub mod jobs;
pub mod printer;
pub mod subscriptions;
