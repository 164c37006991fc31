// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations with exponential backoff.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a backoff policy appropriate for retrying a provisioning call.
///
/// Unlike a policy for contacting internal services, this one gives up: the
/// caller's record is already in a provisional state, so after the elapsed
/// budget it is better to surface the failure and let a later reconcile pass
/// sort things out.
pub fn provisioning_retry_policy() -> ::backoff::ExponentialBackoff {
    const INITIAL_INTERVAL: Duration = Duration::from_millis(250);
    const MAX_INTERVAL: Duration = Duration::from_secs(5);
    const MAX_ELAPSED_TIME: Duration = Duration::from_secs(30);
    ::backoff::ExponentialBackoff {
        current_interval: INITIAL_INTERVAL,
        initial_interval: INITIAL_INTERVAL,
        multiplier: 2.0,
        max_interval: MAX_INTERVAL,
        max_elapsed_time: Some(MAX_ELAPSED_TIME),
        ..backoff::ExponentialBackoff::default()
    }
}
