//! Shared shape for the three external estimation adapters.
//!
//! Every adapter resolves to `Estimate<T>` with `data` populated according to
//! the same schema whether it came from the live service or the offline
//! generator. Callers never branch on `success` to decide what fields exist;
//! it only says whether the live service actually answered, so a masked
//! outage stays observable in logs and stored results.

use std::time::Duration;

pub const ADAPTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Location-independent average yield used by the offline generators.
pub const OFFLINE_ANNUAL_YIELD_KWH_PER_KW: f64 = 1400.0;

#[derive(Debug, Clone)]
pub struct Estimate<T> {
    /// True when the live service answered; false when the offline generator
    /// supplied the data (unconfigured adapter or masked failure).
    pub success: bool,
    pub data: T,
}

impl<T> Estimate<T> {
    pub fn live(data: T) -> Self {
        Estimate { success: true, data }
    }

    pub fn offline(data: T) -> Self {
        Estimate { success: false, data }
    }
}
