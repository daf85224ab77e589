use std::panic::{self, AssertUnwindSafe};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::RngCore;

/// `SR-YYYYMMDD-<6 lowercase hex>`, date in UTC. The six hex digits come
/// from a cryptographic RNG; if sourcing entropy ever panics, a
/// nanosecond-derived fallback keeps id generation from aborting a sync run.
pub fn generate_sync_run_external_id() -> String {
    let date = Utc::now().format("%Y%m%d");
    format!("SR-{date}-{}", six_hex_digits())
}

fn six_hex_digits() -> String {
    let from_rng = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut bytes = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }));

    let bytes = from_rng.unwrap_or_else(|_| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        [(nanos >> 16) as u8, (nanos >> 8) as u8, nanos as u8]
    });

    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
