use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use sysinfo::{System, SystemExt};

/// Cached, low-overhead memory watcher.
/// - Refreshes at most every `REFRESH_EVERY`.
/// - Exposes a single scalar: the fraction of total RAM in use.
struct MemState {
    sys: System,
    last_check: Instant,
    last_util: f64, // used / total (0.0..1.0)
}

static STATE: OnceLock<Mutex<MemState>> = OnceLock::new();
const REFRESH_EVERY: Duration = Duration::from_secs(2);

fn with_state<F, T>(f: F) -> T
where
    F: FnOnce(&mut MemState) -> T,
{
    let m = STATE.get_or_init(|| {
        let mut s = System::new();
        s.refresh_memory();
        Mutex::new(MemState {
            sys: s,
            last_check: Instant::now() - REFRESH_EVERY * 2,
            last_util: 0.0,
        })
    });
    let mut guard = m.lock().unwrap();
    f(&mut guard)
}

/// Returns a recent estimate of memory utilization (0.0..1.0).
pub fn utilization() -> f64 {
    with_state(|st| {
        let now = Instant::now();
        if now.duration_since(st.last_check) >= REFRESH_EVERY {
            st.sys.refresh_memory();
            let total = st.sys.total_memory() as f64;
            let avail = st.sys.available_memory() as f64;
            st.last_util = if total > 0.0 {
                (1.0 - avail / total).clamp(0.0, 1.0)
            } else {
                0.0
            };
            st.last_check = now;
        }
        st.last_util
    })
}
