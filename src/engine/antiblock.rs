// Anti-blocking helpers: client identity rotation and randomized delays.

use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

/// Fallback identity if the configured pool is empty.
const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Pick a random client identity from the pool.
pub fn pick_user_agent(pool: &[String]) -> String {
    pool.choose(&mut rand::thread_rng())
        .cloned()
        .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string())
}

/// Uniform random value in `[low, high]` seconds.
pub fn uniform_secs((low, high): (f64, f64)) -> f64 {
    if high <= low {
        return low.max(0.0);
    }
    rand::thread_rng().gen_range(low..=high)
}

/// Uniform random whole seconds in `[low, high]`.
pub fn uniform_whole_secs((low, high): (u64, u64)) -> u64 {
    if high <= low {
        return low;
    }
    rand::thread_rng().gen_range(low..=high)
}

/// Sleep for a random duration within `range`, yielding to other requests.
pub async fn jittered_delay(range: (f64, f64)) -> Duration {
    let delay = Duration::from_secs_f64(uniform_secs(range));
    if !delay.is_zero() {
        debug!("waiting {:.2}s before request", delay.as_secs_f64());
        tokio::time::sleep(delay).await;
    }
    delay
}
