//! Reachability probe (`spec` §4.D).
//!
//! Issues ICMP echoes to a target IPv4 via `surge-ping` — a suspension point
//! on the async runtime, not a blocking syscall loop or a `ping(1)` child
//! process.

use std::net::IpAddr;
use std::time::Duration;

use log::{debug, warn};
use surge_ping::{Client, Config, PingIdentifier, PingSequence};
use tokio::time::sleep;

const DEFAULT_ATTEMPTS: u32 = 10;
const PER_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const INTER_ATTEMPT_DELAY: Duration = Duration::from_secs(1);

/// Up to `attempts` ICMP echoes, returning true on the first reply.
/// A malformed IPv4 string is an immediate false, not a panic.
pub async fn is_reachable(ipv4: &str) -> bool {
    is_reachable_with(ipv4, DEFAULT_ATTEMPTS).await
}

pub async fn is_reachable_with(ipv4: &str, attempts: u32) -> bool {
    let Ok(addr) = ipv4.parse::<IpAddr>() else {
        warn!("probe: '{ipv4}' is not a valid IPv4 address");
        return false;
    };
    if !addr.is_ipv4() {
        return false;
    }

    let Ok(client) = Client::new(&Config::default()) else {
        warn!("probe: failed to open ICMP client socket");
        return false;
    };

    let mut pinger = client.pinger(addr, PingIdentifier(rand_identifier())).await;
    pinger.timeout(PER_PROBE_TIMEOUT);

    for attempt in 0..attempts {
        match pinger.ping(PingSequence(attempt as u16), &[]).await {
            Ok(_) => {
                debug!("probe: {ipv4} reachable on attempt {}", attempt + 1);
                return true;
            }
            Err(e) => {
                debug!("probe: {ipv4} attempt {} failed: {e}", attempt + 1);
                if attempt + 1 < attempts {
                    sleep(INTER_ATTEMPT_DELAY).await;
                }
            }
        }
    }
    warn!("probe: {ipv4} unreachable after {attempts} attempts");
    false
}

fn rand_identifier() -> u16 {
    use rand::RngCore;
    (rand::rngs::OsRng.next_u32() & 0xffff) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_ip_is_immediate_false() {
        assert!(!is_reachable("not-an-ip").await);
    }

    #[tokio::test]
    async fn ipv6_is_rejected() {
        assert!(!is_reachable("::1").await);
    }
}
