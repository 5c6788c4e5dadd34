//! Wi-Fi scan cache (`spec` §4.B).
//!
//! A background task periodically refreshes the snapshot by invoking the
//! host's Wi-Fi scan; lookups are served against an `arc-swap`ped snapshot
//! so readers never observe a torn state mid-refresh.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use log::{debug, warn};

use crate::shell;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanEntry {
    pub ssid: String,
    pub signal_dbm: i32,
    pub security: String,
    pub frequency_mhz: u32,
}

/// Lock-free-to-readers snapshot of nearby Wi-Fi networks.
pub struct ScanCache {
    snapshot: ArcSwap<HashMap<String, ScanEntry>>,
}

impl ScanCache {
    pub fn new() -> Self {
        Self { snapshot: ArcSwap::from_pointee(HashMap::new()) }
    }

    /// Re-scan via the host tool and atomically replace the snapshot.
    /// If the radio is disabled, the scan comes back empty and every
    /// lookup reports unavailable — this is by design, not an error.
    pub async fn refresh(&self) {
        let result = shell::run("nmcli -t -f SSID,SIGNAL,SECURITY,FREQ device wifi list").await;
        if !result.success {
            warn!("scan cache: nmcli scan failed: {}", result.stderr.trim());
            self.snapshot.store(Arc::new(HashMap::new()));
            return;
        }

        let mut next = HashMap::new();
        for line in result.stdout.lines() {
            if let Some(entry) = parse_nmcli_line(line) {
                next.insert(entry.ssid.clone(), entry);
            }
        }
        debug!("scan cache: refreshed, {} networks visible", next.len());
        self.snapshot.store(Arc::new(next));
    }

    pub fn is_available(&self, ssid: &str) -> bool {
        self.snapshot.load().contains_key(ssid)
    }

    pub fn info(&self, ssid: &str) -> Option<ScanEntry> {
        self.snapshot.load().get(ssid).cloned()
    }

    pub fn all(&self) -> Vec<ScanEntry> {
        self.snapshot.load().values().cloned().collect()
    }

    /// The top `n` SSIDs by signal strength, for "SSID not found" error
    /// messages (`spec` §4.E step 3).
    pub fn top_n_ssids(&self, n: usize) -> Vec<String> {
        let mut entries: Vec<ScanEntry> = self.snapshot.load().values().cloned().collect();
        entries.sort_by(|a, b| b.signal_dbm.cmp(&a.signal_dbm));
        entries.into_iter().take(n).map(|e| e.ssid).collect()
    }
}

impl Default for ScanCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one `nmcli -t -f SSID,SIGNAL,SECURITY,FREQ` line. Fields are
/// colon-separated; `nmcli -t` escapes literal colons in the SSID with a
/// backslash, which this parser does not attempt to reverse (SSIDs
/// containing ':' are rare and out of scope here).
fn parse_nmcli_line(line: &str) -> Option<ScanEntry> {
    let mut fields = line.rsplitn(4, ':');
    let frequency_raw = fields.next()?;
    let security = fields.next()?;
    let signal_raw = fields.next()?;
    let ssid = fields.next()?;

    if ssid.is_empty() {
        return None;
    }

    let signal_dbm = signal_raw.trim().parse::<i32>().unwrap_or(0);
    let frequency_mhz = frequency_raw
        .trim()
        .trim_end_matches(" MHz")
        .parse::<u32>()
        .unwrap_or(0);

    Some(ScanEntry {
        ssid: ssid.to_string(),
        signal_dbm,
        security: if security.is_empty() { "none".to_string() } else { security.to_string() },
        frequency_mhz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_line() {
        let entry = parse_nmcli_line("HomeNet:78:WPA2:2437 MHz").unwrap();
        assert_eq!(entry.ssid, "HomeNet");
        assert_eq!(entry.signal_dbm, 78);
        assert_eq!(entry.security, "WPA2");
        assert_eq!(entry.frequency_mhz, 2437);
    }

    #[test]
    fn skips_blank_ssid() {
        assert!(parse_nmcli_line(":60:--:2412 MHz").is_none());
    }

    #[test]
    fn empty_snapshot_reports_unavailable() {
        let cache = ScanCache::new();
        assert!(!cache.is_available("AnyNet"));
        assert!(cache.all().is_empty());
    }

    #[test]
    fn top_n_orders_by_signal() {
        let cache = ScanCache::new();
        let mut map = HashMap::new();
        map.insert("Weak".to_string(), ScanEntry { ssid: "Weak".into(), signal_dbm: 20, security: "WPA2".into(), frequency_mhz: 2412 });
        map.insert("Strong".to_string(), ScanEntry { ssid: "Strong".into(), signal_dbm: 90, security: "WPA2".into(), frequency_mhz: 2437 });
        cache.snapshot.store(Arc::new(map));
        assert_eq!(cache.top_n_ssids(1), vec!["Strong".to_string()]);
    }
}
