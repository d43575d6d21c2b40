use std::collections::HashMap;

use super::registry::ConnId;

/// Inter-driver snooping interests.
///
/// A device-side connection that issues getProperties with a device
/// attribute is asking to observe that device's traffic; the router then
/// copies matching definitions and updates to it alongside normal client
/// delivery.
#[derive(Debug, Default)]
pub struct SnoopTable {
    // (device, optional property) -> interested connections
    entries: HashMap<(String, Option<String>), Vec<ConnId>>,
}

impl SnoopTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in one device, or one property of it
    pub fn watch(&mut self, conn: ConnId, device: &str, name: Option<&str>) {
        let key = (device.to_string(), name.map(String::from));
        let watchers = self.entries.entry(key).or_default();
        if !watchers.contains(&conn) {
            watchers.push(conn);
        }
    }

    /// Drops every interest held by a connection
    pub fn forget(&mut self, conn: ConnId) {
        self.entries.retain(|_, watchers| {
            watchers.retain(|w| *w != conn);
            !watchers.is_empty()
        });
    }

    /// Connections that must see a message concerning a device, and a
    /// property of it when the message names one. Device-wide interests
    /// match any property; property interests also match device-scoped
    /// messages for their device, so a watcher of one property still
    /// sees a whole-device withdrawal.
    pub fn watchers(&self, device: &str, name: Option<&str>) -> Vec<ConnId> {
        let mut out = Vec::new();
        for (key, watchers) in &self.entries {
            if key.0 != device {
                continue;
            }
            if let (Some(interest), Some(name)) = (key.1.as_deref(), name) {
                if interest != name {
                    continue;
                }
            }
            for w in watchers {
                if !out.contains(w) {
                    out.push(*w);
                }
            }
        }
        out
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_wide_interest_matches_any_property() {
        let mut table = SnoopTable::new();
        table.watch(ConnId(1), "Telescope Simulator", None);
        assert_eq!(
            table.watchers("Telescope Simulator", Some("EQUATORIAL_EOD_COORD")),
            vec![ConnId(1)]
        );
        assert_eq!(table.watchers("Telescope Simulator", None), vec![ConnId(1)]);
        assert!(table.watchers("CCD Simulator", Some("CCD_EXPOSURE")).is_empty());
    }

    #[test]
    fn test_property_interest_is_exact() {
        let mut table = SnoopTable::new();
        table.watch(ConnId(2), "GPS", Some("TIME_UTC"));
        assert_eq!(table.watchers("GPS", Some("TIME_UTC")), vec![ConnId(2)]);
        assert!(table.watchers("GPS", Some("GEOGRAPHIC_COORD")).is_empty());
        // A whole-device message still reaches a property-scoped interest
        assert_eq!(table.watchers("GPS", None), vec![ConnId(2)]);
    }

    #[test]
    fn test_watcher_listed_once() {
        let mut table = SnoopTable::new();
        table.watch(ConnId(3), "GPS", None);
        table.watch(ConnId(3), "GPS", None);
        table.watch(ConnId(3), "GPS", Some("TIME_UTC"));
        assert_eq!(table.watchers("GPS", Some("TIME_UTC")), vec![ConnId(3)]);
    }

    #[test]
    fn test_forget_clears_interests() {
        let mut table = SnoopTable::new();
        table.watch(ConnId(4), "GPS", None);
        table.watch(ConnId(5), "GPS", None);
        table.forget(ConnId(4));
        assert_eq!(table.watchers("GPS", Some("TIME_UTC")), vec![ConnId(5)]);
        table.forget(ConnId(5));
        assert!(table.is_empty());
    }
}
