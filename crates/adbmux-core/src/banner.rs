//! `CNXN` banner strings.
//!
//! A banner is `<kind>:<serial>:<prop>=<value>;<prop>=<value>;...` where the
//! `features` property carries a comma-separated capability list. Hosts send
//! something like `host::features=shell_v2,cmd`; devices answer with their
//! `ro.product.*` properties.

/// The banner this host sends by default.
pub const HOST_BANNER: &str = "host::features=shell_v2,cmd,stat_v2,ls_v2";

/// A parsed connection banner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Banner {
    /// Connection-state prefix: `host`, `device`, `bootloader`, ...
    pub kind: String,
    /// Rarely populated; modern peers leave it empty.
    pub serial: String,
    /// `prop=value` pairs in banner order, `features` excluded.
    pub properties: Vec<(String, String)>,
    /// The `features=` list.
    pub features: Vec<String>,
}

impl Banner {
    /// Parse a banner payload. Lenient: trailing NULs are stripped, malformed
    /// segments are skipped, and a missing prefix yields an empty `kind`.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim_end_matches('\0');

        let mut parts = text.splitn(3, ':');
        let kind = parts.next().unwrap_or_default().to_string();
        let serial = parts.next().unwrap_or_default().to_string();
        let rest = parts.next().unwrap_or_default();

        let mut properties = Vec::new();
        let mut features = Vec::new();
        for segment in rest.split(';').filter(|s| !s.is_empty()) {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            if key == "features" {
                features = value
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
            } else {
                properties.push((key.to_string(), value.to_string()));
            }
        }

        Self {
            kind,
            serial,
            properties,
            features,
        }
    }

    /// Look up a banner property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the peer advertised a feature.
    pub fn supports(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_banner() {
        let banner = Banner::parse(
            b"device::ro.product.name=sargo;ro.product.model=Pixel 3a;features=shell_v2,cmd\0",
        );
        assert_eq!(banner.kind, "device");
        assert_eq!(banner.serial, "");
        assert_eq!(banner.property("ro.product.model"), Some("Pixel 3a"));
        assert!(banner.supports("shell_v2"));
        assert!(!banner.supports("sendrecv_v2"));
    }

    #[test]
    fn parses_host_banner() {
        let banner = Banner::parse(HOST_BANNER.as_bytes());
        assert_eq!(banner.kind, "host");
        assert!(banner.supports("cmd"));
        assert!(banner.properties.is_empty());
    }

    #[test]
    fn tolerates_garbage() {
        let banner = Banner::parse(b"bootloader");
        assert_eq!(banner.kind, "bootloader");
        assert!(banner.features.is_empty());

        let banner = Banner::parse(b"device::;;=;broken");
        assert_eq!(banner.kind, "device");
        assert!(banner.properties.is_empty());
    }
}
