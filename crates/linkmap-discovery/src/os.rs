//! Operating system classification from neighbor advertisements

use linkmap_core::OsTag;

/// Classify a device from its advertised system description and platform
///
/// IOS variants take precedence over NX-OS; anything else is unknown.
pub fn classify(system_description: &str, platform: &str) -> Option<OsTag> {
    let mentions = |needle: &str| system_description.contains(needle) || platform.contains(needle);

    if mentions("IOS") {
        if mentions("XE") {
            Some(OsTag::Iosxe)
        } else if mentions("XR") {
            Some(OsTag::Iosxr)
        } else {
            Some(OsTag::Ios)
        }
    } else if mentions("NX-OS") {
        Some(OsTag::Nxos)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ios_family() {
        assert_eq!(
            classify("Cisco IOS Software, IOS-XE Software", ""),
            Some(OsTag::Iosxe)
        );
        assert_eq!(classify("Cisco IOS XR Software", ""), Some(OsTag::Iosxr));
        assert_eq!(
            classify("Cisco IOS Software, C2960 Software", "cisco WS-C2960"),
            Some(OsTag::Ios)
        );
    }

    #[test]
    fn test_xe_wins_over_xr() {
        assert_eq!(classify("IOS XR", "XE"), Some(OsTag::Iosxe));
        assert_eq!(classify("XE", "IOS"), Some(OsTag::Iosxe));
    }

    #[test]
    fn test_hint_from_platform() {
        assert_eq!(classify("", "IOS-XRv 9000"), Some(OsTag::Iosxr));
        assert_eq!(classify("", "N9K-C93180YC-EX NX-OS"), Some(OsTag::Nxos));
    }

    #[test]
    fn test_unknown() {
        assert_eq!(classify("Linux 5.10 Ubuntu", "x86_64"), None);
        assert_eq!(classify("", ""), None);
        assert_eq!(classify("cisco ios", ""), None);
    }
}
