//! BLE Service and Characteristic UUIDs.
//!
//! Contains the assigned-number UUIDs used for scanning and monitoring,
//! plus helpers for matching the partial identifiers callers pass in.

use uuid::Uuid;

/// Bluetooth Base UUID that 16-bit assigned numbers are expanded into.
const BLUETOOTH_BASE_UUID: u128 = 0x0000_0000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full 128-bit UUID.
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

// Standard services
/// Generic Access Service UUID.
pub const GENERIC_ACCESS_SERVICE_UUID: Uuid = short_uuid(0x1800);
/// Generic Attribute Service UUID.
pub const GENERIC_ATTRIBUTE_SERVICE_UUID: Uuid = short_uuid(0x1801);
/// Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = short_uuid(0x180a);
/// Heart Rate Service UUID.
pub const HEART_RATE_SERVICE_UUID: Uuid = short_uuid(0x180d);
/// Battery Service UUID.
pub const BATTERY_SERVICE_UUID: Uuid = short_uuid(0x180f);
/// Cycling Speed and Cadence Service UUID.
pub const CYCLING_SPEED_CADENCE_SERVICE_UUID: Uuid = short_uuid(0x1816);
/// Cycling Power Service UUID.
pub const CYCLING_POWER_SERVICE_UUID: Uuid = short_uuid(0x1818);
/// Environmental Sensing Service UUID.
pub const ENVIRONMENTAL_SENSING_SERVICE_UUID: Uuid = short_uuid(0x181a);

// Characteristics
/// Heart Rate Measurement characteristic UUID (Notify).
pub const HEART_RATE_MEASUREMENT_UUID: Uuid = short_uuid(0x2a37);
/// Battery Level characteristic UUID (Read, Notify).
pub const BATTERY_LEVEL_UUID: Uuid = short_uuid(0x2a19);

/// Services a scan is filtered to unless configured otherwise.
pub const SUPPORTED_SERVICES: [Uuid; 4] = [
    BATTERY_SERVICE_UUID,
    HEART_RATE_SERVICE_UUID,
    CYCLING_POWER_SERVICE_UUID,
    CYCLING_SPEED_CADENCE_SERVICE_UUID,
];

const SERVICE_NAMES: [(Uuid, &str); 9] = [
    (GENERIC_ACCESS_SERVICE_UUID, "Generic Access"),
    (GENERIC_ATTRIBUTE_SERVICE_UUID, "Generic Attribute"),
    (DEVICE_INFO_SERVICE_UUID, "Device Information"),
    (HEART_RATE_SERVICE_UUID, "Heart Rate"),
    (BATTERY_SERVICE_UUID, "Battery"),
    (CYCLING_SPEED_CADENCE_SERVICE_UUID, "Cycling Speed and Cadence"),
    (CYCLING_POWER_SERVICE_UUID, "Cycling Power"),
    (ENVIRONMENTAL_SENSING_SERVICE_UUID, "Environmental Sensing"),
    (short_uuid(0x1822), "Pulse Oximeter"),
];

/// Look up the human-readable name of a well-known service.
pub fn service_name(uuid: &Uuid) -> Option<&'static str> {
    SERVICE_NAMES
        .iter()
        .find(|(known, _)| known == uuid)
        .map(|(_, name)| *name)
}

/// Names of the well-known services in `uuids`, skipping unknown ones.
pub fn service_names(uuids: &[Uuid]) -> Vec<&'static str> {
    uuids.iter().filter_map(service_name).collect()
}

/// Collect the UUIDs of a list of services.
pub fn service_uuids<'a, I>(services: I) -> Vec<Uuid>
where
    I: IntoIterator<Item = &'a btleplug::api::Service>,
{
    services.into_iter().map(|service| service.uuid).collect()
}

/// Check whether `uuid` matches a caller-supplied identifier.
///
/// The identifier may be a full UUID or any fragment of its hyphenated
/// form, so both `"0000180d-0000-1000-8000-00805f9b34fb"` and `"180d"`
/// match the Heart Rate service. Comparison ignores case. An empty
/// identifier matches nothing.
pub fn matches_identifier(uuid: &Uuid, identifier: &str) -> bool {
    let identifier = identifier.trim().to_ascii_lowercase();
    if identifier.is_empty() {
        return false;
    }
    uuid.hyphenated().to_string().contains(&identifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            HEART_RATE_SERVICE_UUID.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_supported_services() {
        assert!(SUPPORTED_SERVICES.contains(&HEART_RATE_SERVICE_UUID));
        assert!(SUPPORTED_SERVICES.contains(&BATTERY_SERVICE_UUID));
        assert!(!SUPPORTED_SERVICES.contains(&DEVICE_INFO_SERVICE_UUID));
    }

    #[test]
    fn test_service_names() {
        let uuids = [
            GENERIC_ACCESS_SERVICE_UUID,
            HEART_RATE_SERVICE_UUID,
            Uuid::from_u128(0x1234),
        ];
        assert_eq!(service_names(&uuids), vec!["Generic Access", "Heart Rate"]);
        assert_eq!(service_name(&Uuid::nil()), None);
    }

    #[test]
    fn test_matches_identifier() {
        assert!(matches_identifier(&HEART_RATE_SERVICE_UUID, "180d"));
        assert!(matches_identifier(&HEART_RATE_SERVICE_UUID, "180D"));
        assert!(matches_identifier(
            &HEART_RATE_SERVICE_UUID,
            "0000180d-0000-1000-8000-00805f9b34fb"
        ));
        assert!(!matches_identifier(&HEART_RATE_SERVICE_UUID, "180f"));
        assert!(!matches_identifier(&HEART_RATE_SERVICE_UUID, ""));
        assert!(!matches_identifier(&HEART_RATE_SERVICE_UUID, "   "));
    }
}
