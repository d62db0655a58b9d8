use std::collections::HashMap;

const AD_TYPE_COMPLETE_LOCAL_NAME: u8 = 0x09;
const AD_TYPE_MANUFACTURER_SPECIFIC: u8 = 0xFF;

/// Advertisement fields as exposed by host stacks that don't hand out the raw
/// payload.
pub struct Advertisement {
    pub local_name: Option<String>,
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
}

impl Advertisement {
    pub fn new(local_name: Option<String>, manufacturer_data: HashMap<u16, Vec<u8>>) -> Self {
        Self {
            local_name,
            manufacturer_data,
        }
    }

    /// Re-encodes the fields as AD structures so the payload can be stored and
    /// compared like a raw advertisement.
    pub fn to_raw(&self) -> Option<Vec<u8>> {
        if self.local_name.is_none() && self.manufacturer_data.is_empty() {
            return None;
        }

        let mut raw = Vec::new();
        if let Some(local_name) = &self.local_name {
            let bytes = local_name.as_bytes();
            let len = bytes.len().min(253);
            raw.push((len + 1) as u8);
            raw.push(AD_TYPE_COMPLETE_LOCAL_NAME);
            raw.extend_from_slice(&bytes[..len]);
        }

        // sorted so the encoding is stable
        let mut manufacturer_ids: Vec<&u16> = self.manufacturer_data.keys().collect();
        manufacturer_ids.sort();
        for manufacturer_id in manufacturer_ids {
            let data = &self.manufacturer_data[manufacturer_id];
            let len = data.len().min(251);
            raw.push((len + 3) as u8);
            raw.push(AD_TYPE_MANUFACTURER_SPECIFIC);
            raw.extend_from_slice(&manufacturer_id.to_le_bytes());
            raw.extend_from_slice(&data[..len]);
        }
        Some(raw)
    }
}

/// Iterates `(ad_type, data)` pairs of a raw advertisement. Stops at the first
/// zero-length or truncated structure.
pub fn structures(raw: &[u8]) -> impl Iterator<Item = (u8, &[u8])> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let len = *raw.get(offset)? as usize;
        if len == 0 || offset + 1 + len > raw.len() {
            return None;
        }
        let ad_type = raw[offset + 1];
        let data = &raw[offset + 2..offset + 1 + len];
        offset += 1 + len;
        Some((ad_type, data))
    })
}

pub fn manufacturer_id(raw: &[u8]) -> Option<u16> {
    structures(raw)
        .find(|(ad_type, data)| *ad_type == AD_TYPE_MANUFACTURER_SPECIFIC && data.len() >= 2)
        .map(|(_, data)| u16::from_le_bytes([data[0], data[1]]))
}

pub fn local_name(raw: &[u8]) -> Option<String> {
    structures(raw)
        .find(|(ad_type, _)| *ad_type == AD_TYPE_COMPLETE_LOCAL_NAME)
        .map(|(_, data)| String::from_utf8_lossy(data).into_owned())
}

/// Bluetooth SIG company identifiers seen often enough to be worth naming.
const KNOWN_MANUFACTURERS: &[(u16, &str)] = &[
    (0x0006, "Microsoft"),
    (0x004C, "Apple, Inc."),
    (0x0075, "Samsung Electronics Co. Ltd."),
    (0x00E0, "Google"),
    (0x0087, "Garmin International, Inc."),
    (0x0157, "Anhui Huami Information Technology Co., Ltd."),
    (0x038F, "Xiaomi Inc."),
    (0x0499, "Ruuvi Innovations Ltd."),
    (0x0059, "Nordic Semiconductor ASA"),
    (0x02E5, "Espressif Incorporated"),
];

pub fn manufacturer_name(id: u16) -> Option<&'static str> {
    KNOWN_MANUFACTURERS
        .iter()
        .find(|(known, _)| *known == id)
        .map(|(_, name)| *name)
}
