/*!
    Process data schemas and the bit-level decoder turning raw PD buffers into typed values.

    A schema is an ordered sequence of [PdElement] describing where each field of a device's
    process data record sits in the buffer. Schemas are normally generated from the device's
    IODD description; parsing IODD XML is out of scope here, so [SchemaStore] ships the
    record layouts of the supported device families as embedded tables and accepts additional
    ones at startup.

    Bit positions follow the IODD convention: `bit_offset` counts from the trailing end of the
    record, so the element with the highest offset sits first in the buffer. The decoder
    rebases every element to its distance from the buffer start before extracting.
*/

use crate::port::DeviceIdentity;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

/// data type of one process data field
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PdKind {
    Bool,
    UInt,
    Float32,
}

/// one typed field of a process data record
#[derive(Clone, Debug)]
pub struct PdElement {
    /// variable name from the device description, used as the output key
    pub key: String,
    pub kind: PdKind,
    /// position of the field, counted from the trailing end of the record
    pub bit_offset: u16,
    /// field width; 0 means unspecified and defaults per [PdKind]
    pub bit_length: u16,
    /// scaling slope, applied as `gradient * raw + offset` when not 1.0
    pub gradient: f64,
    /// scaling intercept
    pub offset: f64,
    /// subindex of the field in the device's process data record
    pub subindex: u8,
    /// unit of the scaled value, if the device description names one
    pub unit: Option<String>,
}

impl PdElement {
    fn new(key: impl Into<String>, kind: PdKind, subindex: u8, bit_offset: u16, bit_length: u16) -> Self {
        Self {
            key: key.into(),
            kind,
            bit_offset,
            bit_length,
            gradient: 1.0,
            offset: 0.0,
            subindex,
            unit: None,
        }
    }
    pub fn boolean(key: impl Into<String>, subindex: u8, bit_offset: u16) -> Self {
        Self::new(key, PdKind::Bool, subindex, bit_offset, 0)
    }
    pub fn uinteger(key: impl Into<String>, subindex: u8, bit_offset: u16, bit_length: u16) -> Self {
        Self::new(key, PdKind::UInt, subindex, bit_offset, bit_length)
    }
    pub fn float32(key: impl Into<String>, subindex: u8, bit_offset: u16) -> Self {
        Self::new(key, PdKind::Float32, subindex, bit_offset, 0)
    }
    /// set the linear scaling of a numeric field
    pub fn scaled(mut self, gradient: f64, offset: f64) -> Self {
        self.gradient = gradient;
        self.offset = offset;
        self
    }
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// field width with the per-kind default applied when the description left it out
    pub fn effective_bit_length(&self) -> u16 {
        if self.bit_length == 0 || self.bit_length > 128 {
            match self.kind {
                PdKind::Bool => 1,
                PdKind::UInt => 64,
                PdKind::Float32 => 32,
            }
        }
        else { self.bit_length }
    }

    fn scale(&self, raw: f64) -> Option<f64> {
        if self.gradient != 1.0 || self.offset != 0.0 {
            Some(self.gradient * raw + self.offset)
        }
        else { None }
    }
}

/// decoded value of one process data field
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PdValue {
    Bool(bool),
    UInt(u64),
    Float(f32),
    /// a numeric value after gradient/offset scaling
    Scaled(f64),
    /// the element could not be extracted (unknown kind, zero width, position outside the buffer)
    Invalid,
}

impl Serialize for PdValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::UInt(value) => serializer.serialize_u64(*value),
            Self::Float(value) => serializer.serialize_f32(*value),
            Self::Scaled(value) => serializer.serialize_f64(*value),
            Self::Invalid => serializer.serialize_str("Invalid"),
        }
    }
}

/**
    decode a raw process data buffer against a schema

    The schema is traversed in order. Every key of the schema appears in the returned value
    map: extraction failures yield [PdValue::Invalid] for that key instead of aborting the
    decode. The second map carries the unit metadata of the elements that declare one.
*/
pub fn decode(schema: &[PdElement], data: &[u8]) -> (BTreeMap<String, PdValue>, BTreeMap<String, String>) {
    let mut values = BTreeMap::new();
    let mut units = BTreeMap::new();
    for element in schema {
        values.insert(element.key.clone(), element_value(element, data));
        if let Some(unit) = &element.unit {
            units.insert(element.key.clone(), unit.clone());
        }
    }
    (values, units)
}

fn element_value(element: &PdElement, data: &[u8]) -> PdValue {
    let bit_length = element.effective_bit_length() as usize;
    if data.is_empty() || bit_length == 0 {
        return PdValue::Invalid;
    }
    // rebase the trailing-end offset to a distance from the buffer start
    let Some(start) = (data.len() * 8).checked_sub(element.bit_offset as usize + bit_length)
        else { return PdValue::Invalid };

    match element.kind {
        PdKind::Bool => PdValue::Bool((data[start >> 3] >> (7 - (start & 7))) & 1 != 0),
        PdKind::UInt => {
            if !(2..=64).contains(&bit_length) {
                return PdValue::Invalid;
            }
            let raw = extract_uint(&data[start >> 3 ..], bit_length, start & 7);
            match element.scale(raw as f64) {
                Some(scaled) => PdValue::Scaled(scaled),
                None => PdValue::UInt(raw),
            }
        },
        PdKind::Float32 => {
            // floats are byte-aligned even inside a record
            if element.bit_offset % 8 != 0 {
                return PdValue::Invalid;
            }
            let base = start >> 3;
            let raw = u32::from_be_bytes([data[base], data[base+1], data[base+2], data[base+3]]);
            let value = f32::from_bits(raw);
            match element.scale(value as f64) {
                Some(scaled) => PdValue::Scaled(scaled),
                None => PdValue::Float(value),
            }
        },
    }
}

/**
    extract `bit_length` contiguous bits as an unsigned integer

    `data` starts at the byte containing the field's most significant bit, which sits
    `bit_offset` (0..7) bits below that byte's own most significant bit. Bits are collected
    bytewise from the least significant end of the field upward.
*/
fn extract_uint(data: &[u8], bit_length: usize, bit_offset: usize) -> u64 {
    // distance of the field's trailing bit from the next byte boundary below it
    let shift = (8 - ((bit_offset + bit_length) & 7)) & 7;
    let mut out = 0;
    let mut remaining = bit_length;
    loop {
        let index = (bit_offset + remaining - 1) >> 3;
        let byte = byte_from_right(data, index, shift);
        let mask = if remaining >= 8 { 0xFF } else { 0xFF >> (8 - remaining) };
        out |= ((byte & mask) as u64) << (bit_length - remaining);
        if remaining <= 8 { break }
        remaining -= 8;
    }
    out
}

/// read one right-aligned byte of a misaligned field, borrowing the spill-over bits from the preceding byte
fn byte_from_right(data: &[u8], index: usize, shift: usize) -> u8 {
    if shift == 0 {
        data[index]
    }
    else {
        // the bits above the byte boundary land in the mask of the final iteration anyway
        let high = if index == 0 { 0 } else { data[index - 1] };
        ((u16::from(high) << 8 | u16::from(data[index])) >> shift) as u8
    }
}

/**
    lookup table of process data schemas, keyed by the identity read from the device at startup

    [Self::builtin] carries the record layouts of the device families supported out of the box;
    further schemas can be registered with [Self::insert] before the cyclic loop starts.
*/
#[derive(Default)]
pub struct SchemaStore {
    entries: Vec<(u32, Vec<PdElement>)>,
}

impl SchemaStore {
    /// empty store, every port publishes raw process data
    pub fn new() -> Self {
        Self::default()
    }

    /// store preloaded with the embedded device family schemas
    pub fn builtin() -> Self {
        let mut store = Self::new();
        store.insert(330242, smartlight_level());
        store.insert(917762, bcm_vibration());
        store.insert(131330, baw_position());
        store.insert(132099, bes_counter());
        store
    }

    /// register a schema for a device id, replacing a previous one
    pub fn insert(&mut self, device_id: u32, elements: Vec<PdElement>) {
        self.entries.retain(|(id, _)| *id != device_id);
        self.entries.push((device_id, elements));
    }

    /// schema bound to the given device identity, if any
    // the embedded descriptions discriminate on the device id alone, vendor and revision
    // are carried for externally loaded schemas that need the full identity
    pub fn lookup(&self, identity: &DeviceIdentity) -> Option<&[PdElement]> {
        self.entries.iter()
            .find(|(id, _)| *id == identity.device_id)
            .map(|(_, elements)| elements.as_slice())
    }

    /**
        decode a process data buffer for the given device

        When no schema matches the identity, the raw bytes are passed through under the
        `rawProcessData` key so the consumer still sees the sample.
    */
    pub fn interpret(&self, identity: &DeviceIdentity, data: &[u8])
        -> (serde_json::Map<String, serde_json::Value>, serde_json::Map<String, serde_json::Value>)
    {
        let mut values = serde_json::Map::new();
        let mut units = serde_json::Map::new();
        match self.lookup(identity) {
            Some(schema) => {
                let (decoded, unit_info) = decode(schema, data);
                for (key, value) in decoded {
                    values.insert(key, serde_json::json!(value));
                }
                for (key, unit) in unit_info {
                    units.insert(key, serde_json::json!(unit));
                }
            },
            None => {
                values.insert("rawProcessData".into(), serde_json::json!(data));
            },
        }
        (values, units)
    }
}

/// Smartlight segment level, DeviceID 330242
fn smartlight_level() -> Vec<PdElement> {
    vec![
        PdElement::uinteger("TI_PD_Level", 1, 2, 3),
    ]
}

/// BAW inductive distance sensor, DeviceID 131330
fn baw_position() -> Vec<PdElement> {
    vec![
        PdElement::uinteger("TI_TargetPosition", 1, 4, 3),
        PdElement::boolean("TI_OutOfRangeBit", 2, 3),
        PdElement::boolean("TI_BinaryChannel3", 3, 2),
        PdElement::boolean("TI_BinaryChannel2", 4, 1),
        PdElement::boolean("TI_BinaryChannel1", 5, 0),
    ]
}

/// BES inductive sensor with counter, DeviceID 132099
fn bes_counter() -> Vec<PdElement> {
    vec![
        PdElement::boolean("TN_PDI_SSC1", 1, 0),
        PdElement::boolean("TN_PDI_OUT_OF_RANGE", 2, 1),
        PdElement::boolean("TN_PDI_SPEED_TOO_LOW", 3, 2),
        PdElement::boolean("TN_PDI_SPEED_TOO_HIGH", 4, 3),
        PdElement::boolean("TN_PDI_TEACH_ACTIVE", 5, 4),
        PdElement::boolean("TN_PDI_TEACH_SUCCESS", 6, 5),
        PdElement::boolean("TN_PDI_TEACH_ERROR", 7, 6),
        PdElement::boolean("TN_PDI_COUNT_LIMIT", 8, 7),
        PdElement::uinteger("TN_PDI_COUNT", 9, 8, 16),
    ]
}

/// BCM condition monitoring sensor, vibration velocity record, DeviceID 917762
fn bcm_vibration() -> Vec<PdElement> {
    vec![
        PdElement::float32("TI_PD_In_Vibration_Veloc_Vibration_Veloc_RMS_v_RMS_X", 1, 128),
        PdElement::float32("TI_PD_In_Vibration_Veloc_Vibration_Veloc_RMS_v_RMS_Y", 2, 96),
        PdElement::float32("TI_PD_In_Vibration_Veloc_Vibration_Veloc_RMS_v_RMS_Z", 3, 64),
        PdElement::float32("TI_PD_In_Vibration_Veloc_Contact_Temp_Contact_Temp", 4, 32),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_a_RMS_X_Status", 5, 31),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_a_RMS_X_Status", 6, 30),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_a_RMS_Y_Status", 7, 29),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_a_RMS_Y_Status", 8, 28),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_a_RMS_Z_Status", 9, 27),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_a_RMS_Z_Status", 10, 26),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_a_RMS_M_Status", 11, 25),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_a_RMS_M_Status", 12, 24),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_v_RMS_X_Status", 13, 23),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_v_RMS_X_Status", 14, 22),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_v_RMS_Y_Status", 15, 21),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_v_RMS_Y_Status", 16, 20),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_v_RMS_Z_Status", 17, 19),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_v_RMS_Z_Status", 18, 18),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_PreAlarm_v_RMS_M_Status", 19, 17),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_MainAlarm_v_RMS_M_Status", 20, 16),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved", 21, 15),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Vibration_Severity_Zone_A", 22, 14),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Vibration_Severity_Zone_B", 23, 13),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Vibration_Severity_Zone_C", 24, 12),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Vibration_Severity_Zone_D", 25, 11),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved1", 26, 10),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved2", 27, 9),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved3", 28, 8),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Contact_Temp_Lower_Alarm_Status", 29, 7),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Contact_Temp_Upper_Alarm_Status", 30, 6),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved4", 31, 5),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Reserved5", 32, 4),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_AmbPressure_Lower_Alarm_Status", 33, 3),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_AmbPressure_Upper_Alarm_Status", 35, 2),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Humidty_Lower_Alarm_Status", 37, 1),
        PdElement::boolean("TI_PD_In_Vibration_Veloc_SB_Humidity_Upper_Alarm_Status", 39, 0),
    ]
}
