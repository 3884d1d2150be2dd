//! Attribute schemas.
//!
//! An attribute's payload is described by an ordered list of field
//! descriptors; a parser callback can hand the list to [`run`] instead of
//! spelling out the codec calls. Application values are carried as a flat
//! `f32` slice where element 0 is reserved for the attribute id and user
//! parameters start at index 1, matching the parameter name list convention.

use crate::error::{Error, Result};
use crate::parse::Cursor;

/// Wire encoding of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    I8,
    U8,
    I16,
    U16,
    I32,
    /// IEEE-754 float carried as a float.
    F32,
    /// Reserved bytes: the cursor steps over `count` bytes untouched.
    Skip,
}

/// One field descriptor: wire type, element count, clamp range and scale.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub wire: WireType,
    pub count: u8,
    pub max: f32,
    pub min: f32,
    pub scale: f32,
}

impl Field {
    pub const fn new(wire: WireType, count: u8, max: f32, min: f32, scale: f32) -> Self {
        Field {
            wire,
            count,
            max,
            min,
            scale,
        }
    }

    pub const fn skip(count: u8) -> Self {
        Field::new(WireType::Skip, count, 0.0, 0.0, 1.0)
    }
}

/// Payload layout and parameter names for one attribute.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub attrib: u32,
    /// Comma separated parameter names, one per wire value.
    pub params: &'static str,
    pub fields: &'static [Field],
}

impl Schema {
    /// Number of `f32` slots a value slice needs for this schema, including
    /// the reserved attribute slot at index 0.
    pub fn values_len(&self) -> usize {
        1 + self
            .fields
            .iter()
            .filter(|f| f.wire != WireType::Skip)
            .map(|f| f.count as usize)
            .sum::<usize>()
    }

    /// Index of a named parameter into a value slice. The first name maps to
    /// index 1; index 0 is the attribute id slot.
    pub fn param_index(&self, key: &str) -> Result<usize> {
        self.params
            .split(',')
            .position(|name| name == key)
            .map(|i| i + 1)
            .ok_or(Error::KeyNotFound)
    }
}

/// Lookup table of schemas, keyed by attribute id.
#[derive(Debug, Clone, Copy)]
pub struct SchemaTable(pub &'static [Schema]);

impl SchemaTable {
    pub fn get(&self, attrib: u32) -> Option<&Schema> {
        self.0.iter().find(|s| s.attrib == attrib)
    }
}

/// Drive the payload codec over every field of `schema`.
///
/// `vals[0]` is left for the caller (the attribute id slot); fields consume
/// slots from index 1 upward. Returns the number of slots touched, including
/// slot 0. Fields that would run past the end of `vals` are not parsed.
pub fn run(schema: &Schema, cursor: &mut Cursor<'_>, vals: &mut [f32]) -> usize {
    let mut i = 1;
    for field in schema.fields {
        let n = field.count as usize;
        if field.wire == WireType::Skip {
            for _ in 0..n {
                cursor.advance();
            }
            continue;
        }
        if i + n > vals.len() {
            break;
        }
        let slots = &mut vals[i..i + n];
        match field.wire {
            WireType::I8 => cursor.f32_as_i8(slots, field.max, field.min, field.scale),
            WireType::U8 => cursor.f32_as_u8(slots, field.max, field.min, field.scale),
            WireType::I16 => cursor.f32_as_i16(slots, field.max, field.min, field.scale),
            WireType::U16 => cursor.f32_as_u16(slots, field.max, field.min, field.scale),
            WireType::I32 => cursor.f32_as_i32(slots, field.max, field.min, field.scale),
            WireType::F32 => cursor.f32_as_f32(slots, field.max, field.min),
            WireType::Skip => unreachable!(),
        }
        i += n;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Msg, ParseType};

    // Timelapse attribute layout: keyframe, progress, state, three reserved
    // bytes, then four scaled angles and a revolution count.
    const TIMELAPSE_FIELDS: &[Field] = &[
        Field::new(WireType::U8, 1, f32::MAX, f32::MIN, 1.0),
        Field::new(WireType::I16, 1, f32::MAX, f32::MIN, 100.0),
        Field::new(WireType::U8, 1, f32::MAX, f32::MIN, 1.0),
        Field::skip(3),
        Field::new(WireType::I16, 4, f32::MAX, f32::MIN, 10.0),
        Field::new(WireType::I32, 1, f32::MAX, f32::MIN, 1.0),
    ];

    const TIMELAPSE: Schema = Schema {
        attrib: 34,
        params: "Timelapse Keyframe,Timelapse Progress,Timelapse state,Timelapse Pan Offset,\
                 Timelapse Tilt,Timelapse Roll,Timelapse Pan,Pan Revolutions",
        fields: TIMELAPSE_FIELDS,
    };

    #[test]
    fn values_len_skips_reserved_bytes() {
        assert_eq!(1 + 8, TIMELAPSE.values_len());
    }

    #[test]
    fn param_index_starts_after_attribute_slot() {
        assert_eq!(1, TIMELAPSE.param_index("Timelapse Keyframe").unwrap());
        assert_eq!(8, TIMELAPSE.param_index("Pan Revolutions").unwrap());
        assert_eq!(Err(Error::KeyNotFound), TIMELAPSE.param_index("Focus"));
    }

    #[test]
    fn table_lookup() {
        const TABLE: SchemaTable = SchemaTable(&[TIMELAPSE]);
        assert_eq!(34, TABLE.get(34).unwrap().attrib);
        assert!(TABLE.get(35).is_none());
    }

    #[test]
    fn pack_then_unpack_round_trips() {
        let mut vals = [0.0f32; 9];
        vals[0] = 34.0;
        vals[1] = 3.0; // keyframe
        vals[2] = 0.42; // progress, quantized at 1/100
        vals[3] = 1.0; // state
        vals[4] = -12.3; // pan offset
        vals[5] = 45.6; // tilt
        vals[6] = -7.8; // roll
        vals[7] = 90.0; // pan
        vals[8] = 2.0; // revolutions

        let mut tx = Msg::new();
        tx.parse_type = ParseType::CurValSend;
        let used = run(&TIMELAPSE, &mut Cursor::new(&mut tx), &mut vals);
        assert_eq!(9, used);
        // u8 + i16 + u8 + 3 reserved + 4 i16 + i32
        assert_eq!(1 + 2 + 1 + 3 + 8 + 4, tx.cursor);

        let mut rx = Msg::new();
        rx.parse_type = ParseType::WriteAbsRecv;
        rx.buf = tx.buf;
        let mut out = [0.0f32; 9];
        out[0] = 34.0;
        run(&TIMELAPSE, &mut Cursor::new(&mut rx), &mut out);

        // Unit-scaled fields are exact; scaled fields are quantized.
        assert_eq!(3.0, out[1]);
        assert!((out[2] - 0.42).abs() < 0.005);
        assert_eq!(1.0, out[3]);
        assert!((out[4] + 12.3).abs() < 0.05);
        assert!((out[5] - 45.6).abs() < 0.05);
        assert!((out[6] + 7.8).abs() < 0.05);
        assert!((out[7] - 90.0).abs() < 0.05);
        assert_eq!(2.0, out[8]);
    }

    #[test]
    fn oversized_schema_stops_at_value_slice_end() {
        let mut msg = Msg::new();
        msg.parse_type = ParseType::WriteAbsRecv;
        let mut vals = [0.0f32; 3]; // room for slot 0 and two values only
        let used = run(&TIMELAPSE, &mut Cursor::new(&mut msg), &mut vals);
        assert_eq!(3, used);
    }
}
