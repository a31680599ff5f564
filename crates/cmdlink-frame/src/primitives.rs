//! Fixed little-endian encodings for raw numeric payloads.
//!
//! Some peers (simulation workers written against a plain C ABI, for
//! instance) exchange bare numbers over a pipe rather than serialized
//! objects. These helpers produce and parse those payloads; framing still
//! goes through the normal length prefix.

use chrono::{Datelike, NaiveDate};

use crate::error::{FrameError, Result};

/// A homogeneous array of primitive values.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveArray {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Bool(Vec<bool>),
    Date(Vec<NaiveDate>),
    Str(Vec<String>),
}

impl PrimitiveArray {
    pub fn len(&self) -> usize {
        match self {
            PrimitiveArray::Int(v) => v.len(),
            PrimitiveArray::Double(v) => v.len(),
            PrimitiveArray::Bool(v) => v.len(),
            PrimitiveArray::Date(v) => v.len(),
            PrimitiveArray::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn encode_i32(value: i32) -> [u8; 4] {
    value.to_le_bytes()
}

pub fn decode_i32(bytes: &[u8]) -> Result<i32> {
    Ok(i32::from_le_bytes(exact::<4>(bytes, "i32")?))
}

pub fn encode_f64(value: f64) -> [u8; 8] {
    value.to_le_bytes()
}

pub fn decode_f64(bytes: &[u8]) -> Result<f64> {
    Ok(f64::from_le_bytes(exact::<8>(bytes, "f64")?))
}

pub fn encode_bool(value: bool) -> [u8; 1] {
    [u8::from(value)]
}

/// Any non-zero byte reads as `true`.
pub fn decode_bool(bytes: &[u8]) -> Result<bool> {
    Ok(exact::<1>(bytes, "bool")?[0] != 0)
}

/// Dates travel as an `i32` of the form `yyyymmdd` (time of day is dropped).
///
/// Negative years and years too large for the packed form are rejected.
pub fn date_to_int(date: NaiveDate) -> Result<i32> {
    let out_of_range = || FrameError::Primitive(format!("date {date} cannot be packed as yyyymmdd"));
    if date.year() < 0 {
        return Err(out_of_range());
    }
    let month_day = i32::try_from(date.month() * 100 + date.day()).map_err(|_| out_of_range())?;
    date.year()
        .checked_mul(10_000)
        .and_then(|packed| packed.checked_add(month_day))
        .ok_or_else(out_of_range)
}

pub fn int_to_date(packed: i32) -> Result<NaiveDate> {
    let year = packed / 10_000;
    let month = (packed % 10_000) / 100;
    let day = packed % 100;
    let (Ok(month), Ok(day)) = (u32::try_from(month), u32::try_from(day)) else {
        return Err(FrameError::Primitive(format!("invalid packed date {packed}")));
    };
    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| FrameError::Primitive(format!("invalid packed date {packed}")))
}

pub fn encode_date(date: NaiveDate) -> Result<[u8; 4]> {
    Ok(encode_i32(date_to_int(date)?))
}

pub fn decode_date(bytes: &[u8]) -> Result<NaiveDate> {
    int_to_date(decode_i32(bytes)?)
}

/// Bare UTF-8 bytes; the frame length delimits the string.
pub fn encode_str(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// UTF-8 bytes with a 4-byte little-endian byte-length prefix.
pub fn encode_str_with_length(value: &str) -> Result<Vec<u8>> {
    let len = i32::try_from(value.len()).map_err(|_| {
        FrameError::Primitive(format!("string of {} bytes is too long", value.len()))
    })?;
    let mut out = Vec::with_capacity(4 + value.len());
    out.extend_from_slice(&encode_i32(len));
    out.extend_from_slice(value.as_bytes());
    Ok(out)
}

/// Parse one length-prefixed string, returning it and the unconsumed tail.
pub fn decode_str_with_length(bytes: &[u8]) -> Result<(String, &[u8])> {
    if bytes.len() < 4 {
        return Err(FrameError::Primitive(
            "string length prefix is incomplete".to_string(),
        ));
    }
    let (prefix, rest) = bytes.split_at(4);
    let len = usize::try_from(decode_i32(prefix)?)
        .map_err(|_| FrameError::Primitive("negative string length".to_string()))?;
    if rest.len() < len {
        return Err(FrameError::Primitive(format!(
            "string declares {len} bytes but only {} remain",
            rest.len()
        )));
    }
    let (text, tail) = rest.split_at(len);
    let text = std::str::from_utf8(text)
        .map_err(|err| FrameError::Primitive(format!("string is not UTF-8: {err}")))?;
    Ok((text.to_string(), tail))
}

/// Concatenate the element encodings of `array`.
///
/// Strings are length-prefixed individually so the array can be split back
/// apart; every other element type has a fixed width.
pub fn encode_array(array: &PrimitiveArray) -> Result<Vec<u8>> {
    let out: Vec<u8> = match array {
        PrimitiveArray::Int(values) => values.iter().flat_map(|v| encode_i32(*v)).collect(),
        PrimitiveArray::Double(values) => values.iter().flat_map(|v| encode_f64(*v)).collect(),
        PrimitiveArray::Bool(values) => values.iter().flat_map(|v| encode_bool(*v)).collect(),
        PrimitiveArray::Date(values) => {
            let mut out = Vec::with_capacity(values.len() * 4);
            for value in values {
                out.extend(encode_date(*value)?);
            }
            out
        }
        PrimitiveArray::Str(values) => {
            let mut out = Vec::new();
            for value in values {
                out.extend(encode_str_with_length(value)?);
            }
            out
        }
    };
    Ok(out)
}

/// Decode a payload of packed little-endian doubles.
pub fn decode_f64_array(bytes: &[u8]) -> Result<Vec<f64>> {
    if bytes.len() % 8 != 0 {
        return Err(FrameError::Primitive(format!(
            "{} bytes is not a whole number of doubles",
            bytes.len()
        )));
    }
    bytes.chunks_exact(8).map(decode_f64).collect()
}

/// Decode a payload of packed little-endian `i32`s.
pub fn decode_i32_array(bytes: &[u8]) -> Result<Vec<i32>> {
    if bytes.len() % 4 != 0 {
        return Err(FrameError::Primitive(format!(
            "{} bytes is not a whole number of i32 values",
            bytes.len()
        )));
    }
    bytes.chunks_exact(4).map(decode_i32).collect()
}

/// Decode a payload of consecutive length-prefixed strings.
pub fn decode_str_array(mut bytes: &[u8]) -> Result<Vec<String>> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        let (value, rest) = decode_str_with_length(bytes)?;
        out.push(value);
        bytes = rest;
    }
    Ok(out)
}

fn exact<const N: usize>(bytes: &[u8], what: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        FrameError::Primitive(format!("{what} needs {N} bytes, got {}", bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn scalars_are_little_endian() {
        assert_eq!(encode_i32(1), [1, 0, 0, 0]);
        assert_eq!(encode_i32(-2), [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(encode_f64(1.0), [0, 0, 0, 0, 0, 0, 0xF0, 0x3F]);
        assert_eq!(encode_bool(true), [1]);
        assert_eq!(encode_bool(false), [0]);
        assert_eq!(decode_i32(&[0x2A, 0, 0, 0]).unwrap(), 42);
        assert!(decode_bool(&[7]).unwrap());
    }

    #[test]
    fn wrong_width_is_rejected() {
        assert!(matches!(decode_i32(&[1, 2]), Err(FrameError::Primitive(_))));
        assert!(matches!(decode_f64(&[0; 4]), Err(FrameError::Primitive(_))));
        assert!(matches!(decode_bool(&[]), Err(FrameError::Primitive(_))));
    }

    #[test]
    fn dates_pack_as_yyyymmdd() {
        assert_eq!(date_to_int(date(2022, 3, 15)).unwrap(), 20_220_315);
        assert_eq!(int_to_date(20_220_307).unwrap(), date(2022, 3, 7));
        assert_eq!(
            decode_date(&encode_date(date(1999, 12, 31)).unwrap()).unwrap(),
            date(1999, 12, 31)
        );
        assert!(int_to_date(20_221_340).is_err());
        assert!(int_to_date(-1).is_err());
    }

    #[test]
    fn edge_years_pack_or_fail_cleanly() {
        assert_eq!(date_to_int(date(0, 1, 1)).unwrap(), 101);
        assert_eq!(int_to_date(101).unwrap(), date(0, 1, 1));

        let largest = date(214_748, 3, 31);
        let packed = date_to_int(largest).unwrap();
        assert_eq!(packed, 2_147_480_331);
        assert_eq!(int_to_date(packed).unwrap(), largest);

        assert!(matches!(date_to_int(date(214_749, 1, 1)), Err(FrameError::Primitive(_))));
        assert!(matches!(date_to_int(NaiveDate::MAX), Err(FrameError::Primitive(_))));
        assert!(matches!(date_to_int(date(-1, 6, 1)), Err(FrameError::Primitive(_))));
        assert!(matches!(encode_date(NaiveDate::MIN), Err(FrameError::Primitive(_))));
        assert!(matches!(
            encode_array(&PrimitiveArray::Date(vec![date(2020, 1, 2), NaiveDate::MAX])),
            Err(FrameError::Primitive(_))
        ));
    }

    #[test]
    fn plain_strings_have_no_prefix() {
        assert_eq!(encode_str("héllo"), "héllo".as_bytes());
        assert!(encode_str("").is_empty());
    }

    #[test]
    fn strings_carry_byte_length_prefix() {
        let encoded = encode_str_with_length("héllo").unwrap();
        assert_eq!(&encoded[..4], &[6, 0, 0, 0]);

        let (decoded, rest) = decode_str_with_length(&encoded).unwrap();
        assert_eq!(decoded, "héllo");
        assert!(rest.is_empty());
    }

    #[test]
    fn truncated_string_is_rejected() {
        let mut encoded = encode_str_with_length("abcdef").unwrap();
        encoded.truncate(7);
        assert!(matches!(
            decode_str_with_length(&encoded),
            Err(FrameError::Primitive(_))
        ));
    }

    #[test]
    fn arrays_concatenate_elements() {
        let ints = encode_array(&PrimitiveArray::Int(vec![1, 2])).unwrap();
        assert_eq!(ints, vec![1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(decode_i32_array(&ints).unwrap(), vec![1, 2]);

        let doubles = encode_array(&PrimitiveArray::Double(vec![0.5, -3.25, 1e9])).unwrap();
        assert_eq!(doubles.len(), 24);
        assert_eq!(decode_f64_array(&doubles).unwrap(), vec![0.5, -3.25, 1e9]);

        let bools = encode_array(&PrimitiveArray::Bool(vec![true, false, true])).unwrap();
        assert_eq!(bools, vec![1, 0, 1]);

        let dates = encode_array(&PrimitiveArray::Date(vec![date(2020, 1, 2)])).unwrap();
        assert_eq!(decode_i32_array(&dates).unwrap(), vec![20_200_102]);

        let strings = vec!["wheat".to_string(), String::new(), "barley".to_string()];
        let encoded = encode_array(&PrimitiveArray::Str(strings.clone())).unwrap();
        assert_eq!(decode_str_array(&encoded).unwrap(), strings);
    }

    #[test]
    fn empty_array_encodes_to_nothing() {
        let array = PrimitiveArray::Double(Vec::new());
        assert!(array.is_empty());
        assert!(encode_array(&array).unwrap().is_empty());
        assert!(decode_f64_array(&[]).unwrap().is_empty());
    }

    #[test]
    fn ragged_double_payload_is_rejected() {
        assert!(matches!(
            decode_f64_array(&[0; 12]),
            Err(FrameError::Primitive(_))
        ));
    }
}
