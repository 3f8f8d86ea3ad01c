//! btree/key — порядко-сохраняющее кодирование ключей.
//!
//! Ключ сравнивается как байтовая строка (memcmp), поэтому:
//! - первый байт — null-тег: 0x00 для null (ниже всех не-null), 0x01 иначе;
//! - беззнаковые — big-endian;
//! - знаковые — big-endian со смещением (инверсия знакового бита), чтобы
//!   беззнаковое сравнение совпало со знаковым;
//! - плавающие — канонизированный IEEE 754: -0 приводится к +0, NaN
//!   кодируется максимальным образом (сортируется последним), отрицательные
//!   инвертируются побитово, неотрицательным ставится знаковый бит;
//! - строки — байты UTF-8 с нулевым дополнением до капа; значения длиннее
//!   STRING_KEY_MAX или с байтом 0x00 в индексируемом поле запрещены
//!   (политика disallow-over-cap);
//! - вторичные ключи — композит (поле, doc_id BE): уникальность и
//!   стабильный порядок range-сканов.

use byteorder::{BigEndian, ByteOrder};

use crate::consts::STRING_KEY_MAX;
use crate::errors::{GaldrError, Result};
use crate::record::{FieldKind, Value};

/// Ширина закодированного ключа поля, включая null-тег.
pub fn key_width(kind: FieldKind) -> usize {
    1 + match kind {
        FieldKind::Bool | FieldKind::U8 | FieldKind::I8 => 1,
        FieldKind::U16 | FieldKind::I16 => 2,
        FieldKind::U32 | FieldKind::I32 | FieldKind::F32 | FieldKind::Char => 4,
        FieldKind::U64
        | FieldKind::I64
        | FieldKind::F64
        | FieldKind::Timestamp
        | FieldKind::Duration
        | FieldKind::Enum => 8,
        FieldKind::Str => STRING_KEY_MAX,
    }
}

fn put_u16(out: &mut Vec<u8>, v: u16) {
    let mut b = [0u8; 2];
    BigEndian::write_u16(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    let mut b = [0u8; 4];
    BigEndian::write_u32(&mut b, v);
    out.extend_from_slice(&b);
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    let mut b = [0u8; 8];
    BigEndian::write_u64(&mut b, v);
    out.extend_from_slice(&b);
}

fn canonical_f32(v: f32) -> u32 {
    if v.is_nan() {
        return u32::MAX;
    }
    let v = if v == 0.0 { 0.0f32 } else { v };
    let bits = v.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn canonical_f64(v: f64) -> u64 {
    if v.is_nan() {
        return u64::MAX;
    }
    let v = if v == 0.0 { 0.0f64 } else { v };
    let bits = v.to_bits();
    if bits & 0x8000_0000_0000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000_0000_0000
    }
}

/// Закодировать значение поля в ключ шириной key_width(kind).
pub fn encode_field_key(v: &Value, kind: FieldKind) -> Result<Vec<u8>> {
    let width = key_width(kind);
    let mut out = Vec::with_capacity(width);

    if v.is_null() {
        out.push(0x00);
        out.resize(width, 0);
        return Ok(out);
    }
    out.push(0x01);

    match (v, kind) {
        (Value::Bool(b), FieldKind::Bool) => out.push(u8::from(*b)),
        (Value::U8(n), FieldKind::U8) => out.push(*n),
        (Value::U16(n), FieldKind::U16) => put_u16(&mut out, *n),
        (Value::U32(n), FieldKind::U32) => put_u32(&mut out, *n),
        (Value::U64(n), FieldKind::U64) => put_u64(&mut out, *n),
        (Value::I8(n), FieldKind::I8) => out.push((*n as u8) ^ 0x80),
        (Value::I16(n), FieldKind::I16) => put_u16(&mut out, (*n as u16) ^ 0x8000),
        (Value::I32(n), FieldKind::I32) => put_u32(&mut out, (*n as u32) ^ 0x8000_0000),
        (Value::I64(n), FieldKind::I64) => {
            put_u64(&mut out, (*n as u64) ^ 0x8000_0000_0000_0000)
        }
        (Value::F32(f), FieldKind::F32) => put_u32(&mut out, canonical_f32(*f)),
        (Value::F64(f), FieldKind::F64) => put_u64(&mut out, canonical_f64(*f)),
        (Value::Char(c), FieldKind::Char) => put_u32(&mut out, *c as u32),
        (Value::Timestamp(n), FieldKind::Timestamp) | (Value::Duration(n), FieldKind::Duration) => {
            put_u64(&mut out, (*n as u64) ^ 0x8000_0000_0000_0000)
        }
        (Value::Enum(n), FieldKind::Enum) => put_u64(&mut out, *n),
        (Value::Str(s), FieldKind::Str) => {
            let bytes = s.as_bytes();
            if bytes.len() > STRING_KEY_MAX {
                return Err(GaldrError::invalid_arg(format!(
                    "indexed string exceeds {} bytes ({})",
                    STRING_KEY_MAX,
                    bytes.len()
                )));
            }
            if bytes.contains(&0) {
                return Err(GaldrError::invalid_arg(
                    "indexed string contains a NUL byte",
                ));
            }
            out.extend_from_slice(bytes);
            out.resize(width, 0);
        }
        (v, k) => {
            return Err(GaldrError::invalid_arg(format!(
                "value {:?} does not match field kind {:?}",
                v, k
            )))
        }
    }

    debug_assert_eq!(out.len(), width);
    Ok(out)
}

/// Ключ первичного индекса (doc_id как не-null U64).
pub fn primary_key(doc_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.push(0x01);
    put_u64(&mut out, doc_id);
    out
}

pub fn doc_id_from_primary(key: &[u8]) -> u64 {
    BigEndian::read_u64(&key[1..9])
}

/// Композитный ключ вторичного индекса: (ключ поля, doc_id BE).
pub fn composite_key(field_key: &[u8], doc_id: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(field_key.len() + 8);
    out.extend_from_slice(field_key);
    put_u64(&mut out, doc_id);
    out
}

pub fn doc_id_from_composite(key: &[u8]) -> u64 {
    BigEndian::read_u64(&key[key.len() - 8..])
}

/// Нижняя граница не-null значений поля.
pub fn min_non_null_key(kind: FieldKind) -> Vec<u8> {
    let mut out = vec![0u8; key_width(kind)];
    out[0] = 0x01;
    out
}

/// Верхняя граница всех значений поля (включая NaN у плавающих).
pub fn max_field_key(kind: FieldKind) -> Vec<u8> {
    vec![0xFF; key_width(kind)]
}

/// Ключ null-значения.
pub fn null_field_key(kind: FieldKind) -> Vec<u8> {
    vec![0u8; key_width(kind)]
}

/// Границы StartsWith: [prefix с нулевым паддингом, prefix с 0xFF-паддингом],
/// обе включительно.
pub fn prefix_bounds(prefix: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    let bytes = prefix.as_bytes();
    if bytes.len() > STRING_KEY_MAX {
        return Err(GaldrError::invalid_arg(format!(
            "prefix exceeds {} bytes",
            STRING_KEY_MAX
        )));
    }
    if bytes.contains(&0) {
        return Err(GaldrError::invalid_arg("prefix contains a NUL byte"));
    }
    let width = key_width(FieldKind::Str);
    let mut lo = Vec::with_capacity(width);
    lo.push(0x01);
    lo.extend_from_slice(bytes);
    lo.resize(width, 0x00);

    let mut hi = Vec::with_capacity(width);
    hi.push(0x01);
    hi.extend_from_slice(bytes);
    hi.resize(width, 0xFF);
    Ok((lo, hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(v: Value, k: FieldKind) -> Vec<u8> {
        encode_field_key(&v, k).unwrap()
    }

    #[test]
    fn signed_integers_order() {
        let vals = [-128i8, -5, -1, 0, 1, 7, 127];
        let keys: Vec<_> = vals.iter().map(|v| enc(Value::I8(*v), FieldKind::I8)).collect();
        for w in keys.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn floats_order_with_canonical_zero_and_nan() {
        let vals = [
            f64::NEG_INFINITY,
            -1.5,
            -0.0,
            0.0,
            1.0e-9,
            2.5,
            f64::INFINITY,
        ];
        let keys: Vec<_> = vals.iter().map(|v| enc(Value::F64(*v), FieldKind::F64)).collect();
        // ±0 равны.
        assert_eq!(keys[2], keys[3]);
        assert!(keys[0] < keys[1]);
        assert!(keys[1] < keys[2]);
        assert!(keys[3] < keys[4]);
        assert!(keys[4] < keys[5]);
        assert!(keys[5] < keys[6]);

        // NaN — строго последним.
        let nan = enc(Value::F64(f64::NAN), FieldKind::F64);
        assert!(nan > keys[6]);
    }

    #[test]
    fn null_sorts_below_all_values() {
        let null = enc(Value::Null, FieldKind::I64);
        assert!(null < enc(Value::I64(i64::MIN), FieldKind::I64));

        let null_s = enc(Value::Null, FieldKind::Str);
        assert!(null_s < enc(Value::Str(String::new()), FieldKind::Str));
        assert!(null_s < min_non_null_key(FieldKind::Str));
    }

    #[test]
    fn strings_lexicographic() {
        let a = enc(Value::Str("Alfa".into()), FieldKind::Str);
        let b = enc(Value::Str("Alfb".into()), FieldKind::Str);
        let c = enc(Value::Str("Alfa2".into()), FieldKind::Str);
        assert!(a < b);
        assert!(a < c);
        assert!(c < b);
    }

    #[test]
    fn string_cap_enforced() {
        let long = "x".repeat(STRING_KEY_MAX + 1);
        assert!(encode_field_key(&Value::Str(long), FieldKind::Str).is_err());
        let nul = "a\0b".to_string();
        assert!(encode_field_key(&Value::Str(nul), FieldKind::Str).is_err());
    }

    #[test]
    fn prefix_bounds_cover_exactly_the_prefix() {
        let (lo, hi) = prefix_bounds("Test").unwrap();
        let t5 = enc(Value::Str("Test5".into()), FieldKind::Str);
        let t = enc(Value::Str("Test".into()), FieldKind::Str);
        let tz = enc(Value::Str("Tesz".into()), FieldKind::Str);
        assert!(lo <= t && t <= hi);
        assert!(lo <= t5 && t5 <= hi);
        assert!(tz > hi);
    }

    #[test]
    fn composite_key_roundtrip() {
        let fk = enc(Value::Str("Quinn".into()), FieldKind::Str);
        let ck = composite_key(&fk, 42);
        assert_eq!(ck.len(), fk.len() + 8);
        assert_eq!(doc_id_from_composite(&ck), 42);

        // Равные поля упорядочены по doc_id.
        let ck2 = composite_key(&fk, 43);
        assert!(ck < ck2);
    }

    #[test]
    fn primary_key_roundtrip() {
        let k = primary_key(7);
        assert_eq!(doc_id_from_primary(&k), 7);
        assert!(primary_key(7) < primary_key(8));
    }

    #[test]
    fn mismatched_kind_rejected() {
        assert!(encode_field_key(&Value::U8(1), FieldKind::U16).is_err());
    }
}
