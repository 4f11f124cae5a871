// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Typed field access inside a fixed-width metadata record.
//!
//! Fields are stored little-endian at the offsets assigned by the
//! description. Assignment casts through [`NumericVariant`]; integral
//! columns reject values outside their domain, float columns narrow
//! lossily.

use super::descr::{MetaDataDescription, TranslationMap};
use super::element::{MetaDataElement, MetaDataType};
use crate::float16::{f16_bits_to_f32, f32_to_f16_bits};
use crate::variant::NumericVariant;
use crate::{Error, Result};
use byteorder::{ByteOrder, LE};

fn field<'a>(data: &'a [u8], elem: &MetaDataElement) -> Result<&'a [u8]> {
    data.get(elem.ofs()..elem.ofs() + elem.bytesize())
        .ok_or(Error::BlockCorrupt("metadata record too small"))
}

fn field_mut<'a>(data: &'a mut [u8], elem: &MetaDataElement) -> Result<&'a mut [u8]> {
    data.get_mut(elem.ofs()..elem.ofs() + elem.bytesize())
        .ok_or(Error::BlockCorrupt("metadata record too small"))
}

/// Reads one column of a record.
pub fn get_value(
    descr: &MetaDataDescription,
    data: &[u8],
    handle: usize,
) -> Result<NumericVariant> {
    let elem = descr.element(handle)?;
    let buf = field(data, elem)?;

    Ok(match elem.type_() {
        MetaDataType::Int8 => NumericVariant::Int(i64::from(buf[0] as i8)),
        MetaDataType::UInt8 => NumericVariant::UInt(u64::from(buf[0])),
        MetaDataType::Int16 => NumericVariant::Int(i64::from(LE::read_i16(buf))),
        MetaDataType::UInt16 => NumericVariant::UInt(u64::from(LE::read_u16(buf))),
        MetaDataType::Int32 => NumericVariant::Int(i64::from(LE::read_i32(buf))),
        MetaDataType::UInt32 => NumericVariant::UInt(u64::from(LE::read_u32(buf))),
        MetaDataType::Float16 => {
            NumericVariant::Float(f64::from(f16_bits_to_f32(LE::read_u16(buf))))
        }
        MetaDataType::Float32 => NumericVariant::Float(f64::from(LE::read_f32(buf))),
    })
}

fn checked_int(value: NumericVariant, min: i64, max: i64, type_: MetaDataType) -> Result<i64> {
    let v = value.to_int();
    if v < min || v > max {
        return Err(Error::MetaDataOutOfRange(type_));
    }
    Ok(v)
}

fn checked_uint(value: NumericVariant, max: u64, type_: MetaDataType) -> Result<u64> {
    if let NumericVariant::Int(v) = value {
        if v < 0 {
            return Err(Error::MetaDataOutOfRange(type_));
        }
    }
    let v = value.to_uint();
    if v > max {
        return Err(Error::MetaDataOutOfRange(type_));
    }
    Ok(v)
}

/// Writes one column of a record. `Null` clears the field.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn set_value(
    descr: &MetaDataDescription,
    data: &mut [u8],
    handle: usize,
    value: NumericVariant,
) -> Result<()> {
    let elem = *descr.element(handle)?;
    let type_ = elem.type_();
    let buf = field_mut(data, &elem)?;

    if !value.is_defined() {
        buf.fill(0);
        return Ok(());
    }

    match type_ {
        MetaDataType::Int8 => {
            buf[0] = checked_int(value, i64::from(i8::MIN), i64::from(i8::MAX), type_)? as u8;
        }
        MetaDataType::UInt8 => {
            buf[0] = checked_uint(value, u64::from(u8::MAX), type_)? as u8;
        }
        MetaDataType::Int16 => LE::write_i16(
            buf,
            checked_int(value, i64::from(i16::MIN), i64::from(i16::MAX), type_)? as i16,
        ),
        MetaDataType::UInt16 => {
            LE::write_u16(buf, checked_uint(value, u64::from(u16::MAX), type_)? as u16);
        }
        MetaDataType::Int32 => LE::write_i32(
            buf,
            checked_int(value, i64::from(i32::MIN), i64::from(i32::MAX), type_)? as i32,
        ),
        MetaDataType::UInt32 => {
            LE::write_u32(buf, checked_uint(value, u64::from(u32::MAX), type_)? as u32);
        }
        MetaDataType::Float16 => {
            LE::write_u16(buf, f32_to_f16_bits(value.to_float() as f32));
        }
        MetaDataType::Float32 => LE::write_f32(buf, value.to_float() as f32),
    }
    Ok(())
}

/// Zeroes a whole record.
pub fn clear_record(data: &mut [u8]) {
    data.fill(0);
}

/// Copies one record from `src` (described by `src_descr`) into the
/// zeroed `dst` record, per the translation map. Same-typed fields are
/// copied bit-exact, differently-typed fields are cast through
/// [`NumericVariant`]; out-of-domain values saturate to zero.
pub fn translate_record(
    dst_descr: &MetaDataDescription,
    dst: &mut [u8],
    src_descr: &MetaDataDescription,
    src: &[u8],
    map: &TranslationMap,
) -> Result<()> {
    for (handle, src_handle) in map.iter().enumerate() {
        let Some(src_handle) = src_handle else {
            continue; // reset column stays zero
        };

        let dst_elem = *dst_descr.element(handle)?;
        let src_elem = *src_descr.element(*src_handle)?;

        if src_elem.type_() == dst_elem.type_() {
            let from = field(src, &src_elem)?;
            field_mut(dst, &dst_elem)?.copy_from_slice(from);
            continue;
        }

        let value = get_value(src_descr, src, *src_handle)?;
        if set_value(dst_descr, dst, handle, value).is_err() {
            // value does not fit the narrower destination type
            set_value(dst_descr, dst, handle, NumericVariant::Null)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn descr() -> MetaDataDescription {
        MetaDataDescription::from_string("date UInt32, score Float32, flag Int8")
            .expect("should parse")
    }

    #[test]
    fn set_and_get() {
        let d = descr();
        let mut rec = vec![0u8; d.bytesize()];

        set_value(&d, &mut rec, 0, NumericVariant::UInt(20_200_101)).expect("set");
        set_value(&d, &mut rec, 1, NumericVariant::Float(0.75)).expect("set");
        set_value(&d, &mut rec, 2, NumericVariant::Int(-3)).expect("set");

        assert_eq!(
            NumericVariant::UInt(20_200_101),
            get_value(&d, &rec, 0).expect("get")
        );
        assert_eq!(
            NumericVariant::Float(0.75),
            get_value(&d, &rec, 1).expect("get")
        );
        assert_eq!(NumericVariant::Int(-3), get_value(&d, &rec, 2).expect("get"));
    }

    #[test]
    fn out_of_domain_fails() {
        let d = descr();
        let mut rec = vec![0u8; d.bytesize()];

        assert!(matches!(
            set_value(&d, &mut rec, 2, NumericVariant::Int(1000)),
            Err(Error::MetaDataOutOfRange(MetaDataType::Int8))
        ));
        assert!(set_value(&d, &mut rec, 0, NumericVariant::Int(-1)).is_err());
    }

    #[test]
    fn null_clears() {
        let d = descr();
        let mut rec = vec![0u8; d.bytesize()];

        set_value(&d, &mut rec, 0, NumericVariant::UInt(7)).expect("set");
        set_value(&d, &mut rec, 0, NumericVariant::Null).expect("clear");
        assert_eq!(NumericVariant::UInt(0), get_value(&d, &rec, 0).expect("get"));
    }

    #[test]
    fn translation_casts_and_resets() {
        let src_descr = descr();
        let mut src = vec![0u8; src_descr.bytesize()];
        set_value(&src_descr, &mut src, 0, NumericVariant::UInt(42)).expect("set");
        set_value(&src_descr, &mut src, 1, NumericVariant::Float(1.5)).expect("set");

        // date becomes Float32, score is reset, flag carried
        let dst_descr =
            MetaDataDescription::from_string("date Float32, score Float32, flag Int8")
                .expect("parse");
        let origin = vec![
            Some("date".to_string()),
            Some("score".to_string()),
            Some("flag".to_string()),
        ];
        let map = dst_descr
            .translation_from(&src_descr, &origin, &["score".to_string()])
            .expect("map");

        let mut dst = vec![0u8; dst_descr.bytesize()];
        translate_record(&dst_descr, &mut dst, &src_descr, &src, &map).expect("translate");

        assert_eq!(
            NumericVariant::Float(42.0),
            get_value(&dst_descr, &dst, 0).expect("get")
        );
        assert_eq!(
            NumericVariant::Float(0.0),
            get_value(&dst_descr, &dst, 1).expect("get")
        );
    }
}
