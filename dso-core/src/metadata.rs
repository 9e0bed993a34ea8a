//! Декодер 99-байтной области метаданных.
//!
//! | Смещение | Размер | Поле                               |
//! |----------|--------|------------------------------------|
//! | 0        | 1      | running                            |
//! | 1        | 1      | trigger                            |
//! | 2        | 16     | reserved                           |
//! | 18       | 4 × 7  | масштаб CH1..CH4 (не используется) |
//! | 46       | 4 × 1  | CH1..CH4 включён, ASCII `0`/`1`    |
//! | 50       | 9      | частота дискретизации, ASCII       |
//! | 59       | 6      | кратность дискретизации            |
//! | 65       | 9      | reserved                           |
//! | 74       | 9      | смещение времени триггера, ASCII   |
//! | 83       | 6      | начало захвата                     |
//! | 89       | 10     | reserved                           |

use dso_types::{DsoError, DsoResult, Metadata, MAX_CHANNELS, METADATA_SIZE};

const RUNNING: usize = 0;
const TRIGGER: usize = 1;
const CHANNEL_SCALE: usize = 18;
const CHANNEL_SCALE_LEN: usize = 7;
const CHANNEL_ENABLED: usize = 46;
const SAMPLING_RATE: usize = 50;
const SAMPLING_MULTIPLE: usize = 59;
const TRIGGER_TIME: usize = 74;
const ACQUISITION_START: usize = 83;
const NUMERIC_LEN: usize = 9;

/// Декодирование/кодирование метаданных для [`Metadata`].
pub trait MetadataExt: Sized {
    /// Разбирает область метаданных. Нечисловое ASCII-поле — ошибка.
    fn decode(buf: &[u8; METADATA_SIZE]) -> DsoResult<Self>;

    /// Кодирует метаданные обратно в 99 байт (для симулятора и тестов).
    fn encode(&self) -> DsoResult<[u8; METADATA_SIZE]>;
}

impl MetadataExt for Metadata {
    fn decode(buf: &[u8; METADATA_SIZE]) -> DsoResult<Self> {
        let mut channel_scale = [[0u8; CHANNEL_SCALE_LEN]; MAX_CHANNELS];
        let mut channel_enabled = [false; MAX_CHANNELS];

        for ch in 0..MAX_CHANNELS {
            let off = CHANNEL_SCALE + ch * CHANNEL_SCALE_LEN;
            channel_scale[ch].copy_from_slice(&buf[off..off + CHANNEL_SCALE_LEN]);

            channel_enabled[ch] = match buf[CHANNEL_ENABLED + ch] {
                b'1' => true,
                b'0' => false,
                other => {
                    return Err(DsoError::invalid_metadata(
                        "channel_enabled",
                        format!("CH{} flag is {other:#04x}, expected '0' or '1'", ch + 1),
                    ))
                }
            };
        }

        let sampling_rate = parse_ascii_f64(
            &buf[SAMPLING_RATE..SAMPLING_RATE + NUMERIC_LEN],
            "sampling_rate",
        )?;
        if sampling_rate <= 0.0 {
            return Err(DsoError::invalid_metadata(
                "sampling_rate",
                format!("must be positive, got {sampling_rate}"),
            ));
        }

        let trigger_time_offset = parse_ascii_f64(
            &buf[TRIGGER_TIME..TRIGGER_TIME + NUMERIC_LEN],
            "trigger_time_offset",
        )?;

        let mut sampling_multiple = [0u8; 6];
        sampling_multiple.copy_from_slice(&buf[SAMPLING_MULTIPLE..SAMPLING_MULTIPLE + 6]);

        let mut acquisition_start = [0u8; 6];
        acquisition_start.copy_from_slice(&buf[ACQUISITION_START..ACQUISITION_START + 6]);

        Ok(Metadata {
            running_flag: buf[RUNNING],
            trigger_flag: buf[TRIGGER],
            channel_scale,
            channel_enabled,
            sampling_rate,
            sampling_multiple,
            trigger_time_offset,
            acquisition_start,
        })
    }

    fn encode(&self) -> DsoResult<[u8; METADATA_SIZE]> {
        let mut buf = [0u8; METADATA_SIZE];

        buf[RUNNING] = self.running_flag;
        buf[TRIGGER] = self.trigger_flag;

        for ch in 0..MAX_CHANNELS {
            let off = CHANNEL_SCALE + ch * CHANNEL_SCALE_LEN;
            buf[off..off + CHANNEL_SCALE_LEN].copy_from_slice(&self.channel_scale[ch]);
            buf[CHANNEL_ENABLED + ch] = if self.channel_enabled[ch] { b'1' } else { b'0' };
        }

        write_ascii_f64(
            &mut buf[SAMPLING_RATE..SAMPLING_RATE + NUMERIC_LEN],
            self.sampling_rate,
            "sampling_rate",
        )?;
        buf[SAMPLING_MULTIPLE..SAMPLING_MULTIPLE + 6].copy_from_slice(&self.sampling_multiple);
        write_ascii_f64(
            &mut buf[TRIGGER_TIME..TRIGGER_TIME + NUMERIC_LEN],
            self.trigger_time_offset,
            "trigger_time_offset",
        )?;
        buf[ACQUISITION_START..ACQUISITION_START + 6].copy_from_slice(&self.acquisition_start);

        Ok(buf)
    }
}

/// ASCII десятичное число с плавающей точкой, пробелы и NUL по краям допустимы.
fn parse_ascii_f64(
    raw: &[u8],
    field: &'static str,
) -> DsoResult<f64> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| DsoError::invalid_metadata(field, format!("not ASCII: {raw:02x?}")))?;
    let trimmed = text.trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0');

    let value: f64 = trimmed
        .parse()
        .map_err(|e| DsoError::invalid_metadata(field, format!("{trimmed:?}: {e}")))?;

    if !value.is_finite() {
        return Err(DsoError::invalid_metadata(
            field,
            format!("{trimmed:?} is not finite"),
        ));
    }

    Ok(value)
}

/// Пишет число в формате прибора (`1.000E+08`), сокращая мантиссу, если
/// значение не помещается в поле. Остаток поля заполняется пробелами.
fn write_ascii_f64(
    out: &mut [u8],
    value: f64,
    field: &'static str,
) -> DsoResult<()> {
    for precision in (0..=3).rev() {
        let text = format_scientific(value, precision);
        if text.len() <= out.len() {
            out.fill(b' ');
            out[..text.len()].copy_from_slice(text.as_bytes());
            return Ok(());
        }
    }

    Err(DsoError::invalid_metadata(
        field,
        format!("{value} does not fit into {} characters", out.len()),
    ))
}

fn format_scientific(
    value: f64,
    precision: usize,
) -> String {
    let rust = format!("{value:.precision$E}");
    // Rust печатает `1.000E8`, прибор — `1.000E+08`
    match rust.split_once('E') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}E{sign}{:02}", exp.abs())
        }
        None => rust,
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Область метаданных, собранная вручную по смещениям.
    fn raw_region(
        rate: &[u8; 9],
        trigger: &[u8; 9],
        enabled: &[u8; 4],
    ) -> [u8; METADATA_SIZE] {
        let mut buf = [b' '; METADATA_SIZE];
        buf[0] = b'1';
        buf[1] = b'0';
        buf[18..25].copy_from_slice(b"1.00V  ");
        buf[46..50].copy_from_slice(enabled);
        buf[50..59].copy_from_slice(rate);
        buf[74..83].copy_from_slice(trigger);
        buf
    }

    #[test]
    fn test_decode_sampling_rate_and_channels() {
        let buf = raw_region(b"1.000E+08", b"0.000E+00", b"1100");
        let meta = Metadata::decode(&buf).unwrap();

        assert_eq!(meta.sampling_rate, 1e8);
        assert_eq!(meta.enabled_channel_count(), 2);
        assert_eq!(meta.trigger_time_offset, 0.0);
        assert!(meta.is_running());
        assert!(!meta.is_triggered());
        assert_eq!(&meta.channel_scale[0], b"1.00V  ");
    }

    #[test]
    fn test_decode_trims_padding() {
        let buf = raw_region(b"1e6      ", b" -0.001\0\0", b"0010");
        let meta = Metadata::decode(&buf).unwrap();

        assert_eq!(meta.sampling_rate, 1e6);
        assert!((meta.trigger_time_offset + 0.001).abs() < 1e-15);
        assert_eq!(meta.channel_enabled, [false, false, true, false]);
    }

    #[test]
    fn test_decode_rejects_garbage_number() {
        let buf = raw_region(b"1.0E+0x8 ", b"0.000E+00", b"1000");
        let err = Metadata::decode(&buf).unwrap_err();

        assert!(matches!(
            err,
            DsoError::InvalidMetadata {
                field: "sampling_rate",
                ..
            }
        ));

        let buf = raw_region(b"1.000E+08", b"         ", b"1000");
        assert!(matches!(
            Metadata::decode(&buf),
            Err(DsoError::InvalidMetadata {
                field: "trigger_time_offset",
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_non_positive_rate() {
        let buf = raw_region(b"0.000E+00", b"0.000E+00", b"1000");
        assert!(Metadata::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_enable_flag() {
        let buf = raw_region(b"1.000E+08", b"0.000E+00", b"1\x0100");
        assert!(matches!(
            Metadata::decode(&buf),
            Err(DsoError::InvalidMetadata {
                field: "channel_enabled",
                ..
            })
        ));
    }

    #[test]
    fn test_zero_enabled_channels_is_not_a_decode_error() {
        let buf = raw_region(b"1.000E+08", b"0.000E+00", b"0000");
        let meta = Metadata::decode(&buf).unwrap();
        assert_eq!(meta.enabled_channel_count(), 0);
    }

    #[test]
    fn test_encode_instrument_notation() {
        let meta = Metadata {
            sampling_rate: 1e8,
            trigger_time_offset: -0.001,
            channel_enabled: [true, true, false, false],
            ..Metadata::default()
        };
        let buf = meta.encode().unwrap();

        assert_eq!(&buf[50..59], b"1.000E+08");
        assert_eq!(&buf[74..83], b"-1.00E-03");
        assert_eq!(&buf[46..50], b"1100");
        assert_eq!(Metadata::decode(&buf).unwrap(), meta);
    }
}
