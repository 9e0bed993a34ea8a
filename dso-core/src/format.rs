//! Формат кадра блочной передачи `PRIVate:WAVeform:DATA:ALL?`.
//!
//! ```text
//! 0    '#' '9'      маркер
//! 2    9 ASCII      длина полезной нагрузки пакета
//! 11   9 ASCII      общее число выборок передачи
//! 20   9 ASCII      смещение записи
//! 29   99 байт      метаданные (разбираются только в первом пакете)
//! 128  ...          полезная нагрузка
//! ```
//!
//! Все числа в заголовке — десятичный ASCII, дополненный нулями слева.

use dso_types::{
    DsoError, DsoResult, PacketHeader, FRAME_MARKER, HEADER_FIELD_DIGITS, METADATA_OFFSET,
    METADATA_SIZE, PAYLOAD_OFFSET,
};

/// Максимальное значение 9-значного поля заголовка
pub const MAX_HEADER_FIELD: usize = 999_999_999;

/// Разбирает заголовок пакета (первые 29 байт кадра).
pub fn parse_packet_header(frame: &[u8]) -> DsoResult<PacketHeader> {
    if frame.len() < 2 || frame[..2] != FRAME_MARKER {
        let got = &frame[..frame.len().min(2)];
        return Err(DsoError::malformed(format!(
            "expected marker \"#9\", got {:?}",
            String::from_utf8_lossy(got)
        )));
    }

    if frame.len() < METADATA_OFFSET {
        return Err(DsoError::malformed(format!(
            "frame too short for header: {} bytes",
            frame.len()
        )));
    }

    let mut off = FRAME_MARKER.len();
    let chunk_length = read_ascii_field(frame, &mut off, "chunk_length")?;
    let total_samples = read_ascii_field(frame, &mut off, "total_samples")?;
    let write_offset = read_ascii_field(frame, &mut off, "write_offset")?;

    Ok(PacketHeader::new(chunk_length, total_samples, write_offset))
}

/// Область метаданных кадра. Требует, чтобы кадр был не короче 128 байт.
pub fn metadata_region(frame: &[u8]) -> DsoResult<&[u8; METADATA_SIZE]> {
    frame
        .get(METADATA_OFFSET..PAYLOAD_OFFSET)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| {
            DsoError::malformed(format!(
                "frame too short for metadata region: {} bytes",
                frame.len()
            ))
        })
}

/// Полезная нагрузка пакета длиной `header.chunk_length`.
///
/// Байты после заявленной длины (например, завершающий `\n`) отбрасываются,
/// кадр короче заявленного — ошибка.
pub fn packet_payload<'a>(
    frame: &'a [u8],
    header: &PacketHeader,
) -> DsoResult<&'a [u8]> {
    frame
        .get(PAYLOAD_OFFSET..header.frame_len())
        .ok_or_else(|| {
            DsoError::malformed(format!(
                "truncated frame: declared {} payload bytes, got {}",
                header.chunk_length,
                frame.len().saturating_sub(PAYLOAD_OFFSET)
            ))
        })
}

/// Собирает кадр из заголовка, области метаданных и полезной нагрузки.
///
/// `header.chunk_length` должен совпадать с длиной `payload`.
pub fn encode_packet(
    header: &PacketHeader,
    metadata: &[u8; METADATA_SIZE],
    payload: &[u8],
) -> DsoResult<Vec<u8>> {
    if header.chunk_length != payload.len() {
        return Err(DsoError::malformed(format!(
            "chunk_length {} does not match payload length {}",
            header.chunk_length,
            payload.len()
        )));
    }

    let mut buf = Vec::with_capacity(header.frame_len());
    buf.extend_from_slice(&FRAME_MARKER);

    for (name, value) in [
        ("chunk_length", header.chunk_length),
        ("total_samples", header.total_samples),
        ("write_offset", header.write_offset),
    ] {
        if value > MAX_HEADER_FIELD {
            return Err(DsoError::malformed(format!(
                "{name} = {value} does not fit into {HEADER_FIELD_DIGITS} digits"
            )));
        }
        buf.extend_from_slice(format!("{value:09}").as_bytes());
    }

    buf.extend_from_slice(metadata);
    buf.extend_from_slice(payload);

    Ok(buf)
}

fn read_ascii_field(
    frame: &[u8],
    off: &mut usize,
    name: &str,
) -> DsoResult<usize> {
    let raw = &frame[*off..*off + HEADER_FIELD_DIGITS];
    *off += HEADER_FIELD_DIGITS;

    if !raw.iter().all(u8::is_ascii_digit) {
        return Err(DsoError::malformed(format!(
            "{name} is not a 9-digit decimal: {:?}",
            String::from_utf8_lossy(raw)
        )));
    }

    // только цифры, значит парсинг не может упасть и не переполняет usize
    Ok(raw
        .iter()
        .fold(0usize, |acc, d| acc * 10 + (d - b'0') as usize))
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(
        chunk: usize,
        total: usize,
        offset: usize,
    ) -> Vec<u8> {
        let payload = vec![0x7Fu8; chunk];
        encode_packet(
            &PacketHeader::new(chunk, total, offset),
            &[b' '; METADATA_SIZE],
            &payload,
        )
        .unwrap()
    }

    #[test]
    fn test_header_byte_layout() {
        let bytes = frame(2000, 6000, 4000);

        assert_eq!(&bytes[0..2], b"#9");
        assert_eq!(&bytes[2..11], b"000002000");
        assert_eq!(&bytes[11..20], b"000006000");
        assert_eq!(&bytes[20..29], b"000004000");
        assert_eq!(bytes.len(), 128 + 2000);
    }

    #[test]
    fn test_parse_header() {
        let bytes = frame(2000, 6000, 4000);
        let h = parse_packet_header(&bytes).unwrap();

        assert_eq!(h, PacketHeader::new(2000, 6000, 4000));
        assert_eq!(packet_payload(&bytes, &h).unwrap().len(), 2000);
    }

    #[test]
    fn test_bad_marker() {
        let mut bytes = frame(10, 10, 0);
        bytes[0] = b'$';
        assert!(matches!(
            parse_packet_header(&bytes),
            Err(DsoError::MalformedHeader(_))
        ));

        assert!(matches!(
            parse_packet_header(b""),
            Err(DsoError::MalformedHeader(_))
        ));
        assert!(matches!(
            parse_packet_header(b"#8000000010"),
            Err(DsoError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_non_digit_field() {
        let mut bytes = frame(10, 10, 0);
        bytes[5] = b'x';
        let err = parse_packet_header(&bytes).unwrap_err();
        assert!(err.to_string().contains("chunk_length"));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = frame(100, 100, 0);
        let h = parse_packet_header(&bytes).unwrap();

        assert!(matches!(
            packet_payload(&bytes[..150], &h),
            Err(DsoError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_trailing_terminator_ignored() {
        let mut bytes = frame(4, 4, 0);
        bytes.push(b'\n');
        let h = parse_packet_header(&bytes).unwrap();

        assert_eq!(packet_payload(&bytes, &h).unwrap(), &[0x7F; 4]);
    }

    #[test]
    fn test_encode_rejects_length_mismatch() {
        let h = PacketHeader::new(5, 5, 0);
        assert!(encode_packet(&h, &[0; METADATA_SIZE], &[1, 2, 3]).is_err());
    }
}
