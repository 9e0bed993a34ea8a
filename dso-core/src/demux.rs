use dso_types::{ChannelSampleSet, DsoError, DsoResult, Metadata, BLOCK_SAMPLES};

/// Извлекает выборки канала из буфера с чередующимися блоками.
///
/// Буфер — последовательность раундов, в каждом по блоку из 2000 выборок на
/// каждый включённый канал в порядке возрастания. Блоки канала `index`
/// начинаются с `(index - 1) * 2000` и повторяются с шагом
/// `2000 * enabled_channels`. Неполный последний блок берётся как есть.
pub fn extract(
    buffer: &[u8],
    enabled_channels: usize,
    index: usize,
) -> DsoResult<ChannelSampleSet> {
    if enabled_channels == 0 {
        return Err(DsoError::NoEnabledChannels);
    }

    if index == 0 || index > enabled_channels {
        return Err(DsoError::ChannelIndexOutOfRange {
            index,
            enabled: enabled_channels,
        });
    }

    let stride = BLOCK_SAMPLES * enabled_channels;
    let start = (index - 1) * BLOCK_SAMPLES;

    let samples = buffer
        .chunks(stride)
        .filter_map(|round| round.get(start..))
        .flat_map(|block| &block[..block.len().min(BLOCK_SAMPLES)])
        .map(|&b| b as i8)
        .collect();

    Ok(ChannelSampleSet::new(samples))
}

/// То же по номеру физического канала (1..=4) с учётом выключенных каналов.
pub fn extract_channel(
    buffer: &[u8],
    metadata: &Metadata,
    channel: u8,
) -> DsoResult<ChannelSampleSet> {
    let index = metadata.block_index(channel)?;
    extract(buffer, metadata.enabled_channel_count(), index)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Буфер, где каждый байт несёт номер своего блока.
    fn tagged_blocks(blocks: usize) -> Vec<u8> {
        (0..blocks)
            .flat_map(|b| std::iter::repeat(b as u8).take(BLOCK_SAMPLES))
            .collect()
    }

    #[test]
    fn test_two_channels_single_round() {
        let buf = tagged_blocks(2);

        let ch1 = extract(&buf, 2, 1).unwrap();
        let ch2 = extract(&buf, 2, 2).unwrap();

        assert_eq!(ch1.len(), 2000);
        assert_eq!(ch2.len(), 2000);
        assert!(ch1.samples.iter().all(|&s| s == 0));
        assert!(ch2.samples.iter().all(|&s| s == 1));
    }

    #[test]
    fn test_two_channels_two_rounds() {
        let buf = tagged_blocks(4);

        let ch1 = extract(&buf, 2, 1).unwrap();
        let expected: Vec<i8> = buf[0..2000]
            .iter()
            .chain(&buf[4000..6000])
            .map(|&b| b as i8)
            .collect();

        assert_eq!(ch1.samples, expected);
    }

    #[test]
    fn test_signed_conversion() {
        let buf = [0x00, 0x7F, 0x80, 0xFF];
        let ch = extract(&buf, 1, 1).unwrap();

        assert_eq!(ch.samples, vec![0, 127, -128, -1]);
    }

    #[test]
    fn test_partial_last_block() {
        let mut buf = tagged_blocks(2);
        buf.extend_from_slice(&[9u8; 500]);

        assert_eq!(extract(&buf, 2, 1).unwrap().len(), 2500);
        assert_eq!(extract(&buf, 2, 2).unwrap().len(), 2000);
    }

    #[test]
    fn test_contract_violations() {
        let buf = tagged_blocks(2);

        assert!(matches!(extract(&buf, 0, 1), Err(DsoError::NoEnabledChannels)));
        assert!(matches!(
            extract(&buf, 2, 3),
            Err(DsoError::ChannelIndexOutOfRange {
                index: 3,
                enabled: 2
            })
        ));
        assert!(matches!(
            extract(&buf, 2, 0),
            Err(DsoError::ChannelIndexOutOfRange { .. })
        ));
    }

    #[test]
    fn test_extract_physical_channel() {
        let meta = Metadata {
            channel_enabled: [false, true, false, true],
            ..Metadata::default()
        };
        let buf = tagged_blocks(2);

        let ch4 = extract_channel(&buf, &meta, 4).unwrap();
        assert!(ch4.samples.iter().all(|&s| s == 1));
        assert!(matches!(
            extract_channel(&buf, &meta, 1),
            Err(DsoError::ChannelDisabled(1))
        ));
    }
}
