//! Полный путь для одного или нескольких каналов: передача → демультиплексор
//! → чтение масштаба/смещения → калибровка.

use dso_types::{DsoResult, Metadata, WaveformRecord};
use log::{debug, warn};

use crate::{
    calibration::{calibrate, ChannelCalibration},
    demux::extract_channel,
    reassembly::{PacketReader, RetryPolicy, Transfer, TransferStats},
    transport::Transport,
    CancelToken,
};

/// Параметры чтения передачи.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub policy: RetryPolicy,
    pub cancel: Option<CancelToken>,
}

/// Результат по одному каналу. Ошибка канала не мешает остальным.
#[derive(Debug)]
pub struct ChannelWaveform {
    pub channel: u8,
    pub result: DsoResult<WaveformRecord>,
}

/// Несколько каналов из одной передачи.
#[derive(Debug)]
pub struct Acquisition {
    pub metadata: Metadata,
    pub stats: TransferStats,
    pub channels: Vec<ChannelWaveform>,
}

impl Acquisition {
    /// Каналы, декодированные без ошибок.
    pub fn successful(&self) -> impl Iterator<Item = (u8, &WaveformRecord)> + '_ {
        self.channels
            .iter()
            .filter_map(|c| c.result.as_ref().ok().map(|r| (c.channel, r)))
    }

    pub fn failed_count(&self) -> usize {
        self.channels.iter().filter(|c| c.result.is_err()).count()
    }
}

/// Декодирует канал из готовой передачи с заданной калибровкой.
pub fn decode_channel(
    transfer: &Transfer,
    channel: u8,
    calibration: ChannelCalibration,
) -> DsoResult<WaveformRecord> {
    let meta = &transfer.metadata;
    let samples = extract_channel(&transfer.buffer, meta, channel)?;

    Ok(calibrate(
        &samples,
        calibration.scale,
        calibration.offset,
        meta.sampling_rate,
        meta.trigger_time_offset,
    ))
}

/// Читает одну передачу с прибора.
pub fn read_transfer<'a, T: Transport + ?Sized>(
    transport: &'a mut T,
    options: &FetchOptions,
    progress: impl FnMut(usize, usize) + 'a,
) -> DsoResult<Transfer> {
    let mut reader = PacketReader::new(transport)
        .with_policy(options.policy)
        .on_progress(progress);

    if let Some(cancel) = &options.cancel {
        reader = reader.with_cancel(cancel.clone());
    }

    reader.read_transfer()
}

/// Читает передачу и возвращает откалиброванную осциллограмму канала.
pub fn fetch_waveform<T: Transport + ?Sized>(
    transport: &mut T,
    channel: u8,
    options: &FetchOptions,
    progress: impl FnMut(usize, usize),
) -> DsoResult<WaveformRecord> {
    let transfer = read_transfer(transport, options, progress)?;
    calibrate_from_instrument(transport, &transfer, channel)
}

/// Одна передача на несколько каналов.
///
/// Внешняя ошибка — сбой самой передачи; ошибки отдельных каналов (выключен,
/// не удалось прочитать масштаб) возвращаются в [`ChannelWaveform::result`].
pub fn fetch_channels<T: Transport + ?Sized>(
    transport: &mut T,
    channels: &[u8],
    options: &FetchOptions,
    progress: impl FnMut(usize, usize),
) -> DsoResult<Acquisition> {
    let transfer = read_transfer(transport, options, progress)?;

    debug!(
        "Decoding channels {:?} (enabled: {:?})",
        channels,
        transfer.metadata.enabled_channels().collect::<Vec<_>>()
    );

    let decoded = channels
        .iter()
        .map(|&channel| {
            let result = calibrate_from_instrument(transport, &transfer, channel);

            if let Err(e) = &result {
                warn!("CH{channel}: {e}");
            }

            ChannelWaveform { channel, result }
        })
        .collect();

    Ok(Acquisition {
        metadata: transfer.metadata,
        stats: transfer.stats,
        channels: decoded,
    })
}

fn calibrate_from_instrument<T: Transport + ?Sized>(
    transport: &mut T,
    transfer: &Transfer,
    channel: u8,
) -> DsoResult<WaveformRecord> {
    // Проверяем канал до обращения к прибору
    transfer.metadata.block_index(channel)?;

    let calibration = ChannelCalibration::read_back(transport, channel)?;
    decode_channel(transfer, channel, calibration)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
