use dso_types::{ChannelSampleSet, DsoResult, WaveformRecord};

use crate::transport::{channel_offset_query, channel_scale_query, query_f64, Transport};

/// Число вертикальных делений, на которое нормируется 8-битная выборка.
// Подобрано по захватам DSO2D10; по документации прибора не подтверждено.
pub const VERTICAL_GRID_DIVISIONS: f64 = 25.0;

/// Текущие вертикальные настройки канала, прочитанные с прибора.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    /// В/деление
    pub scale: f64,
    /// В
    pub offset: f64,
}

impl ChannelCalibration {
    /// Читает масштаб и смещение канала с прибора.
    ///
    /// Значения берутся в момент калибровки, а не из полей масштаба в
    /// метаданных: если настройки канала поменяли после захвата, напряжения
    /// будут посчитаны по новым.
    pub fn read_back<T: Transport + ?Sized>(
        transport: &mut T,
        channel: u8,
    ) -> DsoResult<Self> {
        let offset = query_f64(transport, &channel_offset_query(channel))?;
        let scale = query_f64(transport, &channel_scale_query(channel))?;

        Ok(Self { scale, offset })
    }
}

/// Переводит сырые выборки в напряжение и строит ось времени.
///
/// `voltage = v / 25 * scale - offset`, `time[i] = i / sampling_rate -
/// trigger_time_offset`.
pub fn calibrate(
    samples: &ChannelSampleSet,
    scale: f64,
    offset: f64,
    sampling_rate: f64,
    trigger_time_offset: f64,
) -> WaveformRecord {
    let voltage = samples
        .samples
        .iter()
        .map(|&v| f64::from(v) / VERTICAL_GRID_DIVISIONS * scale - offset)
        .collect();

    let time = (0..samples.len())
        .map(|i| i as f64 / sampling_rate - trigger_time_offset)
        .collect();

    WaveformRecord { time, voltage }
}
