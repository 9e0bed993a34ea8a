use crate::{DsoError, DsoResult, MAX_CHANNELS};

/// Параметры захвата из области метаданных первого пакета.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Флаг "идёт захват" (сырой байт)
    pub running_flag: u8,
    /// Состояние триггера (сырой байт)
    pub trigger_flag: u8,
    /// Поля масштаба каналов. Смысл не подтверждён, калибровка их не использует.
    pub channel_scale: [[u8; 7]; MAX_CHANNELS],
    /// Включённые каналы CH1..CH4
    pub channel_enabled: [bool; MAX_CHANNELS],
    /// Частота дискретизации (выборок/с)
    pub sampling_rate: f64,
    /// Кратность дискретизации (сырое поле)
    pub sampling_multiple: [u8; 6],
    /// Смещение времени триггера (секунды)
    pub trigger_time_offset: f64,
    /// Начало захвата (сырое поле)
    pub acquisition_start: [u8; 6],
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Metadata {
    pub fn is_running(&self) -> bool {
        is_set(self.running_flag)
    }

    pub fn is_triggered(&self) -> bool {
        is_set(self.trigger_flag)
    }

    /// Количество включённых каналов (0..=4).
    pub fn enabled_channel_count(&self) -> usize {
        self.channel_enabled.iter().filter(|&&e| e).count()
    }

    /// Номера включённых физических каналов (1-based) по возрастанию.
    pub fn enabled_channels(&self) -> impl Iterator<Item = u8> + '_ {
        self.channel_enabled
            .iter()
            .enumerate()
            .filter(|&(_, &e)| e)
            .map(|(i, _)| i as u8 + 1)
    }

    /// Как `enabled_channel_count`, но ноль включённых каналов — ошибка.
    pub fn require_channels(&self) -> DsoResult<usize> {
        match self.enabled_channel_count() {
            0 => Err(DsoError::NoEnabledChannels),
            n => Ok(n),
        }
    }

    /// Позиция блока физического канала среди включённых (1-based).
    ///
    /// Блоки в буфере идут только для включённых каналов, по возрастанию
    /// номера, так что при выключенном CH1 данные CH2 лежат первыми.
    pub fn block_index(
        &self,
        channel: u8,
    ) -> DsoResult<usize> {
        let enabled = self.require_channels()?;

        if channel == 0 || channel as usize > MAX_CHANNELS {
            return Err(DsoError::ChannelIndexOutOfRange {
                index: channel as usize,
                enabled,
            });
        }

        if !self.channel_enabled[channel as usize - 1] {
            return Err(DsoError::ChannelDisabled(channel));
        }

        Ok(self.channel_enabled[..channel as usize]
            .iter()
            .filter(|&&e| e)
            .count())
    }
}

fn is_set(flag: u8) -> bool {
    !matches!(flag, 0 | b'0')
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            running_flag: b'0',
            trigger_flag: b'0',
            channel_scale: [[b' '; 7]; MAX_CHANNELS],
            channel_enabled: [false; MAX_CHANNELS],
            sampling_rate: 0.0,
            sampling_multiple: [b' '; 6],
            trigger_time_offset: 0.0,
            acquisition_start: [b' '; 6],
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn with_channels(enabled: [bool; 4]) -> Metadata {
        Metadata {
            channel_enabled: enabled,
            ..Metadata::default()
        }
    }

    #[test]
    fn test_enabled_channel_count() {
        assert_eq!(with_channels([true, true, false, false]).enabled_channel_count(), 2);
        assert_eq!(with_channels([false; 4]).enabled_channel_count(), 0);

        let chans: Vec<u8> = with_channels([false, true, false, true])
            .enabled_channels()
            .collect();
        assert_eq!(chans, vec![2, 4]);
    }

    #[test]
    fn test_block_index_skips_disabled_channels() {
        let meta = with_channels([false, true, true, false]);
        assert_eq!(meta.block_index(2).unwrap(), 1);
        assert_eq!(meta.block_index(3).unwrap(), 2);
        assert!(matches!(meta.block_index(1), Err(DsoError::ChannelDisabled(1))));
        assert!(matches!(
            meta.block_index(5),
            Err(DsoError::ChannelIndexOutOfRange { index: 5, .. })
        ));
    }

    #[test]
    fn test_no_enabled_channels() {
        let meta = with_channels([false; 4]);
        assert!(matches!(meta.require_channels(), Err(DsoError::NoEnabledChannels)));
        assert!(matches!(meta.block_index(1), Err(DsoError::NoEnabledChannels)));
    }

    #[test]
    fn test_flags() {
        let mut meta = Metadata::default();
        assert!(!meta.is_running());
        meta.running_flag = b'1';
        meta.trigger_flag = 0x01;
        assert!(meta.is_running());
        assert!(meta.is_triggered());
    }
}
