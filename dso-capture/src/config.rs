use std::time::Duration;

use dso_core::RetryPolicy;

/// Тип транспорта до прибора (выбор при старте).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Встроенный симулятор (не требует железа).
    Simulated,
    /// SCPI поверх TCP-сокета (LAN-приборы).
    Tcp,
}

/// Полная конфигурация сессии захвата.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Тип транспорта
    pub transport: TransportKind,
    /// Адрес прибора для TCP (`host:port`)
    pub address: String,
    /// Физические каналы для декодирования (1..=4)
    pub channels: Vec<u8>,
    /// Таймаут чтения/записи сокета
    pub io_timeout: Duration,
    /// Ограничение ожидания непустых пакетов
    pub retry: RetryPolicy,
    /// Непрерывный захват до Ctrl+C (иначе один кадр)
    pub continuous: bool,
    /// Ограничение по числу кадров (None = до Ctrl+C)
    pub max_frames: Option<u64>,
    /// Пауза между циклами непрерывного захвата
    pub cycle_interval: Duration,
    /// Ёмкость очереди кадров между потоками
    pub ring_capacity: usize,
    /// Неудачных передач подряд до остановки
    pub max_consecutive_failures: u32,
    /// Интервал вывода статистики (секунды)
    pub stats_interval_secs: u64,
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для TransportKind, CaptureConfig
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for TransportKind {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            TransportKind::Simulated => write!(f, "sim"),
            TransportKind::Tcp => write!(f, "tcp"),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sim" | "simulated" => Ok(TransportKind::Simulated),
            "tcp" | "lan" | "socket" => Ok(TransportKind::Tcp),
            _ => Err(format!("Unknown transport: '{s}'. Use: sim, tcp")),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Simulated,
            address: "127.0.0.1:5555".to_string(),
            channels: vec![1, 2],
            io_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            continuous: false,
            max_frames: None,
            cycle_interval: Duration::from_millis(100),
            ring_capacity: 8,
            max_consecutive_failures: 5,
            stats_interval_secs: 5,
        }
    }
}

/// Парсит длительность.
///
/// Поддерживает суффиксы `ms`, `s`, `min`; без суффикса — миллисекунды.
///
/// # Примеры
/// ```
/// use std::time::Duration;
/// use dso_capture::config::parse_duration;
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
/// assert_eq!(parse_duration("100").unwrap(), Duration::from_millis(100));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let lower = s.to_lowercase();

    // множитель в наносекундах
    let (num_str, mult) = if let Some(v) = lower.strip_suffix("ms") {
        (v.trim(), 1e6)
    } else if let Some(v) = lower.strip_suffix("min") {
        (v.trim(), 60e9)
    } else if let Some(v) = lower.strip_suffix('s') {
        (v.trim(), 1e9)
    } else {
        // Без суффикса — миллисекунды
        return s
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| format!("Invalid duration '{s}': {e}"));
    };

    let n: f64 = num_str
        .parse()
        .map_err(|e| format!("Invalid duration value '{num_str}': {e}"))?;

    if !n.is_finite() || n < 0.0 {
        return Err(format!("Duration must be a non-negative number: '{s}'"));
    }

    Ok(Duration::from_nanos((n * mult).round() as u64))
}

/// Парсит список каналов: `"1,2"`, `"all"`.
pub fn parse_channels(s: &str) -> Result<Vec<u8>, String> {
    if s.trim().eq_ignore_ascii_case("all") {
        return Ok(vec![1, 2, 3, 4]);
    }

    let mut channels = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let ch: u8 = part
            .trim_start_matches(|c| c == 'c' || c == 'C' || c == 'h' || c == 'H')
            .parse()
            .map_err(|e| format!("Invalid channel '{part}': {e}"))?;

        if !(1..=4).contains(&ch) {
            return Err(format!("Channel {ch} out of range 1..=4"));
        }
        if !channels.contains(&ch) {
            channels.push(ch);
        }
    }

    if channels.is_empty() {
        return Err("No channels given".to_string());
    }

    Ok(channels)
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
