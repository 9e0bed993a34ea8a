use dso_types::DsoError;
use thiserror::Error;

pub type CaptureResult<T> = std::result::Result<T, CaptureError>;

#[derive(Debug, Error)]
pub enum CaptureError {
    /// Транспорт не удалось открыть
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Ошибка декодера или транспорта во время передачи
    #[error("Decoder error: {0}")]
    Dso(#[from] DsoError),

    /// Ошибка ввода/вывода
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Ошибка пайплайна (inter-thread)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Слишком много неудачных передач подряд
    #[error("Giving up after {0} consecutive failed transfers")]
    TooManyFailures(u32),
}
