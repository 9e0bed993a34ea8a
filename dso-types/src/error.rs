use thiserror::Error;

/// Результат для операций декодера
pub type DsoResult<T> = std::result::Result<T, DsoError>;

/// Ошибки декодирования передачи осциллограммы.
#[derive(Debug, Error)]
pub enum DsoError {
    /// Ответ не начинается с маркера `#9` или обрезан
    #[error("Malformed packet header: {0}")]
    MalformedHeader(String),

    /// Пакет заявил другое общее число выборок, чем первый пакет передачи
    #[error("Sample count mismatch: transfer declared {expected}, packet declared {found}")]
    SampleCountMismatch { expected: usize, found: usize },

    /// Полезная нагрузка выходит за пределы буфера передачи
    #[error("Payload out of bounds: offset {offset} + length {length} > total {total}")]
    PayloadOutOfBounds {
        offset: usize,
        length: usize,
        total: usize,
    },

    /// Числовое поле метаданных не парсится
    #[error("Invalid metadata field `{field}`: {reason}")]
    InvalidMetadata { field: &'static str, reason: String },

    /// Превышен бюджет ожидания непустого пакета
    #[error("Timeout after {attempts} empty polls ({elapsed_ms} ms)")]
    Timeout { attempts: u32, elapsed_ms: u64 },

    /// В метаданных не включён ни один канал
    #[error("No enabled channels in acquisition")]
    NoEnabledChannels,

    /// Индекс канала вне диапазона включённых каналов
    #[error("Channel index {index} out of range 1..={enabled}")]
    ChannelIndexOutOfRange { index: usize, enabled: usize },

    /// Физический канал выключен на приборе
    #[error("Channel {0} is not enabled")]
    ChannelDisabled(u8),

    /// Ответ на текстовый запрос не является числом
    #[error("Invalid reply to `{command}`: {reply:?}")]
    InvalidReply { command: String, reply: String },

    /// Передача прервана вызывающей стороной
    #[error("Transfer cancelled")]
    Cancelled,

    /// Ошибка транспорта (пробрасывается без изменений)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Ошибки ввода/вывода (автоконвертируются из std::io::Error)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DsoError {
    /// Удобные конструкторы
    pub fn malformed<S: Into<String>>(s: S) -> Self {
        Self::MalformedHeader(s.into())
    }

    pub fn invalid_metadata<S: Into<String>>(
        field: &'static str,
        reason: S,
    ) -> Self {
        Self::InvalidMetadata {
            field,
            reason: reason.into(),
        }
    }

    pub fn transport<S: Into<String>>(s: S) -> Self {
        Self::Transport(s.into())
    }

    /// Ошибка прерывает только текущую передачу и может исчезнуть при повторе.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DsoError::Timeout { .. } | DsoError::Transport(_) | DsoError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = DsoError::SampleCountMismatch {
            expected: 6000,
            found: 6001,
        };
        assert_eq!(
            e.to_string(),
            "Sample count mismatch: transfer declared 6000, packet declared 6001"
        );

        let e = DsoError::invalid_metadata("sampling_rate", "not a number");
        assert!(e.to_string().contains("sampling_rate"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(DsoError::Timeout {
            attempts: 3,
            elapsed_ms: 10
        }
        .is_transient());
        assert!(DsoError::transport("link down").is_transient());
        assert!(!DsoError::malformed("bad marker").is_transient());
        assert!(!DsoError::NoEnabledChannels.is_transient());
    }
}
