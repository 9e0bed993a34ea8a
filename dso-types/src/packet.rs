/// Маркер начала кадра: тег `#` и количество цифр длины `9`
pub const FRAME_MARKER: [u8; 2] = [b'#', b'9'];

/// Ширина каждого ASCII-поля заголовка пакета (цифр)
pub const HEADER_FIELD_DIGITS: usize = 9;

/// Смещение области метаданных в пакете
pub const METADATA_OFFSET: usize = 29;

/// Размер области метаданных (99 байт)
pub const METADATA_SIZE: usize = 99;

/// Смещение полезной нагрузки: 2 + 3 * 9 + 99
pub const PAYLOAD_OFFSET: usize = METADATA_OFFSET + METADATA_SIZE;

/// Выборок в одном блоке канала
pub const BLOCK_SAMPLES: usize = 2000;

/// Количество аналоговых каналов прибора
pub const MAX_CHANNELS: usize = 4;

/// Заголовок одного пакета блочной передачи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Заявленная длина полезной нагрузки в этом пакете
    pub chunk_length: usize,
    /// Общее число выборок передачи (одинаково во всех пакетах)
    pub total_samples: usize,
    /// Позиция в буфере, куда пишется полезная нагрузка
    pub write_offset: usize,
}

impl PacketHeader {
    pub fn new(
        chunk_length: usize,
        total_samples: usize,
        write_offset: usize,
    ) -> Self {
        Self {
            chunk_length,
            total_samples,
            write_offset,
        }
    }

    /// Прибор ещё не закончил преобразование — данных в пакете нет.
    pub fn is_empty(&self) -> bool {
        self.chunk_length == 0
    }

    /// Конец полезной нагрузки в буфере передачи.
    pub fn payload_end(&self) -> usize {
        self.write_offset + self.chunk_length
    }

    /// Полный размер кадра на проводе.
    pub fn frame_len(&self) -> usize {
        PAYLOAD_OFFSET + self.chunk_length
    }
}
