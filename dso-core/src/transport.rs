use std::collections::{HashMap, VecDeque};

use dso_types::{DsoError, DsoResult};

/// Запрос очередного пакета блочной передачи
pub const DATA_QUERY: &str = "PRIVate:WAVeform:DATA:ALL?";

/// Запрос идентификации прибора
pub const IDN_QUERY: &str = "*IDN?";

/// Запрос текущего вертикального смещения канала (В).
pub fn channel_offset_query(channel: u8) -> String {
    format!(":CHANnel{channel}:OFFSet?")
}

/// Запрос текущего вертикального масштаба канала (В/дел).
pub fn channel_scale_query(channel: u8) -> String {
    format!(":CHANnel{channel}:SCALe?")
}

/// Синхронный канал запрос/ответ до прибора.
///
/// Одну сессию в каждый момент времени ведёт один вызывающий (`&mut self`).
/// Реализации: [`ScriptedTransport`], а в `dso-capture` симулятор и TCP.
pub trait Transport: Send {
    /// Отправляет ASCII-команду.
    fn send(
        &mut self,
        command: &str,
    ) -> DsoResult<()>;

    /// Возвращает ровно один полный кадр ответа.
    fn receive_frame(&mut self) -> DsoResult<Vec<u8>>;

    /// send + receive, ответ как обрезанная строка.
    fn query(
        &mut self,
        command: &str,
    ) -> DsoResult<String> {
        self.send(command)?;
        let raw = self.receive_frame()?;

        String::from_utf8(raw)
            .map(|s| s.trim().to_string())
            .map_err(|e| DsoError::InvalidReply {
                command: command.to_string(),
                reply: e.to_string(),
            })
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &mut self,
        command: &str,
    ) -> DsoResult<()> {
        (**self).send(command)
    }

    fn receive_frame(&mut self) -> DsoResult<Vec<u8>> {
        (**self).receive_frame()
    }

    fn query(
        &mut self,
        command: &str,
    ) -> DsoResult<String> {
        (**self).query(command)
    }
}

/// Запрос с ответом в виде одного числа с плавающей точкой.
pub fn query_f64<T: Transport + ?Sized>(
    transport: &mut T,
    command: &str,
) -> DsoResult<f64> {
    let reply = transport.query(command)?;

    reply
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DsoError::InvalidReply {
            command: command.to_string(),
            reply,
        })
}

/// Строка идентификации прибора (`*IDN?`).
pub fn identify<T: Transport + ?Sized>(transport: &mut T) -> DsoResult<String> {
    transport.query(IDN_QUERY)
}

/// Транспорт, проигрывающий заранее заданные ответы.
///
/// Кадры на [`DATA_QUERY`] выдаются из очереди по порядку, текстовые запросы
/// отвечаются по таблице. Все отправленные команды сохраняются.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    frames: VecDeque<Vec<u8>>,
    replies: HashMap<String, String>,
    pending: Option<String>,
    sent: Vec<String>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Добавляет кадр в очередь ответов на запрос данных.
    pub fn push_frame(
        &mut self,
        frame: Vec<u8>,
    ) -> &mut Self {
        self.frames.push_back(frame);
        self
    }

    /// Задаёт ответ на текстовый запрос.
    pub fn reply(
        &mut self,
        command: &str,
        answer: &str,
    ) -> &mut Self {
        self.replies.insert(command.to_string(), answer.to_string());
        self
    }

    /// Отправленные команды в порядке отправки.
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// Кадров осталось в очереди.
    pub fn remaining_frames(&self) -> usize {
        self.frames.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &mut self,
        command: &str,
    ) -> DsoResult<()> {
        self.sent.push(command.to_string());
        self.pending = Some(command.trim().to_string());
        Ok(())
    }

    fn receive_frame(&mut self) -> DsoResult<Vec<u8>> {
        let command = self
            .pending
            .take()
            .ok_or_else(|| DsoError::transport("receive without a preceding command"))?;

        if command == DATA_QUERY {
            return self
                .frames
                .pop_front()
                .ok_or_else(|| DsoError::transport("scripted frames exhausted"));
        }

        self.replies
            .get(&command)
            .map(|s| s.as_bytes().to_vec())
            .ok_or_else(|| DsoError::transport(format!("no scripted reply for {command:?}")))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_queries() {
        assert_eq!(channel_offset_query(1), ":CHANnel1:OFFSet?");
        assert_eq!(channel_scale_query(2), ":CHANnel2:SCALe?");
    }

    #[test]
    fn test_query_f64() {
        let mut t = ScriptedTransport::new();
        t.reply(":CHANnel1:SCALe?", "2.000000e-01\n")
            .reply(":CHANnel1:OFFSet?", "volts");

        assert_eq!(query_f64(&mut t, ":CHANnel1:SCALe?").unwrap(), 0.2);
        assert!(matches!(
            query_f64(&mut t, ":CHANnel1:OFFSet?"),
            Err(DsoError::InvalidReply { .. })
        ));
        assert_eq!(t.sent().len(), 2);
    }

    #[test]
    fn test_identify() {
        let mut t = ScriptedTransport::new();
        t.reply(IDN_QUERY, "Hantek,DSO2D10,CN2000000000,1.0.0\r\n");

        assert_eq!(identify(&mut t).unwrap(), "Hantek,DSO2D10,CN2000000000,1.0.0");
    }

    #[test]
    fn test_exhausted_script_is_transport_error() {
        let mut t = ScriptedTransport::new();
        t.send(DATA_QUERY).unwrap();
        assert!(matches!(t.receive_frame(), Err(DsoError::Transport(_))));
        assert!(matches!(t.receive_frame(), Err(DsoError::Transport(_))));
    }

    #[test]
    fn test_boxed_transport() {
        let mut inner = ScriptedTransport::new();
        inner.reply(IDN_QUERY, "sim");
        let mut boxed: Box<dyn Transport> = Box::new(inner);

        assert_eq!(identify(&mut boxed).unwrap(), "sim");
    }
}
