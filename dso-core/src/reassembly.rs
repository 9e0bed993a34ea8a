//! Сборка многопакетной передачи в один буфер.
//!
//! [`Reassembly`] — явный автомат `Empty → Accumulating → Complete`, который
//! передаётся по значению через последовательные вызовы [`Reassembly::accept`].
//! Ошибка поглощает состояние: частично собранный буфер отбрасывается.
//! [`PacketReader`] гоняет автомат поверх [`Transport`] с ограничением на
//! ожидание непустых пакетов и проверкой отмены на каждой итерации.

use std::{
    thread,
    time::{Duration, Instant},
};

use dso_types::{DsoError, DsoResult, Metadata, PacketHeader};
use log::{debug, info};

use crate::{
    format::{metadata_region, packet_payload, parse_packet_header},
    metadata::MetadataExt,
    transport::{Transport, DATA_QUERY},
    CancelToken,
};

/// Собранная передача: буфер выборок и метаданные первого пакета.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub buffer: Vec<u8>,
    pub metadata: Metadata,
    pub stats: TransferStats,
}

/// Статистика одной передачи.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Пакетов с данными.
    pub packets: u64,
    /// Пустых пакетов (прибор ещё не готов). Считает [`PacketReader`].
    pub empty_polls: u64,
    /// Байт полезной нагрузки.
    pub payload_bytes: u64,
}

/// Передача в процессе сборки.
#[derive(Debug)]
pub struct Partial {
    buffer: Vec<u8>,
    metadata: Metadata,
    received: usize,
    /// Записанные диапазоны `[start, end)`, по возрастанию, без пересечений
    written: Vec<(usize, usize)>,
    stats: TransferStats,
}

/// Состояние сборки передачи.
#[derive(Debug)]
pub enum Reassembly {
    /// Ещё не пришло ни одного пакета с данными.
    Empty,
    /// Первый пакет принят, ждём остальные.
    Accumulating(Partial),
    /// Все заявленные выборки получены.
    Complete(Transfer),
}

/// Что произошло при приёме пакета.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketEvent {
    /// `chunk_length == 0`: прибор ещё не закончил преобразование.
    NotReady,
    /// Принят кусок; `received` из `total` байт.
    Chunk { received: usize, total: usize },
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Reassembly {
    pub fn new() -> Self {
        Reassembly::Empty
    }

    /// Принимает один кадр ответа и возвращает следующее состояние.
    pub fn accept(
        self,
        frame: &[u8],
    ) -> DsoResult<(Reassembly, PacketEvent)> {
        let header = parse_packet_header(frame)?;

        if header.is_empty() {
            return Ok((self, PacketEvent::NotReady));
        }

        let mut partial = match self {
            Reassembly::Empty => {
                let metadata = Metadata::decode(metadata_region(frame)?)?;
                debug!(
                    "Transfer started: total={} rate={} channels={}",
                    header.total_samples,
                    metadata.sampling_rate,
                    metadata.enabled_channel_count()
                );

                Partial {
                    buffer: vec![0u8; header.total_samples],
                    metadata,
                    received: 0,
                    written: Vec::new(),
                    stats: TransferStats::default(),
                }
            }
            Reassembly::Accumulating(partial) => {
                if partial.buffer.len() != header.total_samples {
                    return Err(DsoError::SampleCountMismatch {
                        expected: partial.buffer.len(),
                        found: header.total_samples,
                    });
                }
                partial
            }
            Reassembly::Complete(_) => {
                return Err(DsoError::malformed(
                    "packet with payload after the transfer completed",
                ))
            }
        };

        partial.write(&header, packet_payload(frame, &header)?)?;

        let event = PacketEvent::Chunk {
            received: partial.received,
            total: partial.buffer.len(),
        };

        let next = if partial.received == partial.buffer.len() {
            Reassembly::Complete(Transfer {
                buffer: partial.buffer,
                metadata: partial.metadata,
                stats: partial.stats,
            })
        } else {
            Reassembly::Accumulating(partial)
        };

        Ok((next, event))
    }
}

impl Partial {
    fn write(
        &mut self,
        header: &PacketHeader,
        payload: &[u8],
    ) -> DsoResult<()> {
        let total = self.buffer.len();
        let (start, end) = (header.write_offset, header.payload_end());

        // Повтор или перекрытие уже записанного оставили бы дыру при полном счётчике
        let pos = self.written.partition_point(|&(_, e)| e <= start);
        let overlaps = self.written.get(pos).is_some_and(|&(s, _)| s < end);

        if end > total || overlaps {
            return Err(DsoError::PayloadOutOfBounds {
                offset: start,
                length: payload.len(),
                total,
            });
        }

        self.buffer[start..end].copy_from_slice(payload);
        self.written.insert(pos, (start, end));
        self.received += payload.len();
        self.stats.packets += 1;
        self.stats.payload_bytes += payload.len() as u64;

        Ok(())
    }
}

impl Default for Reassembly {
    fn default() -> Self {
        Self::new()
    }
}

/// Ограничение ожидания непустых пакетов.
///
/// Оба счётчика сбрасываются, когда приходит пакет с данными, так что
/// ограничивается простой прибора, а не длительность всей передачи.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Пустых ответов подряд до `Timeout`.
    pub max_empty_polls: u32,
    /// Время без новых данных до `Timeout`.
    pub stall_timeout: Duration,
    /// Пауза перед повтором после пустого ответа.
    pub poll_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_empty_polls: 500,
            stall_timeout: Duration::from_secs(5),
            poll_delay: Duration::from_millis(10),
        }
    }
}

/// Читает одну полную передачу с прибора.
pub struct PacketReader<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    policy: RetryPolicy,
    cancel: Option<CancelToken>,
    progress: Option<Box<dyn FnMut(usize, usize) + 'a>>,
}

impl<'a, T: Transport + ?Sized> PacketReader<'a, T> {
    pub fn new(transport: &'a mut T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            cancel: None,
            progress: None,
        }
    }

    pub fn with_policy(
        mut self,
        policy: RetryPolicy,
    ) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(
        mut self,
        cancel: CancelToken,
    ) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Наблюдатель прогресса `(получено, всего)`, вызывается синхронно после
    /// каждого пакета с данными. Не должен блокироваться.
    pub fn on_progress(
        mut self,
        observer: impl FnMut(usize, usize) + 'a,
    ) -> Self {
        self.progress = Some(Box::new(observer));
        self
    }

    /// Запрашивает пакеты, пока передача не будет собрана.
    pub fn read_transfer(mut self) -> DsoResult<Transfer> {
        let mut state = Reassembly::new();
        let mut empty_in_row: u32 = 0;
        let mut empty_total: u64 = 0;
        let mut last_data = Instant::now();

        loop {
            if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!("Transfer cancelled, dropping partial buffer");
                return Err(DsoError::Cancelled);
            }

            self.transport.send(DATA_QUERY)?;
            let frame = self.transport.receive_frame()?;

            let (next, event) = state.accept(&frame)?;

            match event {
                PacketEvent::NotReady => {
                    empty_in_row += 1;
                    empty_total += 1;
                    let stalled = last_data.elapsed();

                    if empty_in_row >= self.policy.max_empty_polls
                        || stalled >= self.policy.stall_timeout
                    {
                        return Err(DsoError::Timeout {
                            attempts: empty_in_row,
                            elapsed_ms: stalled.as_millis() as u64,
                        });
                    }

                    if !self.policy.poll_delay.is_zero() {
                        thread::sleep(self.policy.poll_delay);
                    }
                }
                PacketEvent::Chunk { received, total } => {
                    empty_in_row = 0;
                    last_data = Instant::now();

                    if let Some(observer) = self.progress.as_mut() {
                        observer(received, total);
                    }
                }
            }

            state = match next {
                Reassembly::Complete(mut transfer) => {
                    transfer.stats.empty_polls = empty_total;
                    info!(
                        "Transfer complete: {} bytes in {} packets ({} empty polls)",
                        transfer.buffer.len(),
                        transfer.stats.packets,
                        transfer.stats.empty_polls
                    );
                    return Ok(transfer);
                }
                other => other,
            };
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use dso_types::METADATA_SIZE;

    use super::*;
    use crate::{format::encode_packet, transport::ScriptedTransport};

    fn metadata_bytes() -> [u8; METADATA_SIZE] {
        Metadata {
            sampling_rate: 1e6,
            channel_enabled: [true, false, false, false],
            ..Metadata::default()
        }
        .encode()
        .unwrap()
    }

    fn packet(
        total: usize,
        offset: usize,
        payload: &[u8],
    ) -> Vec<u8> {
        encode_packet(
            &PacketHeader::new(payload.len(), total, offset),
            &metadata_bytes(),
            payload,
        )
        .unwrap()
    }

    fn fast_policy(max_empty_polls: u32) -> RetryPolicy {
        RetryPolicy {
            max_empty_polls,
            stall_timeout: Duration::from_secs(10),
            poll_delay: Duration::ZERO,
        }
    }

    #[test]
    fn test_state_machine_transitions() {
        let state = Reassembly::new();

        let (state, ev) = state.accept(&packet(0, 0, &[])).unwrap();
        assert_eq!(ev, PacketEvent::NotReady);
        assert!(matches!(state, Reassembly::Empty));

        let (state, ev) = state.accept(&packet(4, 0, &[1, 2])).unwrap();
        assert_eq!(ev, PacketEvent::Chunk { received: 2, total: 4 });
        assert!(matches!(state, Reassembly::Accumulating(_)));

        let (state, ev) = state.accept(&packet(4, 2, &[3, 4])).unwrap();
        assert_eq!(ev, PacketEvent::Chunk { received: 4, total: 4 });

        match state {
            Reassembly::Complete(t) => {
                assert_eq!(t.buffer, vec![1, 2, 3, 4]);
                assert_eq!(t.metadata.sampling_rate, 1e6);
                assert_eq!(t.stats.packets, 2);
                assert_eq!(t.stats.payload_bytes, 4);
            }
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_order_chunks() {
        let (state, _) = Reassembly::new().accept(&packet(4, 2, &[3, 4])).unwrap();
        let (state, _) = state.accept(&packet(4, 0, &[1, 2])).unwrap();

        let Reassembly::Complete(t) = state else {
            panic!("expected Complete");
        };
        assert_eq!(t.buffer, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_payload_past_end_rejected() {
        let (state, _) = Reassembly::new().accept(&packet(4, 0, &[1, 2])).unwrap();
        let err = state.accept(&packet(4, 3, &[3, 4])).unwrap_err();

        assert!(matches!(
            err,
            DsoError::PayloadOutOfBounds {
                offset: 3,
                length: 2,
                total: 4
            }
        ));
    }

    #[test]
    fn test_overlapping_chunks_rejected() {
        let (state, _) = Reassembly::new().accept(&packet(4, 0, &[1, 2, 3])).unwrap();
        let err = state.accept(&packet(4, 2, &[3, 4])).unwrap_err();

        assert!(matches!(err, DsoError::PayloadOutOfBounds { .. }));
    }

    #[test]
    fn test_duplicated_chunk_rejected() {
        let mut t = ScriptedTransport::new();
        t.push_frame(packet(6, 0, &[1, 2]))
            .push_frame(packet(6, 0, &[1, 2]))
            .push_frame(packet(6, 4, &[5, 6]));

        let err = PacketReader::new(&mut t)
            .with_policy(fast_policy(5))
            .read_transfer()
            .unwrap_err();

        assert!(matches!(
            err,
            DsoError::PayloadOutOfBounds {
                offset: 0,
                length: 2,
                total: 6
            }
        ));
    }

    #[test]
    fn test_overlap_with_later_chunk_rejected() {
        let (state, _) = Reassembly::new().accept(&packet(6, 3, &[4, 5])).unwrap();
        let (state, _) = state.accept(&packet(6, 0, &[1, 2])).unwrap();
        let err = state.accept(&packet(6, 1, &[2, 3, 4])).unwrap_err();

        assert!(matches!(err, DsoError::PayloadOutOfBounds { offset: 1, .. }));
    }

    #[test]
    fn test_count_mismatch() {
        let (state, _) = Reassembly::new().accept(&packet(6000, 0, &[0; 2000])).unwrap();
        let err = state.accept(&packet(6001, 2000, &[0; 2000])).unwrap_err();

        assert!(matches!(
            err,
            DsoError::SampleCountMismatch {
                expected: 6000,
                found: 6001
            }
        ));
    }

    #[test]
    fn test_reader_retries_not_ready_then_completes() {
        let mut t = ScriptedTransport::new();
        t.push_frame(packet(0, 0, &[]))
            .push_frame(packet(0, 0, &[]))
            .push_frame(packet(3, 0, &[7, 8, 9]));

        let transfer = PacketReader::new(&mut t)
            .with_policy(fast_policy(5))
            .read_transfer()
            .unwrap();

        assert_eq!(transfer.buffer, vec![7, 8, 9]);
        assert_eq!(transfer.stats.empty_polls, 2);
        assert_eq!(t.sent().iter().filter(|c| *c == DATA_QUERY).count(), 3);
    }

    #[test]
    fn test_reader_times_out_on_stalled_instrument() {
        let mut t = ScriptedTransport::new();
        for _ in 0..10 {
            t.push_frame(packet(0, 0, &[]));
        }

        let err = PacketReader::new(&mut t)
            .with_policy(fast_policy(4))
            .read_transfer()
            .unwrap_err();

        assert!(matches!(err, DsoError::Timeout { attempts: 4, .. }));
        assert_eq!(t.remaining_frames(), 6, "no polling past the budget");
    }

    #[test]
    fn test_reader_stall_timeout() {
        let mut t = ScriptedTransport::new();
        for _ in 0..50 {
            t.push_frame(packet(0, 0, &[]));
        }

        let policy = RetryPolicy {
            max_empty_polls: u32::MAX,
            stall_timeout: Duration::from_millis(20),
            poll_delay: Duration::from_millis(5),
        };
        let err = PacketReader::new(&mut t)
            .with_policy(policy)
            .read_transfer()
            .unwrap_err();

        assert!(matches!(err, DsoError::Timeout { .. }));
        assert!(t.remaining_frames() > 0);
    }

    #[test]
    fn test_reader_cancelled_before_first_packet() {
        let mut t = ScriptedTransport::new();
        t.push_frame(packet(2, 0, &[1, 2]));

        let cancel = CancelToken::new();
        cancel.cancel();

        let err = PacketReader::new(&mut t)
            .with_cancel(cancel)
            .read_transfer()
            .unwrap_err();

        assert!(matches!(err, DsoError::Cancelled));
        assert!(t.sent().is_empty());
    }

    #[test]
    fn test_reader_cancelled_mid_transfer() {
        let mut t = ScriptedTransport::new();
        t.push_frame(packet(4, 0, &[1, 2]))
            .push_frame(packet(4, 2, &[3, 4]));

        let cancel = CancelToken::new();
        let trip = cancel.clone();

        let err = PacketReader::new(&mut t)
            .with_cancel(cancel)
            .on_progress(move |_, _| {
                trip.cancel();
            })
            .read_transfer()
            .unwrap_err();

        assert!(matches!(err, DsoError::Cancelled));
        assert_eq!(t.remaining_frames(), 1);
    }

    #[test]
    fn test_reader_malformed_is_terminal() {
        let mut t = ScriptedTransport::new();
        t.push_frame(b"ERR: busy".to_vec())
            .push_frame(packet(2, 0, &[1, 2]));

        let err = PacketReader::new(&mut t).read_transfer().unwrap_err();

        assert!(matches!(err, DsoError::MalformedHeader(_)));
        assert_eq!(t.remaining_frames(), 1);
    }

    #[test]
    fn test_transport_error_passes_through() {
        let mut t = ScriptedTransport::new();
        t.push_frame(packet(4, 0, &[1, 2]));

        let err = PacketReader::new(&mut t).read_transfer().unwrap_err();
        assert!(matches!(err, DsoError::Transport(_)));
    }
}
