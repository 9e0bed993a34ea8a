// Симулятор отвечает на те же команды, что и прибор: блочная передача
// нарезается на пакеты, перед каждой передачей можно выдать несколько пустых
// пакетов ("прибор ещё не готов"), масштаб/смещение каналов читаются запросом.
// TcpScope — сырой SCPI-сокет для LAN-приборов.

use std::{
    f64::consts::PI,
    io::{BufRead, BufReader, ErrorKind, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use dso_core::{
    encode_packet, parse_packet_header, MetadataExt, Transport, DATA_QUERY, IDN_QUERY,
    VERTICAL_GRID_DIVISIONS,
};
use dso_types::{
    DsoError, DsoResult, Metadata, PacketHeader, BLOCK_SAMPLES, MAX_CHANNELS, METADATA_OFFSET,
    METADATA_SIZE, PAYLOAD_OFFSET,
};
use log::{debug, info, warn};

use crate::{CaptureConfig, CaptureError, CaptureResult, TransportKind};

/// Вертикальные настройки одного канала симулятора.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimChannel {
    pub enabled: bool,
    /// В/деление
    pub scale: f64,
    /// В
    pub offset: f64,
}

/// Синтетический осциллограф: CH1 синус, CH2 меандр, CH3 треугольник,
/// CH4 пила, амплитуда ±3 деления.
pub struct SimulatedScope {
    pub channels: [SimChannel; MAX_CHANNELS],
    /// Частота дискретизации (выборок/с)
    pub sampling_rate: f64,
    /// Смещение времени триггера (с)
    pub trigger_time_offset: f64,
    /// Выборок на канал (округляется вверх до кратного 2000)
    pub memory_depth: usize,
    /// Байт полезной нагрузки в одном пакете
    pub chunk_bytes: usize,
    /// Пустых пакетов перед каждой передачей
    pub not_ready_polls: u32,
    /// Частота сигнала (Гц)
    pub tone_freq_hz: f64,

    pending: Option<String>,
    transfer: Option<SimTransfer>,
    captures: u64,
}

struct SimTransfer {
    buffer: Vec<u8>,
    metadata: [u8; METADATA_SIZE],
    sent: usize,
    not_ready_left: u32,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl SimulatedScope {
    pub fn new() -> Self {
        let ch = |enabled| SimChannel {
            enabled,
            scale: 1.0,
            offset: 0.0,
        };

        Self {
            channels: [ch(true), ch(true), ch(false), ch(false)],
            sampling_rate: 1e6,
            trigger_time_offset: 0.0,
            memory_depth: 4_000,
            chunk_bytes: 4_000,
            not_ready_polls: 2,
            tone_freq_hz: 1_000.0,
            pending: None,
            transfer: None,
            captures: 0,
        }
    }

    /// Включённые каналы по маске CH1..CH4.
    pub fn with_enabled(
        mut self,
        enabled: [bool; MAX_CHANNELS],
    ) -> Self {
        for (ch, on) in self.channels.iter_mut().zip(enabled) {
            ch.enabled = on;
        }
        self
    }

    /// Завершённых передач.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    /// Сырое значение канала в момент `t`.
    fn waveform(
        &self,
        channel: usize,
        t: f64,
    ) -> i8 {
        let amplitude = 3.0 * VERTICAL_GRID_DIVISIONS;
        let phase = (t * self.tone_freq_hz).fract();

        let v = match channel {
            0 => (2.0 * PI * phase).sin(),
            1 => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            2 => 1.0 - 4.0 * (phase - 0.5).abs(),
            _ => 2.0 * phase - 1.0,
        };

        (v * amplitude).round().clamp(-128.0, 127.0) as i8
    }

    fn start_transfer(&mut self) -> DsoResult<SimTransfer> {
        let enabled: Vec<usize> = (0..MAX_CHANNELS)
            .filter(|&i| self.channels[i].enabled)
            .collect();

        let rounds = self.memory_depth.div_ceil(BLOCK_SAMPLES).max(1);
        let mut buffer = Vec::with_capacity(rounds * BLOCK_SAMPLES * enabled.len());

        // каждый захват сдвинут по времени, чтобы кадры отличались
        let t0 = self.captures as f64 * 0.37 / self.tone_freq_hz;

        for round in 0..rounds {
            for &ch in &enabled {
                for i in 0..BLOCK_SAMPLES {
                    let n = round * BLOCK_SAMPLES + i;
                    let t = t0 + n as f64 / self.sampling_rate;
                    buffer.push(self.waveform(ch, t) as u8);
                }
            }
        }

        let mut channel_enabled = [false; MAX_CHANNELS];
        for (dst, ch) in channel_enabled.iter_mut().zip(&self.channels) {
            *dst = ch.enabled;
        }

        let metadata = Metadata {
            running_flag: b'1',
            trigger_flag: b'1',
            channel_enabled,
            sampling_rate: self.sampling_rate,
            trigger_time_offset: self.trigger_time_offset,
            ..Metadata::default()
        }
        .encode()?;

        debug!(
            "Simulated capture #{}: {} bytes, channels {:?}",
            self.captures,
            buffer.len(),
            enabled
        );

        Ok(SimTransfer {
            buffer,
            metadata,
            sent: 0,
            not_ready_left: self.not_ready_polls,
        })
    }

    fn next_packet(&mut self) -> DsoResult<Vec<u8>> {
        let mut transfer = match self.transfer.take() {
            Some(t) => t,
            None => self.start_transfer()?,
        };

        if transfer.not_ready_left > 0 {
            transfer.not_ready_left -= 1;
            let metadata = transfer.metadata;
            self.transfer = Some(transfer);
            return encode_packet(&PacketHeader::new(0, 0, 0), &metadata, &[]);
        }

        let total = transfer.buffer.len();
        let end = (transfer.sent + self.chunk_bytes.max(1)).min(total);
        let header = PacketHeader::new(end - transfer.sent, total, transfer.sent);
        let frame = encode_packet(
            &header,
            &transfer.metadata,
            &transfer.buffer[transfer.sent..end],
        )?;

        transfer.sent = end;
        if transfer.sent < total {
            self.transfer = Some(transfer);
        } else {
            self.captures += 1;
        }

        Ok(frame)
    }

    fn answer(
        &self,
        command: &str,
    ) -> DsoResult<String> {
        if command == IDN_QUERY {
            return Ok("Hantek,DSO2D10,SIM-0001,1.0.0".to_string());
        }

        let (channel, query) = command
            .strip_prefix(":CHANnel")
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(|| DsoError::transport(format!("no reply to {command:?}")))?;

        let ch = channel
            .parse::<usize>()
            .ok()
            .filter(|c| (1..=MAX_CHANNELS).contains(c))
            .ok_or_else(|| DsoError::transport(format!("no such channel in {command:?}")))?;
        let settings = &self.channels[ch - 1];

        match query {
            "SCALe?" => Ok(format!("{:e}", settings.scale)),
            "OFFSet?" => Ok(format!("{:e}", settings.offset)),
            _ => Err(DsoError::transport(format!("no reply to {command:?}"))),
        }
    }
}

impl Default for SimulatedScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedScope {
    fn send(
        &mut self,
        command: &str,
    ) -> DsoResult<()> {
        self.pending = Some(command.trim().to_string());
        Ok(())
    }

    fn receive_frame(&mut self) -> DsoResult<Vec<u8>> {
        let command = self
            .pending
            .take()
            .ok_or_else(|| DsoError::transport("read without a pending command"))?;

        if command == DATA_QUERY {
            return self.next_packet();
        }

        self.answer(&command).map(|mut reply| {
            reply.push('\n');
            reply.into_bytes()
        })
    }
}

/// Сколько таймаутов чтения ждать хвост ответа, брошенного после таймаута.
const RESYNC_ATTEMPTS: u32 = 4;

/// Таймаут чтения при сбросе непонятного остатка в сокете.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(20);

/// SCPI поверх TCP. Бинарный кадр `#9…` читается по заявленной длине,
/// текстовый ответ — до `\n`.
///
/// Ответ, прерванный таймаутом, запоминается и перед следующей командой
/// дочитывается и выбрасывается, чтобы новый ответ не начался с середины
/// старого кадра.
pub struct TcpScope {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    io_timeout: Duration,
    /// Начало недочитанного ответа (пустой — длина остатка неизвестна)
    stale: Option<Vec<u8>>,
}

impl TcpScope {
    pub fn connect(
        address: &str,
        io_timeout: Duration,
    ) -> DsoResult<Self> {
        let addr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| DsoError::transport(format!("cannot resolve {address}")))?;

        let stream = TcpStream::connect_timeout(&addr, io_timeout)?;
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;
        stream.set_nodelay(true)?;

        info!("Connected to {addr}");

        Ok(Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
            io_timeout,
            stale: None,
        })
    }

    fn io_error(
        &self,
        e: std::io::Error,
    ) -> DsoError {
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => DsoError::Timeout {
                attempts: 0,
                elapsed_ms: self.io_timeout.as_millis() as u64,
            },
            _ => DsoError::Io(e),
        }
    }

    /// Дочитывает `buf` до `len` байт. При ошибке прочитанное остаётся в `buf`.
    fn fill_to(
        &mut self,
        buf: &mut Vec<u8>,
        len: usize,
    ) -> DsoResult<()> {
        if buf.len() < len {
            let want = (len - buf.len()) as u64;
            let res = self.reader.by_ref().take(want).read_to_end(buf);
            res.map_err(|e| self.io_error(e))?;
        }

        if buf.len() < len {
            return Err(DsoError::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                "connection closed mid-response",
            )));
        }

        Ok(())
    }

    /// Читает один ответ, продолжая с уже прочитанного начала `buf`.
    /// Ведущие `\r\n` (хвост предыдущего ответа) пропускаются.
    fn read_response(
        &mut self,
        buf: &mut Vec<u8>,
    ) -> DsoResult<()> {
        while buf.is_empty() {
            let mut b = [0u8; 1];
            let res = self.reader.read_exact(&mut b);
            res.map_err(|e| self.io_error(e))?;

            if !matches!(b[0], b'\r' | b'\n') {
                buf.push(b[0]);
            }
        }

        if buf[0] == b'#' {
            self.fill_to(buf, METADATA_OFFSET)?;
            let header = parse_packet_header(buf)?;
            self.fill_to(buf, PAYLOAD_OFFSET + header.chunk_length)?;
        } else if buf.last() != Some(&b'\n') {
            let res = self.reader.read_until(b'\n', buf);
            res.map_err(|e| self.io_error(e))?;
        }

        Ok(())
    }

    /// Выбрасывает всё, что уже лежит в буфере и сокете.
    fn drain(&mut self) -> DsoResult<usize> {
        let mut dropped = self.reader.buffer().len();
        self.reader.consume(dropped);

        self.reader.get_ref().set_read_timeout(Some(DRAIN_TIMEOUT))?;
        let mut scratch = [0u8; 4096];
        let result = loop {
            match self.reader.get_mut().read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => dropped += n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    break Ok(())
                }
                Err(e) => break Err(e),
            }
        };
        self.reader.get_ref().set_read_timeout(Some(self.io_timeout))?;

        result?;
        Ok(dropped)
    }

    /// Приводит сокет к границе ответа после прерванного чтения.
    fn resync(&mut self) -> DsoResult<()> {
        let Some(mut partial) = self.stale.take() else {
            return Ok(());
        };

        if partial.is_empty() {
            let dropped = self.drain()?;
            debug!("Resync: drained {dropped} stray bytes");
            return Ok(());
        }

        for _ in 0..RESYNC_ATTEMPTS {
            match self.read_response(&mut partial) {
                Ok(()) => {
                    debug!("Resync: discarded late response of {} bytes", partial.len());
                    return Ok(());
                }
                Err(DsoError::Timeout { .. }) => continue,
                Err(DsoError::Io(e)) => return Err(DsoError::Io(e)),
                Err(_) => break,
            }
        }

        // Граница ответа потеряна: сбрасываем всё, что есть
        let dropped = self.drain()?;
        warn!(
            "Resync: late response never completed, drained {} bytes",
            partial.len() + dropped
        );
        Ok(())
    }
}

impl Transport for TcpScope {
    fn send(
        &mut self,
        command: &str,
    ) -> DsoResult<()> {
        self.resync()?;

        let mut line = command.trim_end().as_bytes().to_vec();
        line.push(b'\n');

        self.writer
            .write_all(&line)
            .and_then(|_| self.writer.flush())
            .map_err(|e| self.io_error(e))
    }

    fn receive_frame(&mut self) -> DsoResult<Vec<u8>> {
        let mut buf = Vec::new();

        match self.read_response(&mut buf) {
            Ok(()) => Ok(buf),
            Err(e) => {
                // После таймаута длина остатка известна по началу ответа,
                // после прочих ошибок — нет
                self.stale = Some(match e {
                    DsoError::Timeout { .. } => buf,
                    _ => Vec::new(),
                });
                Err(e)
            }
        }
    }
}

/// Создаёт транспорт по конфигурации.
pub fn create_transport(config: &CaptureConfig) -> CaptureResult<Box<dyn Transport>> {
    match config.transport {
        TransportKind::Simulated => Ok(Box::new(SimulatedScope::new())),
        TransportKind::Tcp => TcpScope::connect(&config.address, config.io_timeout)
            .map(|t| Box::new(t) as Box<dyn Transport>)
            .map_err(|e| CaptureError::TransportUnavailable(format!("{}: {e}", config.address))),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
