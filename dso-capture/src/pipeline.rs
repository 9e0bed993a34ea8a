use std::{
    sync::{atomic::Ordering, Arc},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{RecvTimeoutError, TrySendError};
use dso_core::{fetch_channels, Acquisition, CancelToken, FetchOptions, Transport};
use dso_types::DsoError;
use log::{debug, info, warn};

use crate::{metrics::CaptureMetrics, CaptureConfig, CaptureError, CaptureResult};

/// Один декодированный кадр непрерывного захвата.
#[derive(Debug)]
pub struct CaptureFrame {
    /// Номер кадра с начала сессии (включая отброшенные)
    pub sequence: u64,
    pub acquisition: Acquisition,
}

/// Оркестрирует сессию захвата.
pub struct CapturePipeline {
    config: CaptureConfig,
    metrics: Arc<CaptureMetrics>,
    cancel: CancelToken,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl CapturePipeline {
    /// Создаёт пайплайн. Возвращает также shared-ссылку на метрики.
    pub fn new(config: CaptureConfig) -> (Self, Arc<CaptureMetrics>) {
        let metrics = CaptureMetrics::new();
        let p = Self {
            config,
            metrics: metrics.clone(),
            cancel: CancelToken::new(),
        };

        (p, metrics)
    }

    /// Токен отмены. Прерывает текущую передачу и останавливает захват.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Одна передача со всеми каналами из конфигурации.
    pub fn capture_once<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
    ) -> CaptureResult<Acquisition> {
        capture(transport, &self.config, &self.metrics, &self.cancel)
    }

    /// Запускает захват. Блокируется до завершения и возвращает число
    /// кадров, переданных в `on_frame`.
    ///
    /// Без `continuous` делается ровно одна передача. В непрерывном режиме
    /// передачи читаются в отдельном потоке, а `on_frame` вызывается в
    /// текущем; если потребитель не успевает, новые кадры отбрасываются.
    /// Отмена в обоих режимах не ошибка: возвращается число уже переданных
    /// кадров. Непрерывный захват повторяет только временные сбои
    /// (таймаут, транспорт), ошибка формата останавливает его сразу.
    pub fn run(
        self,
        mut transport: Box<dyn Transport>,
        mut on_frame: impl FnMut(&CaptureFrame),
    ) -> CaptureResult<u64> {
        info!(
            "Starting capture: transport={}, channels={:?}, continuous={}",
            self.config.transport, self.config.channels, self.config.continuous
        );

        if !self.config.continuous {
            let acquisition = match self.capture_once(transport.as_mut()) {
                Ok(acquisition) => acquisition,
                Err(CaptureError::Dso(DsoError::Cancelled)) => {
                    info!("Capture cancelled before the transfer completed");
                    return Ok(0);
                }
                Err(e) => return Err(e),
            };
            on_frame(&CaptureFrame {
                sequence: 0,
                acquisition,
            });
            return Ok(1);
        }

        let (tx, rx) = crossbeam_channel::bounded::<CaptureFrame>(self.config.ring_capacity);
        let config = self.config.clone();
        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();

        // Поток захвата
        let capture_handle = thread::spawn(move || {
            let result = capture_loop(transport.as_mut(), &config, &metrics, &cancel, tx);

            if let Err(ref e) = result {
                warn!("Capture thread error: {e}");
            }

            result
        });

        // Потребитель (текущий поток)
        let delivered = self.consumer_loop(rx, &mut on_frame);

        match capture_handle.join() {
            Ok(Ok(())) => Ok(delivered),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Pipeline(
                "capture thread panicked".to_string(),
            )),
        }
    }

    fn consumer_loop(
        &self,
        rx: crossbeam_channel::Receiver<CaptureFrame>,
        on_frame: &mut impl FnMut(&CaptureFrame),
    ) -> u64 {
        let recv_timeout = Duration::from_millis(100);
        let stats_interval = Duration::from_secs(self.config.stats_interval_secs);

        let session_start = Instant::now();
        let mut last_stats = Instant::now();
        let mut delivered = 0u64;

        loop {
            // Поток захвата закрывает канал при остановке, оставшиеся кадры
            // дочитываются
            match rx.recv_timeout(recv_timeout) {
                Ok(frame) => {
                    on_frame(&frame);
                    delivered += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("Capture channel closed ({delivered} frames delivered)");
                    break;
                }
            }

            if last_stats.elapsed() >= stats_interval {
                self.log_progress(&session_start);
                last_stats = Instant::now();
            }
        }

        delivered
    }

    fn log_progress(
        &self,
        start: &Instant,
    ) {
        let m = &self.metrics;

        info!(
            "[ {:.0}s ] transfers={} failed={} dropped={} ({:.2}%) rate={:.2}Hz speed={:.2}MB/s",
            start.elapsed().as_secs_f64(),
            m.transfers_completed.load(Ordering::Relaxed),
            m.transfers_failed.load(Ordering::Relaxed),
            m.frames_dropped.load(Ordering::Relaxed),
            m.drop_rate_pct(),
            m.frame_rate_hz(start),
            m.read_speed_mbps(start),
        );
    }
}

fn capture<T: Transport + ?Sized>(
    transport: &mut T,
    config: &CaptureConfig,
    metrics: &CaptureMetrics,
    cancel: &CancelToken,
) -> CaptureResult<Acquisition> {
    let options = FetchOptions {
        policy: config.retry,
        cancel: Some(cancel.clone()),
    };

    let progress = |received: usize, total: usize| debug!("Received {received}/{total} bytes");

    match fetch_channels(transport, &config.channels, &options, progress) {
        Ok(acquisition) => {
            metrics.record_transfer(&acquisition.stats);
            metrics
                .channel_errors
                .fetch_add(acquisition.failed_count() as u64, Ordering::Relaxed);
            Ok(acquisition)
        }
        Err(DsoError::Cancelled) => Err(DsoError::Cancelled.into()),
        Err(e) => {
            metrics.transfers_failed.fetch_add(1, Ordering::Relaxed);
            Err(e.into())
        }
    }
}

fn capture_loop(
    transport: &mut dyn Transport,
    config: &CaptureConfig,
    metrics: &CaptureMetrics,
    cancel: &CancelToken,
    tx: crossbeam_channel::Sender<CaptureFrame>,
) -> CaptureResult<()> {
    let mut sequence = 0u64;
    let mut failures = 0u32;

    loop {
        if cancel.is_cancelled() {
            info!("Stop signal received after {sequence} frames");
            return Ok(());
        }

        if config.max_frames.is_some_and(|max| sequence >= max) {
            info!("Frame limit reached ({sequence})");
            return Ok(());
        }

        match capture(transport, config, metrics, cancel) {
            Ok(acquisition) => {
                failures = 0;
                let frame = CaptureFrame {
                    sequence,
                    acquisition,
                };
                sequence += 1;

                match tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        metrics.frames_dropped.fetch_add(1, Ordering::Relaxed);
                        debug!("Consumer is behind, frame #{} dropped", frame.sequence);
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        return Err(CaptureError::Pipeline(
                            "frame consumer disconnected".to_string(),
                        ));
                    }
                }
            }
            Err(CaptureError::Dso(DsoError::Cancelled)) => {
                info!("Transfer cancelled after {sequence} frames");
                return Ok(());
            }
            Err(CaptureError::Dso(e)) if !e.is_transient() => {
                // Повтор не поможет: прибор отвечает не в том формате
                warn!("Transfer failed with a non-recoverable error: {e}");
                return Err(CaptureError::Dso(e));
            }
            Err(e) => {
                failures += 1;
                warn!(
                    "Transfer failed ({failures}/{}): {e}",
                    config.max_consecutive_failures
                );

                if failures >= config.max_consecutive_failures {
                    return Err(CaptureError::TooManyFailures(failures));
                }
            }
        }

        if !config.cycle_interval.is_zero() {
            thread::sleep(config.cycle_interval);
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
