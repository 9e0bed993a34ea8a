use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

use dso_core::TransferStats;

/// Счётчики сессии захвата, обновляются lock-free из обоих потоков.
#[derive(Debug, Default)]
pub struct CaptureMetrics {
    pub transfers_completed: AtomicU64,
    pub transfers_failed: AtomicU64,
    pub channel_errors: AtomicU64,
    pub packets_received: AtomicU64,
    pub empty_polls: AtomicU64,
    pub bytes_received: AtomicU64,
    pub frames_dropped: AtomicU64,
}

/// Snapshot метрик для отображения / тестирования.
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub channel_errors: u64,
    pub packets_received: u64,
    pub empty_polls: u64,
    pub bytes_received: u64,
    pub frames_dropped: u64,
    pub frame_rate_hz: f64,
    pub read_speed_mbps: f64,
    pub drop_rate_pct: f64,
}

impl CaptureMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Учитывает одну собранную передачу.
    pub fn record_transfer(
        &self,
        stats: &TransferStats,
    ) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
        self.packets_received
            .fetch_add(stats.packets, Ordering::Relaxed);
        self.empty_polls
            .fetch_add(stats.empty_polls, Ordering::Relaxed);
        self.bytes_received
            .fetch_add(stats.payload_bytes, Ordering::Relaxed);
    }

    /// Собранных передач в секунду.
    pub fn frame_rate_hz(
        &self,
        elapsed: &Instant,
    ) -> f64 {
        let secs = elapsed.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.transfers_completed.load(Ordering::Relaxed) as f64 / secs
    }

    /// Скорость чтения полезной нагрузки в МБ/с.
    pub fn read_speed_mbps(
        &self,
        elapsed: &Instant,
    ) -> f64 {
        let secs = elapsed.elapsed().as_secs_f64();

        if secs < 1e-9 {
            return 0.0;
        }

        self.bytes_received.load(Ordering::Relaxed) as f64 / secs / 1_000_000.0
    }

    /// Процент кадров, не принятых потребителем (0.0-100.0).
    pub fn drop_rate_pct(&self) -> f64 {
        let completed = self.transfers_completed.load(Ordering::Relaxed);
        let dropped = self.frames_dropped.load(Ordering::Relaxed);

        if completed == 0 {
            0.0
        } else {
            dropped as f64 / completed as f64 * 100.0
        }
    }

    /// Итоговая сводка для вывода в конце сессии.
    pub fn summary(
        &self,
        elapsed: &Instant,
    ) -> MetricsSummary {
        MetricsSummary {
            duration_secs: elapsed.elapsed().as_secs_f64(),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            channel_errors: self.channel_errors.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frame_rate_hz: self.frame_rate_hz(elapsed),
            read_speed_mbps: self.read_speed_mbps(elapsed),
            drop_rate_pct: self.drop_rate_pct(),
        }
    }
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(f, "  Duration      : {:.1}s", self.duration_secs)?;
        writeln!(
            f,
            "  Transfers     : {} ok, {} failed",
            self.transfers_completed, self.transfers_failed
        )?;
        writeln!(f, "  Channel errors: {}", self.channel_errors)?;
        writeln!(
            f,
            "  Packets       : {} ({} empty polls)",
            self.packets_received, self.empty_polls
        )?;
        writeln!(
            f,
            "  Dropped       : {} ({:.2}%)",
            self.frames_dropped, self.drop_rate_pct
        )?;
        writeln!(
            f,
            "  Bytes read    : {:.2} MB",
            self.bytes_received as f64 / 1e6
        )?;
        writeln!(f, "  Frame rate    : {:.2} Hz", self.frame_rate_hz)?;
        writeln!(f, "  Read speed    : {:.2} MB/s", self.read_speed_mbps)?;
        write!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
