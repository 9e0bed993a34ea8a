use std::{path::PathBuf, sync::atomic::Ordering, time::Instant};

use clap::Parser;
use dso_capture::{
    create_transport, parse_channels, parse_duration, save_csv, CaptureConfig, CaptureFrame,
    CapturePipeline, TransportKind,
};
use dso_core::{identify, RetryPolicy};
use log::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "dso-capture",
    version = env!("CARGO_PKG_VERSION"),
    about = "Read and decode waveforms from a DSO2000-series oscilloscope",
    long_about = None,
)]
struct Cli {
    /// Транспорт: sim, tcp
    #[arg(short, long, default_value = "sim")]
    transport: String,
    /// Адрес прибора для tcp (host:port)
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    address: String,
    /// Каналы: 1,2 или all
    #[arg(short, long, default_value = "1,2")]
    channels: String,
    /// Непрерывный захват до Ctrl+C
    #[arg(long)]
    continuous: bool,
    /// Ограничение по числу кадров (только с --continuous)
    #[arg(short = 'n', long)]
    frames: Option<u64>,
    /// Пауза между кадрами (100ms, 1s)
    #[arg(long, default_value = "100ms")]
    interval: String,
    /// Таймаут чтения/записи сокета
    #[arg(long, default_value = "5s")]
    timeout: String,
    /// Время без новых данных до ошибки
    #[arg(long, default_value = "5s")]
    stall_timeout: String,
    /// Пустых ответов подряд до ошибки
    #[arg(long, default_value = "500")]
    max_empty_polls: u32,
    /// Пауза после пустого ответа
    #[arg(long, default_value = "10ms")]
    poll_delay: String,
    /// CSV-файл для сохранения кадра (в непрерывном режиме — последнего)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Ёмкость очереди кадров
    #[arg(long, default_value = "8")]
    ring_capacity: usize,
    /// Интервал вывода статистики (секунды)
    #[arg(long, default_value = "5")]
    stats_interval: u64,
    /// Тихий режим (только ошибки)
    #[arg(short, long)]
    quiet: bool,
}

fn exit_on_err<T>(
    flag: &str,
    r: Result<T, String>,
) -> T {
    r.unwrap_or_else(|e| {
        error!("{flag}: {e}");
        std::process::exit(1);
    })
}

fn print_frame(frame: &CaptureFrame) {
    let acq = &frame.acquisition;

    info!(
        "Frame #{}: {:.3} Msps, trigger offset {:.3e} s, {}",
        frame.sequence,
        acq.metadata.sampling_rate / 1e6,
        acq.metadata.trigger_time_offset,
        if acq.metadata.is_triggered() {
            "triggered"
        } else {
            "not triggered"
        }
    );

    for (channel, record) in acq.successful() {
        let (vmin, vmax) = record.voltage_range().unwrap_or((0.0, 0.0));
        let (t0, t1) = record.time_span().unwrap_or((0.0, 0.0));

        info!(
            "  CH{channel}: {} points, {vmin:.3} V .. {vmax:.3} V, t = {t0:.3e} .. {t1:.3e} s",
            record.len()
        );
    }

    for failed in acq.channels.iter().filter(|c| c.result.is_err()) {
        if let Err(e) = &failed.result {
            warn!("  CH{}: {e}", failed.channel);
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.quiet { "error" } else { "info" };

    env_logger::Builder::new()
        .filter_level(level.parse().unwrap_or(log::LevelFilter::Info))
        .format_target(false)
        .format_timestamp_secs()
        .init();

    let transport_kind: TransportKind = exit_on_err("--transport", cli.transport.parse());
    let channels = exit_on_err("--channels", parse_channels(&cli.channels));
    let cycle_interval = exit_on_err("--interval", parse_duration(&cli.interval));
    let io_timeout = exit_on_err("--timeout", parse_duration(&cli.timeout));
    let stall_timeout = exit_on_err("--stall-timeout", parse_duration(&cli.stall_timeout));
    let poll_delay = exit_on_err("--poll-delay", parse_duration(&cli.poll_delay));

    if cli.frames.is_some() && !cli.continuous {
        warn!("--frames has no effect without --continuous");
    }

    let config = CaptureConfig {
        transport: transport_kind,
        address: cli.address.clone(),
        channels,
        io_timeout,
        retry: RetryPolicy {
            max_empty_polls: cli.max_empty_polls,
            stall_timeout,
            poll_delay,
        },
        continuous: cli.continuous,
        max_frames: cli.frames,
        cycle_interval,
        ring_capacity: cli.ring_capacity.max(1),
        stats_interval_secs: cli.stats_interval,
        ..CaptureConfig::default()
    };

    let mut transport = match create_transport(&config) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to open transport: {e}");
            std::process::exit(1);
        }
    };

    let idn = match identify(&mut transport) {
        Ok(idn) => idn,
        Err(e) => {
            error!("Instrument did not answer *IDN?: {e}");
            std::process::exit(1);
        }
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Instrument    : {idn}");
    info!("  Transport     : {} ({})", config.transport, config.address);
    info!("  Channels      : {:?}", config.channels);
    info!(
        "  Mode          : {}",
        if config.continuous {
            "continuous"
        } else {
            "single"
        }
    );
    info!(
        "  Retry         : {} empty polls / {:?} stall, {:?} delay",
        config.retry.max_empty_polls, config.retry.stall_timeout, config.retry.poll_delay
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let (pipeline, metrics) = CapturePipeline::new(config);
    let cancel = pipeline.cancel_token();

    if let Err(e) = ctrlc::set_handler(move || {
        if cancel.cancel() {
            // Второй Ctrl+C — принудительный выход
            warn!("Force exit");
            std::process::exit(130);
        }
        warn!("Ctrl+C received, stopping after the current transfer...");
    }) {
        warn!("Failed to set Ctrl+C handler: {e}");
    }

    let session_start = Instant::now();

    let on_frame = |frame: &CaptureFrame| {
        print_frame(frame);

        if let Some(path) = &cli.output {
            if let Err(e) = save_csv(path, &idn, &frame.acquisition) {
                warn!("Failed to save {path:?}: {e}");
            }
        }
    };

    let delivered = match pipeline.run(transport, on_frame) {
        Ok(n) => n,
        Err(e) => {
            error!("Capture failed: {e}");
            info!("\n{}", metrics.summary(&session_start));
            std::process::exit(1);
        }
    };

    // --- Итоговая статистика ---
    let summary = metrics.summary(&session_start);
    info!("\n{summary}");

    if metrics.frames_dropped.load(Ordering::Relaxed) > 0 {
        warn!(
            "⚠ {} frames dropped ({:.2}%). Consider: larger --ring-capacity or longer --interval",
            metrics.frames_dropped.load(Ordering::Relaxed),
            summary.drop_rate_pct
        );
    }

    if metrics.channel_errors.load(Ordering::Relaxed) > 0 {
        warn!(
            "⚠ {} channel decode errors. Check that the requested channels are enabled.",
            metrics.channel_errors.load(Ordering::Relaxed)
        );
    }

    info!("✓ Capture complete: {delivered} frames");
}
