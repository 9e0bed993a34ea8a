use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use dso_core::Acquisition;
use log::info;

use crate::CaptureResult;

/// Пишет декодированные каналы в CSV.
///
/// Строки `#` в начале — описание захвата, затем пара столбцов
/// `Time_CHn[s]`, `Volt_CHn[V]` на каждый успешно декодированный канал.
/// Каналы разной длины дополняются пустыми ячейками.
pub fn write_csv<W: Write>(
    mut w: W,
    instrument: &str,
    acquisition: &Acquisition,
) -> std::io::Result<()> {
    let captured = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let meta = &acquisition.metadata;

    writeln!(w, "# Hantek DSO2000 Data Export")?;
    writeln!(w, "# Instrument: {instrument}")?;
    writeln!(w, "# Captured (unix): {captured}")?;
    writeln!(w, "# Sampling rate: {} Sa/s", meta.sampling_rate)?;
    writeln!(w, "# Trigger offset: {} s", meta.trigger_time_offset)?;
    writeln!(w)?;

    let records: Vec<_> = acquisition.successful().collect();

    let header: Vec<String> = records
        .iter()
        .flat_map(|(ch, _)| [format!("Time_CH{ch}[s]"), format!("Volt_CH{ch}[V]")])
        .collect();
    writeln!(w, "{}", header.join(","))?;

    let rows = records.iter().map(|(_, r)| r.len()).max().unwrap_or(0);

    for i in 0..rows {
        let cells: Vec<String> = records
            .iter()
            .flat_map(|(_, r)| match (r.time.get(i), r.voltage.get(i)) {
                (Some(t), Some(v)) => [t.to_string(), v.to_string()],
                _ => [String::new(), String::new()],
            })
            .collect();
        writeln!(w, "{}", cells.join(","))?;
    }

    w.flush()
}

/// Сохраняет кадр в файл (перезаписывает).
pub fn save_csv(
    path: &Path,
    instrument: &str,
    acquisition: &Acquisition,
) -> CaptureResult<()> {
    let file = File::create(path)?;
    write_csv(BufWriter::new(file), instrument, acquisition)?;

    info!("Saved {} channels to {path:?}", acquisition.successful().count());
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use dso_core::{ChannelWaveform, TransferStats};
    use dso_types::{DsoError, Metadata, WaveformRecord};
    use tempfile::NamedTempFile;

    use super::*;

    fn acquisition() -> Acquisition {
        Acquisition {
            metadata: Metadata {
                sampling_rate: 1e6,
                ..Metadata::default()
            },
            stats: TransferStats::default(),
            channels: vec![
                ChannelWaveform {
                    channel: 1,
                    result: Ok(WaveformRecord {
                        time: vec![0.0, 1e-6, 2e-6],
                        voltage: vec![0.5, 1.0, -0.5],
                    }),
                },
                ChannelWaveform {
                    channel: 2,
                    result: Ok(WaveformRecord {
                        time: vec![0.0],
                        voltage: vec![2.0],
                    }),
                },
                ChannelWaveform {
                    channel: 3,
                    result: Err(DsoError::ChannelDisabled(3)),
                },
            ],
        }
    }

    #[test]
    fn test_write_csv_layout() {
        let mut out = Vec::new();
        write_csv(&mut out, "Hantek,DSO2D10", &acquisition()).unwrap();
        let text = String::from_utf8(out).unwrap();

        let data: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();

        assert!(text.contains("# Instrument: Hantek,DSO2D10"));
        assert_eq!(data[0], "");
        assert_eq!(data[1], "Time_CH1[s],Volt_CH1[V],Time_CH2[s],Volt_CH2[V]");
        assert_eq!(data[2], "0,0.5,0,2");
        assert_eq!(data[3], "0.000001,1,,");
        assert_eq!(data.len(), 5);
    }

    #[test]
    fn test_save_csv_to_file() {
        let tmp = NamedTempFile::new().unwrap();

        save_csv(tmp.path(), "SIM", &acquisition()).unwrap();

        let text = std::fs::read_to_string(tmp.path()).unwrap();
        assert!(text.starts_with("# Hantek DSO2000 Data Export"));
        assert!(text.contains("-0.5"));
    }
}
