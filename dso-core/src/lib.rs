//! Декодер блочной передачи осциллограмм DSO2000
//!
//! Сборка многопакетного ответа `PRIVate:WAVeform:DATA:ALL?` в один буфер,
//! разбор метаданных первого пакета, выделение канала из чередующихся блоков
//! и перевод сырых выборок в напряжение и время.
//!
//! # Быстрый старт
//!
//! ```no_run
//! use dso_core::{fetch_waveform, FetchOptions, ScriptedTransport};
//!
//! let mut transport = ScriptedTransport::new();
//! let record = fetch_waveform(&mut transport, 1, &FetchOptions::default(), |got, total| {
//!     println!("{got}/{total}");
//! })?;
//!
//! for (t, v) in record.points().take(5) {
//!     println!("{t:.9} s  {v:.3} V");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod calibration;
pub mod cancel;
pub mod demux;
pub mod format;
pub mod metadata;
pub mod pipeline;
pub mod reassembly;
pub mod transport;

pub use calibration::*;
pub use cancel::*;
pub use demux::*;
pub use format::*;
pub use metadata::*;
pub use pipeline::*;
pub use reassembly::*;
pub use transport::*;

/// Версия библиотеки.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        assert_eq!(VERTICAL_GRID_DIVISIONS, 25.0);
        assert_eq!(DATA_QUERY, "PRIVate:WAVeform:DATA:ALL?");
        assert_eq!(dso_types::PAYLOAD_OFFSET, 128);
    }
}
