/// Сырые выборки одного канала (знаковые 8 бит).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSampleSet {
    pub samples: Vec<i8>,
}

/// Откалиброванная осциллограмма: время (с) и напряжение (В) одинаковой длины.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WaveformRecord {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
}

impl ChannelSampleSet {
    pub fn new(samples: Vec<i8>) -> Self {
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl WaveformRecord {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Пары (время, напряжение).
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.time.iter().copied().zip(self.voltage.iter().copied())
    }

    /// Минимум и максимум напряжения, `None` для пустой записи.
    pub fn voltage_range(&self) -> Option<(f64, f64)> {
        let mut it = self.voltage.iter().copied();
        let first = it.next()?;

        Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Интервал времени от первой до последней точки.
    pub fn time_span(&self) -> Option<(f64, f64)> {
        Some((*self.time.first()?, *self.time.last()?))
    }
}
