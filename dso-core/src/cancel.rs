use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Токен отмены. Клоны разделяют одно состояние; проверяется один раз за
/// итерацию цикла чтения пакетов и один раз за цикл захвата.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Запрашивает отмену. Возвращает `true`, если отмена уже была запрошена.
    pub fn cancel(&self) -> bool {
        self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
