pub mod error;
pub mod metadata;
pub mod packet;
pub mod waveform;

pub use error::*;
pub use metadata::*;
pub use packet::*;
pub use waveform::*;
