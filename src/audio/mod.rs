pub mod buffer;
pub mod decode;
pub mod spectrum;
pub mod wav;

pub use buffer::AudioBuffer;
