pub mod denoise;
pub mod filter;
pub mod stft;
