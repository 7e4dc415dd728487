pub mod pixel;
pub mod stream;
pub mod transfer;
pub mod utils;
