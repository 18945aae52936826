pub mod imaging;
pub mod logger;
pub mod pipeline;
pub mod stream;
