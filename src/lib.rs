pub mod common;
pub mod server;
pub mod storage;
pub mod transfer;
pub mod utils;
