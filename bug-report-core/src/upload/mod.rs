pub mod http;
pub mod manager;
pub mod retry;
