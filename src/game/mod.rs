pub mod avatar;
pub mod constants;
pub mod performance;
pub mod pool;
pub mod repository;
pub mod thread_guard;
pub mod zone;
