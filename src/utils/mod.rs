pub mod bootstrap;
pub mod retry;
