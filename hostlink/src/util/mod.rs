pub mod process;
pub mod retry;
pub mod shell;
