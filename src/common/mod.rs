pub mod command_utils;
pub mod report;
pub mod retry;
