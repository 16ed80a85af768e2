pub mod classify;
pub mod clone;
pub mod init;
pub mod query;
pub mod status;
