pub mod chapter;
pub mod extract;
pub mod init;
pub mod listing;
pub mod status;
