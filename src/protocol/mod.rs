pub mod ansi;
pub mod messages;
pub mod table;
pub mod transcript;
