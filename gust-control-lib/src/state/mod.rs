pub mod listener;
pub mod payload;
pub mod status_word;
