pub mod discovery;
pub mod error;
pub mod mac;
pub mod socket;
