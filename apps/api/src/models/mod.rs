pub mod call;
pub mod message;
pub mod read_receipt;
pub mod room;
pub mod user;
