pub mod chat;
pub mod objects;
