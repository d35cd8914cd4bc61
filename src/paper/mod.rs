pub mod book;
pub mod position;
pub mod session;
pub mod tracker;
