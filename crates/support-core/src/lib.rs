pub mod conversation;
pub mod dispatch;
pub mod error;
pub mod faq;
pub mod loan;
pub mod openai;
pub mod text;
pub mod ticket;
pub mod tools;
