pub mod assistants;
pub mod health;
pub mod messages;
pub mod runs;
pub mod threads;
pub mod tools;
