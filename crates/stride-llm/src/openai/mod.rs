pub mod client;

pub use client::{OpenAIGateway, OPENAI_API_BASE};
