pub mod agent;
pub mod documents;
pub mod memory;
pub mod models;
pub mod prompts;
pub mod responses;
pub mod server;
pub mod session;
pub mod settings;
pub mod storage;
