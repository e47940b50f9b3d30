pub mod bundle;
pub mod config;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod link;
pub mod outbox;
pub mod pipeline;
pub mod quota;
pub mod resolver;
pub mod router;
pub mod spotdl;
