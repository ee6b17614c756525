pub mod config;
pub mod core;
pub mod drafts;
pub mod evaluations;
pub mod export;
pub mod responses;
pub mod wizard;
