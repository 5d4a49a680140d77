pub mod agent;
pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod drain;
pub mod export;
pub mod guard;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod topic;
