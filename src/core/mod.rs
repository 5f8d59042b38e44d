pub mod agent;
pub mod config;
pub mod fsutil;
pub mod network;
pub mod notify;
pub mod page;
pub mod recovery;
pub mod remote;
pub mod subscription;
pub mod terminal;
