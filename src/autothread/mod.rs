pub mod audit;
pub mod config;
pub mod daemon_lock;
pub mod detector;
pub mod engine;
pub mod ledger;
pub mod paths;
pub mod state;
pub mod store;
pub mod title;
pub mod util;
pub mod warn;
