pub mod connectivity;
pub mod db;
pub mod docstore;
pub mod models;
pub mod progress;
pub mod remote;
pub mod stats;
pub mod sync;
