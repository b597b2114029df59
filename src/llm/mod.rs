pub mod adapter;
pub mod adapters;
pub mod dispatch;
pub mod parser;
pub mod registry;
