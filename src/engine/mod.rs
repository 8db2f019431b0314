pub mod book;
pub mod close_stage;
pub mod controller;
pub mod datalog;
pub mod maker_leg;
pub mod position;
pub mod shutdown;
pub mod taker_leg;
pub mod threshold;
pub mod types;
