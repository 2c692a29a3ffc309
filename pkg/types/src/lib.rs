pub mod build;
pub mod config;
pub mod controller;
pub mod kind;
pub mod namespace;
pub mod pod;
pub mod quantity;
pub mod quota;
