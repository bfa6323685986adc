#[path = "../support/mod.rs"]
mod support;

mod catch_up;
mod runner;
