pub mod common;
pub mod health;
pub mod submissions;
pub mod workers;
pub mod workflows;
