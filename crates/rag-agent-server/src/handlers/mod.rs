pub mod agent;
pub mod health;
