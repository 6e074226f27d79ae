//! Plan description formats standing in for the SQL front end.

pub mod yaml;
