//! Command handlers
//!
//! Entry points a front end calls into. They serialize access to the
//! session controller and map failures to [`crate::utils::ErrorResponse`].

pub mod recording;
