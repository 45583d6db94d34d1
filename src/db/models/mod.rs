//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod calendar;
pub mod connection;
pub mod provider;
pub mod share;

pub use self::calendar::*;
pub use self::connection::*;
pub use self::provider::*;
pub use self::share::*;
