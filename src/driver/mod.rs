//! Drivers: the interactive prompt loop and fixture replay
//!
//! Both take any `LanguageSession`, so they are tested against a mock.

pub mod interactive;
pub mod replay;

use crate::fixture::FixtureError;
use crate::session::SessionError;

/// Errors that end a driver run
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Fixture(#[from] FixtureError),

    #[error("console I/O failed: {0}")]
    Console(#[from] std::io::Error),
}
