pub mod mock;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use mock::MockBackend;

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;
