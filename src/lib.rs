// PhotonDB - Value storage core
// Compacting data store with generation-based reclamation and a
// reference-counted unique store on top of it.

#![warn(rust_2018_idioms)]

pub mod accel;
pub mod config;
pub mod datastore;
pub mod hw_info;
pub mod metrics;
pub mod unique_store;

// Re-exports for convenience
pub use config::StoreConfig;
pub use datastore::{DataStore, EntryRef, GenerationGuard, GenerationHandler};
pub use unique_store::{UniqueStore, UniqueStoreValue};

/// Data store error types
pub mod error {
    use thiserror::Error;

    /// How a caller is expected to react to an [`Error`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Severity {
        /// Report to the immediate caller; the store is still consistent
        Recoverable,
        /// The store or its configuration is structurally broken; restart
        Fatal,
    }

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Capacity exhausted: {0}")]
        CapacityExhausted(String),

        #[error("Invalid reference: {0}")]
        InvalidRef(String),

        #[error("Type mismatch: {0}")]
        TypeMismatch(String),

        #[error("Invalid argument: {0}")]
        InvalidArgument(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Internal error: {0}")]
        Internal(String),
    }

    impl Error {
        pub fn severity(&self) -> Severity {
            match self {
                Error::InvalidRef(_) | Error::InvalidArgument(_) => Severity::Recoverable,
                Error::CapacityExhausted(_)
                | Error::TypeMismatch(_)
                | Error::Config(_)
                | Error::Internal(_) => Severity::Fatal,
            }
        }

        pub fn is_fatal(&self) -> bool {
            self.severity() == Severity::Fatal
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
