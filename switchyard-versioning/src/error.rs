use switchyard_abci::AppVersion;
use thiserror::Error;

/// registry result
pub type RegistryResult<T, E = RegistryError> = core::result::Result<T, E>;

/// Registry error
#[allow(missing_docs)]
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Version {0} is registered more than once")]
    DuplicateVersion(AppVersion),
    #[error("Unknown version {requested}, registered versions: {registered:?}")]
    UnknownVersion {
        requested: AppVersion,
        registered: Vec<AppVersion>,
    },
    #[error("Version {0} runs as a separate binary, it cannot be activated in-process")]
    NotInProcess(AppVersion),
    #[error("Version {0} is activated in-process, it has no binary")]
    NotABinary(AppVersion),
    #[error("No version registered")]
    Empty,
}
