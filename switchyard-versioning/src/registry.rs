use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use switchyard_abci::{AppFactory, AppVersion};
use switchyard_supervisor::BinaryDescriptor;
use tracing::debug;

use crate::error::{RegistryError, RegistryResult};

/// How a registered version is brought to life
#[derive(Clone)]
pub enum Activator {
    /// built in-process by a factory
    Factory(Arc<dyn AppFactory>),
    /// run as a supervised child process
    Binary(BinaryDescriptor),
}

impl Activator {
    /// In-process activator from any factory
    pub fn factory(factory: impl AppFactory + 'static) -> Self {
        Activator::Factory(Arc::new(factory))
    }

    /// Whether this version runs inside the node process
    pub fn is_in_process(&self) -> bool {
        matches!(self, Activator::Factory(_))
    }
}

impl fmt::Debug for Activator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activator::Factory(_) => write!(f, "Factory"),
            Activator::Binary(descriptor) => f.debug_tuple("Binary").field(descriptor).finish(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Strategy to use when picking a version out of the registry
pub enum ActivationStrategy {
    /// the highest registered version
    Latest,
    /// this specific version
    Exact(AppVersion),
}

impl From<AppVersion> for ActivationStrategy {
    fn from(value: AppVersion) -> Self {
        ActivationStrategy::Exact(value)
    }
}

/// Immutable mapping from application version to activator
#[derive(Debug)]
pub struct VersionRegistry {
    entries: BTreeMap<AppVersion, Activator>,
    latest: AppVersion,
}

impl VersionRegistry {
    /// Build the registry. Each version may appear only once and at least one
    /// version is required.
    pub fn new(
        entries: impl IntoIterator<Item = (AppVersion, Activator)>,
    ) -> RegistryResult<Self> {
        let mut map = BTreeMap::new();
        for (version, activator) in entries {
            if map.insert(version, activator).is_some() {
                return Err(RegistryError::DuplicateVersion(version));
            }
        }
        let latest = *map.keys().next_back().ok_or(RegistryError::Empty)?;
        debug!("version registry built with versions {:?}", map.keys());
        Ok(VersionRegistry {
            entries: map,
            latest,
        })
    }

    /// Activator of `version`
    pub fn get(&self, version: AppVersion) -> RegistryResult<&Activator> {
        self.entries
            .get(&version)
            .ok_or_else(|| RegistryError::UnknownVersion {
                requested: version,
                registered: self.versions(),
            })
    }

    /// Factory of an in-process version
    pub fn factory(&self, version: AppVersion) -> RegistryResult<&Arc<dyn AppFactory>> {
        match self.get(version)? {
            Activator::Factory(factory) => Ok(factory),
            Activator::Binary(_) => Err(RegistryError::NotInProcess(version)),
        }
    }

    /// Binary of a version running as a child process
    pub fn binary(&self, version: AppVersion) -> RegistryResult<&BinaryDescriptor> {
        match self.get(version)? {
            Activator::Binary(descriptor) => Ok(descriptor),
            Activator::Factory(_) => Err(RegistryError::NotABinary(version)),
        }
    }

    /// Whether `version` is registered
    pub fn contains(&self, version: AppVersion) -> bool {
        self.entries.contains_key(&version)
    }

    /// Registered versions in increasing order
    pub fn versions(&self) -> Vec<AppVersion> {
        self.entries.keys().copied().collect()
    }

    /// Highest registered version
    pub fn latest(&self) -> AppVersion {
        self.latest
    }

    /// Registered versions run as binaries, in increasing order
    pub fn binaries(&self) -> impl Iterator<Item = (AppVersion, &BinaryDescriptor)> {
        self.entries
            .iter()
            .filter_map(|(version, activator)| match activator {
                Activator::Binary(descriptor) => Some((*version, descriptor)),
                Activator::Factory(_) => None,
            })
    }

    /// Version selected by `strategy`, which must be registered
    pub fn resolve(&self, strategy: ActivationStrategy) -> RegistryResult<AppVersion> {
        match strategy {
            ActivationStrategy::Latest => Ok(self.latest),
            ActivationStrategy::Exact(version) => {
                self.get(version)?;
                Ok(version)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use switchyard_abci::{
        AppError, AppResources, AppResult, Application, MemoryDb, MockApplication,
    };

    fn failing_factory() -> Activator {
        Activator::factory(|_: &AppResources| -> AppResult<Box<dyn Application>> {
            Err(AppError::CreationError("unavailable".to_string()))
        })
    }

    fn mock_factory() -> Activator {
        Activator::factory(|_: &AppResources| -> AppResult<Box<dyn Application>> {
            Ok(Box::new(MockApplication::new()))
        })
    }

    fn binary(name: &str) -> Activator {
        Activator::Binary(BinaryDescriptor::from_path(name, format!("/opt/{}/appd", name)))
    }

    #[test]
    fn test_registry_lookup() {
        let registry = VersionRegistry::new([
            (2, binary("v2")),
            (1, mock_factory()),
            (4, failing_factory()),
        ])
        .unwrap();

        assert_eq!(registry.versions(), vec![1, 2, 4]);
        assert_eq!(registry.latest(), 4);
        assert!(registry.contains(2));
        assert!(!registry.contains(3));
        assert!(registry.get(1).unwrap().is_in_process());
        assert!(!registry.get(2).unwrap().is_in_process());

        let resources = AppResources::new("/tmp", Arc::new(MemoryDb::new()));
        assert!(registry.factory(1).unwrap().create(&resources).is_ok());
        assert_matches!(
            registry.factory(4).unwrap().create(&resources).err(),
            Some(AppError::CreationError(_))
        );
        assert_eq!(registry.binary(2).unwrap().name, "v2");
        assert_eq!(
            registry.binaries().map(|(v, _)| v).collect::<Vec<_>>(),
            vec![2]
        );
    }

    #[test]
    fn test_registry_errors() {
        let registry = VersionRegistry::new([(1, mock_factory()), (2, binary("v2"))]).unwrap();

        let err = registry.get(7).unwrap_err();
        assert_eq!(
            err,
            RegistryError::UnknownVersion {
                requested: 7,
                registered: vec![1, 2]
            }
        );
        assert!(err.to_string().contains("[1, 2]"));
        assert_matches!(registry.factory(2).err(), Some(RegistryError::NotInProcess(2)));
        assert_matches!(registry.binary(1), Err(RegistryError::NotABinary(1)));
        assert_matches!(
            registry.factory(3).err(),
            Some(RegistryError::UnknownVersion { requested: 3, .. })
        );
    }

    #[test]
    fn test_registry_construction() {
        assert_matches!(
            VersionRegistry::new([(1, mock_factory()), (1, failing_factory())]),
            Err(RegistryError::DuplicateVersion(1))
        );
        assert_matches!(VersionRegistry::new(Vec::new()), Err(RegistryError::Empty));
    }

    #[test]
    fn test_resolve_strategy() {
        let registry = VersionRegistry::new([(3, mock_factory()), (5, mock_factory())]).unwrap();
        assert_eq!(registry.resolve(ActivationStrategy::Latest).unwrap(), 5);
        assert_eq!(registry.resolve(3.into()).unwrap(), 3);
        assert_matches!(
            registry.resolve(ActivationStrategy::Exact(4)),
            Err(RegistryError::UnknownVersion { requested: 4, .. })
        );
    }
}
