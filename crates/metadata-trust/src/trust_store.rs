//! In-memory certificate trust stores.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::Result;

/// Alias prefix for entries derived from a certificate chain
pub const CERTIFICATE_ALIAS_PREFIX: &str = "certificate-";

/// Alias of the chain entry at `index`
pub fn certificate_alias(index: usize) -> String {
    format!("{CERTIFICATE_ALIAS_PREFIX}{index}")
}

/// A named set of trusted certificates, addressed by alias.
///
/// Entries keep insertion order so that a store built from a chain iterates
/// leaf first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustStore {
    name: String,
    entries: Vec<(String, Certificate)>,
}

impl TrustStore {
    /// Create an empty trust store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Build a store holding every certificate of `chain` under
    /// `certificate-<index>`, index 0 being the leaf.
    pub fn from_chain(name: impl Into<String>, chain: &[Certificate]) -> Self {
        let mut store = Self::new(name);
        for (index, certificate) in chain.iter().enumerate() {
            store.insert(certificate_alias(index), certificate.clone());
        }
        store
    }

    /// Load every certificate of a PEM bundle, aliased in file order
    pub fn from_pem_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read(path.as_ref())?;
        let certificates = Certificate::from_pem(&contents)?;
        Ok(Self::from_chain(name, &certificates))
    }

    /// Add a certificate, replacing any entry already stored under `alias`
    pub fn insert(&mut self, alias: impl Into<String>, certificate: Certificate) {
        let alias = alias.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == alias) {
            Some(entry) => entry.1 = certificate,
            None => self.entries.push((alias, certificate)),
        }
    }

    /// Builder-style [`TrustStore::insert`]
    pub fn with_certificate(mut self, alias: impl Into<String>, certificate: Certificate) -> Self {
        self.insert(alias, certificate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up the certificate stored under `alias`
    pub fn certificate(&self, alias: &str) -> Option<&Certificate> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == alias)
            .map(|(_, certificate)| certificate)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(alias, _)| alias.as_str())
    }

    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.entries.iter().map(|(_, certificate)| certificate)
    }

    /// Whether `certificate` is itself an entry of this store
    pub fn contains(&self, certificate: &Certificate) -> bool {
        self.certificates().any(|trusted| trusted == certificate)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// File-backed trust store settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustStoreConfiguration {
    /// PEM bundle holding the trusted certificates
    #[serde(alias = "trust_store_path")]
    pub path: PathBuf,

    /// Store name used in logs; defaults to the file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl TrustStoreConfiguration {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: None,
        }
    }

    /// Read the configured bundle
    pub fn load(&self) -> Result<TrustStore> {
        let name = self.name.clone().unwrap_or_else(|| {
            self.path
                .file_name()
                .map(|file| file.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.path.display().to_string())
        });
        TrustStore::from_pem_file(name, &self.path)
    }
}
