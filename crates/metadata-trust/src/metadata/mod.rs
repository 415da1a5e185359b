//! Federation metadata tree.
//!
//! The tree mirrors SAML metadata: entity groups (`EntitiesDescriptor`) hold
//! entities and nested groups, entities (`EntityDescriptor`) hold roles, and
//! roles hold key descriptors carrying base64 X.509 certificates. Unmarshalling
//! SAML XML into this model is left to a [`MetadataParser`] implementation.

pub mod filter;

pub use filter::{CertificateChainValidationFilter, MetadataFilter, MetadataFilterChain};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::certificate::Certificate;
use crate::error::{Result, TrustError};

/// Role descriptor element type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleType {
    #[serde(rename = "IDPSSODescriptor")]
    IdpSso,
    #[serde(rename = "SPSSODescriptor")]
    SpSso,
    #[serde(rename = "AttributeAuthorityDescriptor")]
    AttributeAuthority,
    #[serde(rename = "AuthnAuthorityDescriptor")]
    AuthnAuthority,
    #[serde(rename = "PDPDescriptor")]
    Pdp,
}

impl RoleType {
    /// SAML element name
    pub fn element_name(&self) -> &'static str {
        match self {
            RoleType::IdpSso => "IDPSSODescriptor",
            RoleType::SpSso => "SPSSODescriptor",
            RoleType::AttributeAuthority => "AttributeAuthorityDescriptor",
            RoleType::AuthnAuthority => "AuthnAuthorityDescriptor",
            RoleType::Pdp => "PDPDescriptor",
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

/// `use` attribute of a key descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Signing,
    Encryption,
    #[default]
    Unspecified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    #[serde(default, rename = "use")]
    pub key_use: KeyUse,

    /// Base64 DER certificates from the descriptor's `KeyInfo`
    #[serde(default)]
    pub certificates: Vec<String>,
}

impl KeyDescriptor {
    pub fn new(key_use: KeyUse, certificates: Vec<String>) -> Self {
        Self { key_use, certificates }
    }

    /// Decode the `KeyInfo` certificates
    pub fn x509_certificates(&self) -> Result<Vec<Certificate>> {
        self.certificates
            .iter()
            .map(|encoded| Certificate::from_base64(encoded))
            .collect()
    }

    /// Whether the key may be used to verify signatures
    pub fn is_signing(&self) -> bool {
        matches!(self.key_use, KeyUse::Signing | KeyUse::Unspecified)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDescriptor {
    pub role: RoleType,

    #[serde(default)]
    pub key_descriptors: Vec<KeyDescriptor>,
}

impl RoleDescriptor {
    pub fn new(role: RoleType, key_descriptors: Vec<KeyDescriptor>) -> Self {
        Self { role, key_descriptors }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    pub entity_id: String,

    #[serde(default)]
    pub roles: Vec<RoleDescriptor>,
}

impl EntityDescriptor {
    pub fn new(entity_id: impl Into<String>, roles: Vec<RoleDescriptor>) -> Self {
        Self {
            entity_id: entity_id.into(),
            roles,
        }
    }

    pub fn roles_of(&self, role: RoleType) -> impl Iterator<Item = &RoleDescriptor> {
        self.roles.iter().filter(move |descriptor| descriptor.role == role)
    }

    pub fn has_role(&self, role: RoleType) -> bool {
        self.roles_of(role).next().is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitiesDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub entities: Vec<EntityDescriptor>,

    #[serde(default)]
    pub groups: Vec<EntitiesDescriptor>,
}

impl EntitiesDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, entity: EntityDescriptor) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_group(mut self, group: EntitiesDescriptor) -> Self {
        self.groups.push(group);
        self
    }

    /// Name for log output: `name`, else `id`, else `(unnamed)`
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or("(unnamed)")
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.groups.is_empty()
    }
}

/// Root of a metadata document: a single entity or a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metadata {
    Entity(EntityDescriptor),
    Group(EntitiesDescriptor),
}

impl Metadata {
    /// Every entity in the tree, depth first
    pub fn entities(&self) -> Vec<&EntityDescriptor> {
        fn collect<'a>(group: &'a EntitiesDescriptor, out: &mut Vec<&'a EntityDescriptor>) {
            out.extend(group.entities.iter());
            for nested in &group.groups {
                collect(nested, out);
            }
        }

        let mut out = Vec::new();
        match self {
            Metadata::Entity(entity) => out.push(entity),
            Metadata::Group(group) => collect(group, &mut out),
        }
        out
    }

    pub fn find_entity(&self, entity_id: &str) -> Option<&EntityDescriptor> {
        self.entities().into_iter().find(|entity| entity.entity_id == entity_id)
    }

    /// Identifiers of the entities that carry at least one `role` descriptor
    pub fn entity_ids_with_role(&self, role: RoleType) -> Vec<String> {
        self.entities()
            .into_iter()
            .filter(|entity| entity.has_role(role))
            .map(|entity| entity.entity_id.clone())
            .collect()
    }
}

/// Turns a fetched metadata document into a [`Metadata`] tree
pub trait MetadataParser: Send + Sync {
    fn parse(&self, document: &[u8]) -> Result<Metadata>;
}

/// Parser for the JSON form of the tree
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadataParser;

impl MetadataParser for JsonMetadataParser {
    fn parse(&self, document: &[u8]) -> Result<Metadata> {
        serde_json::from_slice(document).map_err(|e| TrustError::MetadataParse(e.to_string()))
    }
}
