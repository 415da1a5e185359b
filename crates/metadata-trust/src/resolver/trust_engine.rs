use std::sync::Arc;

use tracing::{debug, warn};

use super::{CredentialCriteria, MetadataResolver, SignatureTrustEngine, SignatureTrustEngineFactory};
use crate::certificate::Certificate;
use crate::error::Result;

/// Trusts a credential when its key is published in the resolver's metadata.
///
/// Only signing and unspecified-use key descriptors of the requested role
/// count. Metadata is read on every call, so the engine follows the
/// resolver's refreshes.
pub struct ExplicitKeySignatureTrustEngine {
    resolver: Arc<dyn MetadataResolver>,
}

impl ExplicitKeySignatureTrustEngine {
    pub fn new(resolver: Arc<dyn MetadataResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn MetadataResolver> {
        &self.resolver
    }

    fn published_keys(&self, criteria: &CredentialCriteria) -> Vec<Certificate> {
        let Some(entity) = self.resolver.resolve_entity(&criteria.entity_id) else {
            debug!(entity_id = %criteria.entity_id, "No metadata published for entity");
            return Vec::new();
        };

        entity
            .roles_of(criteria.role)
            .flat_map(|role| role.key_descriptors.iter())
            .filter(|descriptor| descriptor.is_signing())
            .flat_map(|descriptor| descriptor.certificates.iter())
            .filter_map(|encoded| match Certificate::from_base64(encoded) {
                Ok(certificate) => Some(certificate),
                Err(e) => {
                    warn!(entity_id = %criteria.entity_id, error = %e, "Skipping unreadable published key");
                    None
                }
            })
            .collect()
    }
}

impl SignatureTrustEngine for ExplicitKeySignatureTrustEngine {
    fn is_trusted_credential(&self, credential: &Certificate, criteria: &CredentialCriteria) -> bool {
        let trusted = self
            .published_keys(criteria)
            .iter()
            .any(|published| published.public_key() == credential.public_key());

        debug!(
            entity_id = %criteria.entity_id,
            role = %criteria.role,
            subject = %credential.subject(),
            trusted,
            "Evaluated signing credential"
        );
        trusted
    }
}

/// Pairs every resolver with an [`ExplicitKeySignatureTrustEngine`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataSignatureTrustEngineFactory;

impl SignatureTrustEngineFactory for MetadataSignatureTrustEngineFactory {
    fn create_signature_trust_engine(
        &self,
        resolver: Arc<dyn MetadataResolver>,
    ) -> Result<Arc<dyn SignatureTrustEngine>> {
        Ok(Arc::new(ExplicitKeySignatureTrustEngine::new(resolver)))
    }
}
