//! Metadata filters.
//!
//! [`CertificateChainValidationFilter`] prunes every role of one type whose
//! key descriptors carry a certificate that does not validate against a trust
//! store. Pruning propagates upwards: an entity left without roles is
//! dropped, and a group left without entities or nested groups is dropped in
//! turn. The filter fails closed: if anything unexpected happens while
//! filtering, the whole document is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, trace, warn};

use super::{EntitiesDescriptor, EntityDescriptor, Metadata, RoleDescriptor, RoleType};
use crate::error::Result;
use crate::trust_store::TrustStore;
use crate::validation::CertificateChainValidator;

/// Transforms a fetched metadata tree before it is exposed.
///
/// Returning `None` means no metadata from this document may be used.
pub trait MetadataFilter: Send + Sync {
    fn filter(&self, metadata: Option<Metadata>) -> Option<Metadata>;
}

/// Removes roles whose certificates fail chain validation
pub struct CertificateChainValidationFilter {
    role: RoleType,
    validator: Arc<dyn CertificateChainValidator>,
    trust_store: Arc<TrustStore>,
}

impl CertificateChainValidationFilter {
    pub fn new(
        role: RoleType,
        validator: Arc<dyn CertificateChainValidator>,
        trust_store: Arc<TrustStore>,
    ) -> Self {
        Self {
            role,
            validator,
            trust_store,
        }
    }

    pub fn role(&self) -> RoleType {
        self.role
    }

    pub fn trust_store(&self) -> &TrustStore {
        &self.trust_store
    }

    // Ok(None) means the node was pruned, Err aborts the whole filter run.
    fn filter_metadata(&self, metadata: Metadata) -> Result<Option<Metadata>> {
        match metadata {
            Metadata::Entity(entity) => Ok(self.filter_entity(entity)?.map(Metadata::Entity)),
            Metadata::Group(group) => Ok(self.filter_group(group)?.map(Metadata::Group)),
        }
    }

    fn filter_group(&self, group: EntitiesDescriptor) -> Result<Option<EntitiesDescriptor>> {
        let name = group.display_name().to_string();
        trace!(group = %name, "Processing EntitiesDescriptor group");

        let EntitiesDescriptor {
            name: group_name,
            id,
            entities,
            groups,
        } = group;

        let mut surviving_entities = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity_id = entity.entity_id.clone();
            match self.filter_entity(entity)? {
                Some(entity) => surviving_entities.push(entity),
                None => warn!(
                    entity_id = %entity_id,
                    "EntityDescriptor failed certificate chain validation, removing from metadata provider"
                ),
            }
        }

        let mut surviving_groups = Vec::with_capacity(groups.len());
        for nested in groups {
            let child_name = nested.display_name().to_string();
            trace!(group = %child_name, "Processing EntitiesDescriptor member");
            match self.filter_group(nested)? {
                Some(nested) => surviving_groups.push(nested),
                None => warn!(
                    group = %child_name,
                    "EntitiesDescriptor failed certificate chain validation, removing from metadata provider"
                ),
            }
        }

        if surviving_entities.is_empty() && surviving_groups.is_empty() {
            trace!(group = %name, "Entity and entities descriptor lists are empty");
            return Ok(None);
        }

        Ok(Some(EntitiesDescriptor {
            name: group_name,
            id,
            entities: surviving_entities,
            groups: surviving_groups,
        }))
    }

    fn filter_entity(&self, entity: EntityDescriptor) -> Result<Option<EntityDescriptor>> {
        trace!(entity_id = %entity.entity_id, "Processing EntityDescriptor");

        let EntityDescriptor { entity_id, roles } = entity;

        let mut surviving_roles = Vec::with_capacity(roles.len());
        for role in roles {
            if role.role != self.role || self.validate_role(&entity_id, &role)? {
                surviving_roles.push(role);
            } else {
                error!(
                    entity_id = %entity_id,
                    role = %role.role,
                    "RoleDescriptor failed certificate chain validation, removing from metadata provider"
                );
            }
        }

        if surviving_roles.is_empty() {
            trace!(entity_id = %entity_id, "Role descriptor list is empty");
            return Ok(None);
        }

        Ok(Some(EntityDescriptor {
            entity_id,
            roles: surviving_roles,
        }))
    }

    /// Validate every certificate of the role, stopping at the first failure
    fn validate_role(&self, entity_id: &str, role: &RoleDescriptor) -> Result<bool> {
        for key_descriptor in &role.key_descriptors {
            for certificate in key_descriptor.x509_certificates()? {
                let validity = self.validator.validate(&certificate, &self.trust_store);
                if !validity.is_valid() {
                    error!(
                        entity_id = %entity_id,
                        subject = %certificate.subject(),
                        reason = validity.reason().unwrap_or_default(),
                        "Certificate chain validation failed for metadata entry"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

impl MetadataFilter for CertificateChainValidationFilter {
    fn filter(&self, metadata: Option<Metadata>) -> Option<Metadata> {
        let metadata = metadata?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.filter_metadata(metadata)));
        match outcome {
            Ok(Ok(Some(filtered))) => Some(filtered),
            Ok(Ok(None)) => {
                error!(
                    role = %self.role,
                    trust_store = %self.trust_store.name(),
                    "No metadata left after certificate chain validation"
                );
                None
            }
            Ok(Err(e)) => {
                error!(
                    error = %e,
                    "Saw fatal error validating certificate chain, metadata will be filtered out"
                );
                None
            }
            Err(_) => {
                error!("Certificate chain validation panicked, metadata will be filtered out");
                None
            }
        }
    }
}

/// Applies filters in order, stopping once one of them discards the document
#[derive(Clone, Default)]
pub struct MetadataFilterChain {
    filters: Vec<Arc<dyn MetadataFilter>>,
}

impl MetadataFilterChain {
    pub fn new(filters: Vec<Arc<dyn MetadataFilter>>) -> Self {
        Self { filters }
    }

    pub fn with_filter(mut self, filter: Arc<dyn MetadataFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl MetadataFilter for MetadataFilterChain {
    fn filter(&self, metadata: Option<Metadata>) -> Option<Metadata> {
        self.filters
            .iter()
            .try_fold(metadata?, |current, filter| filter.filter(Some(current)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::Certificate;
    use crate::metadata::KeyDescriptor;
    use crate::validation::CertificateValidity;
    use rcgen::{CertificateParams, KeyPair};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts a certificate when its subject is on the allow list
    struct SubjectValidator {
        trusted_subjects: Vec<String>,
        calls: AtomicUsize,
    }

    impl SubjectValidator {
        fn trusting(subjects: &[&Certificate]) -> Arc<Self> {
            Arc::new(Self {
                trusted_subjects: subjects.iter().map(|c| c.subject().to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CertificateChainValidator for SubjectValidator {
        fn validate(&self, certificate: &Certificate, _trust_store: &TrustStore) -> CertificateValidity {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.trusted_subjects.iter().any(|s| s == certificate.subject()) {
                CertificateValidity::valid()
            } else {
                CertificateValidity::invalid("untrusted")
            }
        }
    }

    struct PanickingValidator;

    impl CertificateChainValidator for PanickingValidator {
        fn validate(&self, _certificate: &Certificate, _trust_store: &TrustStore) -> CertificateValidity {
            panic!("validator failure")
        }
    }

    fn certificate(name: &str) -> Certificate {
        let mut params = CertificateParams::new(vec![format!("{name}.example")]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, name);
        let cert = params.self_signed(&KeyPair::generate().unwrap()).unwrap();
        Certificate::from_der(cert.der()).unwrap()
    }

    fn role(role: RoleType, certificates: &[&Certificate]) -> RoleDescriptor {
        RoleDescriptor::new(
            role,
            vec![KeyDescriptor::new(
                crate::metadata::KeyUse::Signing,
                certificates.iter().map(|c| c.to_base64()).collect(),
            )],
        )
    }

    fn filter(role: RoleType, validator: Arc<dyn CertificateChainValidator>) -> CertificateChainValidationFilter {
        CertificateChainValidationFilter::new(role, validator, Arc::new(TrustStore::new("test")))
    }

    #[test]
    fn test_none_is_passed_through() {
        let validator = SubjectValidator::trusting(&[]);
        assert_eq!(filter(RoleType::IdpSso, validator.clone()).filter(None), None);
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_single_entity_root_is_pruned_when_role_fails() {
        let bad = certificate("bad");
        let metadata = Metadata::Entity(EntityDescriptor::new(
            "https://idp.example",
            vec![role(RoleType::IdpSso, &[&bad])],
        ));

        let result = filter(RoleType::IdpSso, SubjectValidator::trusting(&[])).filter(Some(metadata));
        assert_eq!(result, None);
    }

    #[test]
    fn test_other_role_types_are_not_examined() {
        let bad = certificate("bad");
        let metadata = Metadata::Entity(EntityDescriptor::new(
            "https://hub.example",
            vec![role(RoleType::SpSso, &[&bad])],
        ));
        let validator = SubjectValidator::trusting(&[]);

        let result = filter(RoleType::IdpSso, validator.clone()).filter(Some(metadata.clone()));

        assert_eq!(result, Some(metadata));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validation_short_circuits_on_first_failure() {
        let bad = certificate("bad");
        let good = certificate("good");
        let metadata = Metadata::Entity(EntityDescriptor::new(
            "https://idp.example",
            vec![
                role(RoleType::IdpSso, &[&bad, &good, &good]),
                role(RoleType::SpSso, &[&good]),
            ],
        ));
        let validator = SubjectValidator::trusting(&[&good]);

        let result = filter(RoleType::IdpSso, validator.clone()).filter(Some(metadata));

        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
        let entity = match result {
            Some(Metadata::Entity(entity)) => entity,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(entity.roles.len(), 1);
        assert_eq!(entity.roles[0].role, RoleType::SpSso);
    }

    #[test]
    fn test_malformed_certificate_discards_everything() {
        let good = certificate("good");
        let mut broken = role(RoleType::IdpSso, &[]);
        broken.key_descriptors[0].certificates.push("not a certificate".to_string());
        let metadata = Metadata::Group(
            EntitiesDescriptor::new("federation")
                .with_entity(EntityDescriptor::new("https://good.example", vec![role(RoleType::IdpSso, &[&good])]))
                .with_entity(EntityDescriptor::new("https://broken.example", vec![broken])),
        );

        let result = filter(RoleType::IdpSso, SubjectValidator::trusting(&[&good])).filter(Some(metadata));
        assert_eq!(result, None);
    }

    #[test]
    fn test_panicking_validator_discards_everything() {
        let good = certificate("good");
        let metadata = Metadata::Entity(EntityDescriptor::new(
            "https://idp.example",
            vec![role(RoleType::IdpSso, &[&good])],
        ));

        assert_eq!(filter(RoleType::IdpSso, Arc::new(PanickingValidator)).filter(Some(metadata)), None);
    }

    #[test]
    fn test_empty_nested_group_is_removed_but_parent_survives() {
        let good = certificate("good");
        let bad = certificate("bad");
        let metadata = Metadata::Group(
            EntitiesDescriptor::new("federation")
                .with_entity(EntityDescriptor::new("https://good.example", vec![role(RoleType::IdpSso, &[&good])]))
                .with_group(
                    EntitiesDescriptor::new("untrusted")
                        .with_entity(EntityDescriptor::new("https://bad.example", vec![role(RoleType::IdpSso, &[&bad])])),
                ),
        );

        let result = filter(RoleType::IdpSso, SubjectValidator::trusting(&[&good])).filter(Some(metadata));

        let group = match result {
            Some(Metadata::Group(group)) => group,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(group.entities.len(), 1);
        assert!(group.groups.is_empty());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_pruned_entities_and_groups_log_as_warnings() {
        let good = certificate("good");
        let bad = certificate("bad");
        let metadata = Metadata::Group(
            EntitiesDescriptor::new("federation")
                .with_entity(EntityDescriptor::new("https://good.example", vec![role(RoleType::IdpSso, &[&good])]))
                .with_group(
                    EntitiesDescriptor::new("untrusted")
                        .with_entity(EntityDescriptor::new("https://bad.example", vec![role(RoleType::IdpSso, &[&bad])])),
                ),
        );
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            filter(RoleType::IdpSso, SubjectValidator::trusting(&[&good])).filter(Some(metadata))
        });

        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        let line = |needle: &str| output.lines().find(|line| line.contains(needle)).unwrap().to_string();
        assert!(line("RoleDescriptor failed").contains("ERROR"));
        assert!(line("EntityDescriptor failed").contains("WARN"));
        assert!(line("EntitiesDescriptor failed").contains("WARN"));
        assert_eq!(output.lines().filter(|line| line.contains("ERROR")).count(), 2);
    }

    #[test]
    fn test_chain_stops_after_first_discard() {
        let bad = certificate("bad");
        let metadata = Metadata::Entity(EntityDescriptor::new(
            "https://idp.example",
            vec![role(RoleType::IdpSso, &[&bad])],
        ));
        let second = SubjectValidator::trusting(&[]);
        let chain = MetadataFilterChain::default()
            .with_filter(Arc::new(filter(RoleType::IdpSso, SubjectValidator::trusting(&[]))))
            .with_filter(Arc::new(filter(RoleType::IdpSso, second.clone())));

        assert_eq!(chain.filter(Some(metadata)), None);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }
}
