//! Service registry: turns a mapping tree into callable methods grouped by
//! service.

use crate::config::RestfetchConfig;
use crate::error::RestfetchError;
use crate::error_registry::{ErrorCatalog, ErrorCode, ErrorRegistry};
use crate::invoker::Invoker;
use crate::mapping::MappingTree;
use crate::method::{DEFAULT_RETURN_CODE_HEADER, MethodDeps, RestMethod};
use crate::transformer::TransformHooks;
use crate::transport::{HttpTransport, HyperTransport};
use crate::validator::{ArgumentValidator, JsonSchemaValidator};
use http::HeaderName;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Enabled methods of one service. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    name: Arc<str>,
    methods: Arc<BTreeMap<String, Arc<RestMethod>>>,
}

impl ServiceHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<Arc<RestMethod>> {
        self.methods.get(name).cloned()
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Calls `method` with raw arguments.
    ///
    /// # Errors
    /// [`RestfetchError::MethodNotFound`] for an unknown or disabled method,
    /// otherwise whatever [`RestMethod::call`] returns.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, RestfetchError> {
        let target = self
            .methods
            .get(method)
            .ok_or_else(|| RestfetchError::MethodNotFound {
                service: self.name.to_string(),
                method: method.to_owned(),
            })?;
        target.call(args).await
    }
}

/// Lookup table of enabled services. Built once, read-only afterwards.
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, ServiceHandle>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn builder(mappings: MappingTree) -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::new(mappings)
    }

    /// Handle of an enabled service; `None` for unknown or disabled ones and
    /// for every name when the registry is disabled.
    #[must_use]
    pub fn lookup_service(&self, name: &str) -> Option<ServiceHandle> {
        self.services.get(name).cloned()
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Builder for [`ServiceRegistry`].
///
/// Collaborators not supplied explicitly default to [`HyperTransport`],
/// [`JsonSchemaValidator`] and an [`ErrorCatalog`] extended with the
/// configured error codes.
pub struct ServiceRegistryBuilder {
    mappings: MappingTree,
    enabled: bool,
    transport: Option<Arc<dyn HttpTransport>>,
    validator: Option<Arc<dyn ArgumentValidator>>,
    errors: Option<Arc<dyn ErrorRegistry>>,
    error_codes: BTreeMap<String, ErrorCode>,
    return_code_header: String,
}

impl ServiceRegistryBuilder {
    #[must_use]
    pub fn new(mappings: MappingTree) -> Self {
        Self {
            mappings,
            enabled: true,
            transport: None,
            validator: None,
            errors: None,
            error_codes: BTreeMap::new(),
            return_code_header: DEFAULT_RETURN_CODE_HEADER.to_owned(),
        }
    }

    /// Assembles `sources` followed by the inline `mappings` of `config` and
    /// applies the rest of the configuration block.
    ///
    /// # Errors
    /// Propagates [`MappingTree::assemble`] failures.
    pub fn from_config<I>(config: &RestfetchConfig, sources: I) -> Result<Self, RestfetchError>
    where
        I: IntoIterator<Item = Value>,
    {
        let mappings = MappingTree::assemble(
            sources
                .into_iter()
                .chain(std::iter::once(config.mappings.clone())),
        )?;
        Ok(Self::new(mappings)
            .enabled(config.enabled)
            .with_error_codes(config.error_codes.clone())
            .with_return_code_header(config.return_code_header()))
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn ArgumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Replaces the default catalog; configured error codes are then ignored.
    #[must_use]
    pub fn with_error_registry(mut self, errors: Arc<dyn ErrorRegistry>) -> Self {
        self.errors = Some(errors);
        self
    }

    #[must_use]
    pub fn with_error_codes<I>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = (String, ErrorCode)>,
    {
        self.error_codes.extend(codes);
        self
    }

    #[must_use]
    pub fn with_return_code_header(mut self, header_name: impl Into<String>) -> Self {
        self.return_code_header = header_name.into();
        self
    }

    /// Attaches transform hooks to a method of the mapping tree.
    ///
    /// # Errors
    /// Returns [`RestfetchError::MethodNotFound`] if the tree has no such
    /// method.
    pub fn with_hooks(
        mut self,
        service: &str,
        method: &str,
        hooks: TransformHooks,
    ) -> Result<Self, RestfetchError> {
        if self.mappings.set_hooks(service, method, hooks) {
            Ok(self)
        } else {
            Err(RestfetchError::MethodNotFound {
                service: service.to_owned(),
                method: method.to_owned(),
            })
        }
    }

    /// # Errors
    /// Returns [`RestfetchError::Config`] for an invalid return-code header
    /// name, or the error of a default collaborator that fails to initialize.
    pub fn build(self) -> Result<ServiceRegistry, RestfetchError> {
        if !self.enabled {
            tracing::info!("restfetch registry is disabled, no services registered");
            return Ok(ServiceRegistry::default());
        }

        HeaderName::from_bytes(self.return_code_header.as_bytes()).map_err(|e| {
            RestfetchError::Config(format!(
                "invalid return code header '{}': {e}",
                self.return_code_header
            ))
        })?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HyperTransport::new()?),
        };
        let validator = match self.validator {
            Some(validator) => validator,
            None => Arc::new(JsonSchemaValidator::new()?),
        };
        let errors = self.errors.unwrap_or_else(|| {
            Arc::new(ErrorCatalog::new().with_codes(self.error_codes))
        });
        let deps = MethodDeps {
            invoker: Invoker::new(transport, errors.clone()),
            validator,
            errors,
            return_code_header: Arc::from(self.return_code_header),
        };

        let mut services = BTreeMap::new();
        for (service_name, service) in self.mappings.iter() {
            tracing::debug!(service = service_name, enabled = service.enabled, "register service");
            if !service.enabled {
                continue;
            }

            let defaults = Arc::new(service.defaults());
            let mut methods = BTreeMap::new();
            for (method_name, descriptor) in &service.methods {
                tracing::debug!(
                    service = service_name,
                    method = %method_name,
                    enabled = descriptor.enabled,
                    "register method"
                );
                if !descriptor.enabled {
                    continue;
                }
                let method = RestMethod::new(
                    service_name,
                    method_name,
                    defaults.clone(),
                    descriptor.clone(),
                    deps.clone(),
                );
                methods.insert(method_name.clone(), Arc::new(method));
            }

            services.insert(
                service_name.to_owned(),
                ServiceHandle {
                    name: Arc::from(service_name),
                    methods: Arc::new(methods),
                },
            );
        }

        tracing::info!(services = services.len(), "restfetch registry initialized");
        Ok(ServiceRegistry { services })
    }
}

impl std::fmt::Debug for ServiceRegistryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistryBuilder")
            .field("mappings", &self.mappings)
            .field("enabled", &self.enabled)
            .field("error_codes", &self.error_codes)
            .field("return_code_header", &self.return_code_header)
            .finish_non_exhaustive()
    }
}
