use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, MethodRouter},
    Router,
};

use crate::{
    consent::ConsentDesk,
    endpoint::{check_shareable, Endpoint, Target, Visibility},
    handlers::{receive_upload, serve_share, upload_page, ByteSource, Inbox, Share},
    limit::{limit_requests, RequestLimiter},
    namer::{EndpointId, NamerError},
    tofc::{trust_on_first_connect, TrustGate},
};

pub const UPLOAD_PATH: &str = "/upload";

/// Access rules applied to every endpoint of one server.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub visibility: Visibility,
    /// Per-endpoint request quota; negative means unlimited.
    pub request_limit: i64,
    /// Trust-on-first-connect ceiling; negative disables the gate.
    pub max_clients: i64,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            visibility: Visibility::Attachment,
            request_limit: -1,
            max_clients: -1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Namer(#[from] NamerError),
    #[error("{0}")]
    NotShareable(String),
    #[error("upload directory {} does not exist or is not a directory", .0.display())]
    UploadDir(PathBuf),
    #[error("receive mode is already enabled")]
    UploadTwice,
}

/// Builds the router: one randomly named, access-controlled route per share.
///
/// Each share is wrapped by its own request limiter and then by the trust
/// gate, which is shared by every route of this registry (and only this
/// registry).
pub struct EndpointRegistry {
    policy: AccessPolicy,
    trust: Option<Arc<TrustGate>>,
    used: HashSet<EndpointId>,
    endpoints: Vec<Endpoint>,
    router: Router,
    receiving: bool,
}

impl EndpointRegistry {
    pub fn new(policy: AccessPolicy) -> Self {
        Self {
            policy,
            trust: TrustGate::new(policy.max_clients).map(Arc::new),
            used: HashSet::new(),
            endpoints: Vec::new(),
            router: Router::new(),
            receiving: false,
        }
    }

    pub fn share_file(&mut self, path: impl Into<PathBuf>) -> Result<&Endpoint, RegistryError> {
        let path = path.into();
        check_shareable(&path).map_err(RegistryError::NotShareable)?;
        let endpoint = self.endpoint(Target::File(path))?;
        Ok(self.register(Share::file(endpoint)))
    }

    pub fn share_stream(
        &mut self,
        name: impl Into<String>,
        source: ByteSource,
    ) -> Result<&Endpoint, RegistryError> {
        let endpoint = self.endpoint(Target::Stdin { name: name.into() })?;
        Ok(self.register(Share::stream(endpoint, source)))
    }

    /// Enable `GET|POST /upload`, storing accepted files in `dir`.
    pub fn receive_uploads(&mut self, dir: &Path, desk: ConsentDesk) -> Result<(), RegistryError> {
        if self.receiving {
            return Err(RegistryError::UploadTwice);
        }
        if !dir.is_dir() {
            return Err(RegistryError::UploadDir(dir.into()));
        }
        let inbox = Inbox {
            dir: dir.into(),
            desk,
        };
        let route = get(upload_page)
            .post(receive_upload)
            .with_state(Arc::new(inbox))
            .layer(DefaultBodyLimit::disable());
        let route = self.guard(route, None);
        self.router = std::mem::take(&mut self.router).route(UPLOAD_PATH, route);
        self.receiving = true;
        Ok(())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn trust_gate(&self) -> Option<&Arc<TrustGate>> {
        self.trust.as_ref()
    }

    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn into_router(self) -> Router {
        self.router
    }

    fn endpoint(&mut self, target: Target) -> Result<Endpoint, RegistryError> {
        let id = loop {
            let id = EndpointId::generate()?;
            if self.used.insert(id) {
                break id;
            }
        };
        Ok(Endpoint {
            id,
            target,
            visibility: self.policy.visibility,
        })
    }

    fn register(&mut self, share: Share) -> &Endpoint {
        let endpoint = share.endpoint.clone();
        let path = endpoint.path();
        let limiter = RequestLimiter::new(path.clone(), self.policy.request_limit);
        let route = get(serve_share).with_state(Arc::new(share));
        let route = self.guard(route, limiter);
        self.router = std::mem::take(&mut self.router).route(&path, route);
        self.endpoints.push(endpoint);
        &self.endpoints[self.endpoints.len() - 1]
    }

    /// Limiter inside, trust gate outermost. Both are route layers, so a
    /// request the route does not handle (405, 404) never reaches them.
    fn guard(&self, mut route: MethodRouter, limiter: Option<RequestLimiter>) -> MethodRouter {
        if let Some(limiter) = limiter {
            route = route.route_layer(middleware::from_fn_with_state(
                Arc::new(limiter),
                limit_requests,
            ));
        }
        if let Some(gate) = &self.trust {
            route = route.route_layer(middleware::from_fn_with_state(
                Arc::clone(gate),
                trust_on_first_connect,
            ));
        }
        route
    }
}
