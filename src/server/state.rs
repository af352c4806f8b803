//! Shared server state

use std::sync::Arc;

use crate::auth::{Authenticator, PublicMethodSet};
use crate::chat::ChatProvider;
use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::gateway::RouteTable;
use crate::guard::PermitPool;
use crate::rpc::{InterceptorChain, ServiceRegistry};
use crate::service::default_registry;
use crate::store::Store;
use crate::thumbnail::Thumbnailer;

/// State handed to every handler and middleware
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<GatewayConfig>,
    pub authenticator: Authenticator,
    pub public_methods: Arc<PublicMethodSet>,
    pub registry: Arc<ServiceRegistry>,
    /// Connect transport entry point
    pub chain: InterceptorChain,
    /// REST bridge route table
    pub routes: Arc<RouteTable>,
    pub chat: Arc<dyn ChatProvider>,
}

impl ServerState {
    /// Wire services, interceptors and routes from configuration.
    ///
    /// `config.auth.secret` must already be set; see
    /// [`GatewayConfig::ensure_secret`].
    pub fn new(config: GatewayConfig, store: Arc<dyn Store>, chat: Arc<dyn ChatProvider>) -> Result<Self> {
        if config.auth.secret.is_empty() {
            return Err(Error::Config("auth.secret is empty".into()));
        }
        config.validate()?;

        let authenticator = Authenticator::new(store.clone(), config.auth.secret.as_bytes());
        let public_methods = Arc::new(PublicMethodSet::standard());

        let thumbnailer = Thumbnailer::new(
            PermitPool::new(config.thumbnail.max_concurrency),
            config.thumbnail.max_size,
        );
        let registry = Arc::new(default_registry(
            config.server.mode,
            store,
            chat.clone(),
            thumbnailer,
        ));

        let chain = InterceptorChain::standard(
            registry.clone(),
            authenticator.clone(),
            public_methods.clone(),
            config.server.mode.is_demo(),
        );

        let routes = RouteTable::standard().map_err(|e| Error::Internal(format!("invalid route table: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            authenticator,
            public_methods,
            registry,
            chain,
            routes: Arc::new(routes),
            chat,
        })
    }
}
