use thiserror::Error;

/// Problems with the user supplied attachment template
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse attachment template: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("main plugin has no `type` or `plugins`")]
    MissingPlugin,

    #[error("chained plugin list is empty")]
    EmptyChain,
}

/// Address pool failures
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("interface {interface} on host {host} has no address space")]
    UnknownInterface { host: String, interface: String },

    #[error("no address pool configured for address space {0}")]
    UnknownAddressSpace(String),

    #[error("address pool {address_space} exhausted: {reason}")]
    Exhausted {
        address_space: String,
        reason: String,
    },

    #[error("allocation deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid pool configuration for {address_space}: {reason}")]
    InvalidPool {
        address_space: String,
        reason: String,
    },
}

/// Per-interface config synthesis failures
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no interface selected")]
    NoInterface,

    #[error("no address lease for interface {0}")]
    MissingLease(String),

    #[error("failed to serialize config for interface index {index}: {source}")]
    Serialize {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures invoking an underlying network plugin
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {0} not found in CNI path")]
    NotFound(String),

    #[error("plugin {plugin} failed: {message}")]
    Failed { plugin: String, message: String },

    #[error("invalid plugin document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("failed to run plugin: {0}")]
    Io(#[from] std::io::Error),
}
