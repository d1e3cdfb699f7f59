#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("cluster watch stream failed: {source}")]
    Watch {
        #[from]
        source: kube::runtime::watcher::Error,
    },

    #[error("request to {target} failed: {source}")]
    Http {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{target} responded with status {status}: {body}")]
    RemoteStatus {
        target: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to dispatch ssh reboot to node '{node}': {source}")]
    Ssh {
        node: String,
        #[source]
        source: std::io::Error,
    },

    #[error("no machine record found for node '{0}'")]
    MachineNotFound(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("cluster bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("operation cancelled")]
    Cancelled,
}
