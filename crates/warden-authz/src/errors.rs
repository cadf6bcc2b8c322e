#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// A membership repository call failed. Propagated to the caller
    /// unchanged: a failed load must stay distinguishable from "no
    /// access" and from an unknown connection.
    #[error("membership repository failure: {0}")]
    Repository(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AuthzError {
    pub fn repository<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Repository(Box::new(source))
    }
}

impl From<sqlx::Error> for AuthzError {
    fn from(error: sqlx::Error) -> Self {
        Self::repository(error)
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
