use url::Url;

use crate::connections::error::ConnectionError;
use crate::models::Location;

/// Builds the endpoint URL for one location. Called on every (re)connect.
pub trait UrlFactory: Send + Sync + 'static {
    /// The websocket URL for `location`.
    fn build(&self, location: &Location) -> Result<Url, ConnectionError>;
}

impl<F> UrlFactory for F
where
    F: Fn(&Location) -> Result<Url, ConnectionError> + Send + Sync + 'static,
{
    fn build(&self, location: &Location) -> Result<Url, ConnectionError> {
        self(location)
    }
}

/// Standard studio endpoint: `{ws base}/databases/{db}/{endpoint}?nodeTag=..&shardNumber=..`.
///
/// The base is given as the server's http(s) URL and rewritten to ws(s).
/// Without a database the path is `/{endpoint}` (server-wide feeds).
#[derive(Debug, Clone)]
pub struct EndpointUrl {
    base: Url,
    database: Option<String>,
    endpoint: String,
    params: Vec<(String, String)>,
}

impl EndpointUrl {
    /// Parses `server_url` and switches its scheme to the websocket one.
    pub fn new(server_url: &str, endpoint: &str) -> Result<Self, ConnectionError> {
        let mut base = Url::parse(server_url).map_err(|e| ConnectionError::InvalidUrl(format!("{server_url}: {e}")))?;

        let ws_scheme = match base.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConnectionError::InvalidUrl(format!(
                    "{server_url}: unsupported scheme '{other}'"
                )))
            }
        };
        base.set_scheme(ws_scheme)
            .map_err(|_| ConnectionError::InvalidUrl(format!("{server_url}: cannot switch scheme")))?;

        Ok(Self {
            base,
            database: None,
            endpoint: endpoint.trim_matches('/').to_string(),
            params: Vec::new(),
        })
    }

    /// Scopes the endpoint to a database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Adds a fixed query parameter, sent on every connect.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

impl UrlFactory for EndpointUrl {
    fn build(&self, location: &Location) -> Result<Url, ConnectionError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ConnectionError::InvalidUrl(format!("{}: cannot be a base", self.base)))?;
            segments.pop_if_empty();
            if let Some(database) = &self.database {
                segments.push("databases").push(database);
            }
            segments.extend(self.endpoint.split('/'));
        }
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in location.query_pairs() {
                query.append_pair(key, &value);
            }
            for (key, value) in &self.params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_database_scoped_url() {
        let urls = EndpointUrl::new("https://a.cluster.test:8080/", "studio-tasks/etl/debug/tracker")
            .unwrap()
            .database("Orders");
        let url = urls.build(&Location::shard("B", 2)).unwrap();
        assert_eq!(
            url.as_str(),
            "wss://a.cluster.test:8080/databases/Orders/studio-tasks/etl/debug/tracker?nodeTag=B&shardNumber=2"
        );
    }

    #[test]
    fn server_wide_endpoint_with_params() {
        let urls = EndpointUrl::new("http://localhost:8080", "admin/logs/watch")
            .unwrap()
            .param("from", "tail");
        let url = urls.build(&Location::node("A")).unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8080/admin/logs/watch?nodeTag=A&from=tail");
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = EndpointUrl::new("ftp://files.test", "x").unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidUrl(_)));
    }

    #[test]
    fn closures_are_factories() {
        let factory = |location: &Location| {
            Url::parse(&format!("ws://fixed.test/{}", location)).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))
        };
        let url = factory.build(&Location::node("C")).unwrap();
        assert_eq!(url.as_str(), "ws://fixed.test/C");
    }
}
