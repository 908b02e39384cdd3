//! Free-text location search against a Nominatim-compatible endpoint.
//!
//! `GeocodeClient` is generic over an async `GeocodeTransport` so lookups can
//! be tested without the network. The client is stateless: staleness of
//! results is decided by the caller, never here.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;

use evdash::{Coordinates, GeocodeError, GeocoderSection};

/// Raw HTTP GET returning the response body.
pub trait GeocodeTransport: Send + Sync {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> impl Future<Output = Result<Vec<u8>, GeocodeError>> + Send;
}

/// reqwest-backed transport with an optional request timeout and a
/// User-Agent (Nominatim's usage policy rejects anonymous clients).
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Option<Duration>, user_agent: &str) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
        })
    }
}

impl GeocodeTransport for ReqwestTransport {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, GeocodeError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Transport(format!("HTTP {status}")));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| GeocodeError::Transport(e.to_string()))
    }
}

/// Resolves a query to the first matching candidate's coordinates.
pub struct GeocodeClient<T> {
    endpoint: String,
    transport: T,
}

pub type Geocoder = GeocodeClient<ReqwestTransport>;

impl Geocoder {
    pub fn from_section(section: &GeocoderSection) -> Result<Self, reqwest::Error> {
        let transport = ReqwestTransport::new(section.request_timeout(), &section.user_agent)?;
        Ok(GeocodeClient::new(section.endpoint.clone(), transport))
    }
}

impl<T: GeocodeTransport> GeocodeClient<T> {
    pub fn new(endpoint: impl Into<String>, transport: T) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Look up `query`. A blank query fails with `EmptyQuery` without a
    /// request being made.
    pub async fn lookup(&self, query: &str) -> Result<Coordinates, GeocodeError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(GeocodeError::EmptyQuery);
        }
        tracing::debug!("geocode: looking up {query:?}");
        let body = self
            .transport
            .get(&self.endpoint, &[("format", "json"), ("q", query)])
            .await?;
        parse_candidates(&body)
    }
}

/// Nominatim encodes coordinates as decimal strings; accept numbers too.
#[derive(Deserialize)]
#[serde(untagged)]
enum Coord {
    Text(String),
    Number(f64),
}

impl Coord {
    fn value(&self) -> Option<f64> {
        let v = match self {
            Coord::Text(s) => s.trim().parse::<f64>().ok()?,
            Coord::Number(n) => *n,
        };
        v.is_finite().then_some(v)
    }
}

#[derive(Deserialize)]
struct Candidate {
    lat: Coord,
    lon: Coord,
}

/// Take the first candidate of a search response.
fn parse_candidates(body: &[u8]) -> Result<Coordinates, GeocodeError> {
    let candidates: Vec<Candidate> = serde_json::from_slice(body)
        .map_err(|e| GeocodeError::Transport(format!("invalid response: {e}")))?;
    let first = candidates.first().ok_or(GeocodeError::NoResults)?;
    match (first.lat.value(), first.lon.value()) {
        (Some(lat), Some(lng)) => Ok(Coordinates::new(lat, lng)),
        _ => Err(GeocodeError::Transport("malformed coordinates".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockTransport {
        response: Result<Vec<u8>, GeocodeError>,
        calls: AtomicUsize,
        last_query: Mutex<Vec<(String, String)>>,
    }

    impl MockTransport {
        fn body(body: &str) -> Self {
            Self::result(Ok(body.as_bytes().to_vec()))
        }

        fn result(response: Result<Vec<u8>, GeocodeError>) -> Self {
            Self {
                response,
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(Vec::new()),
            }
        }
    }

    impl GeocodeTransport for MockTransport {
        async fn get(&self, _url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = query
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            self.response.clone()
        }
    }

    fn client(transport: MockTransport) -> GeocodeClient<MockTransport> {
        GeocodeClient::new("https://geo.test/search", transport)
    }

    #[tokio::test]
    async fn first_candidate_wins() {
        let c = client(MockTransport::body(
            r#"[{"lat":"48.8566","lon":"2.3522","display_name":"Paris"},
                {"lat":"33.66","lon":"-95.55","display_name":"Paris, TX"}]"#,
        ));
        let pos = c.lookup("Paris").await.unwrap();
        assert_eq!(pos, Coordinates::new(48.8566, 2.3522));

        let sent = c.transport.last_query.lock().unwrap().clone();
        assert!(sent.contains(&("format".into(), "json".into())));
        assert!(sent.contains(&("q".into(), "Paris".into())));
    }

    #[tokio::test]
    async fn numeric_coordinates_accepted() {
        let c = client(MockTransport::body(r#"[{"lat":35.68,"lon":139.69}]"#));
        assert_eq!(
            c.lookup("Tokyo").await.unwrap(),
            Coordinates::new(35.68, 139.69)
        );
    }

    #[tokio::test]
    async fn blank_query_never_reaches_transport() {
        let c = client(MockTransport::body("[]"));
        assert_eq!(c.lookup("").await, Err(GeocodeError::EmptyQuery));
        assert_eq!(c.lookup("   \t").await, Err(GeocodeError::EmptyQuery));
        assert_eq!(c.transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_result_list_is_no_results() {
        let c = client(MockTransport::body("[]"));
        assert_eq!(c.lookup("zzzz").await, Err(GeocodeError::NoResults));
        assert_eq!(c.transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_failure_passes_through() {
        let c = client(MockTransport::result(Err(GeocodeError::Transport(
            "HTTP 503 Service Unavailable".into(),
        ))));
        assert!(matches!(
            c.lookup("Paris").await,
            Err(GeocodeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn garbage_body_is_transport_error() {
        let c = client(MockTransport::body("<html>rate limited</html>"));
        assert!(matches!(
            c.lookup("Paris").await,
            Err(GeocodeError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn unparseable_coordinates_are_transport_error() {
        let c = client(MockTransport::body(r#"[{"lat":"north","lon":"2.35"}]"#));
        assert_eq!(
            c.lookup("Paris").await,
            Err(GeocodeError::Transport("malformed coordinates".into()))
        );
    }

    #[test]
    fn query_is_trimmed_before_sending() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let c = client(MockTransport::body(r#"[{"lat":"1","lon":"2"}]"#));
        rt.block_on(c.lookup("  Bengaluru  ")).unwrap();
        let sent = c.transport.last_query.lock().unwrap().clone();
        assert!(sent.contains(&("q".into(), "Bengaluru".into())));
    }
}
