//! FDSN dataselect boundary: raw parameters and credentials in, status and
//! a streamed body out.
//!
//! The service decides the response head before any byte of the body is
//! written. [`DataSelectService::prepare`] does the deciding; the returned
//! [`PreparedQuery`] streams the body once the caller has sent the head.

use crate::access::{Requester, RestrictionAuthority};
use crate::codec::OutputFormat;
use crate::error::{Error, Result};
use crate::index::SegmentIndex;
use crate::query::{
    NoDataReason, QueryResolver, QuerySpec, Resolution, ResponseStreamer, StreamSummary,
};
use hyper::StatusCode;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Version reported by the `version` endpoint
pub const SERVICE_VERSION: &str = "1.1.1";

/// Challenge sent with every 401
pub const AUTHENTICATE_CHALLENGE: &str = "Basic realm=\"restricted area\"";

/// Reason for an empty result, whichever status was asked for
pub const NO_DATA_REASON: &str = "Not Found: No data selected";

/// Username and password presented to `queryauth`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Verifies credentials; user management lives outside this crate
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credentials: &Credentials) -> bool;
}

/// Authenticator over a fixed user table
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    users: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> bool {
        self.users
            .get(&credentials.username)
            .is_some_and(|password| *password == credentials.password)
    }
}

/// How `queryauth` treats the designated public username
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAccess {
    pub enabled: bool,
    pub username: String,
}

/// Response head plus, for successful queries, what was streamed
#[derive(Debug, Clone, PartialEq)]
pub struct DataSelectResponse {
    pub status: StatusCode,
    pub reason: String,
    pub content_type: &'static str,
    /// Set on 401 responses
    pub www_authenticate: Option<&'static str>,
    pub summary: Option<StreamSummary>,
}

impl DataSelectResponse {
    fn text(status: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            content_type: "text/plain",
            www_authenticate: None,
            summary: None,
        }
    }

    fn unauthorized() -> Self {
        Self {
            www_authenticate: Some(AUTHENTICATE_CHALLENGE),
            ..Self::text(StatusCode::UNAUTHORIZED, "Unauthorized")
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// A query with data to send
#[derive(Debug)]
pub struct PreparedQuery {
    request_id: Uuid,
    resolution: Resolution,
    format: OutputFormat,
    streamer: ResponseStreamer,
}

impl PreparedQuery {
    /// Head of the successful response
    pub fn head(&self) -> DataSelectResponse {
        DataSelectResponse {
            content_type: self.format.content_type(),
            ..DataSelectResponse::text(StatusCode::OK, "OK")
        }
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Stream the body. Failures here happen after the head went out, so
    /// they are errors for the transport to abort on rather than statuses.
    pub async fn stream<W>(&self, sink: &mut W, cancel: &CancellationToken) -> Result<StreamSummary>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let span = info_span!("dataselect_stream", request_id = %self.request_id);
        self.streamer
            .stream(&self.resolution, self.format, sink, cancel)
            .instrument(span)
            .await
    }
}

/// The dataselect service
#[derive(Clone)]
pub struct DataSelectService {
    index: Arc<SegmentIndex>,
    restrictions: Arc<RestrictionAuthority>,
    streamer: ResponseStreamer,
    authenticator: Option<Arc<dyn Authenticator>>,
    public: PublicAccess,
}

impl DataSelectService {
    pub fn new(
        index: Arc<SegmentIndex>,
        restrictions: Arc<RestrictionAuthority>,
        streamer: ResponseStreamer,
        public: PublicAccess,
    ) -> Self {
        Self {
            index,
            restrictions,
            streamer,
            authenticator: None,
            public,
        }
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// `version` endpoint: status, content type and body
    pub fn version(&self) -> (StatusCode, &'static str, &'static str) {
        (StatusCode::OK, "text/plain", SERVICE_VERSION)
    }

    /// Requester behind `credentials`, or `None` when they are missing or wrong
    pub fn authenticate(&self, credentials: Option<&Credentials>) -> Option<Requester> {
        let credentials = credentials?;
        if credentials.username == self.public.username {
            return Some(if self.public.enabled {
                Requester::Public
            } else {
                Requester::Anonymous
            });
        }
        let authenticator = self.authenticator.as_ref()?;
        authenticator
            .authenticate(credentials)
            .then(|| Requester::user(credentials.username.clone()))
    }

    /// Validate and resolve a query.
    ///
    /// `Err` carries a complete response (400, 204 or 404) with no body;
    /// `Ok` means there is data to stream.
    pub fn prepare(
        &self,
        params: &[(String, String)],
        requester: Requester,
    ) -> std::result::Result<PreparedQuery, DataSelectResponse> {
        let request_id = Uuid::new_v4();
        let _span = info_span!("dataselect", %request_id, requester = %requester).entered();

        let pairs = params.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        let spec = match QuerySpec::parse(pairs, requester) {
            Ok(spec) => spec,
            Err(Error::Validation(reason)) => {
                info!(%reason, "query rejected");
                return Err(DataSelectResponse::text(StatusCode::BAD_REQUEST, reason));
            }
            Err(e) => {
                warn!(error = %e, "query could not be parsed");
                return Err(DataSelectResponse::text(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.to_string(),
                ));
            }
        };

        let resolver = QueryResolver::new(self.index.snapshot(), self.restrictions.snapshot());
        let resolution = resolver.resolve(&spec);
        let empty = match resolution.empty_reason() {
            Some(reason) => Some(reason),
            None if !resolution.has_samples() => Some(NoDataReason::NoMatch),
            None => None,
        };
        if let Some(reason) = empty {
            // restricted and missing data must look the same from outside
            match reason {
                NoDataReason::Restricted => info!("no data: restricted"),
                NoDataReason::NoMatch => info!("no data: no match"),
            }
            let status = StatusCode::from_u16(spec.nodata.code()).unwrap_or(StatusCode::NO_CONTENT);
            return Err(DataSelectResponse::text(status, NO_DATA_REASON));
        }

        Ok(PreparedQuery {
            request_id,
            resolution,
            format: spec.format,
            streamer: self.streamer.clone(),
        })
    }

    /// Unauthenticated `query` endpoint.
    ///
    /// Without a `format` parameter the response is MiniSEED; a codec that
    /// cannot encode MiniSEED (such as [`crate::codec::JsonCodec`]) then fails
    /// with [`Error::Streaming`] after the 200 head, so callers of such a
    /// codec should pass `format=json`.
    pub async fn query<W>(
        &self,
        params: &[(String, String)],
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<DataSelectResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        self.run(params, Requester::Anonymous, sink, cancel).await
    }

    /// `queryauth` endpoint; answers 401 unless the credentials check out
    pub async fn queryauth<W>(
        &self,
        params: &[(String, String)],
        credentials: Option<&Credentials>,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<DataSelectResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        match self.authenticate(credentials) {
            Some(requester) => self.run(params, requester, sink, cancel).await,
            None => {
                info!(
                    user = credentials.map(|c| c.username.as_str()).unwrap_or("<none>"),
                    "authentication failed"
                );
                Ok(DataSelectResponse::unauthorized())
            }
        }
    }

    async fn run<W>(
        &self,
        params: &[(String, String)],
        requester: Requester,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<DataSelectResponse>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let prepared = match self.prepare(params, requester) {
            Ok(prepared) => prepared,
            Err(response) => return Ok(response),
        };
        let summary = prepared.stream(sink, cancel).await?;
        Ok(DataSelectResponse {
            summary: Some(summary),
            ..prepared.head()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Restriction;
    use crate::codec::{JsonCodec, Trace};
    use crate::core::temporal::Timestamp;
    use crate::ingest::Ingestor;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        service: DataSelectService,
        restrictions: Arc<RestrictionAuthority>,
    }

    fn trace(network: &str, station: &str, channel: &str, start: &str, rate: f64, n: usize) -> Trace {
        Trace {
            network: network.into(),
            station: station.into(),
            location: "".into(),
            channel: channel.into(),
            start: Timestamp::parse(start).unwrap(),
            sampling_rate: rate,
            calibration: Some(1.0),
            quality: Some("D".into()),
            samples: (0..n).map(|i| i as f64).collect(),
        }
    }

    async fn fixture(public_enabled: bool) -> Fixture {
        let dir = TempDir::new().unwrap();
        let codec = JsonCodec::new();
        codec
            .write_container(
                &dir.path().join("rjob.json"),
                &[trace("", "RJOB", "Z", "2005-10-06T07:21:59.850000", 200.0, 100)],
            )
            .unwrap();
        codec
            .write_container(
                &dir.path().join("ta.json"),
                &[
                    trace("TA", "A25A", "BHZ", "2010-03-25T00:00:00", 40.0, 1201),
                    trace("TA", "A25A", "BHN", "2010-03-25T00:00:00", 40.0, 1201),
                    trace("TA", "A25A", "BHE", "2010-03-25T00:00:00", 40.0, 1201),
                ],
            )
            .unwrap();

        let index = Arc::new(SegmentIndex::new());
        let codec = Arc::new(JsonCodec::new());
        Ingestor::new(index.clone(), codec.clone(), 60)
            .index_path(dir.path(), false, 2)
            .await
            .unwrap();

        let restrictions = Arc::new(RestrictionAuthority::new());
        let service = DataSelectService::new(
            index,
            restrictions.clone(),
            ResponseStreamer::new(codec),
            PublicAccess {
                enabled: public_enabled,
                username: "anonymous".into(),
            },
        )
        .with_authenticator(Arc::new(
            StaticAuthenticator::new()
                .with_user("random", "random")
                .with_user("some_dude", "some_dude"),
        ));
        Fixture {
            _dir: dir,
            service,
            restrictions,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ids(body: &[u8]) -> Vec<String> {
        String::from_utf8_lossy(body)
            .lines()
            .map(|l| JsonCodec::parse_response_line(l).unwrap().identity().to_string())
            .collect()
    }

    async fn query(service: &DataSelectService, pairs: &[(&str, &str)]) -> (DataSelectResponse, Vec<u8>) {
        let mut body = Vec::new();
        let response = service
            .query(&params(pairs), &mut body, &CancellationToken::new())
            .await
            .unwrap();
        (response, body)
    }

    #[tokio::test]
    async fn test_version() {
        let f = fixture(false).await;
        assert_eq!(f.service.version(), (StatusCode::OK, "text/plain", "1.1.1"));
    }

    #[tokio::test]
    async fn test_validation_is_a_400() {
        let f = fixture(false).await;
        let (response, body) = query(&f.service, &[]).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert_eq!(response.reason, "Start time must be specified.");
        assert!(body.is_empty());

        let (response, _) = query(&f.service, &[("start", "2012-01-02"), ("end", "2012-01-01")]).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST);
        assert!(response.reason.contains("Start time must be before end time"));
    }

    #[tokio::test]
    async fn test_nodata_status() {
        let f = fixture(false).await;
        let (response, body) = query(&f.service, &[("start", "2012-01-01"), ("end", "2012-01-02")]).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.reason, NO_DATA_REASON);
        assert!(body.is_empty());

        let (response, _) = query(
            &f.service,
            &[("start", "2012-01-01"), ("end", "2012-01-02"), ("nodata", "404")],
        )
        .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.reason, NO_DATA_REASON);
    }

    #[tokio::test]
    async fn test_default_format_needs_a_miniseed_codec() {
        let f = fixture(false).await;
        let pairs = params(&[
            ("station", "RJOB"),
            ("starttime", "2005-10-06T07:21:59"),
            ("endtime", "2005-10-06T07:23:00"),
        ]);
        let prepared = f.service.prepare(&pairs, Requester::Anonymous).unwrap();
        assert_eq!(prepared.head().content_type, "application/vnd.fdsn.mseed");

        let mut body = Vec::new();
        let err = f
            .service
            .query(&pairs, &mut body, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Streaming(_)), "got {err:?}");
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_window_between_samples_is_no_data() {
        let f = fixture(false).await;
        // RJOB samples every 5 ms from 07:21:59.850; nothing lands in this millisecond
        let (response, body) = query(
            &f.service,
            &[
                ("station", "RJOB"),
                ("starttime", "2005-10-06T07:22:00.001"),
                ("endtime", "2005-10-06T07:22:00.002"),
                ("format", "json"),
            ],
        )
        .await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert_eq!(response.reason, NO_DATA_REASON);
        assert!(response.summary.is_none());
        assert!(body.is_empty());

        let (response, body) = query(
            &f.service,
            &[
                ("station", "RJOB"),
                ("starttime", "2005-10-06T07:22:00.001"),
                ("endtime", "2005-10-06T07:22:00.005"),
                ("format", "json"),
            ],
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        let trace = JsonCodec::parse_response_line(String::from_utf8(body).unwrap().trim_end()).unwrap();
        assert_eq!(trace.samples.len(), 1);
    }

    #[tokio::test]
    async fn test_query_streams_data() {
        let f = fixture(false).await;
        let (response, body) = query(
            &f.service,
            &[
                ("network", "TA"),
                ("station", "A25A"),
                ("location", "--"),
                ("channel", "BHZ"),
                ("starttime", "2010-03-25T00:00:00"),
                ("endtime", "2010-03-25T06:00:00"),
                ("format", "json"),
            ],
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.reason, "OK");
        assert_eq!(response.content_type, "application/x-ndjson");
        assert_eq!(response.summary.map(|s| s.segments), Some(1));
        let line = String::from_utf8(body).unwrap();
        let trace = JsonCodec::parse_response_line(line.trim_end()).unwrap();
        assert_eq!(trace.samples.len(), 1201);
    }

    #[tokio::test]
    async fn test_queryauth_requires_valid_credentials() {
        let f = fixture(false).await;
        let window = [("start", "2010-03-25"), ("end", "2010-03-26"), ("format", "json")];
        let cancel = CancellationToken::new();

        for credentials in [None, Some(Credentials::new("random", "random2"))] {
            let mut body = Vec::new();
            let response = f
                .service
                .queryauth(&params(&window), credentials.as_ref(), &mut body, &cancel)
                .await
                .unwrap();
            assert_eq!(response.status, StatusCode::UNAUTHORIZED);
            assert_eq!(response.www_authenticate, Some(AUTHENTICATE_CHALLENGE));
            assert!(body.is_empty());
        }

        let mut body = Vec::new();
        let response = f
            .service
            .queryauth(&params(&window), Some(&Credentials::new("random", "random")), &mut body, &cancel)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(ids(&body).len(), 3);
    }

    #[tokio::test]
    async fn test_restrictions() {
        let f = fixture(false).await;
        let bhe = [
            ("station", "A25A"),
            ("cha", "BHE"),
            ("start", "2010-03-25T00:00:00"),
            ("end", "2010-03-26T00:00:00"),
            ("format", "json"),
        ];
        let (response, body) = query(&f.service, &bhe).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(ids(&body), vec!["TA.A25A..BHE"]);

        f.restrictions.restrict(Restriction::new("TA", "A25A", ["random"]));

        let (response, body) = query(&f.service, &bhe).await;
        assert_eq!(response.status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let (response, body) = query(
            &f.service,
            &[
                ("station", "RJOB"),
                ("cha", "Z"),
                ("start", "2005-01-01T00:00:00"),
                ("end", "2010-03-26T00:00:00"),
                ("format", "json"),
            ],
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(ids(&body), vec![".RJOB..Z"]);

        let cancel = CancellationToken::new();
        let mut body = Vec::new();
        let response = f
            .service
            .queryauth(&params(&bhe), Some(&Credentials::new("random", "random")), &mut body, &cancel)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(ids(&body), vec!["TA.A25A..BHE"]);

        let mut body = Vec::new();
        let response = f
            .service
            .queryauth(&params(&bhe), Some(&Credentials::new("some_dude", "some_dude")), &mut body, &cancel)
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_public_username() {
        let disabled = fixture(false).await;
        let public = Credentials::new("anonymous", "");
        assert_eq!(disabled.service.authenticate(Some(&public)), Some(Requester::Anonymous));

        let enabled = fixture(true).await;
        assert_eq!(enabled.service.authenticate(Some(&public)), Some(Requester::Public));
        enabled
            .restrictions
            .restrict(Restriction::new("TA", "A25A", Vec::<String>::new()));

        let mut body = Vec::new();
        let response = enabled
            .service
            .queryauth(
                &params(&[("net", "TA"), ("start", "2010-03-25"), ("end", "2010-03-26"), ("format", "json")]),
                Some(&public),
                &mut body,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(ids(&body).len(), 3);
    }
}
