//! Main database implementation

use crate::access::{Restriction, RestrictionAuthority};
use crate::api::{Authenticator, DataSelectService, PublicAccess};
use crate::codec::{JsonCodec, WaveformCodec};
use crate::config::Config;
use crate::core::segment::FileRecord;
use crate::error::Result;
use crate::index::{IndexStats, SegmentIndex};
use crate::ingest::pipeline::normalize_path;
use crate::ingest::{BulkReport, EventOutcome, FsEvent, IngestOutcome, Ingestor};
use crate::query::{QueryResolver, QuerySpec, Resolution, ResponseStreamer, StreamSummary};
use crate::storage::{CatalogSnapshot, CatalogStore, FileCatalog, InMemoryCatalog};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main waveform database
pub struct WaveformDB {
    config: Config,
    index: Arc<SegmentIndex>,
    restrictions: Arc<RestrictionAuthority>,
    codec: Arc<dyn WaveformCodec>,
    ingestor: Ingestor,
    catalog: Arc<dyn CatalogStore>,
}

impl WaveformDB {
    /// Create an in-memory database reading JSON containers
    pub fn in_memory() -> Result<Self> {
        Self::with_parts(
            Config::default(),
            Arc::new(JsonCodec::new()),
            Arc::new(InMemoryCatalog::new()),
        )
    }

    /// Open a database, restoring the catalog named by `config` if it exists
    pub async fn open(config: Config, codec: Arc<dyn WaveformCodec>) -> Result<Self> {
        let catalog: Arc<dyn CatalogStore> = match &config.catalog_path {
            Some(path) => Arc::new(FileCatalog::new(path.clone())),
            None => Arc::new(InMemoryCatalog::new()),
        };
        let db = Self::with_parts(config, codec, catalog)?;
        db.load().await?;
        Ok(db)
    }

    fn with_parts(
        config: Config,
        codec: Arc<dyn WaveformCodec>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Result<Self> {
        config.validate()?;
        let index = Arc::new(SegmentIndex::new());
        let ingestor = Ingestor::new(index.clone(), codec.clone(), config.preview_bucket_secs);
        Ok(Self {
            config,
            index,
            restrictions: Arc::new(RestrictionAuthority::new()),
            codec,
            ingestor,
            catalog,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<SegmentIndex> {
        &self.index
    }

    pub fn restrictions(&self) -> &Arc<RestrictionAuthority> {
        &self.restrictions
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    /// Ingest a single file
    pub async fn ingest(&self, path: impl AsRef<Path>) -> Result<IngestOutcome> {
        self.ingestor.ingest(path).await
    }

    /// Apply a file monitor event
    pub async fn handle_event(&self, event: &FsEvent) -> Result<EventOutcome> {
        self.ingestor.handle_event(event).await
    }

    /// Index a directory tree with the configured number of workers
    pub async fn index_path(&self, root: impl AsRef<Path>, purge: bool) -> Result<BulkReport> {
        self.ingestor
            .index_path(root.as_ref(), purge, self.config.ingest_workers)
            .await
    }

    /// Drop the record of a file and its segments
    pub fn remove_file(&self, path: impl AsRef<Path>) -> Result<Option<FileRecord>> {
        Ok(self.index.delete_file(&normalize_path(path.as_ref())?))
    }

    /// Restrict a (network, station) pair, returning the restriction it replaced
    pub fn restrict(&self, restriction: Restriction) -> Option<Restriction> {
        self.restrictions.restrict(restriction)
    }

    pub fn unrestrict(&self, network: &str, station: &str) -> Option<Restriction> {
        self.restrictions.unrestrict(network, station)
    }

    /// Resolve a query against the current index and restrictions
    pub fn resolve(&self, spec: &QuerySpec) -> Resolution {
        QueryResolver::new(self.index.snapshot(), self.restrictions.snapshot()).resolve(spec)
    }

    /// Resolve and stream a query; `None` when it selects no sample
    pub async fn query<W>(
        &self,
        spec: &QuerySpec,
        sink: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Option<StreamSummary>>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let resolution = self.resolve(spec);
        if resolution.is_empty() || !resolution.has_samples() {
            return Ok(None);
        }
        self.streamer()
            .stream(&resolution, spec.format, sink, cancel)
            .await
            .map(Some)
    }

    pub fn streamer(&self) -> ResponseStreamer {
        ResponseStreamer::new(self.codec.clone())
    }

    /// Dataselect service over this database
    pub fn dataselect(&self, authenticator: Option<Arc<dyn Authenticator>>) -> DataSelectService {
        let service = DataSelectService::new(
            self.index.clone(),
            self.restrictions.clone(),
            self.streamer(),
            PublicAccess {
                enabled: self.config.allow_public_requester,
                username: self.config.public_username.clone(),
            },
        );
        match authenticator {
            Some(authenticator) => service.with_authenticator(authenticator),
            None => service,
        }
    }

    /// Persist the index and restrictions to the catalog
    pub async fn save(&self) -> Result<()> {
        let snapshot =
            CatalogSnapshot::capture(&self.index.snapshot(), &self.restrictions.snapshot());
        self.catalog.save(&snapshot).await
    }

    async fn load(&self) -> Result<()> {
        if let Some(snapshot) = self.catalog.load().await? {
            self.restrictions.replace_all(snapshot.restrictions);
            self.index.restore(snapshot.files, snapshot.segments)?;
            info!(stats = ?self.index.stats(), "catalog restored");
        }
        Ok(())
    }
}
