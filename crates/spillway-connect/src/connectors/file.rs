//! Line file importer
//!
//! Reads a local file one line at a time and submits every line as a record
//! to the importer's formatter. Stop is honoured between lines. Progress is
//! tracked as a line commit point: every line below it has been written or
//! deliberately skipped.
//!
//! Properties:
//! - `path` (required): file to read
//! - `skip_header` (optional, default `false`): ignore the first line
//! - `commit_leeway` (optional, default 1024)

use crate::error::{ConnectorError, ConnectorResult};
use crate::format::FormatterBuilder;
use crate::import::{
    parse_property, require_property, CommitTracker, ResourceDescriptor, ResourceId,
};
use crate::traits::importer::{ImportContext, Importer};
use crate::traits::registry::ImporterFactory;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

const DEFAULT_COMMIT_LEEWAY: usize = 1024;

/// Imports the lines of one local file
#[derive(Debug)]
pub struct FileImporter {
    descriptor: ResourceDescriptor,
    path: PathBuf,
    skip_header: bool,
    progress: Arc<Mutex<CommitTracker>>,
}

impl FileImporter {
    /// Build from a resource descriptor. Fails naming the property if `path`
    /// is missing or another property is malformed.
    pub fn from_descriptor(descriptor: ResourceDescriptor) -> ConnectorResult<Self> {
        let path = PathBuf::from(descriptor.require("path")?);
        let skip_header =
            parse_property::<bool>(&descriptor.properties, "skip_header")?.unwrap_or(false);
        let leeway = parse_property::<usize>(&descriptor.properties, "commit_leeway")?
            .unwrap_or(DEFAULT_COMMIT_LEEWAY);
        let tracker = CommitTracker::new(leeway)?;

        Ok(Self {
            descriptor,
            path,
            skip_header,
            progress: Arc::new(Mutex::new(tracker)),
        })
    }

    /// Build from raw properties, deriving the resource id from `path`
    pub fn from_properties(
        properties: &HashMap<String, String>,
        formatter: FormatterBuilder,
    ) -> ConnectorResult<Self> {
        let path = require_property(properties, "path")?;
        let resource = ResourceId::from_file_path(Path::new(path))?;
        let mut descriptor = ResourceDescriptor::new(resource, formatter);
        descriptor.properties = properties.clone();
        Self::from_descriptor(descriptor)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of leading lines fully handled
    pub fn committed_lines(&self) -> u64 {
        self.progress.lock().safe_point()
    }
}

#[async_trait]
impl Importer for FileImporter {
    fn resource_id(&self) -> &ResourceId {
        &self.descriptor.resource_id
    }

    fn name(&self) -> &str {
        "file"
    }

    fn formatter_builder(&self) -> &FormatterBuilder {
        &self.descriptor.formatter
    }

    async fn accept(&self, ctx: &ImportContext) -> ConnectorResult<()> {
        let file = tokio::fs::File::open(&self.path).await.map_err(|e| {
            ConnectorError::Connection(format!("cannot open {}: {}", self.path.display(), e))
        })?;
        let mut lines = BufReader::new(file).lines();
        let mut line_no: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.stopped() => {
                    debug!(resource = %self.resource_id(), line = line_no, "Stop requested");
                    break;
                }
                next = lines.next_line() => next?,
            };
            let Some(line) = next else {
                break;
            };

            let seq = line_no;
            line_no += 1;
            self.progress.lock().submit(seq);

            let record = line.strip_suffix('\r').unwrap_or(&line);
            let header = seq == 0 && self.skip_header;
            if !header && !record.trim().is_empty() {
                ctx.submit(record.as_bytes()).await?;
            }
            self.progress.lock().commit(seq);
        }

        info!(
            resource = %self.resource_id(),
            lines = self.committed_lines(),
            "File import done"
        );
        Ok(())
    }
}

/// Factory for [`FileImporter`]
pub struct FileImporterFactory;

impl ImporterFactory for FileImporterFactory {
    fn name(&self) -> &'static str {
        "file"
    }

    fn create(
        &self,
        properties: &HashMap<String, String>,
        formatter: FormatterBuilder,
    ) -> ConnectorResult<Arc<dyn Importer>> {
        Ok(Arc::new(FileImporter::from_properties(properties, formatter)?))
    }
}
