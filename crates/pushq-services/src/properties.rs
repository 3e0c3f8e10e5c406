//! Job and build metadata written into the record and the source tree.

use async_trait::async_trait;
use pushq_core::stage::MetadataWriter;
use pushq_core::{Error, JobRecord};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use tracing::debug;

/// Manifest written at the root of the unpacked source tree.
pub const MANIFEST_FILE: &str = "pushq.json";

/// Writes the `job.*`, `build.*` and `assets.*` properties.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropertyWriter;

impl PropertyWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MetadataWriter for PropertyWriter {
    async fn add_job_properties(&self, mut job: JobRecord) -> pushq_core::Result<JobRecord> {
        let payload = job.submit_payload()?;

        let id = job.id.to_string();
        let submitted_at = job.created_at.to_rfc3339();
        job.properties.insert("job.id", id);
        job.properties.insert("job.repository", payload.repository);
        job.properties.insert("job.owner", payload.owner_email);
        job.properties.insert("job.submitted_at", submitted_at);

        debug!(job_id = %job.id, "Added job properties");
        Ok(job)
    }

    async fn add_build_properties(&self, mut job: JobRecord) -> pushq_core::Result<JobRecord> {
        let source = job.properties.require_str("archive.path")?.to_string();
        let payload = job.submit_payload()?;

        job.properties.insert("build.source", source);
        for (key, value) in payload.build {
            job.properties.insert(format!("build.{key}"), value);
        }

        debug!(job_id = %job.id, "Added build properties");
        Ok(job)
    }

    async fn add_generated_assets(&self, mut job: JobRecord) -> pushq_core::Result<JobRecord> {
        let build: Map<String, Value> = job
            .properties
            .with_prefix("build.")
            .map(|(k, v)| (k.trim_start_matches("build.").to_string(), v.clone()))
            .collect();
        if build.is_empty() {
            return Err(Error::MissingProperty("build.*".to_string()));
        }
        let source = PathBuf::from(job.properties.require_str("archive.path")?);

        let manifest = json!({
            "job": job.id.as_str(),
            "repository": job.properties.get("job.repository"),
            "owner": job.properties.get("job.owner"),
            "submitted_at": job.properties.get("job.submitted_at"),
            "build": build,
        });
        let path = source.join(MANIFEST_FILE);
        let contents = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| Error::Internal(format!("manifest encoding: {e}")))?;
        tokio::fs::write(&path, contents).await?;

        job.properties
            .insert("assets.manifest", path.to_string_lossy().into_owned());
        debug!(job_id = %job.id, path = %path.display(), "Wrote generated assets");
        Ok(job)
    }
}
