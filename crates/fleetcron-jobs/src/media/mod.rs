//! Video transcoding pipeline.
//!
//! The coordinator splits each upload into fixed-length segments, workers
//! convert one leased segment at a time, and the coordinator reassembles the
//! converted segments and renders a thumbnail. Folder state is nothing but
//! the marker files described in [`layout`], so every step can be re-run
//! after a crash and a step with nothing left to do writes nothing.

pub mod layout;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use fleetcron_media::{concat_manifest, MediaTools};
use fleetcron_models::media::{
    segment_count, segment_file_name, split_extension, CONCAT_MANIFEST, MEDIA_CONVERTED_DIR, MEDIA_CONVERT_DIR,
    SEGMENTS_MANIFEST, SPLIT_MARKER,
};
use fleetcron_models::{
    Ack, ConvertedSegment, JobMode, JobPhase, MachineId, SegmentManifest, SegmentName, SegmentTask, VideoStage,
};
use fleetcron_storage::{LeaseManager, StagingStore};

use crate::config::MediaConfig;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobContext};
use crate::logging::JobLogger;
use crate::metrics;

use layout::{convert_key, converted_key, list_folders, validate_name};

pub const JOB_NAME: &str = "media";

pub struct MediaJob {
    ctx: JobContext,
    config: MediaConfig,
    tools: Arc<dyn MediaTools>,
}

impl MediaJob {
    pub fn new(ctx: JobContext, config: MediaConfig, tools: Arc<dyn MediaTools>) -> Self {
        Self { ctx, config, tools }
    }

    fn staging(&self) -> &dyn StagingStore {
        self.ctx.staging.as_ref()
    }

    fn lease_for(&self, holder: &MachineId) -> LeaseManager {
        LeaseManager::new(
            self.ctx.staging.clone(),
            holder.clone(),
            Duration::from_std(self.config.file_timestamp_limit).unwrap_or_else(|_| Duration::minutes(30)),
        )
    }

    async fn fetch(&self, key: &str) -> JobResult<Vec<u8>> {
        self.staging()
            .get(key)
            .await?
            .ok_or_else(|| JobError::job_failed(format!("{} disappeared from the staging area", key)))
    }

    async fn read_manifest(&self, key: &str) -> JobResult<Option<SegmentManifest>> {
        match self.staging().get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// An original upload: convertible extension and not one of our segments.
    fn is_upload(&self, file: &str) -> bool {
        SegmentName::parse(file).is_none()
            && split_extension(file).is_some_and(|(_, ext)| self.config.is_convertible(&ext))
    }

    fn is_raw_segment(&self, file: &str) -> Option<SegmentName> {
        SegmentName::parse(file).filter(|name| self.config.is_convertible(&name.ext))
    }

    /// Current pipeline stage of `folder`, derived from its markers.
    pub async fn folder_stage(&self, folder: &str) -> JobResult<Option<VideoStage>> {
        let staging = self.staging();
        let converted = self.read_manifest(&converted_key(folder, SEGMENTS_MANIFEST)).await?;
        let finished = list_folders(staging, MEDIA_CONVERTED_DIR).await?.remove(folder).unwrap_or_default();

        let has_thumbnail = finished.iter().any(|f| f.ends_with(".jpg"));
        match converted {
            None if has_thumbnail => return Ok(Some(VideoStage::Delivered)),
            Some(manifest) => {
                if finished.contains(&manifest.thumbnail_name()) {
                    return Ok(Some(VideoStage::ThumbnailGenerated));
                }
                if finished.contains(&manifest.final_name()) {
                    return Ok(Some(VideoStage::Concatenated));
                }
                return Ok(Some(VideoStage::AllConverted));
            }
            None => {}
        }

        let pending = list_folders(staging, MEDIA_CONVERT_DIR).await?.remove(folder).unwrap_or_default();
        if pending.contains(SPLIT_MARKER) {
            Ok(Some(VideoStage::Split))
        } else if pending.iter().any(|f| self.is_upload(f)) {
            Ok(Some(VideoStage::Uploaded))
        } else {
            Ok(None)
        }
    }

    /// Split new uploads into segments. A folder carries one video through
    /// the pipeline at a time; further uploads wait until it has left
    /// `media_convert`.
    async fn split_uploads(&self) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Prepare);
        for (folder, files) in list_folders(self.staging(), MEDIA_CONVERT_DIR).await? {
            let uploads: Vec<&String> = files.iter().filter(|f| self.is_upload(f)).collect();
            let result = if files.contains(SPLIT_MARKER) {
                self.drop_split_upload(&folder, &uploads).await
            } else if let Some(upload) = uploads.first() {
                if uploads.len() > 1 {
                    logger.log_progress(&format!(
                        "{}: {} more uploads wait for {}",
                        folder,
                        uploads.len() - 1,
                        upload
                    ));
                }
                self.split_one(&folder, upload).await
            } else {
                Ok(())
            };
            if let Err(e) = result {
                if e.is_fatal() {
                    return Err(e);
                }
                logger.log_warning(&format!("{}: {}", folder, e));
            }
        }
        Ok(())
    }

    /// Split finished but the upload delete did not. Only the upload named
    /// by the manifest goes; later uploads stay for their own turn.
    async fn drop_split_upload(&self, folder: &str, uploads: &[&String]) -> JobResult<()> {
        let Some(manifest) = self.read_manifest(&convert_key(folder, SEGMENTS_MANIFEST)).await? else {
            return Ok(());
        };
        for upload in uploads.iter().filter(|u| is_source_of(&manifest, u)) {
            self.staging().delete(&convert_key(folder, upload)).await?;
        }
        Ok(())
    }

    async fn split_one(&self, folder: &str, upload: &str) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Prepare);
        let Some((stem, ext)) = split_extension(upload) else {
            return Ok(());
        };
        let upload_key = convert_key(folder, upload);
        let data = self.fetch(&upload_key).await?;

        let work = tempfile::tempdir()?;
        let input = work.path().join(format!("input.{}", ext));
        tokio::fs::write(&input, &data).await?;

        let duration = self.tools.probe_duration(&input).await?;
        let seconds = self.config.segment_seconds;
        let count = segment_count(duration, seconds);
        if count == 0 {
            logger.log_warning(&format!("{}/{} has no playable duration, skipping", folder, upload));
            return Ok(());
        }

        for index in 0..count {
            let name = segment_file_name(stem, index, &ext);
            let output = work.path().join(&name);
            let start = (index as f64) * f64::from(seconds);
            let length = (duration - start).min(f64::from(seconds));
            self.tools.cut_segment(&input, &output, start, length).await?;
            let bytes = tokio::fs::read(&output).await?;
            self.staging().put(&convert_key(folder, &name), &bytes).await?;
        }

        let manifest = SegmentManifest {
            stem: stem.to_string(),
            source_ext: ext.clone(),
            segments: count,
            segment_seconds: seconds,
        };
        self.staging()
            .put(&convert_key(folder, SEGMENTS_MANIFEST), &serde_json::to_vec(&manifest)?)
            .await?;
        self.staging()
            .put(&convert_key(folder, SPLIT_MARKER), Utc::now().to_rfc3339().as_bytes())
            .await?;
        self.staging().delete(&upload_key).await?;

        logger.log_progress(&format!(
            "{}/{}: {:.1}s split into {} segments",
            folder, upload, duration, count
        ));
        Ok(())
    }

    /// Move folders whose segments are all converted out of `media_convert`.
    async fn collect_converted(&self) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Finish);
        let finished = list_folders(self.staging(), MEDIA_CONVERTED_DIR).await?;

        for (folder, files) in list_folders(self.staging(), MEDIA_CONVERT_DIR).await? {
            if !files.contains(SPLIT_MARKER) {
                continue;
            }
            let done = finished.get(&folder).cloned().unwrap_or_default();
            if let Err(e) = self.collect_one(&folder, &files, &done).await {
                if e.is_fatal() {
                    return Err(e);
                }
                logger.log_warning(&format!("{}: {}", folder, e));
            }
        }
        Ok(())
    }

    async fn collect_one(
        &self,
        folder: &str,
        files: &std::collections::BTreeSet<String>,
        done: &std::collections::BTreeSet<String>,
    ) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Finish);
        let Some(manifest) = self.read_manifest(&convert_key(folder, SEGMENTS_MANIFEST)).await? else {
            logger.log_warning(&format!("{} is split but has no segment manifest", folder));
            return Ok(());
        };
        let converted = manifest.converted_names().iter().filter(|name| done.contains(*name)).count();
        if converted != manifest.segments {
            return Ok(());
        }
        // The previous video of this folder is still being assembled.
        if let Some(current) = self.read_manifest(&converted_key(folder, SEGMENTS_MANIFEST)).await? {
            if current != manifest {
                return Ok(());
            }
        }

        for marker in [SEGMENTS_MANIFEST, SPLIT_MARKER] {
            let body = self.fetch(&convert_key(folder, marker)).await?;
            self.staging().put_if_absent(&converted_key(folder, marker), &body).await?;
        }
        // Everything of this video goes; uploads queued behind it stay.
        for file in files {
            if self.is_upload(file) && !is_source_of(&manifest, file) {
                continue;
            }
            self.staging().delete(&convert_key(folder, file)).await?;
        }
        logger.log_progress(&format!("{}: all {} segments converted", folder, manifest.segments));
        Ok(())
    }

    /// Concatenate, thumbnail and clean up folders in `media_converted`.
    async fn assemble(&self) -> JobResult<()> {
        for (folder, files) in list_folders(self.staging(), MEDIA_CONVERTED_DIR).await? {
            if !files.contains(SEGMENTS_MANIFEST) {
                continue;
            }
            if let Err(e) = self.assemble_one(&folder).await {
                if e.is_fatal() {
                    return Err(e);
                }
                JobLogger::new(JOB_NAME, JobPhase::Finish).log_warning(&format!("{}: {}", folder, e));
            }
        }
        Ok(())
    }

    async fn assemble_one(&self, folder: &str) -> JobResult<()> {
        let logger = JobLogger::new(JOB_NAME, JobPhase::Finish);
        let Some(manifest) = self.read_manifest(&converted_key(folder, SEGMENTS_MANIFEST)).await? else {
            return Ok(());
        };
        let segments = manifest.converted_names();
        let final_key = converted_key(folder, &manifest.final_name());
        let thumbnail_key = converted_key(folder, &manifest.thumbnail_name());
        let concat_key = converted_key(folder, CONCAT_MANIFEST);

        if !self.staging().exists(&final_key).await? {
            self.staging()
                .put_if_absent(&concat_key, concat_manifest(&segments).as_bytes())
                .await?;

            let work = tempfile::tempdir()?;
            for name in &segments {
                let bytes = self.fetch(&converted_key(folder, name)).await?;
                tokio::fs::write(work.path().join(name), bytes).await?;
            }
            let manifest_path = work.path().join(CONCAT_MANIFEST);
            tokio::fs::write(&manifest_path, self.fetch(&concat_key).await?).await?;

            let output = work.path().join(manifest.final_name());
            self.tools.concatenate(&manifest_path, &output).await?;
            self.staging().put(&final_key, &tokio::fs::read(&output).await?).await?;
            logger.log_progress(&format!("{}: {} segments concatenated", folder, segments.len()));
        }

        // Concatenated: the segments and their manifest are no longer needed.
        for name in segments.iter().map(String::as_str).chain([CONCAT_MANIFEST]) {
            self.staging().delete(&converted_key(folder, name)).await?;
        }

        if !self.staging().exists(&thumbnail_key).await? {
            let work = tempfile::tempdir()?;
            let video = work.path().join(manifest.final_name());
            tokio::fs::write(&video, self.fetch(&final_key).await?).await?;
            let output = work.path().join(manifest.thumbnail_name());
            self.tools.thumbnail(&video, &output).await?;
            self.staging().put(&thumbnail_key, &tokio::fs::read(&output).await?).await?;
        }

        for marker in [SEGMENTS_MANIFEST, SPLIT_MARKER] {
            self.staging().delete(&converted_key(folder, marker)).await?;
        }
        metrics::record_video_delivered();
        logger.log_completion(&format!("{} delivered as {}", folder, manifest.final_name()));
        Ok(())
    }

    async fn transcode_segment(&self, task: &SegmentTask, name: &SegmentName, dir: &Path) -> JobResult<Vec<u8>> {
        let input = dir.join(&task.file);
        let output = dir.join(name.converted());
        tokio::fs::write(&input, &task.data).await?;
        self.tools.transcode(&input, &output).await?;
        Ok(tokio::fs::read(&output).await?)
    }
}

/// Whether `file` is the upload `manifest` was split from.
fn is_source_of(manifest: &SegmentManifest, file: &str) -> bool {
    split_extension(file).is_some_and(|(stem, ext)| stem == manifest.stem && ext == manifest.source_ext)
}

#[async_trait]
impl Job for MediaJob {
    type Task = SegmentTask;
    type Outcome = ConvertedSegment;

    fn name(&self) -> &str {
        JOB_NAME
    }

    fn mode(&self) -> JobMode {
        JobMode::default().with_coordinator_worker(self.config.coordinator_runs_worker_tasks)
    }

    async fn check_prerequisites(&self) -> bool {
        match self.tools.available() {
            Ok(()) => true,
            Err(e) => {
                JobLogger::new(JOB_NAME, JobPhase::CheckPrerequisites).log_warning(&e.to_string());
                false
            }
        }
    }

    async fn nondistributed_tasks(&self) -> JobResult<()> {
        self.prepare_tasks().await?;
        let me = self.ctx.machine_id.clone();
        while let Some(task) = self.get_tasks(&me).await? {
            let Some(converted) = self.do_tasks(task).await? else {
                continue;
            };
            self.put_tasks(&me, converted).await?;
        }
        self.finish_tasks().await
    }

    async fn prepare_tasks(&self) -> JobResult<()> {
        self.split_uploads().await
    }

    async fn finish_tasks(&self) -> JobResult<()> {
        self.collect_converted().await?;
        self.assemble().await
    }

    async fn get_tasks(&self, worker: &MachineId) -> JobResult<Option<SegmentTask>> {
        let lease = self.lease_for(worker);
        let done = list_folders(self.staging(), MEDIA_CONVERTED_DIR).await?;

        for (folder, files) in list_folders(self.staging(), MEDIA_CONVERT_DIR).await? {
            if !files.contains(SPLIT_MARKER) {
                continue;
            }
            for file in &files {
                let Some(name) = self.is_raw_segment(file) else {
                    continue;
                };
                if done.get(&folder).is_some_and(|d| d.contains(&name.converted())) {
                    continue;
                }
                let marker = convert_key(&folder, &name.lease_marker());
                let outcome = lease.claim(&marker).await?;
                metrics::record_lease_claim(JOB_NAME, outcome.as_str());
                if !outcome.is_acquired() {
                    continue;
                }
                let Some(data) = self.staging().get(&convert_key(&folder, file)).await? else {
                    lease.release(&marker).await?;
                    continue;
                };
                JobLogger::new(JOB_NAME, JobPhase::GetTasks)
                    .log_progress(&format!("{}/{} to {}", folder, file, worker));
                return Ok(Some(SegmentTask {
                    folder,
                    file: file.clone(),
                    data,
                }));
            }
        }
        Ok(None)
    }

    async fn do_tasks(&self, task: SegmentTask) -> JobResult<Option<ConvertedSegment>> {
        validate_name(&task.folder)?;
        let name = SegmentName::parse(&task.file)
            .ok_or_else(|| JobError::malformed(format!("not a segment name: {}", task.file)))?;

        let work = tempfile::tempdir()?;
        match self.transcode_segment(&task, &name, work.path()).await {
            Ok(data) => Ok(Some(ConvertedSegment {
                folder: task.folder,
                file: name.converted(),
                source_file: task.file,
                data,
            })),
            Err(JobError::Media(e)) if !e.is_tool_missing() => {
                // The lease expires and another attempt follows.
                JobLogger::new(JOB_NAME, JobPhase::DoTasks)
                    .log_warning(&format!("{}/{}: {}", task.folder, task.file, e));
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn put_tasks(&self, worker: &MachineId, outcome: ConvertedSegment) -> JobResult<Ack> {
        validate_name(&outcome.folder)?;
        let name = SegmentName::parse(&outcome.source_file)
            .ok_or_else(|| JobError::malformed(format!("not a segment name: {}", outcome.source_file)))?;
        if outcome.file != name.converted() {
            return Err(JobError::malformed(format!(
                "{} does not match source {}",
                outcome.file, outcome.source_file
            )));
        }
        if outcome.data.is_empty() {
            return Err(JobError::malformed(format!("{} is empty", outcome.file)));
        }

        let folder = &outcome.folder;
        if !self.staging().exists(&convert_key(folder, SPLIT_MARKER)).await? {
            return Ok(Ack::rejected(format!("{} is not awaiting conversion", folder)));
        }
        let marker = convert_key(folder, &name.lease_marker());
        let lease = self.lease_for(worker);
        if let Some(record) = lease.inspect(&marker).await? {
            if record.holder != *worker && record.is_live(Utc::now(), lease.limit()) {
                return Ok(Ack::rejected(format!("{} is leased to {}", outcome.source_file, record.holder)));
            }
        }

        self.staging().put(&converted_key(folder, &outcome.file), &outcome.data).await?;
        self.staging().delete(&convert_key(folder, &outcome.source_file)).await?;
        lease.release(&marker).await?;

        metrics::record_segment_converted();
        JobLogger::new(JOB_NAME, JobPhase::PutTasks)
            .log_progress(&format!("{}/{} converted by {}", folder, outcome.file, worker));
        Ok(Ack::accepted())
    }
}
