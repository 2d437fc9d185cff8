use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use log::debug;
use parking_lot::Mutex;

use crate::{
    BatchError,
    core::{job::JobExecution, parameters::JobParameters, step::StepExecution},
};

use super::{JobRepository, RepositoryState};

/// Repository persisted as a pretty-printed JSON document.
///
/// The whole document is rewritten after every change, through a temporary
/// file renamed over the previous one, so a crash never leaves a truncated
/// document behind.
pub struct JsonFileJobRepository {
    path: PathBuf,
    state: Mutex<RepositoryState>,
}

impl JsonFileJobRepository {
    /// Opens the repository stored at `path`, starting empty when the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BatchError> {
        let path = path.as_ref().to_path_buf();

        let state = if path.exists() {
            let file = File::open(&path)?;
            serde_json::from_reader(BufReader::new(file))?
        } else {
            RepositoryState::default()
        };

        debug!("Opened job repository {}", path.display());

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    fn save(&self, state: &RepositoryState) -> Result<(), BatchError> {
        let tmp = self.path.with_extension("json.tmp");

        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, state)?;
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Applies `apply` to a copy of the state, which replaces the state once it is saved.
    fn change<T>(
        &self,
        apply: impl FnOnce(&mut RepositoryState) -> Result<T, BatchError>,
    ) -> Result<T, BatchError> {
        let mut state = self.state.lock();
        let mut next = state.clone();
        let result = apply(&mut next)?;
        self.save(&next)?;
        *state = next;
        Ok(result)
    }
}

impl JobRepository for JsonFileJobRepository {
    fn create_job_execution(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        self.change(|state| Ok(state.create(job_name, parameters)))
    }

    fn update_job_execution(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        self.change(|state| state.update(job_execution))
    }

    fn append_step_execution(
        &self,
        job_execution_id: u64,
        step_execution: &StepExecution,
    ) -> Result<(), BatchError> {
        self.change(|state| state.append(job_execution_id, step_execution))
    }

    fn find_job_execution(&self, job_execution_id: u64) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.state.lock().find(job_execution_id))
    }

    fn find_job_executions(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<Vec<JobExecution>, BatchError> {
        Ok(self.state.lock().find_instance(job_name, parameters))
    }

    fn find_last_job_execution(&self, job_name: &str) -> Result<Option<JobExecution>, BatchError> {
        Ok(self.state.lock().find_last(job_name))
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;
    use crate::core::{parameters::JobParametersBuilder, status::BatchStatus};

    #[test]
    fn executions_survive_reopening() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("repository.json");
        let parameters = JobParametersBuilder::new()
            .add_string("type", "roses")
            .add_long("run.id", 1)
            .build();

        let repository = JsonFileJobRepository::open(&path)?;
        let mut job_execution = repository.create_job_execution("flowers", &parameters)?;
        let mut step_execution = StepExecution::new("select", job_execution.id);
        step_execution.status = BatchStatus::Failed;
        repository.append_step_execution(job_execution.id, &step_execution)?;
        job_execution.status = BatchStatus::Failed;
        repository.update_job_execution(&job_execution)?;
        drop(repository);

        let reopened = JsonFileJobRepository::open(&path)?;
        let stored = reopened.find_job_execution(job_execution.id)?.unwrap();

        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.parameters, parameters);
        assert_eq!(stored.step_executions, vec![step_execution]);
        assert_eq!(
            reopened.find_latest_incomplete_job_execution("flowers", &parameters)?,
            Some(job_execution.id)
        );
        assert_eq!(reopened.create_job_execution("flowers", &parameters)?.id, 2);
        Ok(())
    }

    #[test]
    fn failed_save_leaves_state_unchanged() -> Result<()> {
        let dir = tempdir()?;
        let store = dir.path().join("store");
        fs::create_dir(&store)?;
        let parameters = JobParametersBuilder::new().add_string("type", "roses").build();

        let repository = JsonFileJobRepository::open(store.join("repository.json"))?;
        fs::remove_dir_all(&store)?;

        assert!(matches!(
            repository.create_job_execution("flowers", &parameters),
            Err(BatchError::Io(_))
        ));
        assert!(repository.find_job_execution(1)?.is_none());
        assert!(repository.find_last_job_execution("flowers")?.is_none());

        fs::create_dir(&store)?;
        assert_eq!(repository.create_job_execution("flowers", &parameters)?.id, 1);
        Ok(())
    }

    #[test]
    fn corrupt_document_is_a_serialization_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("repository.json");
        fs::write(&path, "{ not json")?;

        assert!(matches!(
            JsonFileJobRepository::open(&path),
            Err(BatchError::Serialization(_))
        ));
        Ok(())
    }
}
