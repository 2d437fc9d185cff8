mod common;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::Result;
use tempfile::tempdir;

use common::init_logger;
use spring_batch_flow::{
    BatchError,
    core::{
        job::{EXIT_CODE_COMPLETED, EXIT_CODE_FAILED, JobBuilder},
        launcher::JobLauncher,
        parameters::{JobParameter, JobParameters, JobParametersBuilder, RunIdIncrementer},
        repository::{JobRepository, json::JsonFileJobRepository},
        status::BatchStatus,
        step::StepExecution,
        tasklet::{RepeatStatus, TaskletStepBuilder},
    },
};

#[test]
fn launcher_restarts_failed_instance_from_json_repository() -> Result<()> {
    init_logger();

    let dir = tempdir()?;
    let path = dir.path().join("executions.json");
    let parameters = JobParametersBuilder::new().add_string("file", "orders-2024-02-14.csv").build();

    let unavailable = AtomicBool::new(true);
    let extract = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        Ok(RepeatStatus::Finished)
    };
    let upload = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        if unavailable.load(Ordering::SeqCst) {
            Err(BatchError::Tasklet("remote host unreachable".to_string()))
        } else {
            Ok(RepeatStatus::Finished)
        }
    };
    let extract = TaskletStepBuilder::new("extract").tasklet(&extract).build()?;
    let upload = TaskletStepBuilder::new("upload").tasklet(&upload).build()?;
    let job = JobBuilder::new()
        .name("orders-export".to_string())
        .start(&extract)
        .next(&upload)
        .build()?;

    let failed = {
        let launcher = JobLauncher::new(Arc::new(JsonFileJobRepository::open(&path)?));
        launcher.run(&job, parameters.clone())?
    };
    assert_eq!(failed.status, BatchStatus::Failed);
    assert_eq!(failed.exit_code(), EXIT_CODE_FAILED);

    unavailable.store(false, Ordering::SeqCst);

    let repository = Arc::new(JsonFileJobRepository::open(&path)?);
    let launcher = JobLauncher::new(repository.clone());
    let restarted = launcher.run(&job, parameters.clone())?;

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.exit_code(), EXIT_CODE_COMPLETED);
    assert_eq!(restarted.restart_of, Some(failed.id));
    assert_eq!(restarted.step_executions.len(), 1);
    assert_eq!(restarted.step_executions[0].name, "upload");

    let executions = repository.find_job_executions("orders-export", &parameters)?;
    assert_eq!(executions.len(), 2);
    assert_eq!(repository.find_step_executions(failed.id)?.len(), 2);

    assert!(matches!(
        launcher.run(&job, parameters),
        Err(BatchError::JobAlreadyComplete(id)) if id == restarted.id
    ));
    Ok(())
}

#[test]
fn non_identifying_parameters_do_not_create_new_instance() -> Result<()> {
    let dir = tempdir()?;
    let repository = Arc::new(JsonFileJobRepository::open(dir.path().join("executions.json"))?);
    let launcher = JobLauncher::new(repository);

    let noop = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        Ok(RepeatStatus::Finished)
    };
    let step = TaskletStepBuilder::new("noop").tasklet(&noop).build()?;
    let job = JobBuilder::new().name("nightly".to_string()).start(&step).build()?;

    let first = JobParametersBuilder::new()
        .add_string("day", "2024-02-14")
        .add_non_identifying("attempt", JobParameter::Long(1))
        .build();
    let second = JobParametersBuilder::new()
        .add_string("day", "2024-02-14")
        .add_non_identifying("attempt", JobParameter::Long(2))
        .build();

    launcher.run(&job, first)?;

    assert!(matches!(
        launcher.run(&job, second),
        Err(BatchError::JobAlreadyComplete(_))
    ));
    Ok(())
}

#[test]
fn run_id_continues_across_processes_sharing_a_repository() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("executions.json");

    let noop = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        Ok(RepeatStatus::Finished)
    };
    let step = TaskletStepBuilder::new("noop").tasklet(&noop).build()?;
    let parameters = JobParametersBuilder::new().add_string("source", "orders").build();

    let mut run_ids = Vec::new();
    for _ in 0..2 {
        let incrementer = RunIdIncrementer::default();
        let job = JobBuilder::new()
            .name("orders-export".to_string())
            .start(&step)
            .incrementer(&incrementer)
            .build()?;
        let launcher = JobLauncher::new(Arc::new(JsonFileJobRepository::open(&path)?));

        let job_execution = launcher.run(&job, parameters.clone())?;

        assert_eq!(job_execution.status, BatchStatus::Completed);
        run_ids.push(job_execution.parameters.get_long("run.id"));
    }

    assert_eq!(run_ids, vec![Some(1), Some(2)]);
    Ok(())
}
