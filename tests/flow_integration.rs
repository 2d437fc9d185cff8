mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Result;

use common::{MockDecider, RangeReader, init_logger};
use spring_batch_flow::{
    BatchError,
    core::{
        chunk::ChunkOrientedStepBuilder,
        flow::{EndState, FlowBuilder},
        job::{Job, JobBuilder, JobExecution, JobFailure},
        parameters::{JobParameters, JobParametersBuilder, JobParametersValidator, ParameterType},
        repository::{InMemoryJobRepository, JobRepository},
        status::{BatchStatus, ExitStatus},
        step::{StepExecution, StepExecutionListener},
        tasklet::{RepeatStatus, TaskletStepBuilder},
    },
    item::memory::InMemoryItemWriter,
};

fn done(_: &StepExecution, _: &JobParameters) -> Result<RepeatStatus, BatchError> {
    Ok(RepeatStatus::Finished)
}

fn flower_type(job_execution: &JobExecution) -> Result<ExitStatus, BatchError> {
    match job_execution.parameters.get_string("type") {
        Some(flower) if flower.eq_ignore_ascii_case("roses") => Ok(ExitStatus::new("TRIM_REQUIRED")),
        _ => Ok(ExitStatus::new("NO_TRIM_REQUIRED")),
    }
}

fn node_names(job_execution: &JobExecution) -> Vec<&str> {
    job_execution
        .step_executions
        .iter()
        .map(|step_execution| step_execution.name.as_str())
        .collect()
}

fn run_flowers(flower: &str) -> Result<JobExecution> {
    let select = TaskletStepBuilder::new("select-flowers").tasklet(&done).build()?;
    let remove_thorns = TaskletStepBuilder::new("remove-thorns").tasklet(&done).build()?;
    let arrange = TaskletStepBuilder::new("arrange-flowers").tasklet(&done).build()?;

    let flow = FlowBuilder::new()
        .start(&select)
        .decider("flower-type", &flower_type)
        .step(&remove_thorns)
        .step(&arrange)
        .rule("select-flowers", "COMPLETED", "flower-type")
        .rule("select-flowers", "*", EndState::Failed)
        .rule("flower-type", "TRIM_REQUIRED", "remove-thorns")
        .rule("flower-type", "NO_TRIM_REQUIRED", "arrange-flowers")
        .next("remove-thorns", "arrange-flowers")
        .end("arrange-flowers")
        .build()?;

    let job = JobBuilder::new()
        .name("flowers-selection".to_string())
        .flow(flow)
        .validator(JobParametersValidator::new().required("type", ParameterType::String))
        .build()?;

    let parameters = JobParametersBuilder::new().add_string("type", flower).build();
    Ok(job.run(&InMemoryJobRepository::new(), parameters)?)
}

#[test]
fn roses_go_through_remove_thorns() -> Result<()> {
    init_logger();

    let job_execution = run_flowers("roses")?;

    assert_eq!(job_execution.status, BatchStatus::Completed);
    assert_eq!(
        node_names(&job_execution),
        vec!["select-flowers", "flower-type", "remove-thorns", "arrange-flowers"]
    );
    assert_eq!(
        job_execution
            .get_step_execution("flower-type")
            .map(|decision| decision.exit_status.code()),
        Some("TRIM_REQUIRED")
    );
    Ok(())
}

#[test]
fn other_flowers_go_straight_to_arrange() -> Result<()> {
    init_logger();

    let job_execution = run_flowers("tulips")?;

    assert_eq!(job_execution.status, BatchStatus::Completed);
    assert_eq!(
        node_names(&job_execution),
        vec!["select-flowers", "flower-type", "arrange-flowers"]
    );
    Ok(())
}

#[test]
fn exact_failed_rule_wins_over_wildcard() -> Result<()> {
    let broken = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        Err(BatchError::Tasklet("no flowers in stock".to_string()))
    };
    let select = TaskletStepBuilder::new("select").tasklet(&broken).build()?;
    let arrange = TaskletStepBuilder::new("arrange").tasklet(&done).build()?;

    let flow = FlowBuilder::new()
        .start(&select)
        .step(&arrange)
        .rule("select", "*", "arrange")
        .rule("select", "FAILED", EndState::Failed)
        .end("arrange")
        .build()?;
    let job = JobBuilder::new().flow(flow).build()?;

    let job_execution = job.run(&InMemoryJobRepository::new(), JobParameters::new())?;

    assert_eq!(job_execution.status, BatchStatus::Failed);
    assert_eq!(node_names(&job_execution), vec!["select"]);
    assert!(job_execution.get_step_execution("arrange").is_none());
    Ok(())
}

#[test]
fn mocked_decider_is_consulted_once() -> Result<()> {
    let mut decider = MockDecider::new();
    decider
        .expect_decide()
        .withf(|job_execution: &JobExecution| job_execution.step_executions.len() == 1)
        .times(1)
        .returning(|_| Ok(ExitStatus::new("ARCHIVE")));

    let load = TaskletStepBuilder::new("load").tasklet(&done).build()?;
    let archive = TaskletStepBuilder::new("archive").tasklet(&done).build()?;
    let flow = FlowBuilder::new()
        .start(&load)
        .decider("route", &decider)
        .step(&archive)
        .next("load", "route")
        .rule("route", "ARCHIVE", "archive")
        .rule("route", "*", EndState::Completed)
        .end("archive")
        .build()?;
    let job = JobBuilder::new().flow(flow).build()?;

    let job_execution = job.run(&InMemoryJobRepository::new(), JobParameters::new())?;

    assert_eq!(node_names(&job_execution), vec!["load", "route", "archive"]);
    Ok(())
}

struct FlowerTypeListener;

impl StepExecutionListener for FlowerTypeListener {
    fn after_step(&self, step_execution: &StepExecution, parameters: &JobParameters) -> Option<ExitStatus> {
        if !step_execution.exit_status.is_completed() {
            return None;
        }
        match parameters.get_string("type") {
            Some("roses") => Some(ExitStatus::new("TRIM_REQUIRED")),
            _ => None,
        }
    }
}

#[test]
fn listener_exit_status_drives_transition() -> Result<()> {
    let listener = FlowerTypeListener;
    let select = TaskletStepBuilder::new("select")
        .tasklet(&done)
        .listener(&listener)
        .build()?;
    let trim = TaskletStepBuilder::new("trim").tasklet(&done).build()?;
    let arrange = TaskletStepBuilder::new("arrange").tasklet(&done).build()?;

    let flow = FlowBuilder::new()
        .start(&select)
        .step(&trim)
        .step(&arrange)
        .rule("select", "TRIM_REQUIRED", "trim")
        .rule("select", "COMPLETED", "arrange")
        .rule("select", "*", EndState::Failed)
        .next("trim", "arrange")
        .end("arrange")
        .build()?;
    let job = JobBuilder::new().flow(flow).build()?;
    let parameters = JobParametersBuilder::new().add_string("type", "roses").build();

    let job_execution = job.run(&InMemoryJobRepository::new(), parameters)?;

    assert_eq!(node_names(&job_execution), vec!["select", "trim", "arrange"]);
    Ok(())
}

#[test]
fn restart_runs_only_the_failed_step() -> Result<()> {
    init_logger();

    let reader = RangeReader::new(5);
    let writer = InMemoryItemWriter::new();
    let load = ChunkOrientedStepBuilder::<usize, usize>::new("load")
        .reader(&reader)
        .writer(&writer)
        .chunk_size(2)
        .build()?;

    let broken = AtomicBool::new(true);
    let publications = AtomicUsize::new(0);
    let publish_tasklet = |_: &StepExecution, _: &JobParameters| -> Result<RepeatStatus, BatchError> {
        publications.fetch_add(1, Ordering::SeqCst);
        if broken.load(Ordering::SeqCst) {
            Err(BatchError::Tasklet("report server unavailable".to_string()))
        } else {
            Ok(RepeatStatus::Finished)
        }
    };
    let publish = TaskletStepBuilder::new("publish").tasklet(&publish_tasklet).build()?;

    let job = JobBuilder::new()
        .name("report".to_string())
        .start(&load)
        .next(&publish)
        .build()?;
    let repository = InMemoryJobRepository::new();
    let parameters = JobParametersBuilder::new().add_string("day", "2024-02-14").build();

    let failed = job.run(&repository, parameters.clone())?;
    assert_eq!(failed.status, BatchStatus::Failed);
    assert!(matches!(
        &failed.failure,
        Some(JobFailure::Step { step_name, .. }) if step_name == "publish"
    ));
    assert_eq!(
        repository.find_latest_incomplete_job_execution("report", &parameters)?,
        Some(failed.id)
    );

    broken.store(false, Ordering::SeqCst);
    let restarted = job.restart(&repository, failed.id)?;

    assert_eq!(restarted.status, BatchStatus::Completed);
    assert_eq!(restarted.restart_of, Some(failed.id));
    assert_eq!(node_names(&restarted), vec!["publish"]);
    assert_eq!(publications.load(Ordering::SeqCst), 2);
    assert_eq!(writer.get_items(), vec![1, 2, 3, 4, 5]);

    let first_run = repository.find_job_execution(failed.id)?.unwrap();
    let load_execution = first_run.get_step_execution("load").unwrap();
    assert_eq!(load_execution.status, BatchStatus::Completed);
    assert_eq!(load_execution.read_count, 5);
    assert_eq!(load_execution.write_count, 5);
    assert_eq!(load_execution.commit_count, 3);
    assert_eq!(first_run.step_executions.len(), 2);
    Ok(())
}
