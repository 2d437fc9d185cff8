use std::env;

use spring_batch_flow::{
    BatchError,
    core::{
        flow::{EndState, FlowBuilder},
        item::{ItemProcessor, ItemProcessorResult},
        job::{Job, JobBuilder, JobExecution},
        parameters::{JobParameters, JobParametersBuilder, JobParametersValidator, ParameterType},
        repository::InMemoryJobRepository,
        status::ExitStatus,
        step::{StepBuilder, StepExecution},
        tasklet::RepeatStatus,
    },
    item::{logger::LoggerWriter, memory::IteratorItemReader},
};

struct PrepareBouquet;

impl ItemProcessor<String, String> for PrepareBouquet {
    fn process(&self, flower: &String) -> ItemProcessorResult<String> {
        Ok(Some(format!("bouquet of {}", flower)))
    }
}

fn flower_type(job_execution: &JobExecution) -> Result<ExitStatus, BatchError> {
    match job_execution.parameters.get_string("type") {
        Some(flower) if flower.eq_ignore_ascii_case("roses") => Ok(ExitStatus::new("TRIM_REQUIRED")),
        _ => Ok(ExitStatus::new("NO_TRIM_REQUIRED")),
    }
}

fn trim_thorns(_: &StepExecution, parameters: &JobParameters) -> Result<RepeatStatus, BatchError> {
    log::info!("Removing thorns of {}", parameters.get_string("type").unwrap_or("flowers"));
    Ok(RepeatStatus::Finished)
}

fn arrange_flowers(_: &StepExecution, _: &JobParameters) -> Result<RepeatStatus, BatchError> {
    log::info!("Arranging flowers");
    Ok(RepeatStatus::Finished)
}

fn main() -> Result<(), BatchError> {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();

    let flower = env::args().nth(1).unwrap_or_else(|| "roses".to_string());

    let reader = IteratorItemReader::new(["red", "white", "yellow"].map(|color| format!("{} {}", color, flower)));
    let processor = PrepareBouquet;
    let writer = LoggerWriter::with_target("flowers");

    let select = StepBuilder::new("select-flowers")
        .chunk::<String, String>(2)
        .reader(&reader)
        .processor(&processor)
        .writer(&writer)
        .build_with_processor()?;
    let remove_thorns = StepBuilder::new("remove-thorns").tasklet(&trim_thorns).build()?;
    let arrange = StepBuilder::new("arrange-flowers").tasklet(&arrange_flowers).build()?;

    let flow = FlowBuilder::new()
        .start(&select)
        .decider("flower-type", &flower_type)
        .step(&remove_thorns)
        .step(&arrange)
        .next("select-flowers", "flower-type")
        .rule("flower-type", "TRIM_REQUIRED", "remove-thorns")
        .rule("flower-type", "*", "arrange-flowers")
        .next("remove-thorns", "arrange-flowers")
        .end("arrange-flowers")
        .build()?;

    let job = JobBuilder::new()
        .name("flowers-selection".to_string())
        .flow(flow)
        .validator(JobParametersValidator::new().required("type", ParameterType::String))
        .build()?;

    let parameters = JobParametersBuilder::new().add_string("type", flower).build();
    let job_execution = job.run(&InMemoryJobRepository::new(), parameters)?;

    for step_execution in &job_execution.step_executions {
        println!("{}", step_execution);
    }
    println!("Job finished with {:?}", job_execution.status);

    Ok(())
}
