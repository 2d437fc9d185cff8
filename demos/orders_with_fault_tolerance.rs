use std::{env::temp_dir, process::ExitCode, sync::Arc};

use serde::{Deserialize, Serialize};

use spring_batch_flow::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult},
        job::JobBuilder,
        launcher::JobLauncher,
        parameters::{JobParametersBuilder, RunIdIncrementer},
        repository::json::JsonFileJobRepository,
        step::StepBuilder,
    },
    item::{logger::LoggerWriter, memory::IteratorItemReader},
};

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Order {
    order_id: u64,
    first_name: String,
    last_name: String,
    email: String,
    cost: f64,
    item_name: String,
}

/// Filters orders without an email, rejects orders with a negative cost.
struct ValidateOrder;

impl ItemProcessor<Order, Order> for ValidateOrder {
    fn process(&self, order: &Order) -> ItemProcessorResult<Order> {
        if order.cost < 0.0 {
            return Err(BatchError::Validation(format!(
                "order {} has a negative cost",
                order.order_id
            )));
        }
        if !order.email.contains('@') {
            return Ok(None);
        }
        Ok(Some(order.clone()))
    }
}

fn orders() -> Vec<Order> {
    let json = r#"[
        {"order_id": 1, "first_name": "Ada", "last_name": "Byron", "email": "ada@example.com", "cost": 12.5, "item_name": "roses"},
        {"order_id": 2, "first_name": "Alan", "last_name": "Turing", "email": "", "cost": 8.0, "item_name": "tulips"},
        {"order_id": 3, "first_name": "Grace", "last_name": "Hopper", "email": "grace@example.com", "cost": -1.0, "item_name": "lilies"},
        {"order_id": 4, "first_name": "Edsger", "last_name": "Dijkstra", "email": "edsger@example.com", "cost": 21.0, "item_name": "orchids"},
        {"order_id": 5, "first_name": "Barbara", "last_name": "Liskov", "email": "barbara@example.com", "cost": 5.25, "item_name": "daisies"}
    ]"#;
    serde_json::from_str(json).unwrap_or_default()
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();

    let reader: &'static _ = Box::leak(Box::new(IteratorItemReader::new(orders())));
    let processor: &'static _ = Box::leak(Box::new(ValidateOrder));
    let writer: &'static _ = Box::leak(Box::new(LoggerWriter::with_target("orders")));
    let step: &'static _ = Box::leak(Box::new(
        StepBuilder::new("export-orders")
            .chunk::<Order, Order>(2)
            .reader(reader)
            .processor(processor)
            .writer(writer)
            .skip_limit(1)
            .retry_limit(2)
            .build_with_processor()?,
    ));
    let incrementer: &'static _ = Box::leak(Box::new(RunIdIncrementer::default()));

    let job = Arc::new(
        JobBuilder::new()
            .name("orders-export".to_string())
            .start(step)
            .incrementer(incrementer)
            .build()?,
    );

    let repository = JsonFileJobRepository::open(temp_dir().join("orders-executions.json"))?;
    let launcher = JobLauncher::new(Arc::new(repository));

    let parameters = JobParametersBuilder::new().add_string("source", "orders").build();
    let job_execution = launcher.launch(job, parameters).await??;

    for step_execution in &job_execution.step_executions {
        println!("{}", step_execution);
    }

    Ok(ExitCode::from(&job_execution))
}
