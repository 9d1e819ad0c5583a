mod common;

use std::sync::Arc;

use common::{DuplicateFilter, RecordingWriter, init_logger};
use spring_batch_engine::{
    core::{
        item::{CompositeItemProcessor, CompositeItemWriter, ItemProcessorResult, PassThroughProcessor},
        job::{Job, JobBuilder},
        parameters::JobParametersBuilder,
        step::{BatchStatus, Step, StepBuilder, StepExecution},
    },
    item::list::ListItemReader,
};

fn names(count: usize) -> Vec<String> {
    (0..count).map(|n| format!("name{}", n)).collect()
}

#[test]
fn hundred_items_should_be_written_in_ten_full_chunks() -> anyhow::Result<()> {
    init_logger();
    let writer = RecordingWriter::<String>::shared();

    let step = StepBuilder::new("customerNameStep")
        .chunk::<String, String>(10)
        .reader(ListItemReader::new(names(100)))
        .processor(|name: &String| Ok(Some(format!("{}, Spring Batch", name))))
        .writer(Arc::clone(&writer))
        .build()?;

    let job = JobBuilder::new().name("customerJob").start(step).build();
    let execution = job.run(JobParametersBuilder::new().build())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    let step_execution = &execution.step_executions[0];
    assert_eq!(step_execution.read_count, 100);
    assert_eq!(step_execution.write_count, 100);
    assert_eq!(step_execution.commit_count, 10);
    assert_eq!(writer.chunk_sizes(), vec![10; 10]);
    assert_eq!(writer.items()[42], "name42, Spring Batch");
    Ok(())
}

#[test]
fn last_chunk_should_hold_the_remainder() -> anyhow::Result<()> {
    let writer = RecordingWriter::<String>::shared();

    let step = StepBuilder::new("remainder")
        .chunk::<String, String>(4)
        .reader(ListItemReader::new(names(10)))
        .processor(PassThroughProcessor)
        .writer(Arc::clone(&writer))
        .build()?;

    let mut execution = StepExecution::new(step.get_name());
    step.execute(&mut execution)?;

    assert_eq!(writer.chunk_sizes(), vec![4, 4, 2]);
    assert_eq!(execution.commit_count, 3);
    Ok(())
}

#[test]
fn empty_source_should_complete_without_commit() -> anyhow::Result<()> {
    let writer = RecordingWriter::<String>::shared();

    let step = StepBuilder::new("empty")
        .chunk::<String, String>(10)
        .reader(ListItemReader::new(Vec::new()))
        .processor(PassThroughProcessor)
        .writer(Arc::clone(&writer))
        .build()?;

    let mut execution = StepExecution::new(step.get_name());
    step.execute(&mut execution)?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(execution.read_count, 0);
    assert_eq!(execution.commit_count, 0);
    assert!(writer.chunk_sizes().is_empty());
    Ok(())
}

#[test]
fn filtered_items_should_be_counted_and_not_written() -> anyhow::Result<()> {
    let writer = RecordingWriter::<i64>::shared();

    let step = StepBuilder::new("evenOnly")
        .chunk::<i64, i64>(3)
        .reader(ListItemReader::new((1..=10).collect()))
        .processor(|n: &i64| -> ItemProcessorResult<i64> { Ok((n % 2 == 0).then_some(*n)) })
        .writer(Arc::clone(&writer))
        .build()?;

    let mut execution = StepExecution::new(step.get_name());
    step.execute(&mut execution)?;

    assert_eq!(execution.read_count, 10);
    assert_eq!(execution.filter_count, 5);
    assert_eq!(execution.write_count, 5);
    assert_eq!(
        execution.read_count,
        execution.write_count + execution.filter_count + execution.skip_count()
    );
    // Chunks fill with transformed items, so only the last one is short.
    assert_eq!(writer.chunk_sizes(), vec![3, 2]);
    Ok(())
}

#[test]
fn chunk_size_parameter_should_override_the_configured_size() -> anyhow::Result<()> {
    let writer = RecordingWriter::<String>::shared();

    let step = StepBuilder::new("tuned")
        .chunk::<String, String>(10)
        .chunk_size_parameter("chunkSize")
        .reader(ListItemReader::new(names(9)))
        .processor(PassThroughProcessor)
        .writer(Arc::clone(&writer))
        .build()?;

    let job = JobBuilder::new().start(step).build();
    let execution = job.run(JobParametersBuilder::new().add_long("chunkSize", 3).build())?;

    assert_eq!(execution.status, BatchStatus::Completed);
    assert_eq!(writer.chunk_sizes(), vec![3, 3, 3]);
    Ok(())
}

#[test]
fn invalid_chunk_size_parameter_should_fail_the_step() -> anyhow::Result<()> {
    let step = StepBuilder::new("tuned")
        .chunk::<String, String>(10)
        .chunk_size_parameter("chunkSize")
        .reader(ListItemReader::new(names(3)))
        .processor(PassThroughProcessor)
        .writer(RecordingWriter::<String>::default())
        .build()?;

    let job = JobBuilder::new().start(step).build();
    let execution = job.run(JobParametersBuilder::new().add_long("chunkSize", 0).build())?;

    assert_eq!(execution.status, BatchStatus::Failed);
    Ok(())
}

#[test]
fn zero_chunk_size_should_be_rejected_at_build() {
    let result = StepBuilder::new("zero")
        .chunk::<String, String>(0)
        .reader(ListItemReader::new(names(1)))
        .processor(PassThroughProcessor)
        .writer(RecordingWriter::<String>::default())
        .build();

    assert!(result.is_err());
}

#[test]
fn composites_should_chain_processors_and_fan_out_writes() -> anyhow::Result<()> {
    let first = RecordingWriter::<String>::shared();
    let second = RecordingWriter::<String>::shared();

    let processor = CompositeItemProcessor::new()
        .delegate(DuplicateFilter::new(|name: &String| name.clone()))
        .delegate(|name: &String| Ok(Some(name.to_uppercase())));

    let step = StepBuilder::new("composite")
        .chunk::<String, String>(2)
        .reader(ListItemReader::new(
            ["kim", "lee", "kim", "park"].iter().map(|name| name.to_string()).collect(),
        ))
        .processor(processor)
        .writer(
            CompositeItemWriter::new()
                .delegate(Arc::clone(&first))
                .delegate(Arc::clone(&second)),
        )
        .build()?;

    let mut execution = StepExecution::new(step.get_name());
    step.execute(&mut execution)?;

    assert_eq!(first.items(), vec!["KIM", "LEE", "PARK"]);
    assert_eq!(second.items(), first.items());
    assert_eq!(execution.filter_count, 1);
    assert_eq!(execution.write_count, 3);
    Ok(())
}
