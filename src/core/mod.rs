use rand::distr::{Alphanumeric, SampleString};

pub mod async_item;

pub mod chunk;

pub mod execution_context;

pub mod executor;

pub mod item;

pub mod job;

pub mod launcher;

pub mod listener;

pub mod parameters;

pub mod partition;

pub mod policy;

pub mod retry;

pub mod step;

pub mod tasklet;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
