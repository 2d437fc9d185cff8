use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod decider;

pub mod flow;

pub mod item;

pub mod job;

pub mod launcher;

pub mod parameters;

pub mod repository;

pub mod retry;

pub mod status;

pub mod step;

pub mod tasklet;

/// Generates a random name for an unnamed job or step.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}

#[cfg(test)]
mod tests {
    use super::build_name;

    #[test]
    fn generated_names_are_alphanumeric() {
        let name = build_name();
        assert_eq!(name.len(), 8);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
