//! Command-line entrypoint for the batch script translator.
use eyre::Result;

pub mod cli;
pub mod dispatch;
pub mod driver;
pub mod endpoint;
pub mod glossary;
pub mod logging;
pub mod placeholder;
pub mod prompt;
pub mod script;
pub mod validate;
pub mod worker;

#[cfg(test)]
pub mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
