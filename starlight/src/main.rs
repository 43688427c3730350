//! Entry point for the `starlight` operator CLI.

mod app;
mod cli;
mod logger;

fn main() -> anyhow::Result<()> {
    logger::init();
    argh::from_env::<cli::Args>().run()
}
