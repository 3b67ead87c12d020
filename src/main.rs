use std::process::ExitCode;

mod app;
mod cli;
mod config;
mod coverage;
mod diagnosis;
mod doctor;
mod environment;
mod llm;
mod logger;
mod patch;
mod prompts;
mod report;
mod run_loop;
mod shell;
mod types;


fn main() -> ExitCode {
    app::main()
}
