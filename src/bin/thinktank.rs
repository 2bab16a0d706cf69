#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thinktank::report;
use thinktank::stages::agent_options;
use thinktank::{Settings, Workbench};

#[derive(Parser)]
#[command(name = "thinktank", version, about = "Multi-stage LLM pipeline runner")]
struct Cli {
    /// SQLite state file (default: $THINKTANK_STATE_PATH or ~/.thinktank/state.sqlite3)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the enabled stages against the current problem
    Run {
        /// Replace the stored problem before running
        #[arg(long, group = "input")]
        problem: Option<String>,
        /// Read the problem from a file before running
        #[arg(long, group = "input")]
        problem_file: Option<PathBuf>,
        /// Also write the finished run as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show the stage configuration and launch readiness
    Stages,
    /// Edit one stage
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Show or set the problem statement
    Problem {
        text: Option<String>,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
    },
    /// Set the OpenRouter API key
    Key { api_key: String },
    /// Set the API base URL
    BaseUrl { url: String },
    /// Clear the problem and restore default stages (history is kept)
    Reset,
    /// List past runs, newest first
    History,
    /// Show a run (default: the selected or most recent one)
    Show {
        run_id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Select a run for `show`
    Select { run_id: String },
    /// Delete all runs
    ClearHistory,
    /// List suggested models
    Models,
}

#[derive(Subcommand)]
enum StageCommands {
    /// Enable or disable a stage
    Toggle { id: String },
    /// Replace a stage's system prompt
    Prompt { id: String, text: String },
    /// Change a stage's model id
    Model { id: String, model: String },
    /// Change a stage's sampling temperature
    Temperature { id: String, value: f64 },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thinktank=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn unknown_stage(id: &str) -> Box<dyn std::error::Error> {
    format!("unknown stage: {id}").into()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = Settings::from_env();
    if let Some(state) = cli.state {
        settings.state_path = state;
    }
    let workbench = Workbench::open_sqlite(&settings).await?;

    match cli.command {
        Commands::Run {
            problem,
            problem_file,
            out,
        } => {
            if let Some(text) = problem {
                workbench.set_problem(text).await;
            } else if let Some(path) = problem_file {
                workbench.set_problem(std::fs::read_to_string(path)?).await;
            }
            if let Some(blocker) = workbench.launch_blocker() {
                return Err(format!("cannot run: {}", blocker.describe()).into());
            }

            let mut events = workbench.subscribe();
            let launch = workbench.launch();
            tokio::pin!(launch);
            let outcome = loop {
                tokio::select! {
                    outcome = &mut launch => break outcome,
                    Ok(event) = events.recv() => eprintln!("{}", report::render_event(&event)),
                }
            };
            while let Ok(event) = events.try_recv() {
                eprintln!("{}", report::render_event(&event));
            }

            let Some(outcome) = outcome else {
                return Err("another run is already in progress".into());
            };
            let run = workbench
                .snapshot()
                .runs
                .get(&outcome.run_id)
                .cloned()
                .ok_or("run was evicted before it could be shown")?;
            println!("{}", report::render_run(&run));
            if let Some(path) = out {
                std::fs::write(path, serde_json::to_string_pretty(&run)?)?;
            }
            if let Some((stage_id, message)) = outcome.failure {
                return Err(format!("stage {stage_id} failed: {message}").into());
            }
        }
        Commands::Stages => {
            workbench.with_state(|s| {
                print!("{}", report::render_stages(&s.stages));
                println!("{}", report::status_line(&s.stages, workbench.is_running()));
            });
            if let Some(blocker) = workbench.launch_blocker() {
                println!("not ready: {}", blocker.describe());
            }
        }
        Commands::Stage { command } => {
            let found = match &command {
                StageCommands::Toggle { id } => workbench.toggle_stage(id).await,
                StageCommands::Prompt { id, text } => {
                    workbench.edit_prompt(id, text.as_str()).await
                }
                StageCommands::Model { id, model } => {
                    workbench.edit_model(id, model.as_str()).await
                }
                StageCommands::Temperature { id, value } => {
                    if !(0.0..=1.0).contains(value) {
                        return Err("temperature must be within [0, 1]".into());
                    }
                    workbench.edit_temperature(id, *value).await
                }
            };
            let id = match &command {
                StageCommands::Toggle { id }
                | StageCommands::Prompt { id, .. }
                | StageCommands::Model { id, .. }
                | StageCommands::Temperature { id, .. } => id,
            };
            if !found {
                return Err(unknown_stage(id));
            }
            workbench.with_state(|s| print!("{}", report::render_stages(&s.stages)));
        }
        Commands::Problem { text, file } => {
            if let Some(text) = text {
                workbench.set_problem(text).await;
            } else if let Some(path) = file {
                workbench.set_problem(std::fs::read_to_string(path)?).await;
            } else {
                workbench.with_state(|s| println!("{}", s.problem));
            }
        }
        Commands::Key { api_key } => workbench.set_api_key(api_key).await,
        Commands::BaseUrl { url } => workbench.set_base_url(url).await,
        Commands::Reset => workbench.reset_configuration().await,
        Commands::History => {
            workbench.with_state(|s| {
                print!(
                    "{}",
                    report::render_history(&s.runs, s.selected_run_id.as_deref())
                )
            });
        }
        Commands::Show { run_id, json } => {
            let run = match run_id {
                Some(id) => workbench.with_state(|s| s.runs.get(&id).cloned()),
                None => workbench.selected_run(),
            };
            let Some(run) = run else {
                return Err("no matching run".into());
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                println!("{}", report::render_run(&run));
            }
        }
        Commands::Select { run_id } => {
            if !workbench.select_run(&run_id).await {
                return Err(format!("unknown run: {run_id}").into());
            }
        }
        Commands::ClearHistory => workbench.clear_history().await,
        Commands::Models => {
            for option in agent_options() {
                println!("{:<18} {:<32} {}", option.id, option.model_id, option.label);
            }
        }
    }

    Ok(())
}
