use anyhow::Result;
use clap::{Parser, Subcommand};

use sitepilot::agent::AgentRunner as _;
use sitepilot::client::{PollEvent, StatusPoller, TestClient, WorkflowLibrary};
use sitepilot::config::{Config, PollConfig};
use sitepilot::task::{ExecutionResult, ScreenshotInstruction, TaskState, TestConfig};

#[derive(Parser)]
#[command(
    name = "sitepilot",
    about = "AI-piloted website testing: submit tasks, watch runs, analyze results",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (task registry + worker pool + HTTP API)
    Serve {
        /// Config file (TOML)
        #[arg(long)]
        config: Option<String>,

        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite task store path (overrides config; in-memory when unset)
        #[arg(long)]
        database: Option<String>,

        /// Artifact directory for screenshots and agent logs (overrides config)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Run a task locally, without a server, and print the result
    Run {
        /// Target URL
        target_url: String,

        /// What the agent should do, in plain language
        task: String,

        /// Requested screenshot as "filename=step description" (repeatable)
        #[arg(long = "screenshot")]
        screenshots: Vec<String>,

        /// Config file (TOML)
        #[arg(long)]
        config: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Submit a task to a running server and watch it to completion
    Submit {
        /// Target URL
        target_url: String,

        /// What the agent should do, in plain language
        task: String,

        /// Requested screenshot as "filename=step description" (repeatable)
        #[arg(long = "screenshot")]
        screenshots: Vec<String>,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Return right after submission instead of polling
        #[arg(long)]
        no_watch: bool,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the current status of a task
    Status {
        task_id: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },

    /// Fetch the result of a completed task
    Result {
        task_id: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// List recent tasks on the server
    Tasks {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Request an AI analysis of a finished task
    Analyze {
        task_id: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the agent's step-by-step reasoning for a task
    Thoughts {
        task_id: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
    },

    /// Manage saved workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List saved workflows
    List {
        /// Workflow library file
        #[arg(long, default_value = "workflows.json")]
        file: String,
    },

    /// Save a workflow
    Save {
        /// Workflow name
        name: String,

        /// Target URL
        target_url: String,

        /// What the agent should do, in plain language
        task: String,

        /// Requested screenshot as "filename=step description" (repeatable)
        #[arg(long = "screenshot")]
        screenshots: Vec<String>,

        /// Workflow library file
        #[arg(long, default_value = "workflows.json")]
        file: String,
    },

    /// Remove a workflow
    Remove {
        /// Workflow name or id
        name: String,

        /// Workflow library file
        #[arg(long, default_value = "workflows.json")]
        file: String,
    },

    /// Submit a saved workflow to a server and watch it
    Submit {
        /// Workflow name or id
        name: String,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,

        /// Workflow library file
        #[arg(long, default_value = "workflows.json")]
        file: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            database,
            data_dir,
        } => {
            let mut cfg = Config::load_or_default(config.as_deref())?;
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            if let Some(database) = database {
                cfg.server.database = Some(database);
            }
            if let Some(data_dir) = data_dir {
                cfg.server.data_dir = data_dir;
            }
            tracing::info!(bind = %cfg.server.bind, "Starting SitePilot server");
            sitepilot::serve(cfg).await?;
        }
        Commands::Run {
            target_url,
            task,
            screenshots,
            config,
            json,
        } => {
            let cfg = Config::load_or_default(config.as_deref())?;
            let test = build_config(target_url, task, &screenshots)?;
            test.validate()?;

            let artifacts = sitepilot::artifacts::ArtifactStore::open(&cfg.server.data_dir)?;
            let agent = sitepilot::agent::LlmBrowserAgent::new(cfg.agent.clone())?;
            let task_id = sitepilot::task::new_task_id();
            tracing::info!(%task_id, target = %test.target_url, "Running task locally");

            let run = agent.run(&task_id, &test).await?;
            let result =
                sitepilot::registry::runner::persist_run(&artifacts, &task_id, &test, run)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Submit {
            target_url,
            task,
            screenshots,
            server,
            no_watch,
            json,
        } => {
            let test = build_config(target_url, task, &screenshots)?;
            test.validate()?;
            let client = TestClient::new(&server)?;

            if no_watch {
                let task_id = client.submit(&test).await?;
                println!("Task '{}' submitted.", task_id);
                println!(
                    "Status: {}/api/v1/task-status/{}",
                    server.trim_end_matches('/'),
                    task_id
                );
            } else {
                watch_to_end(client, test, json).await?;
            }
        }
        Commands::Status { task_id, server } => {
            let client = TestClient::new(&server)?;
            let status = client.status(&task_id).await?;
            println!("Task:     {}", status.task_id);
            println!("Status:   {}", status.status);
            if let Some(progress) = status.progress {
                println!("Progress: {}", progress);
            }
            if let Some(error) = status.error {
                println!("Error:    {}", error);
            }
            if let Some(start) = status.start_time {
                println!("Started:  {}", start.to_rfc3339());
            }
            if let Some(end) = status.end_time {
                println!("Ended:    {}", end.to_rfc3339());
            }
        }
        Commands::Result {
            task_id,
            server,
            json,
        } => {
            let client = TestClient::new(&server)?;
            let result = client.result(&task_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_result(&result);
            }
        }
        Commands::Tasks { server, json } => {
            let client = TestClient::new(&server)?;
            let tasks = client.tasks().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No tasks found.");
            } else {
                println!("{:<38} | {:<9} | Started", "Task", "Status");
                println!("{:-<38}-|-{:-<9}-|-{:-<25}", "", "", "");
                for task in tasks {
                    let started = task
                        .start_time
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{:<38} | {:<9} | {}", task.task_id, task.status, started);
                }
            }
        }
        Commands::Analyze {
            task_id,
            server,
            json,
        } => {
            let client = TestClient::new(&server)?;
            let analysis = client.analyze(&task_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&analysis)?);
            } else {
                println!("\n=== Analysis for {} ===\n", analysis.task_id);
                println!("{}", analysis.analysis_content);
            }
        }
        Commands::Thoughts { task_id, server } => {
            let client = TestClient::new(&server)?;
            let thoughts = client.agent_thoughts(&task_id).await?;
            println!("{}", thoughts);
        }
        Commands::Workflow { action } => match action {
            WorkflowAction::List { file } => {
                let library = WorkflowLibrary::open(&file);
                let workflows = library.list()?;
                if workflows.is_empty() {
                    println!("No workflows saved.");
                } else {
                    println!("{:<20} | {:<30} | Task", "Name", "Target");
                    println!("{:-<20}-|-{:-<30}-|-{:-<40}", "", "", "");
                    for wf in workflows {
                        println!(
                            "{:<20} | {:<30} | {}",
                            wf.name, wf.config.target_url, wf.config.task_description
                        );
                    }
                }
            }
            WorkflowAction::Save {
                name,
                target_url,
                task,
                screenshots,
                file,
            } => {
                let test = build_config(target_url, task, &screenshots)?;
                test.validate()?;
                let library = WorkflowLibrary::open(&file);
                library.save(&name, test)?;
                println!("Workflow '{}' saved.", name);
            }
            WorkflowAction::Remove { name, file } => {
                let library = WorkflowLibrary::open(&file);
                if library.remove(&name)? {
                    println!("Workflow '{}' removed.", name);
                } else {
                    println!("No workflow named '{}'.", name);
                }
            }
            WorkflowAction::Submit {
                name,
                server,
                file,
                json,
            } => {
                let library = WorkflowLibrary::open(&file);
                let workflow = library
                    .get(&name)?
                    .ok_or_else(|| anyhow::anyhow!("no workflow named '{name}'"))?;
                let client = TestClient::new(&server)?;
                watch_to_end(client, workflow.config, json).await?;
            }
        },
    }

    Ok(())
}

/// Turn `filename=description` pairs from the command line into
/// screenshot instructions.
fn build_config(
    target_url: String,
    task: String,
    screenshots: &[String],
) -> Result<TestConfig> {
    let mut instructions = Vec::with_capacity(screenshots.len());
    for raw in screenshots {
        let (filename, step_description) = raw.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("screenshot '{raw}' must look like filename=step description")
        })?;
        instructions.push(ScreenshotInstruction {
            step_description: step_description.trim().to_string(),
            filename: filename.trim().to_string(),
        });
    }
    Ok(TestConfig {
        target_url,
        task_description: task,
        screenshot_instructions: instructions,
    })
}

/// Submit and poll until the task reaches a terminal state, printing
/// progress as it changes.
async fn watch_to_end(client: TestClient, test: TestConfig, json: bool) -> Result<()> {
    let poller = StatusPoller::new(client, PollConfig::default());
    let mut watch = poller.watch(test);
    let mut last_progress = String::new();

    while let Some(event) = watch.next_event().await {
        match event {
            PollEvent::Submitted { task_id } => {
                println!("Task '{}' submitted, watching...", task_id);
            }
            PollEvent::Status(status) => {
                if status.status == TaskState::Queued || status.status == TaskState::Running {
                    if let Some(progress) = status.progress {
                        if progress != last_progress {
                            println!("  {}", progress);
                            last_progress = progress;
                        }
                    }
                }
            }
            PollEvent::Completed(result) => {
                if json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print_result(&result);
                }
            }
            PollEvent::Failed { error } => {
                anyhow::bail!("task failed: {error}");
            }
        }
    }
    Ok(())
}

fn print_result(result: &ExecutionResult) {
    println!("\n=== SitePilot Task Report ===");
    println!("Task:    {}", result.task_id);
    println!("Target:  {}", result.task_details.target_url);
    println!("Success: {}", result.success);
    println!("\nSteps:");
    for step in &result.execution_steps {
        println!(" {:>2}. {} -> {}", step.step_number, step.action, step.result);
    }
    if !result.screenshots.is_empty() {
        println!("\nScreenshots:");
        for shot in &result.screenshots {
            println!(" - {}", shot);
        }
    }
    if let Some(log) = &result.log_file {
        println!("\nDetailed log: {}", log);
    }
    println!("=============================\n");
}
