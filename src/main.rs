use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlsage::db::{DatabaseGateway, PolarsGateway, PostgresGateway};
use sqlsage::llm::LlmClient;
use sqlsage::metadata::{SchemaProvider, StaticSchema};
use sqlsage::{Config, DataAssistant, QueryConfig, Turn, Verdict};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sqlsage")]
#[command(about = "Ask questions about your data in plain language")]
struct Args {
    /// Schema JSON file (overrides SQLSAGE_SCHEMA_PATH)
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Directory with CSV/Parquet files, used when DATABASE_URL is unset
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Print the reasoning steps behind each answer
    #[arg(long)]
    reasoning: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question
    Ask { question: String },
    /// Generate SQL for a question, run it and show a preview
    Sql { question: String },
    /// List the tables in the schema
    Schema,
    /// Interactive session
    Repl,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(schema) = &args.schema {
        config.database.schema_path = schema.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.database.data_dir = Some(dir.clone());
    }

    let schema = StaticSchema::load(&config.database.schema_path)
        .with_context(|| format!("loading schema from {}", config.database.schema_path.display()))?;

    if let Command::Schema = args.command {
        print_schema(&schema);
        return Ok(());
    }

    let database: Arc<dyn DatabaseGateway> = match (&config.database.url, &config.database.data_dir) {
        (Some(url), _) => Arc::new(PostgresGateway::connect(url, config.database.max_connections).await?),
        (None, Some(dir)) => Arc::new(PolarsGateway::from_schema(schema.overview(), dir)?),
        (None, None) => bail!("set DATABASE_URL or pass --data-dir"),
    };
    info!("Using {} database", database.name());

    let model = Arc::new(LlmClient::new(&config.llm)?);
    let assistant = DataAssistant::new(&config, model, database, Arc::new(schema));
    let query_config = QueryConfig {
        include_reasoning: args.reasoning,
        token_budget: None,
    };

    match args.command {
        Command::Ask { question } => {
            let response = assistant.submit_query(&question, Vec::new(), query_config).await;
            println!("{}", response.final_answer);
        }
        Command::Sql { question } => {
            let generated = assistant.generate_sql(&question, Vec::new()).await?;
            println!("{}\n", generated.sql);
            print_preview(&assistant, &generated.query_id)?;
        }
        Command::Repl => {
            let sweeper = assistant.cache().spawn_sweeper(Duration::from_secs(60));
            repl(&assistant, query_config).await?;
            sweeper.abort();
        }
        Command::Schema => {}
    }

    Ok(())
}

fn print_schema(schema: &StaticSchema) {
    for table in &schema.overview().tables {
        println!("{}  {}", table.name, table.description);
        for column in &table.columns {
            println!("    {:<24} {:<12} {}", column.name, column.data_type, column.description);
        }
    }
}

fn print_preview(assistant: &DataAssistant, query_id: &str) -> Result<()> {
    let preview = assistant.preview(query_id)?;
    println!("{}", preview.columns.join("\t"));
    for row in &preview.rows {
        let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        println!("{}", cells.join("\t"));
    }
    let shown = preview.rows.len();
    if preview.truncated {
        println!("({} of {} rows, query id {})", shown, preview.total_count, query_id);
    } else {
        println!("({} rows, query id {})", shown, query_id);
    }
    Ok(())
}

async fn repl(assistant: &DataAssistant, query_config: QueryConfig) -> Result<()> {
    let stdin = std::io::stdin();
    let mut history: Vec<Turn> = Vec::new();
    print!("sqlsage> ");
    std::io::stdout().flush()?;

    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        let (command, arg) = line.split_once(' ').unwrap_or((line, ""));
        let arg = arg.trim();

        let outcome = match command {
            "" => Ok(()),
            ":quit" | ":q" => break,
            ":preview" => print_preview(assistant, arg),
            ":interpret" => match assistant.interpret(arg).await {
                Ok(interpretation) => {
                    println!("{}", interpretation.summary);
                    for finding in &interpretation.key_findings {
                        println!("  - {}", finding);
                    }
                    if let Some(viz) = &interpretation.visualization {
                        println!("  chart: {} x={} y={}", viz.chart_type, viz.x, viz.y.as_deref().unwrap_or("-"));
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            },
            ":good" => assistant.feedback(arg, Verdict::Positive).map_err(Into::into),
            ":bad" => assistant.feedback(arg, Verdict::Negative).map_err(Into::into),
            _ => {
                let response = assistant.submit_query(line, history.clone(), query_config.clone()).await;
                println!("{}", response.final_answer);
                history.push(Turn::user(line));
                history.push(Turn::assistant(response.final_answer));
                Ok(())
            }
        };
        if let Err(e) = outcome {
            eprintln!("error: {}", e);
        }

        print!("sqlsage> ");
        std::io::stdout().flush()?;
    }
    Ok(())
}
