use anyhow::Result;
use clap::{Parser, Subcommand};
use leadgen_core::{Job, SearchSpecification, DEFAULT_MAX_PAGES};
use leadgen_pipeline::{build_pipeline, AppConfig, Dispatcher};
use leadgen_store::JobRecordStore as _;

#[derive(Debug, Parser)]
#[command(name = "leadgen-cli")]
#[command(about = "Job board lead generation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API with its background job worker.
    Serve,
    /// Run a single scraping job in the foreground and print the result.
    RunOnce {
        #[arg(long)]
        keywords: String,
        #[arg(long)]
        location: String,
        #[arg(long, default_value_t = DEFAULT_MAX_PAGES)]
        max_pages: u32,
        /// Keep recruitment-agency postings in scope.
        #[arg(long)]
        include_agencies: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();
    let pipeline = build_pipeline(&config).await?;

    match cli.command {
        Commands::Serve => {
            let dispatcher = Dispatcher::start(pipeline, config.dispatcher_config());
            leadgen_web::serve(dispatcher, config.web_port).await?;
        }
        Commands::RunOnce {
            keywords,
            location,
            max_pages,
            include_agencies,
        } => {
            let spec = SearchSpecification {
                keywords,
                location,
                experience_tier: None,
                job_type: None,
                industry: None,
                company_size: None,
                exclude_agencies: !include_agencies,
                max_pages,
            };
            spec.validate()?;

            let store = pipeline.store();
            let job = Job::new_pending(spec);
            store.create_job(&job).await?;
            pipeline
                .run_with_policy(job.id, &config.dispatcher_config())
                .await;

            if let Some(finished) = store.find_job(job.id).await? {
                println!(
                    "job {}: status={} listings={} leads={}",
                    finished.id,
                    finished.status.as_str(),
                    finished.total_listings_found,
                    finished.leads_generated
                );
            }
        }
    }

    Ok(())
}
