use std::process;

use paperwatch::classifier::openai::OpenAiClassifier;
use paperwatch::feed::arxiv::ArxivFeed;
use paperwatch::models::config::AppConfig;
use paperwatch::processing::run_pipeline;
use paperwatch::repository::github::GitHubRepository;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {e}");
            process::exit(1);
        }
    };
    log::info!(
        "Starting {} run (parallel: {}, concurrency: {})",
        config.mode,
        config.use_parallel,
        config.max_concurrent
    );

    let feed = match ArxivFeed::new(4) {
        Ok(feed) => feed,
        Err(e) => {
            log::error!("Failed to build feed client: {e}");
            process::exit(1);
        }
    };
    let classifier = match OpenAiClassifier::new(&config.openai_api_key) {
        Ok(classifier) => classifier,
        Err(e) => {
            log::error!("Failed to build classifier client: {e}");
            process::exit(1);
        }
    };
    let repo = match GitHubRepository::new(
        &config.github_token,
        &config.target_repo,
        &config.target_branch,
        &config.target_path,
    ) {
        Ok(repo) => repo,
        Err(e) => {
            log::error!("Failed to build repository client: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = run_pipeline(&feed, &classifier, &repo, &config).await {
        log::error!("Run failed: {e}");
        process::exit(1);
    }
}
