// Entrypoint for the `zeg` command.
// - Parses arguments, signs in, loads the collection description and hands
//   everything to `CollectionCreator`.
// - Returns `anyhow::Result` so every fatal error ends the process with a
//   message and a nonzero status.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;

use zeg_uploader::api::ApiClient;
use zeg_uploader::auth::{AuthClient, Authenticator};
use zeg_uploader::collection::CollectionCreator;
use zeg_uploader::config::CollectionConfig;
use zeg_uploader::rewrite::FileTrace;
use zeg_uploader::{logging, ui};

/// Command line script to create a Zeg based collection.
#[derive(Parser, Debug)]
#[command(name = "zeg", version, about)]
struct Args {
    /// Collection details in YAML format
    #[arg(long)]
    collection: PathBuf,

    /// Project id to make collection in
    #[arg(long)]
    project: String,

    /// Zegami api endpoint
    #[arg(long, default_value = "https://app.zegami.com/api/")]
    api_url: String,

    /// Zegami authentication endpoint
    #[arg(long, default_value = "https://app.zegami.com/oauth/token/")]
    oauth_url: String,

    /// Account email, prompted for when absent
    #[arg(long, env = "ZEGAMI_USERNAME")]
    username: Option<String>,

    /// Account password, prompted for when absent
    #[arg(long, env = "ZEGAMI_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Also write the rewritten template to this file
    #[arg(long)]
    trace_template: Option<PathBuf>,

    /// Show progress; repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    let (username, password) = ui::prompt_credentials(args.username, args.password)?;
    let auth = AuthClient::new(&args.oauth_url, &username, &password).context("Failed to build HTTP client")?;

    let spinner = ui::spinner("Signing in...");
    let token = auth.request_token();
    spinner.finish_and_clear();
    let Some(token) = token else {
        bail!("Failed to sign in!");
    };
    info!("User successfully signed in.");

    let config = CollectionConfig::load(&args.collection)
        .with_context(|| format!("Failed to load collection {}", args.collection.display()))?;

    let gateway = ApiClient::new(&args.api_url, &args.project, &token).context("Failed to build HTTP client")?;
    let mut trace = args.trace_template.map(FileTrace::new);

    let mut creator = CollectionCreator::new(&gateway, &auth).with_progress(std::io::stderr().is_terminal());
    if let Some(trace) = trace.as_mut() {
        creator = creator.with_trace(trace);
    }
    let report = creator.run(&config)?;

    info!(
        collection = %report.collection.id,
        uploaded = report.uploaded(),
        failed = report.failed(),
        "collection created"
    );
    Ok(())
}
