pub mod core_command {
    use std::fmt::Display;
    use std::sync::Arc;

    use anyhow::Result;
    use async_trait::async_trait;
    use clap::{Parser, Subcommand};
    use opthub_core::version_status::VersionStatus;
    use opthub_core::OptHub;
    use opthub_lib::client::OptHubClient;
    use opthub_lib::gen_matches;
    use opthub_lib::selection::{Selection, SelectionCache};
    use opthub_lib::settings::Settings;
    use tracing::{debug, warn};

    use super::{
        check_command::CheckCommand, download_command::DownloadCommand,
        history_command::HistoryCommand, select_command::SelectCommand,
        submit_command::SubmitCommand, trial_command::TrialCommand,
    };

    pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Shared state handed to every command
    pub struct Context {
        pub client: Arc<OptHubClient>,
        pub opthub: OptHub,
        pub cache: SelectionCache,
    }

    impl Context {
        pub fn new(settings: &Settings) -> Result<Self> {
            let client = Arc::new(OptHubClient::from_settings(settings)?);
            let opthub = OptHub::new(client.clone()).with_config(settings.workflow_config());
            Ok(Context {
                client,
                opthub,
                cache: SelectionCache::new(&settings.home),
            })
        }

        /// Competition and match from the flags, or the cached selection
        pub async fn selection(
            &self,
            competition: Option<&str>,
            match_alias: Option<&str>,
        ) -> Result<Selection> {
            Ok(self
                .cache
                .resolve(&self.client, competition, match_alias)
                .await?)
        }

        /// Logs a warning when a newer client is available. Failures to ask
        /// are not fatal.
        pub async fn warn_if_outdated(&self) {
            match self.client.latest_version().await {
                Ok(latest) => {
                    let status = VersionStatus::new(CLIENT_VERSION, &latest);
                    if status.needs_upgrade() {
                        warn!(local = CLIENT_VERSION, latest = %latest, "{}", status);
                    }
                }
                Err(e) => debug!(error = %e, "version check skipped"),
            }
        }
    }

    /// Represents a regular Command
    #[async_trait]
    pub trait OptHubCommand {
        async fn handle(&self, ctx: &Context) -> Result<()>;

        fn print_res<T: Display>(&self, res: T) -> Result<()>
        where
            Self: Sized,
        {
            print!("{}", res);
            Ok(())
        }
    }

    /// Command line client for OptHub
    #[derive(Parser)]
    #[command(version)]
    pub struct Cli {
        /// More log output, repeat for more detail
        #[arg(short, long, global = true, action = clap::ArgAction::Count)]
        pub verbose: u8,
        /// Write logs as JSON lines
        #[arg(long, global = true)]
        pub json: bool,
        #[command(subcommand)]
        pub command: Command,
    }

    /// Represents the "root" commands
    #[derive(Subcommand)]
    pub enum Command {
        /// Selects the competition and match later commands apply to
        Select(SelectCommand),
        /// Submits a solution and optionally waits for its result
        Submit(SubmitCommand),
        /// Shows one trial
        Trial(TrialCommand),
        /// Shows a page of your trials
        History(HistoryCommand),
        /// Downloads a range of trials as JSON
        Download(DownloadCommand),
        /// Compares the client version against the latest release
        Check(CheckCommand),
    }

    impl Command {
        pub fn cmd_value(&self) -> &dyn OptHubCommand {
            gen_matches!(
                self,
                Command::Select,
                Command::Submit,
                Command::Trial,
                Command::History,
                Command::Download,
                Command::Check
            )
        }
    }
}

mod select_command {
    use anyhow::Result;
    use async_trait::async_trait;
    use clap::Parser;

    use crate::commands::core_command::{Context, OptHubCommand};

    /// Stores the competition and match to work on
    #[derive(Parser, Default)]
    pub struct SelectCommand {
        /// Competition alias or id
        #[arg(short, long)]
        competition: Option<String>,
        /// Match alias or id
        #[arg(short, long = "match")]
        match_: Option<String>,
        /// Forget the current selection
        #[arg(long, conflicts_with_all = ["competition", "match_"])]
        clear: bool,
    }

    impl SelectCommand {
        async fn list(&self, ctx: &Context) -> Result<()> {
            if let Some(current) = ctx.cache.load()? {
                println!(
                    "Selected : {}/{}",
                    current.competition.alias, current.match_.alias
                );
            }

            let competitions = ctx.client.competitions().await?;
            if competitions.is_empty() {
                println!("You are not participating in any competition.");
            }
            for competition in competitions {
                println!("{}", competition.alias);
                for m in ctx.client.matches(&competition.id).await? {
                    println!("  {}", m.alias);
                }
            }
            Ok(())
        }
    }

    #[async_trait]
    impl OptHubCommand for SelectCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            if self.clear {
                ctx.cache.clear()?;
                println!("Selection cleared");
                return Ok(());
            }
            if self.competition.is_none() && self.match_.is_none() {
                return self.list(ctx).await;
            }

            let selection = ctx
                .selection(self.competition.as_deref(), self.match_.as_deref())
                .await?;
            ctx.cache.save(&selection)?;

            println!(
                "Selected {}/{}",
                selection.competition.alias, selection.match_.alias
            );
            Ok(())
        }
    }
}

mod submit_command {
    use std::path::PathBuf;
    use std::time::Duration;

    use anyhow::{Context as _, Result};
    use async_trait::async_trait;
    use clap::{Parser, ValueEnum};
    use opthub_core::validate::parse_solution;
    use opthub_core::{CancelToken, OptHubError};
    use tracing::info;

    use crate::commands::core_command::{Context, OptHubCommand};

    /// How far to follow a trial after submitting it
    #[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
    pub enum WaitFor {
        Evaluation,
        Scoring,
    }

    /// Submits a solution to the selected match
    #[derive(Parser)]
    pub struct SubmitCommand {
        /// Competition alias or id
        #[arg(short, long)]
        competition: Option<String>,
        /// Match alias or id
        #[arg(short, long = "match")]
        match_: Option<String>,
        /// Reads the solution from a file
        #[arg(short, long, conflicts_with = "solution")]
        file: Option<PathBuf>,
        /// The solution, e.g. `[1.0, 2.5]` or `1.0,2.5`
        #[arg(required_unless_present = "file")]
        solution: Option<String>,
        /// Waits for the trial to reach this phase
        #[arg(short, long, value_enum)]
        wait: Option<WaitFor>,
        /// Gives up waiting after this many seconds
        #[arg(short, long, requires = "wait")]
        timeout: Option<u64>,
    }

    impl SubmitCommand {
        fn read_solution(&self) -> Result<String> {
            match (&self.file, &self.solution) {
                (Some(path), _) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display())),
                (None, Some(solution)) => Ok(solution.clone()),
                (None, None) => Err(OptHubError::Validation {
                    reason: "no solution given".to_string(),
                }
                .into()),
            }
        }
    }

    #[async_trait]
    impl OptHubCommand for SubmitCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            // Checked before anything goes over the network.
            let variable = parse_solution(&self.read_solution()?)?;

            ctx.warn_if_outdated().await;
            let selection = ctx
                .selection(self.competition.as_deref(), self.match_.as_deref())
                .await?;

            println!(
                "Submitting to {}/{}...",
                selection.competition.alias, selection.match_.alias
            );
            let trial = ctx
                .opthub
                .match_handle(selection.match_.id.clone())
                .submit(variable)
                .await?;
            println!("...Submitted. Trial #{}", trial.trial_no());

            let Some(wait) = self.wait else {
                return Ok(());
            };

            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupted, no longer waiting");
                    trigger.cancel();
                }
            });

            let mut trial = trial.with_cancel(cancel);
            let timeout = self.timeout.map(Duration::from_secs);
            let res = match wait {
                WaitFor::Evaluation => trial.wait_for_evaluation(timeout).await.map(|evaluation| {
                    if let Some(objective) = &evaluation.objective {
                        println!("Objective : {}", objective);
                    }
                    if let Some(feasible) = evaluation.feasible {
                        println!("Feasible : {}", feasible);
                    }
                }),
                WaitFor::Scoring => trial.wait_for_scoring(timeout).await.map(|score| {
                    if let Some(value) = score.value {
                        println!("Score : {}", value);
                    }
                }),
            };
            ctrl_c.abort();

            Ok(res?)
        }
    }

}

mod trial_command {
    use anyhow::Result;
    use async_trait::async_trait;
    use clap::Parser;
    use opthub_core::model::{TrialNo, TrialSnapshot};
    use opthub_core::OptHubError;
    use opthub_lib::schemas::{TrialDetails, TrialLine};

    use crate::commands::core_command::{Context, OptHubCommand};

    /// Looks up one of your trials
    #[derive(Parser)]
    pub struct TrialCommand {
        /// Trial number
        trial_no: u64,
        /// Competition alias or id
        #[arg(short, long)]
        competition: Option<String>,
        /// Match alias or id
        #[arg(short, long = "match")]
        match_: Option<String>,
        /// Shows every recorded field
        #[arg(short, long)]
        details: bool,
    }

    #[async_trait]
    impl OptHubCommand for TrialCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            let trial_no = TrialNo::new(self.trial_no).ok_or_else(|| OptHubError::Validation {
                reason: "trial numbers start at 1".to_string(),
            })?;
            let selection = ctx
                .selection(self.competition.as_deref(), self.match_.as_deref())
                .await?;
            let match_id = selection.match_.id;

            let trial = ctx.opthub.match_handle(match_id.clone()).get_trial(trial_no).await?;
            let mut snapshot = TrialSnapshot::from(&trial);

            if !self.details {
                return self.print_res(TrialLine(&snapshot));
            }
            if snapshot.solution.is_none() {
                if let Some(solution) = ctx.client.solution(&match_id, trial_no).await? {
                    snapshot = snapshot.with_solution(solution);
                }
            }
            self.print_res(TrialDetails(&snapshot))
        }
    }
}

mod history_command {
    use anyhow::Result;
    use async_trait::async_trait;
    use clap::Parser;
    use opthub_lib::client::Order;

    use crate::commands::core_command::{Context, OptHubCommand};

    /// Shows a page of trials
    #[derive(Parser)]
    pub struct HistoryCommand {
        /// Competition alias or id
        #[arg(short, long)]
        competition: Option<String>,
        /// Match alias or id
        #[arg(short, long = "match")]
        match_: Option<String>,
        /// Number of trials to show
        #[arg(short, long, default_value_t = 20, value_parser = clap::value_parser!(u64).range(1..=50))]
        size: u64,
        /// Trial number to begin the page from
        #[arg(long)]
        start: Option<u64>,
        /// Newest trials first
        #[arg(long)]
        descending: bool,
        /// Only successful trials
        #[arg(long)]
        success: bool,
    }

    #[async_trait]
    impl OptHubCommand for HistoryCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            ctx.warn_if_outdated().await;
            let selection = ctx
                .selection(self.competition.as_deref(), self.match_.as_deref())
                .await?;

            let order = if self.descending {
                Order::Descending
            } else {
                Order::Ascending
            };
            let page = ctx
                .client
                .trials_page(&selection.match_.id, self.start, self.size, order)
                .await?;
            let page = if self.success { page.only_success() } else { page };

            self.print_res(page)
        }
    }
}

mod download_command {
    use std::path::PathBuf;

    use anyhow::{Context as _, Result};
    use async_stream::try_stream;
    use async_trait::async_trait;
    use clap::Parser;
    use human_bytes::human_bytes;
    use opthub_core::model::{MatchId, TrialSnapshot};
    use opthub_lib::client::{OptHubClient, Order};
    use opthub_lib::schemas::{page_windows, TrialPage};
    use tokio_stream::{Stream, StreamExt};
    use tracing::debug;

    use crate::commands::core_command::{Context, OptHubCommand};

    /// Number of trials fetched per request
    const PAGE_SIZE: u64 = 50;

    /// Saves a range of trials to a JSON file
    #[derive(Parser)]
    pub struct DownloadCommand {
        /// Competition alias or id
        #[arg(short, long)]
        competition: Option<String>,
        /// Match alias or id
        #[arg(short, long = "match")]
        match_: Option<String>,
        /// First trial number of the range
        #[arg(short, long, default_value_t = 0)]
        start: u64,
        /// Last trial number of the range
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        end: u64,
        /// Walks the range from the newest trial
        #[arg(long)]
        descending: bool,
        /// Only successful trials
        #[arg(long)]
        success: bool,
        /// Output file, `trials_<match>.json` by default
        #[arg(short, long)]
        output: Option<PathBuf>,
    }

    fn pages<'a>(
        client: &'a OptHubClient,
        match_id: &'a MatchId,
        windows: Vec<(u64, u64)>,
        order: Order,
    ) -> impl Stream<Item = opthub_core::Result<TrialPage>> + 'a {
        try_stream! {
            for (first, limit) in windows {
                debug!(first, limit, "fetching trials");
                let page = client.trials_page(match_id, Some(first), limit, order).await?;
                let done = match order {
                    Order::Ascending => page.is_last,
                    Order::Descending => page.is_first,
                };
                yield page;
                if done {
                    break;
                }
            }
        }
    }

    #[async_trait]
    impl OptHubCommand for DownloadCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            ctx.warn_if_outdated().await;
            let selection = ctx
                .selection(self.competition.as_deref(), self.match_.as_deref())
                .await?;
            let match_id = &selection.match_.id;

            let order = if self.descending {
                Order::Descending
            } else {
                Order::Ascending
            };
            let windows = page_windows(self.start, self.end, self.descending, PAGE_SIZE);

            let mut trials: Vec<TrialSnapshot> = Vec::new();
            let mut stream = Box::pin(pages(&ctx.client, match_id, windows, order));
            while let Some(page) = stream.next().await {
                let page = page?;
                let page = if self.success { page.only_success() } else { page };
                trials.extend(page.trials);
            }

            let output = self
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("trials_{}.json", selection.match_.alias)));
            let text = serde_json::to_string_pretty(&trials)?;
            std::fs::write(&output, &text)
                .with_context(|| format!("failed to write {}", output.display()))?;

            println!(
                "Downloaded {} trials to '{}' ({})",
                trials.len(),
                output.display(),
                human_bytes(text.len() as f64)
            );
            Ok(())
        }
    }
}

mod check_command {
    use anyhow::Result;
    use async_trait::async_trait;
    use clap::Parser;
    use opthub_core::version_status::VersionStatus;

    use crate::commands::core_command::{Context, OptHubCommand, CLIENT_VERSION};

    #[derive(Parser, Default)]
    pub struct CheckCommand {}

    #[async_trait]
    impl OptHubCommand for CheckCommand {
        async fn handle(&self, ctx: &Context) -> Result<()> {
            let latest = ctx.client.latest_version().await?;
            let status = VersionStatus::new(CLIENT_VERSION, &latest);

            println!("{} (installed {}, latest {})", status, CLIENT_VERSION, latest);
            Ok(())
        }
    }
}
